use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rand::{RngCore, SeedableRng};
use relicrando::orchestrate::{orchestrate, SearchConfig};
use relicrando::settings::RandomizerSettings;
use relicrando::spoiler_log::make_spoiler_log;
use relicrando_game::{ExtensionMode, GameData};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
struct Args {
    /// Model definition JSON (tokens, locations, locks).
    #[arg(long)]
    model: PathBuf,

    /// Randomizer settings JSON; defaults apply when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    random_seed: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    max_attempts: Option<u64>,

    /// Extension mode: none, guarded, or equipment.
    #[arg(long)]
    extension: Option<String>,

    #[arg(long)]
    output_spoiler_log: Option<PathBuf>,

    /// Print the minimized proof listing to stdout.
    #[arg(long)]
    print_proof: bool,
}

fn load_settings(args: &Args) -> Result<RandomizerSettings> {
    let mut settings = match &args.settings {
        Some(path) => {
            let settings_str = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read settings at {}", path.display()))?;
            serde_json::from_str(&settings_str)
                .with_context(|| format!("unable to parse settings at {}", path.display()))?
        }
        None => RandomizerSettings::default(),
    };
    if let Some(workers) = args.workers {
        settings.search.num_workers = Some(workers);
    }
    if let Some(max_attempts) = args.max_attempts {
        settings.search.max_attempts = max_attempts;
    }
    if let Some(extension) = &args.extension {
        settings.extension_mode = match extension.as_str() {
            "none" => ExtensionMode::None,
            "guarded" => ExtensionMode::Guarded,
            "equipment" => ExtensionMode::Equipment,
            other => bail!("unrecognized extension mode \"{other}\""),
        };
    }
    Ok(settings)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;
    let game_data = GameData::load(&args.model)?;
    let model = settings.build_model(&game_data)?;

    let seed = match args.random_seed {
        Some(s) => s,
        None => rand::rngs::StdRng::from_entropy().next_u64() & 0xFFFFFFFF,
    };
    let config = SearchConfig::from_settings(&settings.search);
    info!(
        "Seed={seed}, {} workers, {} rounds of {} attempts",
        config.num_workers, config.max_rounds, config.attempts_per_round
    );

    let model = Arc::new(model);
    let randomization = orchestrate(model.clone(), seed, settings.fingerprint(), 0, &config)?;
    let spoiler_log = make_spoiler_log(&model, &randomization, seed)?;

    for placement in &spoiler_log.placements {
        info!("{}: {}", placement.location, placement.token);
    }
    if args.print_proof {
        for line in &spoiler_log.proof_text {
            println!("{line}");
        }
    }
    if let Some(output_spoiler_log_path) = &args.output_spoiler_log {
        println!(
            "Writing spoiler log to {}",
            output_spoiler_log_path.display()
        );
        let spoiler_str = serde_json::to_string_pretty(&spoiler_log)?;
        std::fs::write(output_spoiler_log_path, spoiler_str)?;
    }

    Ok(())
}
