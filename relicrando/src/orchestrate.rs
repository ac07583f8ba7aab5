use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::info;
use relicrando_game::AccessModel;

use crate::errors::{RandoError, SearchError};
use crate::randomize::{attempt_rng, Randomization, Randomizer};
use crate::settings::SearchSettings;

/// Requests flow from the orchestrator to one worker. The first message
/// is always a bootstrap carrying the shared model; later messages hand
/// the worker its next slice of the attempt space.
pub enum WorkerRequest {
    Bootstrap {
        model: Arc<AccessModel>,
        seed: u64,
        fingerprint: u64,
        nonce: u64,
    },
    Attempt {
        nonce: u64,
    },
    Cancel,
}

pub enum WorkerReply {
    Done {
        worker: usize,
        nonce: u64,
        result: Box<Randomization>,
    },
    Miss {
        worker: usize,
    },
    Failed {
        worker: usize,
        error: SearchError,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct SearchConfig {
    pub num_workers: usize,
    pub attempts_per_round: u64,
    pub max_rounds: u64,
}

impl SearchConfig {
    pub fn from_settings(settings: &SearchSettings) -> Self {
        let num_workers = settings
            .num_workers
            .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);
        let attempts_per_round = settings.attempts_per_round.max(1);
        SearchConfig {
            num_workers,
            attempts_per_round,
            max_rounds: settings.max_attempts.div_ceil(attempts_per_round),
        }
    }
}

/// Among competing successes, the earliest-dispatched attempt wins,
/// giving reproducibility independent of wall-clock scheduling.
pub fn prefer_lower_nonce(
    current: Option<Randomization>,
    candidate: Randomization,
) -> Randomization {
    match current {
        Some(cur) if cur.nonce <= candidate.nonce => cur,
        _ => candidate,
    }
}

fn worker_round(
    randomizer: &Randomizer,
    seed: u64,
    fingerprint: u64,
    nonce: u64,
    attempts: u64,
) -> Result<Option<Randomization>, SearchError> {
    // One private RNG stream per round, derived from (seed, nonce).
    let mut rng = attempt_rng(seed, fingerprint, nonce);
    for _ in 0..attempts {
        if let Some(result) = randomizer.attempt(nonce, &mut rng)? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

fn run_worker(
    worker: usize,
    attempts_per_round: u64,
    rx: Receiver<WorkerRequest>,
    reply_tx: Sender<WorkerReply>,
) {
    let mut bootstrap: Option<(Arc<AccessModel>, u64, u64)> = None;
    while let Ok(request) = rx.recv() {
        let nonce = match request {
            WorkerRequest::Bootstrap {
                model,
                seed,
                fingerprint,
                nonce,
            } => {
                bootstrap = Some((model, seed, fingerprint));
                nonce
            }
            WorkerRequest::Attempt { nonce } => nonce,
            WorkerRequest::Cancel => break,
        };
        let Some((model, seed, fingerprint)) = &bootstrap else {
            // Attempt before bootstrap: protocol violation by the caller.
            let _ = reply_tx.send(WorkerReply::Failed {
                worker,
                error: SearchError {
                    location: "<orchestrator>".to_string(),
                    message: "attempt dispatched before bootstrap".to_string(),
                },
            });
            break;
        };
        let randomizer = Randomizer::new(model);
        let reply = match worker_round(&randomizer, *seed, *fingerprint, nonce, attempts_per_round)
        {
            Ok(Some(result)) => WorkerReply::Done {
                worker,
                nonce,
                result: Box::new(result),
            },
            Ok(None) => WorkerReply::Miss { worker },
            Err(error) => WorkerReply::Failed { worker, error },
        };
        let failed = matches!(reply, WorkerReply::Failed { .. });
        if reply_tx.send(reply).is_err() || failed {
            break;
        }
    }
}

/// Race `num_workers` placement searches over disjoint nonce slices and
/// return the lowest-nonce success. Cancellation is cooperative: losers
/// finish their current round, and any competing success they produce
/// still participates in the tie-break.
pub fn orchestrate(
    model: Arc<AccessModel>,
    seed: u64,
    fingerprint: u64,
    nonce_base: u64,
    config: &SearchConfig,
) -> Result<Randomization, RandoError> {
    let (reply_tx, reply_rx) = channel::<WorkerReply>();
    let mut req_txs: Vec<Sender<WorkerRequest>> = vec![];
    let mut handles = vec![];
    for worker in 0..config.num_workers {
        let (req_tx, req_rx) = channel::<WorkerRequest>();
        let reply_tx = reply_tx.clone();
        let attempts_per_round = config.attempts_per_round;
        handles.push(thread::spawn(move || {
            run_worker(worker, attempts_per_round, req_rx, reply_tx)
        }));
        req_txs.push(req_tx);
    }
    drop(reply_tx);

    let max_nonce = nonce_base + config.max_rounds;
    let mut next_nonce = nonce_base;
    let mut idle_workers = 0;
    for tx in &req_txs {
        if next_nonce < max_nonce {
            let _ = tx.send(WorkerRequest::Bootstrap {
                model: model.clone(),
                seed,
                fingerprint,
                nonce: next_nonce,
            });
            next_nonce += 1;
        } else {
            let _ = tx.send(WorkerRequest::Cancel);
            idle_workers += 1;
        }
    }

    let mut winner: Option<Randomization> = None;
    let outcome: Result<(), SearchError> = loop {
        if idle_workers == config.num_workers {
            break Ok(());
        }
        match reply_rx.recv() {
            Ok(WorkerReply::Miss { worker }) => {
                if next_nonce < max_nonce {
                    let _ = req_txs[worker].send(WorkerRequest::Attempt { nonce: next_nonce });
                    next_nonce += 1;
                } else {
                    let _ = req_txs[worker].send(WorkerRequest::Cancel);
                    idle_workers += 1;
                }
            }
            Ok(WorkerReply::Done {
                worker,
                nonce,
                result,
            }) => {
                info!("Worker {worker} found a valid placement at nonce {nonce}");
                winner = Some(prefer_lower_nonce(winner, *result));
                break Ok(());
            }
            // First error wins over later successes.
            Ok(WorkerReply::Failed { error, .. }) => break Err(error),
            Err(_) => break Ok(()),
        }
    };

    // Signal every worker and drain stragglers: a loser that already
    // produced a competing success is handled by the nonce tie-break,
    // not discarded blindly.
    for tx in &req_txs {
        let _ = tx.send(WorkerRequest::Cancel);
    }
    drop(req_txs);
    while let Ok(reply) = reply_rx.recv() {
        if let WorkerReply::Done { result, .. } = reply {
            winner = Some(prefer_lower_nonce(winner, *result));
        }
    }
    for handle in handles {
        let _ = handle.join();
    }

    outcome?;
    match winner {
        Some(result) => {
            info!(
                "Search accepted nonce {} after dispatching {} rounds",
                result.nonce,
                next_nonce - nonce_base
            );
            Ok(result)
        }
        None => Err(RandoError::SearchExhausted {
            attempts: (next_nonce - nonce_base) * config.attempts_per_round,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traverse::ProofDag;

    fn fabricated(nonce: u64) -> Randomization {
        Randomization {
            assignment: vec![0],
            proof: ProofDag {
                order: vec![0],
                requires: vec![vec![]],
            },
            nonce,
        }
    }

    #[test]
    fn tie_break_prefers_lowest_nonce() {
        let winner = prefer_lower_nonce(Some(fabricated(5)), fabricated(3));
        assert_eq!(winner.nonce, 3);
        let winner = prefer_lower_nonce(Some(fabricated(3)), fabricated(5));
        assert_eq!(winner.nonce, 3);
        let winner = prefer_lower_nonce(None, fabricated(5));
        assert_eq!(winner.nonce, 5);
    }
}
