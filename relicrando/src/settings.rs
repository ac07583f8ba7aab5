use std::hash::{Hash, Hasher};

use relicrando_game::{
    AccessModel, ExtensionMode, GameData, GoalDef, ModelError, PlacedConstraint,
};
use serde::{Deserialize, Serialize};

/// Replacement lock table for one location.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LockOverride {
    pub location: String,
    pub locks: Vec<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SearchSettings {
    /// Worker count; `None` means available parallelism.
    pub num_workers: Option<usize>,
    /// Attempts a worker runs per message exchange.
    pub attempts_per_round: u64,
    /// Total attempt budget across all workers.
    pub max_attempts: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            num_workers: None,
            attempts_per_round: 64,
            max_attempts: 10000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RandomizerSettings {
    pub version: usize,
    pub name: Option<String>,
    #[serde(default)]
    pub extension_mode: ExtensionMode,
    #[serde(default)]
    pub placed: Vec<PlacedConstraint>,
    #[serde(default)]
    pub lock_overrides: Vec<LockOverride>,
    #[serde(default)]
    pub escape_overrides: Vec<LockOverride>,
    #[serde(default)]
    pub goal: Option<GoalDef>,
    #[serde(default)]
    pub search: SearchSettings,
}

impl Default for RandomizerSettings {
    fn default() -> Self {
        RandomizerSettings {
            version: 0,
            name: None,
            extension_mode: ExtensionMode::default(),
            placed: vec![],
            lock_overrides: vec![],
            escape_overrides: vec![],
            goal: None,
            search: SearchSettings::default(),
        }
    }
}

impl RandomizerSettings {
    /// Merge overrides into the game data and build the validated model.
    pub fn build_model(&self, game_data: &GameData) -> Result<AccessModel, ModelError> {
        let mut game_data = game_data.clone();
        for o in &self.lock_overrides {
            game_data.override_locks(&o.location, &o.locks)?;
        }
        for o in &self.escape_overrides {
            game_data.override_escape_locks(&o.location, &o.locks)?;
        }
        AccessModel::build(
            &game_data,
            self.extension_mode,
            &self.placed,
            self.goal.as_ref(),
        )
    }

    /// Stable digest of (version, options), folded into each worker's
    /// RNG stream so that identical (version, options, seed, nonce)
    /// tuples reproduce identical attempts.
    pub fn fingerprint(&self) -> u64 {
        let serialized =
            serde_json::to_string(self).expect("settings are always serializable");
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.version.hash(&mut hasher);
        serialized.hash(&mut hasher);
        hasher.finish()
    }
}
