use anyhow::{Context, Result};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::hash::Hash;
use std::path::Path;
use thiserror::Error;

pub type TokenId = usize; // Index into GameData.token_isv.keys: distinct ability names
pub type LocationId = usize; // Index into AccessModel.location_isv.keys: locations active under the chosen extension mode

/// AND-set of ability tokens. A location holding OR-of-locks becomes
/// reachable once every token of any one lock is held.
pub type Lock = Vec<TokenId>;

#[derive(Default, Clone, Debug)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq + Clone> IndexedVec<T> {
    pub fn add<U: ToOwned<Owned = T> + ?Sized>(&mut self, name: &U) -> usize {
        if !self.index_by_key.contains_key(&name.to_owned()) {
            let idx = self.keys.len();
            self.index_by_key.insert(name.to_owned(), idx);
            self.keys.push(name.to_owned());
            idx
        } else {
            self.index_by_key[&name.to_owned()]
        }
    }
}

/// Which pool a token or location belongs to. `Base` entries are always
/// present; `Guarded` and `Equipment` entries join only when the
/// corresponding extension mode is enabled.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationTier {
    #[default]
    Base,
    Guarded,
    Equipment,
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionMode {
    #[default]
    None,
    Guarded,
    Equipment,
}

impl ExtensionMode {
    /// `Equipment` implies `Guarded`'s entries are also included.
    pub fn includes(self, tier: LocationTier) -> bool {
        match tier {
            LocationTier::Base => true,
            LocationTier::Guarded => self >= ExtensionMode::Guarded,
            LocationTier::Equipment => self >= ExtensionMode::Equipment,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown token \"{token}\" referenced by {context}")]
    UnknownToken { token: String, context: String },
    #[error("unknown location \"{location}\" referenced by {context}")]
    UnknownLocation { location: String, context: String },
    #[error("duplicate location \"{0}\"")]
    DuplicateLocation(String),
    #[error("duplicate token \"{0}\"")]
    DuplicateToken(String),
    #[error("{tokens} tokens but {locations} locations under extension mode {mode:?}: placement requires a bijection")]
    CountMismatch {
        tokens: usize,
        locations: usize,
        mode: ExtensionMode,
    },
    #[error("token \"{token}\" is pinned more than once")]
    DuplicatePinnedToken { token: String },
    #[error("location \"{location}\" is pinned more than once")]
    DuplicatePinnedLocation { location: String },
    #[error("pinned token \"{token}\" appears in every lock of its own location \"{location}\"")]
    PinConflictsWithLock { token: String, location: String },
}

#[derive(Clone, Debug)]
pub struct Location {
    pub name: String,
    pub tier: LocationTier,
    /// OR-of-locks; empty means unconditionally reachable.
    pub locks: Vec<Lock>,
    /// Every route granting access must satisfy one of these.
    pub escape_locks: Vec<Lock>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenDef {
    pub name: String,
    #[serde(default)]
    pub tier: LocationTier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationDef {
    pub name: String,
    #[serde(default)]
    pub tier: LocationTier,
    #[serde(default)]
    pub locks: Vec<Vec<String>>,
    #[serde(default)]
    pub escape_locks: Vec<Vec<String>>,
}

/// Raw model definition as it appears in the JSON data file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameDef {
    pub tokens: Vec<TokenDef>,
    pub locations: Vec<LocationDef>,
}

/// Pinned mapping forcing a specific token into a specific location,
/// removed from the randomizable pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedConstraint {
    pub token: String,
    pub location: String,
}

/// Win-condition bounds: the shortest dependency chain satisfying one
/// of `targets` must have length within `[min_depth, max_depth]`.
#[derive(Clone, Debug)]
pub struct ComplexityGoal {
    pub min_depth: usize,
    pub max_depth: Option<usize>,
    pub targets: Vec<Lock>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDef {
    pub min_depth: usize,
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub targets: Vec<Vec<String>>,
}

/// Static game description: the full token and location tables across
/// all tiers, with lock token names resolved to ids.
#[derive(Clone, Debug)]
pub struct GameData {
    pub token_isv: IndexedVec<String>,
    pub token_tiers: Vec<LocationTier>,
    pub locations: Vec<Location>,
}

impl GameData {
    pub fn load(path: &Path) -> Result<GameData> {
        let file = File::open(path)
            .with_context(|| format!("unable to open {}", path.display()))?;
        let def: GameDef = serde_json::from_reader(file)
            .with_context(|| format!("unable to parse {}", path.display()))?;
        let game_data = GameData::from_def(&def)
            .with_context(|| format!("invalid model definition in {}", path.display()))?;
        Ok(game_data)
    }

    /// Replace the access locks of one location, used for user overrides
    /// merged in before the model is built.
    pub fn override_locks(&mut self, location: &str, locks: &[Vec<String>]) -> Result<(), ModelError> {
        let context = format!("lock override for \"{location}\"");
        let resolved = resolve_locks(&self.token_isv, locks, &context)?;
        let loc = self.location_mut(location, &context)?;
        loc.locks = resolved;
        Ok(())
    }

    pub fn override_escape_locks(
        &mut self,
        location: &str,
        locks: &[Vec<String>],
    ) -> Result<(), ModelError> {
        let context = format!("escape override for \"{location}\"");
        let resolved = resolve_locks(&self.token_isv, locks, &context)?;
        let loc = self.location_mut(location, &context)?;
        loc.escape_locks = resolved;
        Ok(())
    }

    fn location_mut(&mut self, name: &str, context: &str) -> Result<&mut Location, ModelError> {
        self.locations
            .iter_mut()
            .find(|loc| loc.name == name)
            .ok_or_else(|| ModelError::UnknownLocation {
                location: name.to_string(),
                context: context.to_string(),
            })
    }

    pub fn from_def(def: &GameDef) -> Result<GameData, ModelError> {
        let mut token_isv: IndexedVec<String> = IndexedVec::default();
        let mut token_tiers: Vec<LocationTier> = vec![];
        for t in &def.tokens {
            if token_isv.index_by_key.contains_key(&t.name) {
                return Err(ModelError::DuplicateToken(t.name.clone()));
            }
            token_isv.add(&t.name);
            token_tiers.push(t.tier);
        }

        let mut locations: Vec<Location> = vec![];
        let mut seen_names: HashMap<&str, ()> = HashMap::new();
        for loc in &def.locations {
            if seen_names.insert(loc.name.as_str(), ()).is_some() {
                return Err(ModelError::DuplicateLocation(loc.name.clone()));
            }
            let context = format!("location \"{}\"", loc.name);
            let locks = resolve_locks(&token_isv, &loc.locks, &context)?;
            let escape_locks = resolve_locks(&token_isv, &loc.escape_locks, &context)?;
            locations.push(Location {
                name: loc.name.clone(),
                tier: loc.tier,
                locks,
                escape_locks,
            });
        }

        Ok(GameData {
            token_isv,
            token_tiers,
            locations,
        })
    }
}

fn resolve_locks(
    token_isv: &IndexedVec<String>,
    locks: &[Vec<String>],
    context: &str,
) -> Result<Vec<Lock>, ModelError> {
    let mut out: Vec<Lock> = vec![];
    for lock in locks {
        let mut resolved: Lock = vec![];
        for name in lock {
            let &id = token_isv.index_by_key.get(name).ok_or_else(|| {
                ModelError::UnknownToken {
                    token: name.clone(),
                    context: context.to_string(),
                }
            })?;
            resolved.push(id);
        }
        out.push(resolved);
    }
    Ok(out)
}

/// The validated puzzle instance handed to every search worker:
/// immutable once constructed, shared read-only.
#[derive(Clone, Debug)]
pub struct AccessModel {
    pub token_isv: IndexedVec<String>,
    /// Token pool active under the chosen extension mode.
    pub pool: Vec<TokenId>,
    /// Locations active under the chosen extension mode, in definition order.
    pub locations: Vec<Location>,
    pub location_isv: IndexedVec<String>,
    /// Pinned token per location, indexed by LocationId.
    pub placed: Vec<Option<TokenId>>,
    pub goal: Option<ComplexityGoal>,
    pub extension_mode: ExtensionMode,
}

impl AccessModel {
    pub fn build(
        game_data: &GameData,
        extension_mode: ExtensionMode,
        placed: &[PlacedConstraint],
        goal: Option<&GoalDef>,
    ) -> Result<AccessModel, ModelError> {
        let pool: Vec<TokenId> = (0..game_data.token_isv.keys.len())
            .filter(|&id| extension_mode.includes(game_data.token_tiers[id]))
            .collect();
        let locations: Vec<Location> = game_data
            .locations
            .iter()
            .filter(|loc| extension_mode.includes(loc.tier))
            .cloned()
            .collect();
        if pool.len() != locations.len() {
            return Err(ModelError::CountMismatch {
                tokens: pool.len(),
                locations: locations.len(),
                mode: extension_mode,
            });
        }
        let mut location_isv: IndexedVec<String> = IndexedVec::default();
        for loc in &locations {
            location_isv.add(&loc.name);
        }

        let mut placed_by_location: Vec<Option<TokenId>> = vec![None; locations.len()];
        let mut pinned_tokens: Vec<bool> = vec![false; game_data.token_isv.keys.len()];
        for pin in placed {
            let &token_id = game_data.token_isv.index_by_key.get(&pin.token).ok_or_else(
                || ModelError::UnknownToken {
                    token: pin.token.clone(),
                    context: "placed constraint".to_string(),
                },
            )?;
            if !extension_mode.includes(game_data.token_tiers[token_id]) {
                return Err(ModelError::UnknownToken {
                    token: pin.token.clone(),
                    context: format!("placed constraint under extension mode {extension_mode:?}"),
                });
            }
            let &loc_id = location_isv.index_by_key.get(&pin.location).ok_or_else(
                || ModelError::UnknownLocation {
                    location: pin.location.clone(),
                    context: "placed constraint".to_string(),
                },
            )?;
            if pinned_tokens[token_id] {
                return Err(ModelError::DuplicatePinnedToken {
                    token: pin.token.clone(),
                });
            }
            if placed_by_location[loc_id].is_some() {
                return Err(ModelError::DuplicatePinnedLocation {
                    location: pin.location.clone(),
                });
            }
            let loc = &locations[loc_id];
            if !loc.locks.is_empty() && loc.locks.iter().all(|lock| lock.contains(&token_id)) {
                return Err(ModelError::PinConflictsWithLock {
                    token: pin.token.clone(),
                    location: pin.location.clone(),
                });
            }
            pinned_tokens[token_id] = true;
            placed_by_location[loc_id] = Some(token_id);
        }

        let goal = match goal {
            Some(g) => {
                let targets =
                    resolve_locks(&game_data.token_isv, &g.targets, "complexity goal")?;
                Some(ComplexityGoal {
                    min_depth: g.min_depth,
                    max_depth: g.max_depth,
                    targets,
                })
            }
            None => None,
        };

        Ok(AccessModel {
            token_isv: game_data.token_isv.clone(),
            pool,
            locations,
            location_isv,
            placed: placed_by_location,
            goal,
            extension_mode,
        })
    }

    pub fn token_name(&self, id: TokenId) -> &str {
        &self.token_isv.keys[id]
    }

    pub fn location_name(&self, id: LocationId) -> &str {
        &self.locations[id].name
    }
}
