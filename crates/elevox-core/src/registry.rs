//! Beacon catalogue and detection constants.
//!
//! Every floor is marked by a Bluetooth beacon advertising a fixed name. The
//! registry maps those names to floor numbers and is immutable once built, so
//! it can be shared across tasks behind an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Minimum RSSI (dBm) for a beacon to take part in floor detection.
pub const RSSI_THRESHOLD: i16 = -90;

/// Signal advantage (dB) a new floor needs over the locked floor before switching.
pub const HYSTERESIS_MARGIN_DB: i16 = 5;

/// Period of one scan cycle.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(5000);

/// Active listening time inside each scan cycle.
pub const SCAN_WINDOW: Duration = Duration::from_millis(2000);

/// Beacons installed in the building, in registry order.
const FLOOR_BEACONS: &[(&str, u32)] = &[("terreo", 0), ("1", 1), ("2", 2), ("3", 3)];

static BUILTIN: Lazy<Arc<BeaconRegistry>> = Lazy::new(|| {
    let definitions = FLOOR_BEACONS
        .iter()
        .map(|&(identifier, floor)| BeaconDefinition::new(identifier, floor))
        .collect();
    // The compiled-in table has unique, non-empty identifiers.
    Arc::new(BeaconRegistry::from_unique(definitions))
});

/// Errors raised while building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two beacons share the same advertised name.
    #[error("Beacon identifier '{0}' is defined more than once")]
    DuplicateIdentifier(String),

    /// No beacons were supplied.
    #[error("Beacon registry must contain at least one beacon")]
    Empty,
}

/// A beacon and the floor it marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BeaconDefinition {
    /// Advertised device name.
    #[schema(example = "terreo")]
    pub identifier: String,

    /// Floor number marked by this beacon.
    #[schema(example = 0)]
    pub floor: u32,
}

impl BeaconDefinition {
    /// Create a beacon definition.
    pub fn new(identifier: impl Into<String>, floor: u32) -> Self {
        Self {
            identifier: identifier.into(),
            floor,
        }
    }
}

/// Immutable identifier → floor lookup table.
#[derive(Debug, Clone)]
pub struct BeaconRegistry {
    beacons: Vec<BeaconDefinition>,
    index: HashMap<String, usize>,
}

impl BeaconRegistry {
    /// Build a registry from beacon definitions, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns an error if `definitions` is empty or contains a duplicate identifier.
    pub fn new(definitions: Vec<BeaconDefinition>) -> Result<Self, RegistryError> {
        if definitions.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut index = HashMap::with_capacity(definitions.len());
        for (position, beacon) in definitions.iter().enumerate() {
            if index.insert(beacon.identifier.clone(), position).is_some() {
                return Err(RegistryError::DuplicateIdentifier(beacon.identifier.clone()));
            }
        }

        Ok(Self {
            beacons: definitions,
            index,
        })
    }

    fn from_unique(definitions: Vec<BeaconDefinition>) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(position, beacon)| (beacon.identifier.clone(), position))
            .collect();
        Self {
            beacons: definitions,
            index,
        }
    }

    /// The compiled-in beacon table for this building.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN)
    }

    /// Whether `identifier` belongs to a registered beacon.
    #[must_use]
    pub fn is_known(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    /// Floor marked by `identifier`, if registered.
    #[must_use]
    pub fn floor_of(&self, identifier: &str) -> Option<u32> {
        self.index.get(identifier).map(|&i| self.beacons[i].floor)
    }

    /// Registry position of `identifier`; lower positions win signal ties.
    #[must_use]
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.index.get(identifier).copied()
    }

    /// All beacons in registry order.
    #[must_use]
    pub fn beacons(&self) -> &[BeaconDefinition] {
        &self.beacons
    }

    /// Distinct floors, ascending.
    #[must_use]
    pub fn floors(&self) -> Vec<u32> {
        let mut floors: Vec<u32> = self.beacons.iter().map(|b| b.floor).collect();
        floors.sort_unstable();
        floors.dedup();
        floors
    }

    /// Number of registered beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Always `false`; a registry cannot be built empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }
}

/// Human-readable name of a floor.
#[must_use]
pub fn floor_label(floor: u32) -> String {
    match floor {
        0 => "Ground floor".to_string(),
        n => format!("Floor {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BeaconRegistry {
        BeaconRegistry::new(vec![
            BeaconDefinition::new("ground", 0),
            BeaconDefinition::new("one", 1),
            BeaconDefinition::new("two", 2),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = sample();
        assert!(registry.is_known("one"));
        assert!(!registry.is_known("lobby-speaker"));
        assert_eq!(registry.floor_of("two"), Some(2));
        assert_eq!(registry.floor_of("three"), None);
        assert_eq!(registry.position("ground"), Some(0));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = BeaconRegistry::new(vec![
            BeaconDefinition::new("a", 0),
            BeaconDefinition::new("a", 1),
        ])
        .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateIdentifier("a".into()));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(BeaconRegistry::new(Vec::new()).unwrap_err(), RegistryError::Empty);
    }

    #[test]
    fn test_builtin_table() {
        let registry = BeaconRegistry::builtin();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.floor_of("terreo"), Some(0));
        assert_eq!(registry.floor_of("3"), Some(3));
        assert_eq!(registry.floors(), vec![0, 1, 2, 3]);
        assert!(Arc::ptr_eq(&registry, &BeaconRegistry::builtin()));
    }

    #[test]
    fn test_floor_label() {
        assert_eq!(floor_label(0), "Ground floor");
        assert_eq!(floor_label(2), "Floor 2");
    }
}
