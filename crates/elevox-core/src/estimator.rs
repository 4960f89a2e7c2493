//! Floor estimation from per-window beacon signal strengths.
//!
//! The estimator picks the strongest beacon above the RSSI threshold and
//! applies hysteresis so a device sitting between two beacons of similar
//! strength does not flip between floors every window.
//!
//! ```text
//!                  strongest beacon on a new floor
//!   Uninitialized ────────────────────────────────▶ Locked(floor)
//!         ▲                                           │   ▲
//!         │ reset()            advantage >= margin,   │   │
//!         └──────────────────  or old beacon absent   └───┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::registry::{BeaconRegistry, HYSTERESIS_MARGIN_DB, RSSI_THRESHOLD};
use crate::scanner::Observation;

/// Strongest sighting of one beacon during a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconSighting {
    /// Registered identifier of the beacon.
    pub identifier: String,
    /// Address that produced the strongest reading.
    pub address: String,
    /// Strongest signal seen in the window, in dBm.
    pub signal_strength: i16,
}

/// Everything observed during one scan window.
///
/// Readings are de-duplicated by address (the latest advertisement from an
/// address wins), then reduced to the strongest reading per beacon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowObservations {
    by_address: HashMap<String, Observation>,
}

impl WindowObservations {
    /// An empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A window in which each beacon was heard once at the given strength.
    pub fn from_strengths<I, S>(strengths: I) -> Self
    where
        I: IntoIterator<Item = (S, i16)>,
        S: Into<String>,
    {
        let mut window = Self::new();
        for (identifier, signal_strength) in strengths {
            let identifier = identifier.into();
            window.record(Observation {
                address: identifier.clone(),
                beacon_identifier: identifier,
                signal_strength,
            });
        }
        window
    }

    /// Fold an observation into the window.
    pub fn record(&mut self, observation: Observation) {
        self.by_address
            .insert(observation.address.clone(), observation);
    }

    /// Strongest sighting per beacon, ordered by identifier.
    #[must_use]
    pub fn sightings(&self) -> Vec<BeaconSighting> {
        let mut strongest: BTreeMap<&str, &Observation> = BTreeMap::new();
        for observation in self.by_address.values() {
            strongest
                .entry(observation.beacon_identifier.as_str())
                .and_modify(|best| {
                    if observation.signal_strength > best.signal_strength {
                        *best = observation;
                    }
                })
                .or_insert(observation);
        }

        strongest
            .into_values()
            .map(|o| BeaconSighting {
                identifier: o.beacon_identifier.clone(),
                address: o.address.clone(),
                signal_strength: o.signal_strength,
            })
            .collect()
    }

    /// Strongest signal seen for `identifier`, if it was heard at all.
    #[must_use]
    pub fn strength_of(&self, identifier: &str) -> Option<i16> {
        self.by_address
            .values()
            .filter(|o| o.beacon_identifier == identifier)
            .map(|o| o.signal_strength)
            .max()
    }

    /// Whether nothing was heard.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Estimator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectionState {
    /// No floor accepted yet, or reset since.
    #[default]
    Uninitialized,
    /// `floor` is the current estimate.
    Locked {
        /// Last accepted floor.
        floor: u32,
    },
}

/// How the emitted floor relates to the previous estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorChange {
    /// First floor after start or reset.
    Initial,
    /// Strongest beacon is still on the locked floor.
    Unchanged,
    /// Moved floors; the new beacon beat the old one by at least the margin.
    Switched {
        /// Previously locked floor.
        from: u32,
        /// Signal advantage of the new floor in dB.
        advantage_db: i16,
    },
    /// Moved floors because the old floor's beacon was no longer heard.
    AnchorLost {
        /// Previously locked floor.
        from: u32,
    },
    /// A stronger beacon on `candidate` was rejected for lacking the margin.
    Held {
        /// Floor that was rejected.
        candidate: u32,
        /// Its signal advantage in dB.
        advantage_db: i16,
    },
}

/// Outcome of feeding one window to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    /// No beacon above threshold; the estimate is not updated.
    NoSignal,
    /// The estimator emits `floor`.
    Floor {
        /// Floor emitted for this window.
        floor: u32,
        /// Why this floor was emitted.
        change: FloorChange,
    },
}

impl Estimate {
    /// Emitted floor, if any.
    #[must_use]
    pub const fn floor(&self) -> Option<u32> {
        match self {
            Self::NoSignal => None,
            Self::Floor { floor, .. } => Some(*floor),
        }
    }
}

/// One row of a [`WindowReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReportEntry {
    /// Beacon identifier.
    #[schema(example = "1")]
    pub identifier: String,
    /// Floor marked by the beacon.
    #[schema(example = 1)]
    pub floor: Option<u32>,
    /// Address of the strongest advertisement.
    #[schema(example = "C4:4F:33:0A:12:7B")]
    pub address: String,
    /// Strongest signal in dBm.
    #[schema(example = -67)]
    pub rssi_dbm: i16,
    /// Whether the signal cleared the detection threshold.
    pub above_threshold: bool,
}

/// Diagnostic view of one scan window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WindowReport {
    /// Floor the estimator was locked on when the report was taken.
    #[schema(example = 1)]
    pub last_floor: Option<u32>,
    /// Detection threshold in dBm.
    #[schema(example = -90)]
    pub rssi_threshold: i16,
    /// Beacons heard, strongest first.
    pub entries: Vec<ReportEntry>,
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Floor estimator window ===")?;
        match self.last_floor {
            Some(floor) => writeln!(f, "Last floor: {floor}")?,
            None => writeln!(f, "Last floor: n/a")?,
        }
        writeln!(f, "Beacons heard: {}", self.entries.len())?;
        for entry in &self.entries {
            let floor = entry
                .floor
                .map_or_else(|| "?".to_string(), |floor| floor.to_string());
            let mark = if entry.above_threshold { "ok" } else { "weak" };
            writeln!(
                f,
                "  {} -> floor {floor}: {} dBm ({mark}) [{}]",
                entry.identifier, entry.rssi_dbm, entry.address
            )?;
        }
        Ok(())
    }
}

struct Candidate {
    floor: u32,
    strength: i16,
    position: usize,
}

/// Stateful floor estimator.
#[derive(Debug, Clone)]
pub struct FloorEstimator {
    registry: Arc<BeaconRegistry>,
    rssi_threshold: i16,
    hysteresis_margin_db: i16,
    state: DetectionState,
}

impl FloorEstimator {
    /// Estimator using the compiled-in threshold and margin.
    #[must_use]
    pub fn new(registry: Arc<BeaconRegistry>) -> Self {
        Self::with_tuning(registry, RSSI_THRESHOLD, HYSTERESIS_MARGIN_DB)
    }

    /// Estimator with an explicit threshold and hysteresis margin.
    #[must_use]
    pub const fn with_tuning(
        registry: Arc<BeaconRegistry>,
        rssi_threshold: i16,
        hysteresis_margin_db: i16,
    ) -> Self {
        Self {
            registry,
            rssi_threshold,
            hysteresis_margin_db,
            state: DetectionState::Uninitialized,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DetectionState {
        self.state
    }

    /// Last accepted floor.
    #[must_use]
    pub const fn last_floor(&self) -> Option<u32> {
        match self.state {
            DetectionState::Uninitialized => None,
            DetectionState::Locked { floor } => Some(floor),
        }
    }

    /// Forget the locked floor so the next window is accepted unconditionally.
    pub fn reset(&mut self) {
        self.state = DetectionState::Uninitialized;
        debug!("Floor estimator reset");
    }

    /// Feed one window and return the resulting estimate.
    pub fn observe(&mut self, window: &WindowObservations) -> Estimate {
        let surviving = self.surviving(window);

        // Equal strengths resolve to the beacon listed first in the registry.
        let Some(candidate) = surviving.iter().max_by(|a, b| {
            a.strength
                .cmp(&b.strength)
                .then_with(|| b.position.cmp(&a.position))
        }) else {
            debug!(
                threshold_dbm = self.rssi_threshold,
                "No beacon above threshold in window"
            );
            return Estimate::NoSignal;
        };

        let change = match self.state {
            DetectionState::Uninitialized => FloorChange::Initial,
            DetectionState::Locked { floor } if floor == candidate.floor => FloorChange::Unchanged,
            DetectionState::Locked { floor: from } => {
                let anchor = surviving
                    .iter()
                    .filter(|c| c.floor == from)
                    .map(|c| c.strength)
                    .max();
                match anchor {
                    None => FloorChange::AnchorLost { from },
                    Some(anchor_strength) => {
                        let advantage_db = candidate.strength.saturating_sub(anchor_strength);
                        if advantage_db >= self.hysteresis_margin_db {
                            FloorChange::Switched { from, advantage_db }
                        } else {
                            FloorChange::Held {
                                candidate: candidate.floor,
                                advantage_db,
                            }
                        }
                    }
                }
            }
        };

        let floor = match change {
            FloorChange::Held {
                candidate,
                advantage_db,
            } => {
                let held = self.last_floor().unwrap_or(candidate);
                debug!(
                    floor = held,
                    candidate,
                    advantage_db,
                    margin_db = self.hysteresis_margin_db,
                    "Keeping floor, advantage below hysteresis margin"
                );
                held
            }
            _ => {
                self.state = DetectionState::Locked {
                    floor: candidate.floor,
                };
                debug!(floor = candidate.floor, rssi_dbm = candidate.strength, ?change, "Floor accepted");
                candidate.floor
            }
        };

        Estimate::Floor { floor, change }
    }

    /// Describe a window without changing state.
    #[must_use]
    pub fn report(&self, window: &WindowObservations) -> WindowReport {
        let mut entries: Vec<ReportEntry> = window
            .sightings()
            .into_iter()
            .map(|s| ReportEntry {
                floor: self.registry.floor_of(&s.identifier),
                above_threshold: s.signal_strength >= self.rssi_threshold,
                rssi_dbm: s.signal_strength,
                address: s.address,
                identifier: s.identifier,
            })
            .collect();
        entries.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));

        WindowReport {
            last_floor: self.last_floor(),
            rssi_threshold: self.rssi_threshold,
            entries,
        }
    }

    fn surviving(&self, window: &WindowObservations) -> Vec<Candidate> {
        window
            .sightings()
            .into_iter()
            .filter(|s| s.signal_strength >= self.rssi_threshold)
            .filter_map(|s| {
                let floor = self.registry.floor_of(&s.identifier)?;
                let position = self.registry.position(&s.identifier)?;
                Some(Candidate {
                    floor,
                    strength: s.signal_strength,
                    position,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BeaconDefinition;

    fn estimator() -> FloorEstimator {
        let registry = BeaconRegistry::new(vec![
            BeaconDefinition::new("ground", 0),
            BeaconDefinition::new("one", 1),
            BeaconDefinition::new("two", 2),
        ])
        .unwrap();
        FloorEstimator::new(Arc::new(registry))
    }

    fn window(strengths: &[(&str, i16)]) -> WindowObservations {
        WindowObservations::from_strengths(strengths.iter().copied())
    }

    #[test]
    fn test_first_window_is_accepted() {
        let mut estimator = estimator();
        let estimate = estimator.observe(&window(&[("ground", -60)]));
        assert_eq!(
            estimate,
            Estimate::Floor {
                floor: 0,
                change: FloorChange::Initial
            }
        );
        assert_eq!(estimator.state(), DetectionState::Locked { floor: 0 });
    }

    #[test]
    fn test_boundary_scenario() {
        let mut estimator = estimator();

        assert_eq!(estimator.observe(&window(&[("ground", -60)])).floor(), Some(0));

        let held = estimator.observe(&window(&[("ground", -70), ("one", -68)]));
        assert_eq!(
            held,
            Estimate::Floor {
                floor: 0,
                change: FloorChange::Held {
                    candidate: 1,
                    advantage_db: 2
                }
            }
        );
        assert_eq!(estimator.last_floor(), Some(0));

        let switched = estimator.observe(&window(&[("one", -60)]));
        assert_eq!(
            switched,
            Estimate::Floor {
                floor: 1,
                change: FloorChange::AnchorLost { from: 0 }
            }
        );
        assert_eq!(estimator.last_floor(), Some(1));
    }

    #[test]
    fn test_switch_when_margin_reached() {
        let mut estimator = estimator();
        estimator.observe(&window(&[("ground", -60)]));

        let estimate = estimator.observe(&window(&[("ground", -75), ("two", -70)]));
        assert_eq!(
            estimate,
            Estimate::Floor {
                floor: 2,
                change: FloorChange::Switched {
                    from: 0,
                    advantage_db: 5
                }
            }
        );
    }

    #[test]
    fn test_empty_and_weak_windows_do_not_update() {
        let mut estimator = estimator();
        assert_eq!(estimator.observe(&WindowObservations::new()), Estimate::NoSignal);
        assert_eq!(estimator.state(), DetectionState::Uninitialized);

        estimator.observe(&window(&[("one", -50)]));
        assert_eq!(estimator.observe(&window(&[("two", -95)])), Estimate::NoSignal);
        assert_eq!(estimator.last_floor(), Some(1));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut estimator = estimator();
        assert_eq!(estimator.observe(&window(&[("two", -90)])).floor(), Some(2));
    }

    #[test]
    fn test_repeated_window_is_idempotent() {
        let mut estimator = estimator();
        let w = window(&[("one", -66), ("two", -80)]);
        assert_eq!(estimator.observe(&w).floor(), Some(1));
        assert_eq!(
            estimator.observe(&w),
            Estimate::Floor {
                floor: 1,
                change: FloorChange::Unchanged
            }
        );
        assert_eq!(estimator.last_floor(), Some(1));
    }

    #[test]
    fn test_weak_anchor_counts_as_absent() {
        let mut estimator = estimator();
        estimator.observe(&window(&[("ground", -60)]));

        let estimate = estimator.observe(&window(&[("ground", -95), ("one", -89)]));
        assert_eq!(
            estimate,
            Estimate::Floor {
                floor: 1,
                change: FloorChange::AnchorLost { from: 0 }
            }
        );
    }

    #[test]
    fn test_ties_resolve_by_registry_order() {
        let mut estimator = estimator();
        let estimate = estimator.observe(&window(&[("two", -70), ("one", -70)]));
        assert_eq!(estimate.floor(), Some(1));
    }

    #[test]
    fn test_reset_accepts_next_window_unconditionally() {
        let mut estimator = estimator();
        estimator.observe(&window(&[("ground", -60)]));
        estimator.reset();
        assert_eq!(estimator.last_floor(), None);

        let estimate = estimator.observe(&window(&[("ground", -70), ("one", -68)]));
        assert_eq!(
            estimate,
            Estimate::Floor {
                floor: 1,
                change: FloorChange::Initial
            }
        );
    }

    #[test]
    fn test_soundness_over_mixed_sequence() {
        let mut estimator = estimator();
        let windows = [
            window(&[("ground", -91), ("one", -100)]),
            window(&[("two", -85)]),
            window(&[("two", -88), ("one", -84)]),
            window(&[("one", -80), ("ground", -79)]),
            window(&[]),
            window(&[("ground", -40)]),
        ];

        for w in &windows {
            if let Some(floor) = estimator.observe(w).floor() {
                let heard = w.sightings().into_iter().any(|s| {
                    s.signal_strength >= RSSI_THRESHOLD
                        && estimator.registry.floor_of(&s.identifier) == Some(floor)
                });
                assert!(heard, "floor {floor} emitted without a beacon above threshold");
            }
        }
    }

    #[test]
    fn test_dedup_keeps_latest_per_address_and_strongest_per_beacon() {
        let mut w = WindowObservations::new();
        let sighting = |address: &str, rssi| Observation {
            beacon_identifier: "one".into(),
            address: address.into(),
            signal_strength: rssi,
        };
        w.record(sighting("AA:01", -50));
        w.record(sighting("AA:01", -80));
        w.record(sighting("AA:02", -70));

        let sightings = w.sightings();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].signal_strength, -70);
        assert_eq!(sightings[0].address, "AA:02");
    }

    #[test]
    fn test_report_sorted_strongest_first() {
        let mut estimator = estimator();
        let w = window(&[("ground", -95), ("two", -60), ("one", -72)]);
        estimator.observe(&w);

        let report = estimator.report(&w);
        assert_eq!(report.last_floor, Some(2));
        let order: Vec<&str> = report.entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(order, ["two", "one", "ground"]);
        assert!(!report.entries[2].above_threshold);
        assert!(report.to_string().contains("Beacons heard: 3"));
    }
}
