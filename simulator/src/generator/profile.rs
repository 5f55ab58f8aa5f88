use crate::generator::template::demand_curve;
use anyhow::Context;
use pulsecore::snapshot::{DEFAULT_TEXT, KNOWN_CLASSES};
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vehicle count at which a reading is reported congested.
pub const CONGESTED_AT: u32 = 20;
/// Vehicle count at which a reading is reported moderate.
pub const MODERATE_AT: u32 = 8;
/// Vehicle count that maps to 100% density.
pub const FULL_DENSITY_AT: u32 = 25;

/// Relative share of one vehicle class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassWeight {
    pub class: String,
    pub weight: u32,
}

/// Configuration for generating synthetic traffic readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: u64,
    /// Vehicles in frame at the top of the demand curve.
    pub peak_vehicles: u32,
    /// Readings per demand cycle.
    pub period: u64,
    /// Maximum random deviation from the curve, in vehicles.
    pub jitter: u32,
    pub mix: Vec<ClassWeight>,
    pub text: Option<String>,
    pub scenario: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            peak_vehicles: 28,
            period: 60,
            jitter: 3,
            mix: vec![
                ClassWeight {
                    class: "Car".into(),
                    weight: 6,
                },
                ClassWeight {
                    class: "Bike".into(),
                    weight: 2,
                },
                ClassWeight {
                    class: "Bus".into(),
                    weight: 1,
                },
                ClassWeight {
                    class: "Truck".into(),
                    weight: 1,
                },
            ],
            text: None,
            scenario: None,
        }
    }
}

/// `vehicle_data` payload as the vision backend emits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleData {
    pub text: String,
    pub vehicle_count: u32,
    pub status: String,
    pub density: u32,
    pub objects: BTreeMap<String, u32>,
}

/// Status label (with the backend's emoji suffix) for a vehicle count.
pub fn traffic_status(vehicle_count: u32) -> String {
    if vehicle_count >= CONGESTED_AT {
        "CONGESTED 🔴".into()
    } else if vehicle_count >= MODERATE_AT {
        "MODERATE 🟡".into()
    } else {
        "LOW 🟢".into()
    }
}

/// Density percentage: linear up to [`FULL_DENSITY_AT`], then saturated.
pub fn density_percent(vehicle_count: u32) -> u32 {
    vehicle_count.min(FULL_DENSITY_AT) * 100 / FULL_DENSITY_AT
}

/// Deterministic source of fake readings. Same seed, same sequence.
pub struct TrafficGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    classes: Vec<String>,
    weights: WeightedIndex<u32>,
    tick: u64,
}

impl TrafficGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        let classes = config
            .mix
            .iter()
            .map(|entry| entry.class.clone())
            .collect::<Vec<_>>();
        let weights = WeightedIndex::new(config.mix.iter().map(|entry| entry.weight))
            .context("class mix needs at least one positive weight")?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            classes,
            weights,
            tick: 0,
        })
    }

    pub fn next_reading(&mut self) -> VehicleData {
        self.tick += 1;
        let level = demand_curve(self.tick, self.config.period);
        let base = (self.config.peak_vehicles as f32 * level).round() as i64;
        let jitter = self.config.jitter as i64;
        let offset = if jitter > 0 {
            self.rng.gen_range(-jitter..=jitter)
        } else {
            0
        };
        let vehicle_count = (base + offset).max(0) as u32;

        let mut objects = KNOWN_CLASSES
            .iter()
            .map(|class| (class.to_string(), 0))
            .collect::<BTreeMap<_, _>>();
        for _ in 0..vehicle_count {
            let class = &self.classes[self.weights.sample(&mut self.rng)];
            *objects.entry(class.clone()).or_insert(0) += 1;
        }

        VehicleData {
            text: self
                .config
                .text
                .clone()
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            vehicle_count,
            status: traffic_status(vehicle_count),
            density: density_percent(vehicle_count),
            objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_thresholds_follow_backend() {
        assert_eq!(traffic_status(0), "LOW 🟢");
        assert_eq!(traffic_status(7), "LOW 🟢");
        assert_eq!(traffic_status(8), "MODERATE 🟡");
        assert_eq!(traffic_status(19), "MODERATE 🟡");
        assert_eq!(traffic_status(20), "CONGESTED 🔴");
    }

    #[test]
    fn density_saturates() {
        assert_eq!(density_percent(0), 0);
        assert_eq!(density_percent(12), 48);
        assert_eq!(density_percent(25), 100);
        assert_eq!(density_percent(90), 100);
    }

    #[test]
    fn same_seed_same_sequence() {
        let config = GeneratorConfig {
            seed: 42,
            ..Default::default()
        };
        let mut left = TrafficGenerator::new(config.clone()).unwrap();
        let mut right = TrafficGenerator::new(config).unwrap();
        for _ in 0..50 {
            assert_eq!(left.next_reading(), right.next_reading());
        }
    }

    #[test]
    fn class_counts_add_up() {
        let mut generator = TrafficGenerator::new(GeneratorConfig::default()).unwrap();
        for _ in 0..120 {
            let reading = generator.next_reading();
            let total: u32 = reading.objects.values().sum();
            assert_eq!(total, reading.vehicle_count);
            for class in KNOWN_CLASSES {
                assert!(reading.objects.contains_key(class));
            }
            assert_eq!(reading.density, density_percent(reading.vehicle_count));
        }
    }

    #[test]
    fn all_zero_mix_is_rejected() {
        let config = GeneratorConfig {
            mix: vec![ClassWeight {
                class: "Car".into(),
                weight: 0,
            }],
            ..Default::default()
        };
        assert!(TrafficGenerator::new(config).is_err());
    }

    #[test]
    fn readings_parse_into_snapshots() {
        let mut generator = TrafficGenerator::new(GeneratorConfig {
            jitter: 0,
            peak_vehicles: 24,
            period: 2,
            ..Default::default()
        })
        .unwrap();
        let reading = generator.next_reading();
        let raw = serde_json::to_value(&reading).unwrap();
        let snapshot = pulsecore::snapshot::TrafficSnapshot::from_payload(&raw);
        assert_eq!(snapshot.vehicle_count, 24);
        assert_eq!(
            snapshot.style(),
            pulsecore::snapshot::StatusStyle::Critical
        );
        assert_eq!(snapshot.density, 96.0);
    }
}
