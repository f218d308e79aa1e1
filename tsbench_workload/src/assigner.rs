//! Reproducible sensor to function assignment.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use tsbench_config::FunctionRatios;

use crate::{
    Result, WorkloadError,
    function::{FunctionCatalog, FunctionFamily, SensorFunction},
};

/// The function bound to every sensor name, fixed for the whole run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFunctions {
    by_sensor: BTreeMap<String, SensorFunction>,
}

impl SensorFunctions {
    pub fn get(&self, sensor: &str) -> Option<&SensorFunction> {
        self.by_sensor.get(sensor)
    }

    pub fn len(&self) -> usize {
        self.by_sensor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sensor.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SensorFunction)> {
        self.by_sensor.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, SensorFunction)> for SensorFunctions {
    fn from_iter<T: IntoIterator<Item = (String, SensorFunction)>>(iter: T) -> Self {
        Self {
            by_sensor: iter.into_iter().collect(),
        }
    }
}

/// Bind a function to every sensor.
///
/// The five ratios are laid out as contiguous sub-intervals of `[0, 1)` in
/// [`FunctionFamily::ALL`] order. Sensor `i` draws its family from one stream seeded with
/// `seed`, consumed strictly in index order, and its candidate from a stream seeded with
/// `seed + 1 + i`. The same inputs always produce the same mapping.
pub fn assign_sensor_functions(
    sensors: &[String],
    ratios: &FunctionRatios,
    seed: u64,
    catalog: &FunctionCatalog,
) -> Result<SensorFunctions> {
    if !ratios.is_valid() {
        return Err(WorkloadError::InvalidFunctionRatios(*ratios));
    }
    let bounds = cumulative_bounds(ratios);

    let mut family_rng = ChaCha8Rng::seed_from_u64(seed);
    let mut functions = BTreeMap::new();
    for (i, sensor) in sensors.iter().enumerate() {
        let property: f64 = family_rng.r#gen();
        let mut selector_rng =
            ChaCha8Rng::seed_from_u64(seed.wrapping_add(1).wrapping_add(i as u64));
        let selector: f64 = selector_rng.r#gen();

        let family = locate_family(property, &bounds, ratios);
        let candidates = catalog.candidates(family);
        if candidates.is_empty() {
            return Err(WorkloadError::EmptyFunctionFamily {
                family,
                sensor: sensor.clone(),
            });
        }
        let index = ((selector * candidates.len() as f64) as usize).min(candidates.len() - 1);
        functions.insert(sensor.clone(), candidates[index]);
    }

    debug!(sensors = functions.len(), seed, "assigned sensor functions");
    Ok(SensorFunctions {
        by_sensor: functions,
    })
}

/// Upper bound of every family's sub-interval after normalizing the ratios
fn cumulative_bounds(ratios: &FunctionRatios) -> [f64; 5] {
    let weights = ratios.as_array();
    let total: f64 = weights.iter().sum();
    let mut bounds = [0.0; 5];
    let mut acc = 0.0;
    for (bound, weight) in bounds.iter_mut().zip(weights) {
        acc += weight / total;
        *bound = acc;
    }
    bounds
}

fn locate_family(property: f64, bounds: &[f64; 5], ratios: &FunctionRatios) -> FunctionFamily {
    if let Some(i) = bounds.iter().position(|bound| property < *bound) {
        return FunctionFamily::ALL[i];
    }
    // rounding can leave the last bound just below 1.0
    let weights = ratios.as_array();
    let last = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);
    FunctionFamily::ALL[last]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sensors(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s_{i}")).collect()
    }

    #[test]
    fn same_inputs_same_mapping() {
        let catalog = FunctionCatalog::built_in();
        let ratios = FunctionRatios::default();
        let a = assign_sensor_functions(&sensors(200), &ratios, 666, &catalog).unwrap();
        let b = assign_sensor_functions(&sensors(200), &ratios, 666, &catalog).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);

        let c = assign_sensor_functions(&sensors(200), &ratios, 667, &catalog).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn prefix_is_stable_when_sensors_are_added() {
        let catalog = FunctionCatalog::built_in();
        let ratios = FunctionRatios::default();
        let small = assign_sensor_functions(&sensors(10), &ratios, 42, &catalog).unwrap();
        let large = assign_sensor_functions(&sensors(50), &ratios, 42, &catalog).unwrap();
        for (sensor, f) in small.iter() {
            assert_eq!(large.get(sensor), Some(f));
        }
    }

    #[test]
    fn single_family_ratio_always_wins() {
        let catalog = FunctionCatalog::built_in();
        let ratios = FunctionRatios {
            constant: 1.0,
            line: 0.0,
            random: 0.0,
            sine: 0.0,
            square: 0.0,
        };
        for seed in [0, 1, 666, u64::MAX] {
            let functions =
                assign_sensor_functions(&sensors(100), &ratios, seed, &catalog).unwrap();
            assert!(
                functions
                    .iter()
                    .all(|(_, f)| f.family() == FunctionFamily::Constant)
            );
        }
    }

    #[test]
    fn family_shares_follow_ratios() {
        let catalog = FunctionCatalog::built_in();
        let ratios = FunctionRatios {
            constant: 1.0,
            line: 0.0,
            random: 3.0,
            sine: 0.0,
            square: 0.0,
        };
        let functions = assign_sensor_functions(&sensors(4000), &ratios, 9, &catalog).unwrap();
        let random = functions
            .iter()
            .filter(|(_, f)| f.family() == FunctionFamily::Random)
            .count();
        let share = random as f64 / 4000.0;
        assert!((share - 0.75).abs() < 0.03, "random share was {share}");
    }

    #[test]
    fn empty_family_is_an_error() {
        let catalog = FunctionCatalog {
            sine: vec![],
            ..FunctionCatalog::built_in()
        };
        let ratios = FunctionRatios {
            constant: 0.0,
            line: 0.0,
            random: 0.0,
            sine: 1.0,
            square: 0.0,
        };
        let err = assign_sensor_functions(&sensors(3), &ratios, 1, &catalog).unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::EmptyFunctionFamily {
                family: FunctionFamily::Sine,
                ..
            }
        ));
    }

    #[test]
    fn invalid_ratios_are_rejected() {
        let ratios = FunctionRatios {
            constant: 0.0,
            line: 0.0,
            random: 0.0,
            sine: 0.0,
            square: 0.0,
        };
        let err =
            assign_sensor_functions(&sensors(3), &ratios, 1, &FunctionCatalog::built_in())
                .unwrap_err();
        assert!(matches!(err, WorkloadError::InvalidFunctionRatios(_)));
    }
}
