//! Value generating functions bound to sensors.

use std::{f64::consts::TAU, fmt, path::Path};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Result, WorkloadError};

/// The five function families, in the order the assigner lays them out on `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionFamily {
    Constant,
    Line,
    Random,
    Sine,
    Square,
}

impl FunctionFamily {
    pub const ALL: [Self; 5] = [
        Self::Constant,
        Self::Line,
        Self::Random,
        Self::Sine,
        Self::Square,
    ];
}

impl fmt::Display for FunctionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constant => "constant",
            Self::Line => "line",
            Self::Random => "random",
            Self::Sine => "sine",
            Self::Square => "square",
        };
        f.write_str(name)
    }
}

/// A function of time producing the values of one sensor.
///
/// `cycle` is the period in the same unit as the timestamps passed to [`Self::value_at`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SensorFunction {
    Constant { value: f64 },
    /// Rises linearly from `min` to `max` over every cycle, then drops back
    Line { min: f64, max: f64, cycle: i64 },
    /// Uniformly distributed in `[min, max)`, independent of time
    Random { min: f64, max: f64 },
    Sine { min: f64, max: f64, cycle: i64 },
    /// `min` for the first half of every cycle, `max` for the second
    Square { min: f64, max: f64, cycle: i64 },
}

impl SensorFunction {
    pub fn family(&self) -> FunctionFamily {
        match self {
            Self::Constant { .. } => FunctionFamily::Constant,
            Self::Line { .. } => FunctionFamily::Line,
            Self::Random { .. } => FunctionFamily::Random,
            Self::Sine { .. } => FunctionFamily::Sine,
            Self::Square { .. } => FunctionFamily::Square,
        }
    }

    /// Evaluate the function at `timestamp`. Only the random family draws from `rng`.
    pub fn value_at<R: Rng + ?Sized>(&self, timestamp: i64, rng: &mut R) -> f64 {
        match *self {
            Self::Constant { value } => value,
            Self::Line { min, max, cycle } => min + (max - min) * phase(timestamp, cycle),
            Self::Random { min, max } => min + (max - min) * rng.r#gen::<f64>(),
            Self::Sine { min, max, cycle } => {
                let mid = (min + max) / 2.0;
                let amplitude = (max - min) / 2.0;
                mid + amplitude * (TAU * phase(timestamp, cycle)).sin()
            }
            Self::Square { min, max, cycle } => {
                if phase(timestamp, cycle) < 0.5 {
                    min
                } else {
                    max
                }
            }
        }
    }
}

/// Position of `timestamp` within its cycle, in `[0, 1)`
fn phase(timestamp: i64, cycle: i64) -> f64 {
    if cycle <= 0 {
        return 0.0;
    }
    timestamp.rem_euclid(cycle) as f64 / cycle as f64
}

/// Candidate functions for every family.
///
/// Candidates are kept in a fixed order since the assigner picks them by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionCatalog {
    #[serde(default)]
    pub constant: Vec<SensorFunction>,
    #[serde(default)]
    pub line: Vec<SensorFunction>,
    #[serde(default)]
    pub random: Vec<SensorFunction>,
    #[serde(default)]
    pub sine: Vec<SensorFunction>,
    #[serde(default)]
    pub square: Vec<SensorFunction>,
}

const CYCLES_MS: [i64; 3] = [60_000, 600_000, 3_600_000];

impl FunctionCatalog {
    /// The catalog shipped with the harness: 58 constants, 9 lines, 86 randoms, 6 sines and
    /// 9 squares.
    pub fn built_in() -> Self {
        let constant = (0..58)
            .map(|i| SensorFunction::Constant {
                value: f64::from(i) * 17.5,
            })
            .collect();

        let line = [10.0, 100.0, 1000.0]
            .into_iter()
            .flat_map(|max| {
                CYCLES_MS
                    .into_iter()
                    .map(move |cycle| SensorFunction::Line {
                        min: 0.0,
                        max,
                        cycle,
                    })
            })
            .collect();

        let random = (0..86)
            .map(|i| {
                let min = -f64::from(i % 5) * 10.0;
                SensorFunction::Random {
                    min,
                    max: 10.0 + f64::from(i) * 12.0,
                }
            })
            .collect();

        let sine = [10.0, 100.0, 1000.0]
            .into_iter()
            .flat_map(|amplitude| {
                [60_000, 3_600_000]
                    .into_iter()
                    .map(move |cycle| SensorFunction::Sine {
                        min: -amplitude,
                        max: amplitude,
                        cycle,
                    })
            })
            .collect();

        let square = [1.0, 10.0, 100.0]
            .into_iter()
            .flat_map(|max| {
                [10_000, 60_000, 600_000]
                    .into_iter()
                    .map(move |cycle| SensorFunction::Square {
                        min: 0.0,
                        max,
                        cycle,
                    })
            })
            .collect();

        Self {
            constant,
            line,
            random,
            sine,
            square,
        }
    }

    /// Load a catalog from a JSON file with one array per family.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| WorkloadError::CatalogRead {
                path: path.display().to_string(),
                source,
            })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn candidates(&self, family: FunctionFamily) -> &[SensorFunction] {
        match family {
            FunctionFamily::Constant => &self.constant,
            FunctionFamily::Line => &self.line,
            FunctionFamily::Random => &self.random,
            FunctionFamily::Sine => &self.sine,
            FunctionFamily::Square => &self.square,
        }
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::built_in()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn built_in_catalog_sizes() {
        let catalog = FunctionCatalog::built_in();
        let sizes: Vec<usize> = FunctionFamily::ALL
            .iter()
            .map(|f| catalog.candidates(*f).len())
            .collect();
        assert_eq!(sizes, vec![58, 9, 86, 6, 9]);

        for family in FunctionFamily::ALL {
            assert!(
                catalog
                    .candidates(family)
                    .iter()
                    .all(|f| f.family() == family),
                "{family} holds a foreign function"
            );
        }
    }

    #[test]
    fn periodic_functions_follow_their_cycle() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let line = SensorFunction::Line {
            min: 0.0,
            max: 100.0,
            cycle: 1000,
        };
        assert_eq!(line.value_at(0, &mut rng), 0.0);
        assert_eq!(line.value_at(250, &mut rng), 25.0);
        assert_eq!(line.value_at(1250, &mut rng), 25.0);

        let square = SensorFunction::Square {
            min: 1.0,
            max: 2.0,
            cycle: 1000,
        };
        assert_eq!(square.value_at(100, &mut rng), 1.0);
        assert_eq!(square.value_at(600, &mut rng), 2.0);

        let sine = SensorFunction::Sine {
            min: -10.0,
            max: 10.0,
            cycle: 1000,
        };
        assert!((sine.value_at(250, &mut rng) - 10.0).abs() < 1e-9);
        assert!(sine.value_at(0, &mut rng).abs() < 1e-9);

        // timestamps before the epoch stay inside the cycle
        assert_eq!(line.value_at(-250, &mut rng), 75.0);
    }

    #[test]
    fn random_values_stay_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let f = SensorFunction::Random {
            min: -5.0,
            max: 5.0,
        };
        for t in 0..1000 {
            let v = f.value_at(t, &mut rng);
            assert!((-5.0..5.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn catalog_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "constant": [{{"type": "constant", "value": 3.0}}],
                "square": [{{"type": "square", "min": 0.0, "max": 1.0, "cycle": 10}}]
            }}"#
        )
        .unwrap();

        let catalog = FunctionCatalog::from_path(file.path()).unwrap();
        assert_eq!(
            catalog.constant,
            vec![SensorFunction::Constant { value: 3.0 }]
        );
        assert!(catalog.line.is_empty());
        assert_eq!(catalog.square.len(), 1);
    }
}
