//! Deliberate timestamp disorder applied to write batches.

use rand::{Rng, SeedableRng, distributions::Distribution};
use rand_chacha::ChaCha8Rng;
use rand_distr::Poisson;
use tsbench_config::{BenchmarkConfig, ConfigError, OutOfOrderMode};

use crate::{Result, WorkloadError, batch::Batch};

#[derive(Debug)]
enum Policy {
    InOrder,
    /// Each record is moved back by `min(k, max_k)` steps, `k ~ Poisson(lambda)`
    Poisson {
        ratio: f64,
        distribution: Poisson<f64>,
        max_k: u32,
    },
    /// The whole batch is moved back by one batch interval
    Batch { ratio: f64 },
}

/// Moves batch timestamps into the past right before they are written.
///
/// Only timestamps change: records keep their position and values, so point counts and the
/// generator's cadence are unaffected.
#[derive(Debug)]
pub struct OutOfOrderScheduler {
    policy: Policy,
    rng: ChaCha8Rng,
    point_step: i64,
    batch_interval: i64,
}

impl OutOfOrderScheduler {
    pub fn new(config: &BenchmarkConfig, client_id: usize) -> Result<Self> {
        let ooo = &config.out_of_order;
        if !(0.0..=1.0).contains(&ooo.ratio) {
            return Err(ConfigError::InvalidOutOfOrderRatio(ooo.ratio).into());
        }
        let policy = match (ooo.enabled, ooo.mode) {
            (false, _) => Policy::InOrder,
            (true, OutOfOrderMode::Poisson) => Policy::Poisson {
                ratio: ooo.ratio,
                distribution: Poisson::new(ooo.lambda)
                    .map_err(|e| WorkloadError::Poisson(e.to_string()))?,
                max_k: ooo.max_k,
            },
            (true, OutOfOrderMode::Batch) => Policy::Batch { ratio: ooo.ratio },
        };

        // same seed as the client's data stream, on a separate stream
        let mut rng = ChaCha8Rng::seed_from_u64(config.data_seed.wrapping_add(client_id as u64));
        rng.set_stream(1);

        Ok(Self {
            policy,
            rng,
            point_step: config.point_step_in_precision(),
            batch_interval: config.batch_interval(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.policy, Policy::InOrder)
    }

    pub fn apply(&mut self, mut batch: Batch) -> Batch {
        match &self.policy {
            Policy::InOrder => {}
            Policy::Poisson {
                ratio,
                distribution,
                max_k,
            } => {
                for record in batch.records_mut() {
                    if self.rng.gen_bool(*ratio) {
                        let k = (distribution.sample(&mut self.rng) as u32).min(*max_k);
                        record.timestamp -= i64::from(k) * self.point_step;
                    }
                }
            }
            Policy::Batch { ratio } => {
                if self.rng.gen_bool(*ratio) {
                    for record in batch.records_mut() {
                        record.timestamp -= self.batch_interval;
                    }
                }
            }
        }
        batch
    }
}
