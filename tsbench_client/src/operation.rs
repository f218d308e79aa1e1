use rand::{
    SeedableRng,
    distributions::{Distribution, WeightedIndex},
};
use rand_chacha::ChaCha8Rng;
use tsbench_config::BenchmarkConfig;
use tsbench_measurement::Operation;

use crate::Result;

/// Picks the next operation a client issues, following the configured operation proportion.
#[derive(Debug)]
pub struct OperationController {
    weights: WeightedIndex<f64>,
    rng: ChaCha8Rng,
}

impl OperationController {
    /// Draws come from `data_seed + client_id` on a stream of their own, so they never
    /// disturb the client's value or out-of-order draws.
    pub fn new(config: &BenchmarkConfig, client_id: usize) -> Result<Self> {
        let weights = WeightedIndex::new(config.operation_proportion.weights())?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.data_seed.wrapping_add(client_id as u64));
        rng.set_stream(2);
        Ok(Self { weights, rng })
    }

    pub fn next_operation(&mut self) -> Operation {
        Operation::ALL[self.weights.sample(&mut self.rng)]
    }
}
