//! Device layout: ids, storage groups and sensor names.

use std::sync::Arc;

use tsbench_config::{BenchmarkConfig, SgStrategy};
use twox_hash::XxHash64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSchema {
    device_id: u64,
    device: String,
    group: String,
    sensors: Vec<String>,
}

impl DeviceSchema {
    pub fn new(device_id: u64, group_id: usize, sensors: Vec<String>) -> Self {
        Self {
            device_id,
            device: device_name(device_id),
            group: format!("g_{group_id}"),
            sensors,
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }

    /// A copy of this device that only lists `sensors`, used by queries touching a subset
    pub fn with_sensors(&self, sensors: Vec<String>) -> Self {
        Self {
            sensors,
            ..self.clone()
        }
    }
}

pub fn device_name(device_id: u64) -> String {
    format!("d_{device_id}")
}

pub fn sensor_names(sensor_number: usize) -> Vec<String> {
    (0..sensor_number).map(|i| format!("s_{i}")).collect()
}

/// Storage group of `device_id` under `strategy`.
///
/// `first_device` and `device_number` describe the id range owned by this process, which
/// the `div` strategy splits into `group_number` contiguous slices.
pub fn group_id(
    strategy: SgStrategy,
    device_id: u64,
    first_device: u64,
    device_number: usize,
    group_number: usize,
) -> usize {
    let groups = group_number.max(1) as u64;
    let group = match strategy {
        SgStrategy::Hash => XxHash64::oneshot(0, device_name(device_id).as_bytes()) % groups,
        SgStrategy::Mod => device_id % groups,
        SgStrategy::Div => {
            let offset = device_id.saturating_sub(first_device);
            (offset * groups / device_number.max(1) as u64).min(groups - 1)
        }
    };
    group as usize
}

/// One schema per device owned by this process, in device id order
pub fn build_device_schemas(config: &BenchmarkConfig) -> Vec<Arc<DeviceSchema>> {
    let first = config.first_device_index();
    let sensors = sensor_names(config.sensor_number);
    (0..config.device_number as u64)
        .map(|i| {
            let device_id = first + i;
            let group = group_id(
                config.sg_strategy,
                device_id,
                first,
                config.device_number,
                config.group_number,
            );
            Arc::new(DeviceSchema::new(device_id, group, sensors.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn schemas_follow_config() {
        let config = BenchmarkConfig {
            device_number: 3,
            sensor_number: 2,
            ..Default::default()
        };
        let schemas = build_device_schemas(&config);
        let names: Vec<&str> = schemas.iter().map(|s| s.device()).collect();
        assert_eq!(names, vec!["d_0", "d_1", "d_2"]);
        assert_eq!(schemas[0].sensors(), &["s_0".to_string(), "s_1".to_string()]);
        assert!(schemas.iter().all(|s| s.group() == "g_0"));
    }

    #[test]
    fn cluster_index_offsets_ids() {
        let config = BenchmarkConfig {
            benchmark_cluster: true,
            benchmark_index: 2,
            device_number: 4,
            ..Default::default()
        };
        let ids: Vec<u64> = build_device_schemas(&config)
            .iter()
            .map(|s| s.device_id())
            .collect();
        assert_eq!(ids, vec![8, 9, 10, 11]);
    }

    #[test]
    fn group_strategies() {
        let mods: Vec<usize> = (0..6).map(|d| group_id(SgStrategy::Mod, d, 0, 6, 3)).collect();
        assert_eq!(mods, vec![0, 1, 2, 0, 1, 2]);

        let divs: Vec<usize> = (10..16)
            .map(|d| group_id(SgStrategy::Div, d, 10, 6, 3))
            .collect();
        assert_eq!(divs, vec![0, 0, 1, 1, 2, 2]);

        let hashes: BTreeSet<usize> = (0..100)
            .map(|d| group_id(SgStrategy::Hash, d, 0, 100, 4))
            .collect();
        assert!(hashes.iter().all(|g| *g < 4));
        assert!(hashes.len() > 1, "hash strategy used a single group");
        assert_eq!(
            group_id(SgStrategy::Hash, 17, 0, 100, 4),
            group_id(SgStrategy::Hash, 17, 0, 100, 4)
        );
    }

    #[test]
    fn sensor_subset_keeps_device() {
        let schema = DeviceSchema::new(5, 1, sensor_names(4));
        let subset = schema.with_sensors(vec!["s_3".to_string()]);
        assert_eq!(subset.device(), "d_5");
        assert_eq!(subset.group(), "g_1");
        assert_eq!(subset.sensors(), &["s_3".to_string()]);
    }
}
