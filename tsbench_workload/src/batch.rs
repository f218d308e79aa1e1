use std::sync::Arc;

use crate::schema::DeviceSchema;

/// One timestamp and a value for every column of the owning batch
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: i64,
    pub values: Vec<f64>,
}

/// Records written to one device in a single operation.
///
/// A batch either carries every sensor of the device, or a single sensor column when
/// `sensor_index` is set.
#[derive(Debug, Clone)]
pub struct Batch {
    device: Arc<DeviceSchema>,
    sensor_index: Option<usize>,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(device: Arc<DeviceSchema>, records: Vec<Record>) -> Self {
        Self {
            device,
            sensor_index: None,
            records,
        }
    }

    pub fn single_sensor(
        device: Arc<DeviceSchema>,
        sensor_index: usize,
        records: Vec<Record>,
    ) -> Self {
        Self {
            device,
            sensor_index: Some(sensor_index),
            records,
        }
    }

    pub fn device(&self) -> &DeviceSchema {
        &self.device
    }

    pub fn sensor_index(&self) -> Option<usize> {
        self.sensor_index
    }

    /// Names of the columns carried by every record
    pub fn sensors(&self) -> &[String] {
        let sensors = self.device.sensors();
        match self.sensor_index {
            Some(i) => sensors.get(i..=i).unwrap_or_default(),
            None => sensors,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Number of values in the batch
    pub fn point_count(&self) -> usize {
        self.records.len() * self.sensors().len()
    }
}
