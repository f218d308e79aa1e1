use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Number of weights in an [`OperationProportion`]: one write kind and ten read kinds.
pub const OPERATION_KINDS: usize = 11;

/// Relative weights of the operation kinds, written as `INGESTION:Q1:...:Q10`.
///
/// The positions are, in order: ingestion, precise point, time range, value range, aggregate
/// over a time range, aggregate with a value filter, aggregate with time and value filters,
/// group by time, latest point, time range in descending order, value range in descending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationProportion([f64; OPERATION_KINDS]);

impl OperationProportion {
    pub fn new(weights: [f64; OPERATION_KINDS]) -> Self {
        Self(weights)
    }

    pub fn weights(&self) -> &[f64; OPERATION_KINDS] {
        &self.0
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.0.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(self.invalid("every weight must be a non-negative number"));
        }
        if self.0.iter().sum::<f64>() <= 0.0 {
            return Err(self.invalid("weights must sum to a positive value"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidOperationProportion {
            value: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Default for OperationProportion {
    fn default() -> Self {
        let mut weights = [0.0; OPERATION_KINDS];
        weights[0] = 1.0;
        Self(weights)
    }
}

impl FromStr for OperationProportion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidOperationProportion {
            value: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if parts.len() != OPERATION_KINDS {
            return Err(invalid(format!(
                "expected {OPERATION_KINDS} ':' separated weights, found {}",
                parts.len()
            )));
        }

        let mut weights = [0.0; OPERATION_KINDS];
        for (slot, part) in weights.iter_mut().zip(parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|e| invalid(format!("'{part}' is not a number: {e}")))?;
        }

        let proportion = Self(weights);
        proportion.validate()?;
        Ok(proportion)
    }
}

impl TryFrom<String> for OperationProportion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperationProportion> for String {
    fn from(p: OperationProportion) -> Self {
        p.to_string()
    }
}

impl fmt::Display for OperationProportion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, w) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{w}")?;
        }
        Ok(())
    }
}
