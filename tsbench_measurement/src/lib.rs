//! Per-operation counters, latency statistics and result persistence.

use std::fmt;

use serde::Serialize;
use tsbench_config::OPERATION_KINDS;

mod measurement;
pub mod persistence;

pub use measurement::{LatencySummary, Measurement, OperationSummary, Summary};

/// The kinds of operation a client issues, in the order of the operation proportion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Ingestion,
    PreciseQuery,
    RangeQuery,
    ValueRangeQuery,
    AggRangeQuery,
    AggValueQuery,
    AggRangeValueQuery,
    GroupByQuery,
    LatestPointQuery,
    RangeQueryOrderByTimeDesc,
    ValueRangeQueryOrderByTimeDesc,
}

impl Operation {
    pub const ALL: [Self; OPERATION_KINDS] = [
        Self::Ingestion,
        Self::PreciseQuery,
        Self::RangeQuery,
        Self::ValueRangeQuery,
        Self::AggRangeQuery,
        Self::AggValueQuery,
        Self::AggRangeValueQuery,
        Self::GroupByQuery,
        Self::LatestPointQuery,
        Self::RangeQueryOrderByTimeDesc,
        Self::ValueRangeQueryOrderByTimeDesc,
    ];

    /// Position in [`Self::ALL`] and in the operation proportion
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ingestion => "INGESTION",
            Self::PreciseQuery => "PRECISE_QUERY",
            Self::RangeQuery => "RANGE_QUERY",
            Self::ValueRangeQuery => "VALUE_RANGE_QUERY",
            Self::AggRangeQuery => "AGG_RANGE_QUERY",
            Self::AggValueQuery => "AGG_VALUE_QUERY",
            Self::AggRangeValueQuery => "AGG_RANGE_VALUE_QUERY",
            Self::GroupByQuery => "GROUP_BY_QUERY",
            Self::LatestPointQuery => "LATEST_POINT_QUERY",
            Self::RangeQueryOrderByTimeDesc => "RANGE_QUERY_ORDER_BY_TIME_DESC",
            Self::ValueRangeQueryOrderByTimeDesc => "VALUE_RANGE_QUERY_ORDER_BY_TIME_DESC",
        }
    }

    pub fn is_write(self) -> bool {
        self == Self::Ingestion
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
