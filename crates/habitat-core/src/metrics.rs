//! Loosely typed metric values returned by unit behaviors.

use crate::fixed::{Fixed64, fixed64_to_f64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single domain metric. Serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Count(i64),
    Quantity(f64),
    Text(String),
}

/// Named metrics, ordered by name so reports are stable.
pub type Metrics = BTreeMap<String, MetricValue>;

impl MetricValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Count(v) => Some(*v as f64),
            MetricValue::Quantity(v) => Some(*v),
            MetricValue::Flag(_) | MetricValue::Text(_) => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Flag(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Count(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Quantity(v)
    }
}

impl From<Fixed64> for MetricValue {
    fn from(v: Fixed64) -> Self {
        MetricValue::Quantity(fixed64_to_f64(v))
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}
