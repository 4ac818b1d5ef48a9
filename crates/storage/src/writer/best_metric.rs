// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Best-metric tracking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    Max,
    Min,
}

#[derive(Debug, Clone)]
struct PrimaryMetric {
    name: String,
    mode: MetricMode,
    best_value: f64,
    best_step: u64,
}

/// Caches the best-seen value of a configured primary metric and
/// flushes it into `summary.json` fields on demand.
#[derive(Debug, Default)]
pub struct BestMetricTracker {
    primary: Option<PrimaryMetric>,
}

impl BestMetricTracker {
    pub fn set_primary(&mut self, name: &str, mode: MetricMode) {
        self.primary = Some(PrimaryMetric {
            name: name.to_string(),
            mode,
            best_value: match mode {
                MetricMode::Max => f64::NEG_INFINITY,
                MetricMode::Min => f64::INFINITY,
            },
            best_step: 0,
        });
    }

    /// Observe one metrics event's payload. Returns `true` if the
    /// primary metric improved.
    pub fn observe(&mut self, data: &BTreeMap<String, FieldValue>, step: u64) -> bool {
        let Some(primary) = self.primary.as_mut() else {
            return false;
        };
        let Some(FieldValue::Number(value)) = data.get(&primary.name) else {
            return false;
        };
        if value.is_nan() {
            return false;
        }
        let improved = match primary.mode {
            MetricMode::Max => *value > primary.best_value,
            MetricMode::Min => *value < primary.best_value,
        };
        if improved {
            primary.best_value = *value;
            primary.best_step = step;
        }
        improved
    }

    /// The fields to merge into `summary.json` at `finish()` (and,
    /// optionally, eagerly on every improvement).
    pub fn summary_fields(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let primary = self.primary.as_ref()?;
        if !primary.best_value.is_finite() {
            return None;
        }
        let mut map = serde_json::Map::new();
        map.insert(
            "best_metric_name".to_string(),
            serde_json::json!(primary.name),
        );
        map.insert(
            "best_metric_value".to_string(),
            serde_json::json!(primary.best_value),
        );
        map.insert(
            "best_metric_step".to_string(),
            serde_json::json!(primary.best_step),
        );
        map.insert(
            "best_metric_mode".to_string(),
            serde_json::json!(primary.mode),
        );
        Some(map)
    }
}
