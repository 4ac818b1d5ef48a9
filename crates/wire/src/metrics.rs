// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `/api/runs/{id}/metrics` response shape and the LTTB downsampling
//! algorithm it names. The metrics themselves are read
//! from `events.jsonl` by the (out-of-scope) viewer; this crate only
//! owns the response DTO and the pure downsampling function.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{columns, rows, total, sampled}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total: usize,
    pub sampled: bool,
}

/// Largest-Triangle-Three-Buckets downsampling of `(x, y)` points to at
/// most `threshold` points. Always keeps the first and last point.
/// Returns `points` unchanged if it already has `threshold` or fewer.
pub fn lttb_downsample(points: &[(f64, f64)], threshold: usize) -> Vec<(f64, f64)> {
    let n = points.len();
    if threshold == 0 || n <= threshold || threshold < 3 {
        return points.to_vec();
    }

    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(points[0]);

    // Bucket size for the points between the fixed first/last points.
    let bucket_size = (n - 2) as f64 / (threshold - 2) as f64;
    let mut a = 0usize;

    for i in 0..threshold - 2 {
        let range_start = (((i as f64) * bucket_size) as usize) + 1;
        let range_end = ((((i + 1) as f64) * bucket_size) as usize) + 1;
        let range_end = range_end.min(n - 1);

        let next_range_start = ((((i + 1) as f64) * bucket_size) as usize) + 1;
        let next_range_end = ((((i + 2) as f64) * bucket_size) as usize) + 1;
        let next_range_end = next_range_end.min(n);
        let next_range_start = next_range_start.min(n - 1);

        let avg_range = &points[next_range_start..next_range_end];
        let (avg_x, avg_y) = if avg_range.is_empty() {
            points[n - 1]
        } else {
            let sum_x: f64 = avg_range.iter().map(|p| p.0).sum();
            let sum_y: f64 = avg_range.iter().map(|p| p.1).sum();
            let len = avg_range.len() as f64;
            (sum_x / len, sum_y / len)
        };

        let point_a = points[a];
        let mut max_area = -1.0f64;
        let mut max_index = range_start.min(range_end.saturating_sub(1)).max(range_start);
        for (offset, point) in points[range_start..range_end].iter().enumerate() {
            let area = ((point_a.0 - avg_x) * (point.1 - point_a.1)
                - (point_a.0 - point.0) * (avg_y - point_a.1))
                .abs()
                * 0.5;
            if area > max_area {
                max_area = area;
                max_index = range_start + offset;
            }
        }

        sampled.push(points[max_index]);
        a = max_index;
    }

    sampled.push(points[n - 1]);
    sampled
}
