// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `/api/runs` and `/api/runs/{id}` response shapes.

use serde::{Deserialize, Serialize};

use runicorn_core::{AssetsJson, RunMeta, RunStatus, RunSummary};

/// One row of `GET /api/runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunListEntry {
    pub id: String,
    pub path: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RunListEntry {
    pub fn new(meta: &RunMeta, status: &RunStatus) -> Self {
        Self {
            id: meta.id.to_string(),
            path: meta.path.clone(),
            status: status.status.as_str().to_string(),
            created_at: meta.created_at,
            ended_at: status.ended_at,
        }
    }
}

/// `GET /api/runs/{id}` — includes paths, since the viewer needs them
/// to construct blob/manifest download links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    pub id: String,
    pub path: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub hostname: String,
    pub run_dir: String,
    pub summary: RunSummary,
    pub assets: AssetsJson,
}

impl RunDetail {
    pub fn new(
        meta: &RunMeta,
        status: &RunStatus,
        run_dir: &std::path::Path,
        summary: RunSummary,
        assets: AssetsJson,
    ) -> Self {
        Self {
            id: meta.id.to_string(),
            path: meta.path.clone(),
            status: status.status.as_str().to_string(),
            created_at: meta.created_at,
            ended_at: status.ended_at,
            hostname: meta.hostname.clone(),
            run_dir: run_dir.display().to_string(),
            summary,
            assets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runicorn_core::test_support::fixture_run_meta;

    #[test]
    fn run_list_entry_uses_status_string() {
        let meta = fixture_run_meta("1700000000000_aaaaaa", "vision/r1");
        let status = RunStatus::new_running(chrono::Utc::now());
        let entry = RunListEntry::new(&meta, &status);
        assert_eq!(entry.status, "running");
        assert_eq!(entry.path, "vision/r1");
    }
}
