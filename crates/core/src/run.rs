// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Per-run state file shapes: `meta.json`, `status.json`, `summary.json`,
//! `assets.json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// `meta.json` — immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: RunId,
    /// Hierarchical path string, e.g. `"vision/r1"`.
    pub path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub writer_pid: u32,
    pub hostname: String,
    pub python_version: Option<String>,
    pub platform: String,
    pub storage_root: String,
    pub workspace_root: Option<String>,
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatusKind {
    Running,
    Finished,
    Failed,
}

impl RunStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatusKind::Running => "running",
            RunStatusKind::Finished => "finished",
            RunStatusKind::Failed => "failed",
        }
    }
}

/// `status.json` — mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub status: RunStatusKind,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
}

impl RunStatus {
    pub fn new_running(started_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            status: RunStatusKind::Running,
            started_at,
            ended_at: None,
            exit_reason: None,
        }
    }

    pub fn mark_finished(&mut self, ended_at: chrono::DateTime<chrono::Utc>) {
        self.status = RunStatusKind::Finished;
        self.ended_at = Some(ended_at);
        self.exit_reason = None;
    }

    pub fn mark_failed(&mut self, ended_at: chrono::DateTime<chrono::Utc>, reason: &str) {
        self.status = RunStatusKind::Failed;
        self.ended_at = Some(ended_at);
        self.exit_reason = Some(reason.to_string());
    }
}

/// `summary.json` — last-writer-wins key/value document.
///
/// Serialized as a plain JSON object; `BTreeMap` keeps key order
/// deterministic across writes, which keeps golden-file tests stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSummary(pub BTreeMap<String, serde_json::Value>);

impl RunSummary {
    pub fn merge(&mut self, update: serde_json::Map<String, serde_json::Value>) {
        for (k, v) in update {
            self.0.insert(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// Role an asset plays in a run's linked-asset summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Code,
    Config,
    Dataset,
    Pretrained,
    Output,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Code => "code",
            AssetRole::Config => "config",
            AssetRole::Dataset => "dataset",
            AssetRole::Pretrained => "pretrained",
            AssetRole::Output => "output",
        }
    }
}

/// One entry in `assets.json`'s per-role list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetsJsonEntry {
    pub asset_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    pub is_archived: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `assets.json` — linked asset summary, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetsJson {
    #[serde(default)]
    pub code: Vec<AssetsJsonEntry>,
    #[serde(default)]
    pub config: Vec<AssetsJsonEntry>,
    #[serde(default)]
    pub datasets: Vec<AssetsJsonEntry>,
    #[serde(default)]
    pub pretrained: Vec<AssetsJsonEntry>,
    #[serde(default)]
    pub outputs: Vec<AssetsJsonEntry>,
}

impl AssetsJson {
    pub fn entries_for_role_mut(&mut self, role: AssetRole) -> &mut Vec<AssetsJsonEntry> {
        match role {
            AssetRole::Code => &mut self.code,
            AssetRole::Config => &mut self.config,
            AssetRole::Dataset => &mut self.datasets,
            AssetRole::Pretrained => &mut self.pretrained,
            AssetRole::Output => &mut self.outputs,
        }
    }

    /// Insert or replace (by `asset_id`) an entry for the given role.
    pub fn upsert(&mut self, role: AssetRole, entry: AssetsJsonEntry) {
        let list = self.entries_for_role_mut(role);
        if let Some(existing) = list.iter_mut().find(|e| e.asset_id == entry.asset_id) {
            *existing = entry;
        } else {
            list.push(entry);
        }
    }
}

/// `.deleted` soft-delete marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedMarker {
    pub deleted_at: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
    pub original_status: RunStatusKind,
}
