// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Server-generated sync manifest shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncManifestType {
    Full,
    Active,
}

impl SyncManifestType {
    pub fn file_stem(&self) -> &'static str {
        match self {
            SyncManifestType::Full => "full_manifest",
            SyncManifestType::Active => "active_manifest",
        }
    }
}

/// File priority: lower sorts first in the sync client's download order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum FilePriority {
    /// `meta.json`, `status.json`, `summary.json`.
    Metadata = 1,
    /// `events.jsonl`, `logs.txt`.
    Essential = 2,
    /// Media files.
    Media = 4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFileEntry {
    pub path: String,
    pub size: u64,
    pub mtime: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail_hash: Option<String>,
    pub priority: FilePriority,
    pub is_append_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncExperimentEntry {
    pub run_id: String,
    pub project: String,
    pub name: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub files: Vec<SyncFileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncManifest {
    pub format_version: u32,
    pub manifest_type: SyncManifestType,
    /// Monotonic, starts at 1.
    pub revision: u64,
    pub snapshot_id: String,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub server_hostname: String,
    pub remote_root: String,
    pub experiments: Vec<SyncExperimentEntry>,
}

impl SyncManifest {
    /// Validate the structural invariants: no
    /// absolute paths, no `..` segments, and `project/name/runs/<run_id>/filename`
    /// shape (at least 5 components).
    pub fn validate_paths(&self) -> Result<(), String> {
        if self.revision < 1 {
            return Err("revision must be >= 1".to_string());
        }
        for exp in &self.experiments {
            for f in &exp.files {
                let p = std::path::Path::new(&f.path);
                if p.is_absolute() {
                    return Err(format!("absolute path not allowed: {}", f.path));
                }
                if f.path.split('/').any(|seg| seg == "..") {
                    return Err(format!("'..' segment not allowed: {}", f.path));
                }
                let components: Vec<&str> = f.path.split('/').collect();
                if components.len() < 5 {
                    return Err(format!(
                        "path must be project/name/runs/<run_id>/filename: {}",
                        f.path
                    ));
                }
                if components[2] != "runs" {
                    return Err(format!("expected 'runs' path segment: {}", f.path));
                }
            }
        }
        Ok(())
    }
}
