// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Persistent per-path scan state, `.outputs_state.json` (the write-path contract
//! steps 3-4, 8).

use std::collections::HashMap;
use std::path::Path;

use runicorn_core::Result;
use serde::{Deserialize, Serialize};

/// State tracked for one watched path between scan passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct PathState {
    pub size: u64,
    pub mtime_ns: u128,
    pub stable_count: u32,
    pub last_archived_fingerprint: Option<String>,
    pub last_archived_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
}

/// `.outputs_state.json`, keyed by the stable `key` from §4.4 step 2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ScanState {
    #[serde(default)]
    pub paths: HashMap<String, PathState>,
}

impl ScanState {
    pub(super) fn load(path: &Path) -> Self {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    pub(super) fn save(&self, path: &Path) -> Result<()> {
        runicorn_core::atomic::write_json_atomic(path, self)
    }

    /// Drop entries not observed within `gc_after_sec` of `now`.
    pub(super) fn gc(&mut self, now: chrono::DateTime<chrono::Utc>, gc_after_sec: u64) {
        let gc_after = chrono::Duration::seconds(gc_after_sec as i64);
        self.paths.retain(|_, state| now - state.last_seen_at < gc_after);
    }

    /// the write-path contract steps 3-4: record one observation of `key`,
    /// resetting the stability counter on any size/mtime change and
    /// incrementing it otherwise. Returns the updated entry.
    pub(super) fn observe(
        &mut self,
        key: &str,
        size: u64,
        mtime_ns: u128,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PathState {
        let entry = self.paths.entry(key.to_string()).or_insert_with(|| PathState {
            size,
            mtime_ns,
            stable_count: 0,
            last_archived_fingerprint: None,
            last_archived_at: None,
            last_seen_at: now,
        });
        if entry.size != size || entry.mtime_ns != mtime_ns {
            entry.size = size;
            entry.mtime_ns = mtime_ns;
            entry.stable_count = 1;
        } else {
            entry.stable_count += 1;
        }
        entry.last_seen_at = now;
        entry.clone()
    }

    /// Record the fingerprint archived for `key` in step 6, so a
    /// subsequent unchanged observation is recognized as a no-op.
    pub(super) fn record_archived(
        &mut self,
        key: &str,
        fingerprint: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        if let Some(entry) = self.paths.get_mut(key) {
            entry.last_archived_fingerprint = Some(fingerprint.to_string());
            entry.last_archived_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_yields_empty_state() {
        let dir = tempdir().unwrap();
        let state = ScanState::load(&dir.path().join(".outputs_state.json"));
        assert!(state.paths.is_empty());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".outputs_state.json");
        let mut state = ScanState::default();
        state.paths.insert(
            "ckpt/model.pt".to_string(),
            PathState {
                size: 10,
                mtime_ns: 123,
                stable_count: 2,
                last_archived_fingerprint: Some("10:123".to_string()),
                last_archived_at: None,
                last_seen_at: chrono::Utc::now(),
            },
        );
        state.save(&path).unwrap();
        let reloaded = ScanState::load(&path);
        assert_eq!(reloaded.paths.len(), 1);
    }

    #[test]
    fn gc_drops_stale_entries() {
        let mut state = ScanState::default();
        let now = chrono::Utc::now();
        state.paths.insert(
            "stale".to_string(),
            PathState {
                size: 1,
                mtime_ns: 1,
                stable_count: 1,
                last_archived_fingerprint: None,
                last_archived_at: None,
                last_seen_at: now - chrono::Duration::seconds(1000),
            },
        );
        state.paths.insert(
            "fresh".to_string(),
            PathState {
                size: 1,
                mtime_ns: 1,
                stable_count: 1,
                last_archived_fingerprint: None,
                last_archived_at: None,
                last_seen_at: now,
            },
        );
        state.gc(now, 600);
        assert_eq!(state.paths.len(), 1);
        assert!(state.paths.contains_key("fresh"));
    }
}
