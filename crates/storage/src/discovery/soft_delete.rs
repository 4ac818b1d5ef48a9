// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Soft delete.

use std::path::Path;

use runicorn_core::{DeletedMarker, Result, RunStatus, RunStatusKind, RunicornError};

/// `soft_delete_run`: writes a `.deleted` marker carrying the
/// original status. A no-op (returns `Ok`) if already deleted.
pub fn soft_delete_run(run_dir: &Path, reason: Option<String>) -> Result<()> {
    let marker_path = run_dir.join(".deleted");
    if marker_path.is_file() {
        return Ok(());
    }
    let original_status = std::fs::read(run_dir.join("status.json"))
        .ok()
        .and_then(|b| serde_json::from_slice::<RunStatus>(&b).ok())
        .map(|s| s.status)
        .unwrap_or(RunStatusKind::Running);

    let marker = DeletedMarker {
        deleted_at: chrono::Utc::now(),
        reason,
        original_status,
    };
    runicorn_core::atomic::write_json_atomic(&marker_path, &marker)
}

/// `restore_run`: removes the `.deleted` marker.
pub fn restore_run(run_dir: &Path) -> Result<()> {
    let marker_path = run_dir.join(".deleted");
    if marker_path.is_file() {
        std::fs::remove_file(&marker_path).map_err(RunicornError::from)?;
    }
    Ok(())
}
