// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Storage Discovery: run
//! enumeration across layouts, liveness correction, and soft delete.

mod liveness;
mod soft_delete;

pub use liveness::{check_liveness_once, LivenessOutcome};
pub use soft_delete::{restore_run, soft_delete_run};

use std::path::{Path, PathBuf};

use runicorn_core::{Result, RunMeta, RunStatus, StorageRoot};

/// One discovered run directory.
#[derive(Debug, Clone)]
pub struct DiscoveredRun {
    pub run_dir: PathBuf,
    pub meta: Option<RunMeta>,
    pub status: Option<RunStatus>,
    pub is_deleted: bool,
}

fn is_run_dir(dir: &Path) -> bool {
    dir.join("meta.json").is_file() || dir.join("status.json").is_file()
}

fn load_run(dir: &Path) -> DiscoveredRun {
    let meta = std::fs::read(dir.join("meta.json"))
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok());
    let status = std::fs::read(dir.join("status.json"))
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok());
    let is_deleted = dir.join(".deleted").is_file();
    DiscoveredRun { run_dir: dir.to_path_buf(), meta, status, is_deleted }
}

/// `iter_all_runs(root, include_deleted?)`: a bounded depth-first scan
/// of the current layout (`runs/<path>/<run_id>`) plus the legacy
/// layout (`<project>/<name>/runs/<run_id>`).
pub fn iter_all_runs(root: &StorageRoot, include_deleted: bool) -> Result<Vec<DiscoveredRun>> {
    let mut found = Vec::new();
    walk_for_runs(&root.runs_dir(), &mut found);

    if let Ok(top_level) = std::fs::read_dir(root.root()) {
        for entry in top_level.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if StorageRoot::is_reserved_top_level(&name) || name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                walk_legacy_project(&path, &mut found);
            }
        }
    }

    if include_deleted {
        Ok(found)
    } else {
        Ok(found.into_iter().filter(|r| !r.is_deleted).collect())
    }
}

fn walk_for_runs(dir: &Path, out: &mut Vec<DiscoveredRun>) {
    if !dir.is_dir() {
        return;
    }
    if is_run_dir(dir) {
        out.push(load_run(dir));
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            walk_for_runs(&path, out);
        }
    }
}

/// Legacy layout: `<project>/<name>/runs/<run_id>`.
fn walk_legacy_project(project_dir: &Path, out: &mut Vec<DiscoveredRun>) {
    let Ok(names) = std::fs::read_dir(project_dir) else { return };
    for name_entry in names.filter_map(|e| e.ok()) {
        let name_dir = name_entry.path();
        if !name_dir.is_dir() {
            continue;
        }
        let runs_dir = name_dir.join("runs");
        if runs_dir.is_dir() {
            walk_for_runs(&runs_dir, out);
        }
    }
}

/// `find_run_dir_by_id(root, run_id, include_deleted?)`: a linear
/// scan; callers requiring frequent lookups should cache.
pub fn find_run_dir_by_id(
    root: &StorageRoot,
    run_id: &str,
    include_deleted: bool,
) -> Result<Option<PathBuf>> {
    let runs = iter_all_runs(root, include_deleted)?;
    Ok(runs
        .into_iter()
        .find(|r| r.run_dir.file_name().map(|n| n == run_id).unwrap_or(false))
        .map(|r| r.run_dir))
}
