// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `runicorn storage-stats`: run count, blob-store size, and index
//! file size for a storage root (the write-path contract `/api/storage/stats`),
//! read directly rather than through the out-of-scope HTTP surface.

use runicorn_core::StorageRoot;
use runicorn_storage::{iter_all_runs, BlobStore};

use crate::exit_error::ExitError;
use crate::output::{print_value, OutputFormat};

pub fn handle(root: &StorageRoot, format: OutputFormat) -> Result<(), ExitError> {
    let runs = iter_all_runs(root, true)?;
    let run_count = runs.len();
    let deleted_count = runs.iter().filter(|r| r.is_deleted).count();

    let store = BlobStore::new(root.clone());
    let blob_stats = store.get_blob_stats()?;

    let index_bytes = std::fs::metadata(root.index_db_path()).map(|m| m.len()).unwrap_or(0);

    print_value(
        format,
        &serde_json::json!({
            "run_count": run_count,
            "deleted_run_count": deleted_count,
            "blob_count": blob_stats.blob_count,
            "blob_total_size_bytes": blob_stats.total_size_bytes,
            "index_size_bytes": index_bytes,
        }),
    );
    Ok(())
}
