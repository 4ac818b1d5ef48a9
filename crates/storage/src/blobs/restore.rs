// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `restore_from_manifest`: rebuild a directory from
//! blobs, rejecting any entry that would escape `target_dir`.

use std::fs;
use std::path::{Component, Path};

use runicorn_core::{Result, RunicornError};

use super::BlobStore;

fn is_path_safe(rel: &str) -> bool {
    if rel.is_empty() {
        return false;
    }
    let path = Path::new(rel);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
}

pub(super) fn restore_from_manifest(
    store: &BlobStore,
    manifest_path: &Path,
    target_dir: &Path,
    overwrite: bool,
) -> Result<()> {
    let manifest = store.load_manifest(manifest_path)?;
    fs::create_dir_all(target_dir)?;

    for (rel, meta) in &manifest.files {
        if !is_path_safe(rel) {
            return Err(RunicornError::Corrupt(format!(
                "manifest entry escapes target_dir: {rel}"
            )));
        }
        let dest = target_dir.join(rel);
        if dest.exists() && !overwrite {
            continue;
        }
        let blob_path = store.root().blob_path(&meta.sha256);
        if !blob_path.exists() {
            return Err(RunicornError::NotFound(format!(
                "missing blob {} referenced by manifest",
                meta.sha256
            )));
        }
        let parent = dest.parent().unwrap_or(target_dir);
        fs::create_dir_all(parent)?;
        let tmp_name = format!(
            ".{}.tmp.{}.{}",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            std::process::id(),
            rand::random::<u32>()
        );
        let tmp = parent.join(tmp_name);
        fs::copy(&blob_path, &tmp)?;
        fs::rename(&tmp, &dest)?;
    }
    Ok(())
}
