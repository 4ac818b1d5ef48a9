// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Write-to-sibling-temp-then-rename, used by every mutable state file
//! in the storage root: `meta.json`, `status.json`, `summary.json`,
//! `assets.json`, manifests, `known_hosts`, and the sync state files
//!.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, RunicornError};

/// Write `contents` to `path` atomically: write to a sibling temp file
/// then rename over the destination. If the platform refuses to rename
/// over an existing file, the destination is removed first.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        RunicornError::BadRequest(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let tmp_name = format!(
        ".{}.tmp.{}.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id(),
        rand::random::<u32>()
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Some platforms (notably older Windows filesystems) refuse to
            // rename over an existing destination. Remove it first and retry.
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path)?;
            Ok(())
        }
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_file_with_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b.json");
        write_atomic(&path, b"{\"x\":1}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{\"x\":1}");
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn write_atomic_never_leaves_tmp_files_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        write_atomic(&path, b"data").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
