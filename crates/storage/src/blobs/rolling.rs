// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Rolling-directory mode: bypasses content
//! addressing for frequently-churning artifacts such as checkpoints
//! and logs, recording a cheap `{size, mtime}` stat fingerprint
//! instead of hashing the whole file on every scan pass.

use std::fs;
use std::path::Path;

use runicorn_core::{FingerprintKind, Result, RunicornError};

use super::BlobStore;

/// A `stat`-based fingerprint: `{size, mtime_ns}` joined deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingFingerprint {
    pub fingerprint_kind: FingerprintKind,
    pub fingerprint: String,
    pub archive_path: std::path::PathBuf,
}

fn safe_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn stat_fingerprint(path: &Path) -> Result<String> {
    let meta = fs::metadata(path)?;
    let mtime_ns = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    Ok(format!("{}:{}", meta.len(), mtime_ns))
}

pub(super) fn archive_file_overwrite(
    store: &BlobStore,
    run_id: &str,
    key: &str,
    src: &Path,
    _log_like: bool,
) -> Result<RollingFingerprint> {
    if !src.is_file() {
        return Err(RunicornError::BadRequest(format!(
            "archive_file_overwrite expects a regular file: {}",
            src.display()
        )));
    }
    let name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RunicornError::BadRequest("source has no file name".to_string()))?;
    let dest_name = format!("{}_{}", safe_component(key), safe_component(name));
    let dest = store.root().rolling_outputs_dir(run_id).join(dest_name);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_file_name(format!(
        ".{}.tmp.{}.{}",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id(),
        rand::random::<u32>()
    ));
    fs::copy(src, &tmp)?;
    fs::rename(&tmp, &dest)?;

    Ok(RollingFingerprint {
        fingerprint_kind: FingerprintKind::Stat,
        fingerprint: stat_fingerprint(src)?,
        archive_path: dest,
    })
}

pub(super) fn archive_dir_overwrite(
    store: &BlobStore,
    run_id: &str,
    key: &str,
    src: &Path,
) -> Result<RollingFingerprint> {
    if !src.is_dir() {
        return Err(RunicornError::BadRequest(format!(
            "archive_dir_overwrite expects a directory: {}",
            src.display()
        )));
    }
    let dest_root = store
        .root()
        .rolling_outputs_dir(run_id)
        .join(safe_component(key));
    fs::create_dir_all(&dest_root)?;

    let mut total_size = 0u64;
    let mut latest_mtime_ns = 0u128;
    for entry in walkdir::WalkDir::new(src)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| RunicornError::Fatal("walkdir entry escaped its root".to_string()))?;
        let dest = dest_root.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_file_name(format!(
            ".{}.tmp.{}.{}",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            std::process::id(),
            rand::random::<u32>()
        ));
        fs::copy(entry.path(), &tmp)?;
        fs::rename(&tmp, &dest)?;

        let meta = entry.metadata().map_err(|e| RunicornError::IoFailure(e.to_string()))?;
        total_size += meta.len();
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        latest_mtime_ns = latest_mtime_ns.max(mtime_ns);
    }

    Ok(RollingFingerprint {
        fingerprint_kind: FingerprintKind::Stat,
        fingerprint: format!("{total_size}:{latest_mtime_ns}"),
        archive_path: dest_root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use runicorn_core::StorageRoot;
    use tempfile::tempdir;

    #[test]
    fn archive_file_overwrite_replaces_content_in_place() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("ckpt.pt");
        fs::write(&src, b"v1").unwrap();

        let first = store.archive_file_overwrite("run1", "ckpt", &src).unwrap();
        fs::write(&src, b"v2-longer").unwrap();
        let second = store.archive_file_overwrite("run1", "ckpt", &src).unwrap();

        assert_eq!(first.archive_path, second.archive_path);
        assert_ne!(first.fingerprint, second.fingerprint);
        assert_eq!(fs::read(&second.archive_path).unwrap(), b"v2-longer");
    }

    #[test]
    fn archive_dir_overwrite_mirrors_directory_tree() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("a.txt"), b"a").unwrap();
        let outcome = store.archive_dir_overwrite("run1", "outputs", src_dir.path()).unwrap();
        assert!(outcome.archive_path.join("a.txt").exists());
    }
}
