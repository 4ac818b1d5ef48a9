// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `archive_file`/`archive_dir`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use runicorn_core::{FingerprintKind, Manifest, ManifestFileMeta, Result, RunicornError};

use super::BlobStore;

/// Result of archiving a file or directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    pub fingerprint_kind: FingerprintKind,
    pub fingerprint: String,
    pub archive_path: std::path::PathBuf,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

pub(super) fn archive_file(store: &BlobStore, src: &Path, _category: &str) -> Result<ArchiveOutcome> {
    if !src.is_file() {
        return Err(RunicornError::BadRequest(format!(
            "archive_file expects a regular file: {}",
            src.display()
        )));
    }
    let sha = store.store_blob(src)?;
    let size = fs::metadata(src)?.len();
    Ok(ArchiveOutcome {
        fingerprint_kind: FingerprintKind::Sha256,
        fingerprint: sha.clone(),
        archive_path: store.root().blob_path(&sha),
        file_count: 1,
        total_size_bytes: size,
    })
}

pub(super) fn archive_dir(store: &BlobStore, src: &Path, category: &str) -> Result<ArchiveOutcome> {
    if !src.is_dir() {
        return Err(RunicornError::BadRequest(format!(
            "archive_dir expects a directory: {}",
            src.display()
        )));
    }
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(src)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| RunicornError::Fatal("walkdir entry escaped its root".to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        let sha = store.store_blob(entry.path())?;
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.insert(rel, ManifestFileMeta { sha256: sha, size_bytes: size });
    }

    let manifest = Manifest::build(src.display().to_string(), files, chrono::Utc::now());
    let manifest_path = store.root().manifest_path(category, &manifest.fingerprint);
    if !manifest_path.exists() {
        runicorn_core::atomic::write_json_atomic(&manifest_path, &manifest)?;
    }

    Ok(ArchiveOutcome {
        fingerprint_kind: FingerprintKind::Sha256Manifest,
        fingerprint: manifest.fingerprint,
        archive_path: manifest_path,
        file_count: manifest.file_count,
        total_size_bytes: manifest.total_size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use runicorn_core::StorageRoot;
    use tempfile::tempdir;

    #[test]
    fn archive_file_returns_sha256_fingerprint() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("a.bin");
        fs::write(&src, b"payload").unwrap();

        let outcome = store.archive_file(&src, "datasets").unwrap();
        assert_eq!(outcome.fingerprint_kind, FingerprintKind::Sha256);
        assert!(outcome.archive_path.exists());
    }

    #[test]
    fn archive_dir_writes_manifest_once() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(src_dir.path().join("sub")).unwrap();
        fs::write(src_dir.path().join("sub/b.txt"), b"b").unwrap();

        let outcome = store.archive_dir(src_dir.path(), "datasets").unwrap();
        assert_eq!(outcome.fingerprint_kind, FingerprintKind::Sha256Manifest);
        assert_eq!(outcome.file_count, 2);
        assert!(outcome.archive_path.exists());

        let outcome2 = store.archive_dir(src_dir.path(), "datasets").unwrap();
        assert_eq!(outcome.fingerprint, outcome2.fingerprint);
    }

    #[test]
    fn archive_file_rejects_a_directory_source() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        assert!(store.archive_file(src_dir.path(), "datasets").is_err());
    }
}
