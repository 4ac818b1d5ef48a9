// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Blob Store & Manifests.
//!
//! Per the Open Question recorded in `DESIGN.md`, only the
//! `assets_v2`-style `_overwrite`/`_overwrite_stat` rolling variants
//! are implemented; there is no parallel "v1" module tree.

mod archive;
mod restore;
mod rolling;
mod zip_export;

pub use archive::ArchiveOutcome;
pub use rolling::RollingFingerprint;

use std::fs;
use std::path::Path;

use runicorn_core::{FingerprintKind, Manifest, Result, RunicornError, StorageRoot};
use sha2::{Digest, Sha256};

/// `get_blob_stats()` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlobStats {
    pub blob_count: u64,
    pub total_size_bytes: u64,
}

/// Content-addressed blob store rooted at a [`StorageRoot`].
pub struct BlobStore {
    root: StorageRoot,
}

impl BlobStore {
    pub fn new(root: StorageRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &StorageRoot {
        &self.root
    }

    /// `store_blob(src_path) -> sha256`. No-ops if the blob already
    /// exists; otherwise copies to a temp sibling and atomically
    /// renames into place.
    pub fn store_blob(&self, src_path: &Path) -> Result<String> {
        let sha = sha256_file(src_path)?;
        let dest = self.root.blob_path(&sha);
        if dest.exists() {
            return Ok(sha);
        }
        let shard = &sha[..2.min(sha.len())];
        let parent = self.root.blobs_dir().join(shard);
        fs::create_dir_all(&parent)?;
        let tmp = parent.join(format!(".tmp.{}.{}", std::process::id(), rand::random::<u32>()));
        fs::copy(src_path, &tmp)?;
        match fs::rename(&tmp, &dest) {
            Ok(()) => {}
            Err(_) if dest.exists() => {
                // Another writer raced us to the same content hash; both
                // copies are byte-identical, so discard ours.
                let _ = fs::remove_file(&tmp);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(sha)
    }

    /// `archive_file(src, category) -> {fingerprint_kind, fingerprint, archive_path}`.
    pub fn archive_file(&self, src: &Path, category: &str) -> Result<ArchiveOutcome> {
        archive::archive_file(self, src, category)
    }

    /// `archive_dir(src, category) -> {fingerprint_kind: sha256_manifest, ...}`.
    pub fn archive_dir(&self, src: &Path, category: &str) -> Result<ArchiveOutcome> {
        archive::archive_dir(self, src, category)
    }

    /// `restore_from_manifest(manifest_path, target_dir, overwrite?)`.
    pub fn restore_from_manifest(
        &self,
        manifest_path: &Path,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<()> {
        restore::restore_from_manifest(self, manifest_path, target_dir, overwrite)
    }

    /// `export_manifest_to_zip(manifest_path, zip_path)`.
    pub fn export_manifest_to_zip(&self, manifest_path: &Path, zip_path: &Path) -> Result<()> {
        zip_export::export_manifest_to_zip(self, manifest_path, zip_path)
    }

    /// `get_blob_stats()`.
    pub fn get_blob_stats(&self) -> Result<BlobStats> {
        let blobs_dir = self.root.blobs_dir();
        if !blobs_dir.exists() {
            return Ok(BlobStats { blob_count: 0, total_size_bytes: 0 });
        }
        let mut blob_count = 0u64;
        let mut total_size_bytes = 0u64;
        for entry in walkdir::WalkDir::new(&blobs_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            blob_count += 1;
            total_size_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        Ok(BlobStats { blob_count, total_size_bytes })
    }

    /// Rolling-directory mode bypass used by the output scanner
    ///.
    pub fn archive_file_overwrite(
        &self,
        run_id: &str,
        key: &str,
        src: &Path,
    ) -> Result<RollingFingerprint> {
        rolling::archive_file_overwrite(self, run_id, key, src, false)
    }

    /// Log-like variant: identical to `archive_file_overwrite` but
    /// named distinctly per §4.4 step 6 ("log-like files"); stat
    /// fingerprinting is unconditional either way — see `DESIGN.md`.
    pub fn archive_file_overwrite_stat(
        &self,
        run_id: &str,
        key: &str,
        src: &Path,
    ) -> Result<RollingFingerprint> {
        rolling::archive_file_overwrite(self, run_id, key, src, true)
    }

    pub fn archive_dir_overwrite(
        &self,
        run_id: &str,
        key: &str,
        src: &Path,
    ) -> Result<RollingFingerprint> {
        rolling::archive_dir_overwrite(self, run_id, key, src)
    }

    pub fn load_manifest(&self, manifest_path: &Path) -> Result<Manifest> {
        let bytes = fs::read(manifest_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| RunicornError::IoFailure(format!("{}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn fingerprint_kind_for_archive(is_dir: bool) -> FingerprintKind {
    if is_dir {
        FingerprintKind::Sha256Manifest
    } else {
        FingerprintKind::Sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_blob_dedups_identical_content() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("a.bin");
        fs::write(&src, b"hello").unwrap();

        let sha1 = store.store_blob(&src).unwrap();
        let sha2 = store.store_blob(&src).unwrap();
        assert_eq!(sha1, sha2);

        let stats = store.get_blob_stats().unwrap();
        assert_eq!(stats.blob_count, 1);
        assert_eq!(stats.total_size_bytes, 5);
    }

    #[test]
    fn blob_path_is_content_addressed() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("a.bin");
        fs::write(&src, b"hello").unwrap();
        let sha = store.store_blob(&src).unwrap();
        assert!(store.root().blob_path(&sha).exists());
    }
}
