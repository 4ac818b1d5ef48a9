// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `export_manifest_to_zip`: package a manifest's
//! files into a deflate-compressed archive.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use runicorn_core::{Result, RunicornError};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::BlobStore;

pub(super) fn export_manifest_to_zip(
    store: &BlobStore,
    manifest_path: &Path,
    zip_path: &Path,
) -> Result<()> {
    let manifest = store.load_manifest(manifest_path)?;

    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = zip_path.with_extension("zip.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (rel, meta) in &manifest.files {
            let blob_path = store.root().blob_path(&meta.sha256);
            let mut blob = File::open(&blob_path)
                .map_err(|e| RunicornError::NotFound(format!("blob {}: {e}", meta.sha256)))?;
            zip.start_file(rel, options)
                .map_err(|e| RunicornError::IoFailure(e.to_string()))?;
            let mut buf = Vec::new();
            blob.read_to_end(&mut buf)?;
            zip.write_all(&buf)?;
        }
        zip.finish().map_err(|e| RunicornError::IoFailure(e.to_string()))?;
    }
    std::fs::rename(&tmp_path, zip_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use runicorn_core::StorageRoot;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn export_manifest_to_zip_packages_every_file() {
        let root_dir = tempdir().unwrap();
        let store = BlobStore::new(StorageRoot::new(root_dir.path()));
        let src_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("a.txt"), b"a-contents").unwrap();
        let outcome = store.archive_dir(src_dir.path(), "datasets").unwrap();

        let zip_path = tempdir().unwrap().path().join("export.zip");
        store.export_manifest_to_zip(&outcome.archive_path, &zip_path).unwrap();
        assert!(zip_path.exists());

        let file = File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "a-contents");
    }
}
