// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Content-addressed directory manifest.
//!
//! A manifest describes a directory as an ordered list of
//! `(relative_path, sha256, size)` tuples. Its fingerprint is the
//! SHA-256 of the canonical serialization `NUL(rel) || NUL(sha) || …`
//! for entries sorted by `rel` — computed here as a pure function so
//! both the archiver and the restorer (and their tests) share one
//! implementation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One file entry inside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFileMeta {
    pub sha256: String,
    pub size_bytes: u64,
}

/// JSON shape written to `archive/manifests/<category>/<fp[0:2]>/<fp>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub source_path: String,
    pub fingerprint: String,
    pub total_size_bytes: u64,
    pub file_count: u64,
    pub files: BTreeMap<String, ManifestFileMeta>,
}

/// Compute the deterministic fingerprint for a set of `(rel_path, sha256)`
/// pairs: SHA-256 over `NUL(rel) || NUL(sha) || …` with entries sorted
/// by `rel_path`. `BTreeMap` iteration is already sorted, so callers
/// building `files` with it get the right order for free.
pub fn compute_fingerprint<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut sorted: Vec<(&str, &str)> = entries.collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (rel, sha) in sorted {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(sha.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

impl Manifest {
    /// Build a manifest from an already-sorted `files` map, computing
    /// its fingerprint and totals.
    pub fn build(source_path: String, files: BTreeMap<String, ManifestFileMeta>, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        let fingerprint = compute_fingerprint(files.iter().map(|(rel, meta)| (rel.as_str(), meta.sha256.as_str())));
        let total_size_bytes = files.values().map(|m| m.size_bytes).sum();
        let file_count = files.len() as u64;
        Manifest {
            created_at,
            source_path,
            fingerprint,
            total_size_bytes,
            file_count,
            files,
        }
    }

    /// Re-derive the fingerprint from `files` and compare against the
    /// stored one — the round-trip law
    pub fn verify_fingerprint(&self) -> bool {
        let recomputed = compute_fingerprint(
            self.files
                .iter()
                .map(|(rel, meta)| (rel.as_str(), meta.sha256.as_str())),
        );
        recomputed == self.fingerprint
    }
}
