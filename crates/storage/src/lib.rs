// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runicorn-storage: the run write-path, the content-addressed blob
//! store, the embedded index, the output scanner, and storage
//! discovery.

pub mod blobs;
pub mod discovery;
pub mod index;
pub mod scanner;
pub mod writer;

pub use blobs::{ArchiveOutcome, BlobStats, BlobStore};
pub use discovery::{check_liveness_once, iter_all_runs, soft_delete_run, LivenessOutcome};
pub use index::Index;
pub use scanner::{OutputScanner, ScannerConfig, ScannerMode};
pub use writer::{RunHandle, RunWriter, RunWriterConfig};
