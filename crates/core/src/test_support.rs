// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Shared test fixtures for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::asset::{Asset, AssetType, FingerprintKind};
use crate::ids::RunId;
use crate::run::{RunMeta, RunStatus};

pub mod strategies {
    use crate::run::RunStatusKind;
    use proptest::prelude::*;

    pub fn arb_run_status_kind() -> impl Strategy<Value = RunStatusKind> {
        prop_oneof![
            Just(RunStatusKind::Running),
            Just(RunStatusKind::Finished),
            Just(RunStatusKind::Failed),
        ]
    }
}

pub fn fixture_run_meta(id: &str, path: &str) -> RunMeta {
    RunMeta {
        id: RunId::parse(id).unwrap_or_else(|_| panic!("bad fixture run id: {id}")),
        path: path.to_string(),
        created_at: chrono::Utc::now(),
        writer_pid: std::process::id(),
        hostname: "test-host".to_string(),
        python_version: None,
        platform: "test".to_string(),
        storage_root: "/tmp/runicorn".to_string(),
        workspace_root: None,
    }
}

pub fn fixture_run_status_running() -> RunStatus {
    RunStatus::new_running(chrono::Utc::now())
}

pub fn fixture_asset(asset_id: &str, fingerprint: &str) -> Asset {
    Asset {
        asset_id: asset_id.to_string(),
        asset_type: AssetType::Dataset,
        name: "dataset.zip".to_string(),
        source_uri: Some("file:///data/dataset.zip".to_string()),
        archive_uri: None,
        is_archived: false,
        fingerprint_kind: FingerprintKind::Sha256,
        fingerprint: Some(fingerprint.to_string()),
        size_bytes: Some(1024),
        mtime: None,
        created_at: chrono::Utc::now(),
        metadata: serde_json::json!({}),
    }
}
