// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Asset and run-asset-link domain types.
//!
//! asset *kind* lives in the `asset_type` field
//! of a single shared struct rather than as a Rust enum-of-structs,
//! matching the single-table `assets` schema in §4.3 exactly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    CodeSnapshot,
    Config,
    Dataset,
    Pretrained,
    Output,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::CodeSnapshot => "code_snapshot",
            AssetType::Config => "config",
            AssetType::Dataset => "dataset",
            AssetType::Pretrained => "pretrained",
            AssetType::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code_snapshot" => Some(AssetType::CodeSnapshot),
            "config" => Some(AssetType::Config),
            "dataset" => Some(AssetType::Dataset),
            "pretrained" => Some(AssetType::Pretrained),
            "output" => Some(AssetType::Output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    Sha256,
    Sha256Manifest,
    Stat,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Sha256 => "sha256",
            FingerprintKind::Sha256Manifest => "sha256_manifest",
            FingerprintKind::Stat => "stat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(FingerprintKind::Sha256),
            "sha256_manifest" => Some(FingerprintKind::Sha256Manifest),
            "stat" => Some(FingerprintKind::Stat),
            _ => None,
        }
    }
}

/// A logical entity linked to runs: the `assets` row shape from §4.3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    pub asset_type: AssetType,
    pub name: String,
    pub source_uri: Option<String>,
    pub archive_uri: Option<String>,
    pub is_archived: bool,
    pub fingerprint_kind: FingerprintKind,
    pub fingerprint: Option<String>,
    pub size_bytes: Option<u64>,
    pub mtime: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub metadata: serde_json::Value,
}

/// `(run_id, asset_id, role)` — a run-asset link, §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAssetLink {
    pub run_id: String,
    pub asset_id: String,
    pub role: crate::run::AssetRole,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
