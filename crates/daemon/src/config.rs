// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Daemon configuration, modeled on `oj-daemon::lifecycle::Config::load`:
//! resolve a handful of fixed paths and intervals once at startup.

use std::path::PathBuf;
use std::time::Duration;

use runicorn_core::{Result, StorageRoot};
use runicorn_sync::ConnectionConfig;

/// One configured remote to keep in sync.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub name: String,
    pub connection: ConnectionConfig,
    pub remote_root: String,
    pub sync_interval: Duration,
    pub mirror_interval: Duration,
    /// Fall back to the directory-walking mirror when no sync manifest
    /// is published on the remote.
    pub enable_mirror_fallback: bool,
}

/// Daemon-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_root: StorageRoot,
    pub local_hostname: String,
    pub liveness_interval: Duration,
    pub scanner_interval: Duration,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    pub remotes: Vec<RemoteConfig>,
}

impl Config {
    /// Load configuration for the user-level daemon: fixed paths
    /// derived from the resolved [`StorageRoot`], one daemon instance
    /// per storage root.
    pub fn load(explicit_root: Option<PathBuf>) -> Result<Self> {
        let storage_root = StorageRoot::resolve(explicit_root);
        let local_hostname = hostname();

        Ok(Self {
            log_path: storage_root.root().join("runicornd.log"),
            lock_path: storage_root.root().join("runicornd.pid"),
            storage_root,
            local_hostname,
            liveness_interval: Duration::from_secs(60),
            scanner_interval: Duration::from_secs(5),
            remotes: Vec::new(),
        })
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}
