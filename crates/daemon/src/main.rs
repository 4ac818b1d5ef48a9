// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `runicornd`: background orchestration binary. Installs a `tracing`
//! subscriber, loads configuration, and runs the supervisor until
//! interrupted.

use std::path::PathBuf;
use std::time::Duration;

use runicorn_daemon::{Config, Supervisor};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let explicit_root = std::env::var("RUNICORN_STORAGE_ROOT").ok().map(PathBuf::from);
    let config = match Config::load(explicit_root) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to load daemon configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(root = %config.storage_root.root().display(), "runicornd starting");
    let supervisor = Supervisor::new(config);
    if let Err(err) = supervisor.start() {
        tracing::error!(error = %err, "failed to start background workers");
        std::process::exit(1);
    }

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
