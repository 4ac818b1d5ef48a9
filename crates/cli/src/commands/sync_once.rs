// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `runicorn sync-once --remote ...`: wire the SSH connection pool,
//! the known-hosts store, and the manifest sync client together for a
//! single sync cycle, without the daemon's
//! scheduling loop around it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use runicorn_core::StorageRoot;
use runicorn_sync::ssh_pool::PrivateKeyPath;
use runicorn_sync::{ConnectionConfig, ConnectionPool, KnownHostsStore, SftpTransport, SyncClient, SyncClientConfig};

use crate::exit_error::ExitError;
use crate::output::{print_value, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncOnceArgs {
    #[arg(long)]
    host: String,
    #[arg(long, default_value_t = 22)]
    port: u16,
    #[arg(long)]
    user: String,
    /// Remote storage root, e.g. `/home/alice/.runicorn`.
    #[arg(long)]
    remote_root: String,
    /// Local cache directory this cycle reads/writes cursor + state into.
    #[arg(long)]
    cache_dir: PathBuf,
    /// Path to a private key file; falls back to agent auth if omitted.
    #[arg(long)]
    key_path: Option<PathBuf>,
    #[arg(long)]
    password: Option<String>,
}

pub fn handle(storage_root: &StorageRoot, format: OutputFormat, args: SyncOnceArgs) -> Result<(), ExitError> {
    let known_hosts = Arc::new(KnownHostsStore::new(storage_root.root().join("known_hosts")));
    let pool = Arc::new(ConnectionPool::new(known_hosts));

    let mut conn_config = ConnectionConfig::new(args.host, args.port, args.user);
    conn_config.timeout = Duration::from_secs(15);
    conn_config.private_key_path = args
        .key_path
        .map(|private| PrivateKeyPath { public: None, private, passphrase: None });
    conn_config.password = args.password;
    conn_config.use_agent = conn_config.private_key_path.is_none() && conn_config.password.is_none();

    let transport = Arc::new(SftpTransport::new(pool, conn_config));
    let client = SyncClient::new(transport, args.remote_root, args.cache_dir, SyncClientConfig::default());

    let outcome = client.sync()?;
    print_value(format, &format!("{outcome:?}"));
    Ok(())
}
