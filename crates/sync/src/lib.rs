// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runicorn-sync: the remote sync engine — manifest
//! generation, the manifest-driven sync client, the directory-walking
//! mirror fallback, the SSH connection pool, the known-hosts store,
//! and tunneled viewer sessions.

pub mod host_key_store;
pub mod manifest_gen;
pub mod mirror;
pub mod rate_limiter;
pub mod sftp_transport;
pub mod ssh_pool;
pub mod sync_client;
pub mod tunnel;

pub use host_key_store::{fingerprint_sha256, HostKeyVerifyError, KnownHostsStore};
pub use manifest_gen::{ManifestGenerator, ManifestGeneratorConfig};
pub use mirror::{MirrorConfig, MirrorStats, MirrorTask};
pub use rate_limiter::RateLimiter;
pub use sftp_transport::SftpTransport;
pub use ssh_pool::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use sync_client::{SyncClient, SyncClientConfig, SyncCursor, SyncOutcome};
pub use tunnel::{
    keyscan_presented_key, NativeSshTunnelBackend, OpensshProcessTunnelBackend, RemoteProcessHost,
    SessionState, SessionStatus, SshProcessHost, StartSessionRequest, TunnelBackend, TunnelBackendKind,
    TunnelHandle, ViewerSessionManager,
};
