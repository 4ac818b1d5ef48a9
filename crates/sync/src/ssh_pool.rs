// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! SSH connection pool, keyed by `user@host:port`.
//! Built on `ssh2`; each pooled connection bundles the authenticated
//! transport and a ready SFTP channel.

use std::collections::HashMap;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use runicorn_core::{Result, RunicornError};
use ssh2::{HostKeyType, Session, Sftp};
use tracing::{debug, warn};

use crate::host_key_store::KnownHostsStore;

/// Connection target plus the auth material to try, in priority order:
/// explicit private key bytes, private key file, password, agent.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_bytes: Option<PrivateKeyBytes>,
    pub private_key_path: Option<PrivateKeyPath>,
    pub password: Option<String>,
    pub use_agent: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PrivateKeyBytes {
    pub public: Option<Vec<u8>>,
    pub private: Vec<u8>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrivateKeyPath {
    pub public: Option<PathBuf>,
    pub private: PathBuf,
    pub passphrase: Option<String>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            timeout: Duration::from_secs(15),
            ..Default::default()
        }
    }

    /// The pool key: `user@host:port`.
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

fn host_key_type_name(kind: HostKeyType) -> &'static str {
    match kind {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed255 => "ssh-ed25519",
        _ => "unknown",
    }
}

/// One pooled connection: the authenticated transport plus a ready
/// SFTP channel
pub struct PooledConnection {
    pub session: Session,
    pub sftp: Sftp,
    opened_at: Instant,
}

impl PooledConnection {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// SSH connection pool. A connection is rebuilt transparently if its
/// health probe fails.
pub struct ConnectionPool {
    host_keys: Arc<KnownHostsStore>,
    connections: Mutex<HashMap<String, Arc<Mutex<PooledConnection>>>>,
}

impl ConnectionPool {
    pub fn new(host_keys: Arc<KnownHostsStore>) -> Self {
        Self { host_keys, connections: Mutex::new(HashMap::new()) }
    }

    /// Return a healthy connection for `config`, creating one if absent
    /// or disposing a dead one first.
    pub fn get_or_create(&self, config: &ConnectionConfig) -> Result<Arc<Mutex<PooledConnection>>> {
        let key = config.key();
        {
            let connections = self.connections.lock();
            if let Some(conn) = connections.get(&key) {
                if Self::is_healthy(conn) {
                    return Ok(conn.clone());
                }
            }
        }
        // Either absent or unhealthy; drop any stale entry, then (re)build
        // outside the map lock since connecting involves network I/O.
        self.connections.lock().remove(&key);
        let fresh = Arc::new(Mutex::new(self.connect(config)?));
        self.connections.lock().insert(key, fresh.clone());
        Ok(fresh)
    }

    fn is_healthy(conn: &Arc<Mutex<PooledConnection>>) -> bool {
        let mut guard = conn.lock();
        guard.session.keepalive_send().is_ok()
    }

    fn connect(&self, config: &ConnectionConfig) -> Result<PooledConnection> {
        let addr = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| RunicornError::IoFailure(format!("connect {addr}: {e}")))?;
        tcp.set_read_timeout(Some(config.timeout)).ok();

        let mut session = Session::new()
            .map_err(|e| RunicornError::Fatal(format!("ssh session init: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_compress(true);
        session.set_timeout(config.timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| RunicornError::IoFailure(format!("ssh handshake: {e}")))?;

        self.verify_host_key(config, &session)?;
        self.authenticate(config, &session)?;

        if !session.authenticated() {
            return Err(RunicornError::Unauthorized(format!(
                "no auth method succeeded for {}",
                config.key()
            )));
        }

        // Keepalive every ~30s
        session.set_keepalive(true, 30);

        let sftp = session
            .sftp()
            .map_err(|e| RunicornError::IoFailure(format!("sftp channel: {e}")))?;

        debug!(key = %config.key(), "opened ssh connection");
        Ok(PooledConnection { session, sftp, opened_at: Instant::now() })
    }

    fn verify_host_key(&self, config: &ConnectionConfig, session: &Session) -> Result<()> {
        let (key_bytes, kind) = session
            .host_key()
            .ok_or_else(|| RunicornError::Fatal("server presented no host key".to_string()))?;
        let key_type = host_key_type_name(kind);
        self.host_keys
            .verify(&config.host, config.port, key_type, key_bytes)
            .map_err(|e| match e {
                crate::host_key_store::HostKeyVerifyError::UnknownHostKey(p) => {
                    RunicornError::Conflict(format!("unknown host key: {}", p.known_hosts_host))
                }
                crate::host_key_store::HostKeyVerifyError::HostKeyChanged(p) => {
                    RunicornError::Conflict(format!("host key changed: {}", p.known_hosts_host))
                }
                crate::host_key_store::HostKeyVerifyError::Io(e) => e,
            })
    }

    fn authenticate(&self, config: &ConnectionConfig, session: &Session) -> Result<()> {
        if let Some(key) = &config.private_key_bytes {
            let res = session.userauth_pubkey_memory(
                &config.username,
                key.public.as_deref().and_then(|b| std::str::from_utf8(b).ok()),
                std::str::from_utf8(&key.private).unwrap_or_default(),
                key.passphrase.as_deref(),
            );
            if res.is_ok() {
                return Ok(());
            }
            warn!("pubkey-memory auth failed for {}", config.key());
        }
        if let Some(key) = &config.private_key_path {
            let res = session.userauth_pubkey_file(
                &config.username,
                key.public.as_deref(),
                &key.private,
                key.passphrase.as_deref(),
            );
            if res.is_ok() {
                return Ok(());
            }
            warn!("pubkey-file auth failed for {}", config.key());
        }
        if let Some(password) = &config.password {
            if session.userauth_password(&config.username, password).is_ok() {
                return Ok(());
            }
            warn!("password auth failed for {}", config.key());
        }
        if config.use_agent && session.userauth_agent(&config.username).is_ok() {
            return Ok(());
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        self.connections.lock().remove(key);
    }

    pub fn close_all(&self) {
        self.connections.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_key_matches_user_host_port_shape() {
        let config = ConnectionConfig::new("example.com", 2222, "trainer");
        assert_eq!(config.key(), "trainer@example.com:2222");
    }

    #[test]
    fn host_key_type_names_follow_openssh_convention() {
        assert_eq!(host_key_type_name(HostKeyType::Ed255), "ssh-ed25519");
        assert_eq!(host_key_type_name(HostKeyType::Rsa), "ssh-rsa");
    }

    #[test]
    fn pool_starts_empty() {
        let store = Arc::new(KnownHostsStore::new(std::env::temp_dir().join("runicorn-test-known-hosts")));
        let pool = ConnectionPool::new(store);
        assert!(pool.is_empty());
    }
}
