// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! OpenSSH `known_hosts` store: list/upsert/remove
//! under a file lock, atomic rewrite, OpenSSH-style fingerprints.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::Engine;
use fs2::FileExt;
use runicorn_core::{format_known_hosts_host, HostKeyProblem, HostKeyReason, KnownHostEntry};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Raised by [`KnownHostsStore::verify`] when the presented key cannot
/// be trusted outright; the caller must relay `HostKeyProblem` to the
/// user for confirmation (the write-path contract, §6's 409 payload).
#[derive(Debug, Error)]
pub enum HostKeyVerifyError {
    #[error("no known_hosts entry for {}", .0.known_hosts_host)]
    UnknownHostKey(HostKeyProblem),
    #[error("host key for {} has changed", .0.known_hosts_host)]
    HostKeyChanged(HostKeyProblem),
    #[error(transparent)]
    Io(#[from] runicorn_core::RunicornError),
}

/// OpenSSH-convention fingerprint: `SHA256:<base64(sha256(key))>`,
/// unpadded.
pub fn fingerprint_sha256(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest);
    format!("SHA256:{b64}")
}

struct ParsedLine {
    hosts: String,
    key_type: String,
    key_base64: String,
}

fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let hosts = parts.next()?.to_string();
    let key_type = parts.next()?.to_string();
    let key_base64 = parts.next()?.to_string();
    Some(ParsedLine { hosts, key_type, key_base64 })
}

fn matches_host(entry_hosts: &str, known_hosts_host: &str) -> bool {
    entry_hosts.split(',').any(|h| h == known_hosts_host)
}

/// A concurrency-safe `known_hosts` file managed by this process.
pub struct KnownHostsStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl KnownHostsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock_timeout: Duration::from_secs(5) }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock_path(&self) -> PathBuf {
        let mut p = self.path.as_os_str().to_owned();
        p.push(".lock");
        PathBuf::from(p)
    }

    /// Acquire an exclusive lock on `<path>.lock`, retrying until
    /// `lock_timeout` elapses.
    fn acquire_lock(&self) -> runicorn_core::Result<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
                Err(e) => {
                    return Err(runicorn_core::RunicornError::Timeout(format!(
                        "known_hosts lock wait exceeded: {e}"
                    )))
                }
            }
        }
    }

    fn read_lines(&self) -> runicorn_core::Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s.lines().map(|l| l.to_string()).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_lines(&self, lines: &[String]) -> runicorn_core::Result<()> {
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        runicorn_core::atomic::write_atomic(&self.path, body.as_bytes())
    }

    pub fn list_host_keys(&self) -> runicorn_core::Result<Vec<KnownHostEntry>> {
        let _lock = self.acquire_lock()?;
        let mut out = Vec::new();
        for line in self.read_lines()? {
            let Some(parsed) = parse_line(&line) else { continue };
            let (host, port) = split_bracketed(&parsed.hosts);
            let key_bytes = base64::engine::general_purpose::STANDARD
                .decode(&parsed.key_base64)
                .unwrap_or_default();
            out.push(KnownHostEntry {
                host,
                port,
                known_hosts_host: parsed.hosts,
                key_type: parsed.key_type,
                key_base64: parsed.key_base64,
                fingerprint_sha256: fingerprint_sha256(&key_bytes),
            });
        }
        Ok(out)
    }

    /// Insert or replace the entry for `(host, port, key_type)`.
    pub fn upsert_host_key(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        key_base64: &str,
    ) -> runicorn_core::Result<()> {
        let known_hosts_host = format_known_hosts_host(host, port);
        let _lock = self.acquire_lock()?;
        let mut lines = self.read_lines()?;
        lines.retain(|line| {
            parse_line(line)
                .map(|p| !(matches_host(&p.hosts, &known_hosts_host) && p.key_type == key_type))
                .unwrap_or(true)
        });
        lines.push(format!("{known_hosts_host} {key_type} {key_base64}"));
        self.write_lines(&lines)
    }

    pub fn remove_host_key(&self, host: &str, port: u16, key_type: &str) -> runicorn_core::Result<()> {
        let known_hosts_host = format_known_hosts_host(host, port);
        let _lock = self.acquire_lock()?;
        let mut lines = self.read_lines()?;
        lines.retain(|line| {
            parse_line(line)
                .map(|p| !(matches_host(&p.hosts, &known_hosts_host) && p.key_type == key_type))
                .unwrap_or(true)
        });
        self.write_lines(&lines)
    }

    /// Verify a presented key against the store, per the three-outcome
    /// protocol in the write-path contract
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        key_bytes: &[u8],
    ) -> Result<(), HostKeyVerifyError> {
        let known_hosts_host = format_known_hosts_host(host, port);
        let presented_fingerprint = fingerprint_sha256(key_bytes);
        let presented_base64 = base64::engine::general_purpose::STANDARD.encode(key_bytes);

        let entries = self.list_host_keys()?;
        let existing = entries
            .iter()
            .find(|e| e.known_hosts_host == known_hosts_host && e.key_type == key_type);

        match existing {
            Some(entry) if entry.key_base64 == presented_base64 => Ok(()),
            Some(entry) => Err(HostKeyVerifyError::HostKeyChanged(HostKeyProblem {
                host: host.to_string(),
                port,
                known_hosts_host,
                key_type: key_type.to_string(),
                fingerprint_sha256: presented_fingerprint,
                public_key: presented_base64,
                reason: HostKeyReason::Changed,
                expected_fingerprint_sha256: Some(entry.fingerprint_sha256.clone()),
                expected_public_key: Some(entry.key_base64.clone()),
            })),
            None => Err(HostKeyVerifyError::UnknownHostKey(HostKeyProblem {
                host: host.to_string(),
                port,
                known_hosts_host,
                key_type: key_type.to_string(),
                fingerprint_sha256: presented_fingerprint,
                public_key: presented_base64,
                reason: HostKeyReason::Unknown,
                expected_fingerprint_sha256: None,
                expected_public_key: None,
            })),
        }
    }
}

/// Split `[host]:port` back into `(host, port)`; bare host implies 22.
fn split_bracketed(known_hosts_host: &str) -> (String, u16) {
    if let Some(rest) = known_hosts_host.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            return (host.to_string(), port.parse().unwrap_or(22));
        }
    }
    (known_hosts_host.to_string(), 22)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_key() -> Vec<u8> {
        b"fake-ed25519-public-key-bytes".to_vec()
    }

    #[test]
    fn upsert_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(sample_key());
        store.upsert_host_key("example.com", 22, "ssh-ed25519", &key_b64).unwrap();

        let entries = store.list_host_keys().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].host, "example.com");
        assert_eq!(entries[0].key_type, "ssh-ed25519");
    }

    #[test]
    fn upsert_replaces_existing_entry_for_same_key_type() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key_a = base64::engine::general_purpose::STANDARD.encode(b"key-a");
        let key_b = base64::engine::general_purpose::STANDARD.encode(b"key-b");
        store.upsert_host_key("h", 22, "ssh-ed25519", &key_a).unwrap();
        store.upsert_host_key("h", 22, "ssh-ed25519", &key_b).unwrap();

        let entries = store.list_host_keys().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key_base64, key_b);
    }

    #[test]
    fn verify_unknown_host_raises_unknown_host_key() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let err = store.verify("example.com", 22, "ssh-ed25519", &sample_key()).unwrap_err();
        assert!(matches!(err, HostKeyVerifyError::UnknownHostKey(_)));
    }

    #[test]
    fn verify_matching_key_succeeds() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key = sample_key();
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(&key);
        store.upsert_host_key("example.com", 22, "ssh-ed25519", &key_b64).unwrap();
        assert!(store.verify("example.com", 22, "ssh-ed25519", &key).is_ok());
    }

    #[test]
    fn verify_changed_key_raises_host_key_changed() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(b"old-key");
        store.upsert_host_key("example.com", 22, "ssh-ed25519", &key_b64).unwrap();

        let err = store.verify("example.com", 22, "ssh-ed25519", b"new-key").unwrap_err();
        assert!(matches!(err, HostKeyVerifyError::HostKeyChanged(_)));
    }

    #[test]
    fn remove_host_key_drops_the_entry() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(sample_key());
        store.upsert_host_key("example.com", 22, "ssh-ed25519", &key_b64).unwrap();
        store.remove_host_key("example.com", 22, "ssh-ed25519").unwrap();
        assert!(store.list_host_keys().unwrap().is_empty());
    }

    #[test]
    fn nonstandard_port_round_trips_through_brackets() {
        let dir = tempdir().unwrap();
        let store = KnownHostsStore::new(dir.path().join("known_hosts"));
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(sample_key());
        store.upsert_host_key("example.com", 2222, "ssh-ed25519", &key_b64).unwrap();

        let entries = store.list_host_keys().unwrap();
        assert_eq!(entries[0].known_hosts_host, "[example.com]:2222");
        assert_eq!(entries[0].port, 2222);
    }
}
