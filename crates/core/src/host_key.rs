// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Host-key verification payload shared between `runicorn-sync` (which
//! raises it) and `runicorn-wire` (which serializes it into the 409
//! body) and §9's "preserve the two-variant
//! error... across all transport backends".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyReason {
    Unknown,
    Changed,
}

/// A normalized representation of an SSH host-key verification problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostKeyProblem {
    pub host: String,
    pub port: u16,
    pub known_hosts_host: String,
    pub key_type: String,
    pub fingerprint_sha256: String,
    pub public_key: String,
    pub reason: HostKeyReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_fingerprint_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_public_key: Option<String>,
}

/// Format the `known_hosts` host field the way OpenSSH does: bare host
/// for port 22, `[host]:port` otherwise.
pub fn format_known_hosts_host(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

/// A single `known_hosts` entry as exposed by `list_host_keys()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownHostEntry {
    pub host: String,
    pub port: u16,
    pub known_hosts_host: String,
    pub key_type: String,
    pub key_base64: String,
    pub fingerprint_sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_omits_brackets() {
        assert_eq!(format_known_hosts_host("example.com", 22), "example.com");
    }

    #[test]
    fn nonstandard_port_uses_brackets() {
        assert_eq!(
            format_known_hosts_host("example.com", 2222),
            "[example.com]:2222"
        );
    }
}
