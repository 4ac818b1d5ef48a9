// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `RunicornError` → `(u16 status, ErrorBody)` translation.

use runicorn_core::{HostKeyProblem, RunicornError};
use serde::{Deserialize, Serialize};

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key: Option<HostKeyProblem>,
}

impl ErrorBody {
    /// Build the status/body pair a viewer would write to the wire for
    /// `err`. Host-key conflicts get the dedicated `HOST_KEY_CONFIRMATION_REQUIRED`
    /// code and carry `problem` so the caller can prompt for confirmation.
    pub fn from_error(err: &RunicornError) -> (u16, Self) {
        (
            err.http_status_hint(),
            ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
                host_key: None,
            },
        )
    }

    /// The 409 body shape for a host-key confirmation.
    pub fn host_key_confirmation(problem: HostKeyProblem) -> (u16, Self) {
        (
            409,
            ErrorBody {
                code: "HOST_KEY_CONFIRMATION_REQUIRED".to_string(),
                message: "Host key verification failed".to_string(),
                host_key: Some(problem),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let (status, body) = ErrorBody::from_error(&RunicornError::NotFound("run".into()));
        assert_eq!(status, 404);
        assert_eq!(body.code, "NOT_FOUND");
        assert!(body.host_key.is_none());
    }

    #[test]
    fn conflict_maps_to_409() {
        let (status, _) = ErrorBody::from_error(&RunicornError::Conflict("busy".into()));
        assert_eq!(status, 409);
    }

    #[test]
    fn host_key_confirmation_carries_problem() {
        let problem = HostKeyProblem {
            host: "h".into(),
            port: 22,
            known_hosts_host: "h".into(),
            key_type: "ssh-ed25519".into(),
            fingerprint_sha256: "SHA256:abc".into(),
            public_key: "AAAA".into(),
            reason: runicorn_core::HostKeyReason::Unknown,
            expected_fingerprint_sha256: None,
            expected_public_key: None,
        };
        let (status, body) = ErrorBody::host_key_confirmation(problem);
        assert_eq!(status, 409);
        assert_eq!(body.code, "HOST_KEY_CONFIRMATION_REQUIRED");
        assert!(body.host_key.is_some());
    }
}
