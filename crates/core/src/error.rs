// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Unified error taxonomy shared across the write-path, the asset store,
//! the index, and the remote sync engine.
//!
//! Every leaf error type in the workspace converts into one of these
//! variants so that `runicorn-wire` has a single place to translate
//! errors into the external API's status codes (see the write-path contract).

use thiserror::Error;

/// The unified error taxonomy
#[derive(Error, Debug)]
pub enum RunicornError {
    /// Unknown run/asset/blob/session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Validation failure on caller-supplied input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Host-key confirmation required, or another caller-must-confirm state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// SSH authentication failure.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An SSH operation or a filesystem lock wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Partial read/write, or any other I/O failure.
    #[error("io failure: {0}")]
    IoFailure(String),

    /// Malformed manifest, or an invalid `events.jsonl` line.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Rate-limited, or a size limit was exceeded.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Schema mismatch in the index, or another invariant violation that
    /// should never happen in a correctly operating system.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RunicornError {
    /// The HTTP status the (out-of-scope) viewer should translate this
    /// error into propagation table.
    pub fn http_status_hint(&self) -> u16 {
        match self {
            RunicornError::NotFound(_) => 404,
            RunicornError::BadRequest(_) => 400,
            RunicornError::Conflict(_) => 409,
            RunicornError::Unauthorized(_) => 401,
            RunicornError::Timeout(_) => 504,
            RunicornError::IoFailure(_) => 500,
            RunicornError::Corrupt(_) => 422,
            RunicornError::Rejected(_) => 429,
            RunicornError::Fatal(_) => 500,
        }
    }

    /// Machine-readable code for the error body, independent of the
    /// numeric status (so clients can switch on it without relying on
    /// HTTP semantics).
    pub fn code(&self) -> &'static str {
        match self {
            RunicornError::NotFound(_) => "NOT_FOUND",
            RunicornError::BadRequest(_) => "BAD_REQUEST",
            RunicornError::Conflict(_) => "CONFLICT",
            RunicornError::Unauthorized(_) => "UNAUTHORIZED",
            RunicornError::Timeout(_) => "TIMEOUT",
            RunicornError::IoFailure(_) => "IO_FAILURE",
            RunicornError::Corrupt(_) => "CORRUPT",
            RunicornError::Rejected(_) => "REJECTED",
            RunicornError::Fatal(_) => "FATAL",
        }
    }
}

impl From<std::io::Error> for RunicornError {
    fn from(e: std::io::Error) -> Self {
        RunicornError::IoFailure(e.to_string())
    }
}

impl From<serde_json::Error> for RunicornError {
    fn from(e: serde_json::Error) -> Self {
        RunicornError::Corrupt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RunicornError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_hints_match_spec_table() {
        assert_eq!(RunicornError::NotFound("x".into()).http_status_hint(), 404);
        assert_eq!(RunicornError::BadRequest("x".into()).http_status_hint(), 400);
        assert_eq!(RunicornError::Conflict("x".into()).http_status_hint(), 409);
        assert_eq!(RunicornError::Rejected("x".into()).http_status_hint(), 429);
        assert_eq!(RunicornError::IoFailure("x".into()).http_status_hint(), 500);
    }

    #[test]
    fn io_error_converts_to_io_failure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RunicornError = io_err.into();
        assert!(matches!(err, RunicornError::IoFailure(_)));
    }
}
