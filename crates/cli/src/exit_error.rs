// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! An error type that carries a process exit code, so `main()` can
//! turn any command failure into the right `std::process::exit` call
//! instead of every command doing it inline.

use std::fmt;

use runicorn_core::RunicornError;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

/// Maps the shared error taxonomy onto small positive
/// exit codes a shell script can branch on, rather than a single
/// catch-all `1`.
impl From<RunicornError> for ExitError {
    fn from(err: RunicornError) -> Self {
        let code = match &err {
            RunicornError::NotFound(_) => 2,
            RunicornError::BadRequest(_) => 3,
            RunicornError::Conflict(_) => 4,
            RunicornError::Unauthorized(_) => 5,
            RunicornError::Timeout(_) => 6,
            RunicornError::Rejected(_) => 7,
            RunicornError::IoFailure(_) | RunicornError::Corrupt(_) | RunicornError::Fatal(_) => 1,
        };
        ExitError::new(code, err.to_string())
    }
}
