// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Run identifiers: `<timestamp>_<6-hex>`.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Result, RunicornError};

/// A run identifier of the shape `<unix-millis>_<6-hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a new run id using the given clock for the timestamp
    /// component and the thread-local RNG for the suffix.
    pub fn generate(clock: &impl Clock) -> Self {
        let ts = clock.epoch_ms();
        let suffix: u32 = rand::thread_rng().gen_range(0..=0xFF_FFFF);
        RunId(format!("{ts}_{suffix:06x}"))
    }

    /// Parse an existing run id string, validating its shape.
    pub fn parse(s: &str) -> Result<Self> {
        let (ts, suffix) = s
            .split_once('_')
            .ok_or_else(|| RunicornError::BadRequest(format!("invalid run_id: {s}")))?;
        if ts.parse::<u64>().is_err() {
            return Err(RunicornError::BadRequest(format!(
                "invalid run_id timestamp: {s}"
            )));
        }
        if suffix.len() != 6 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RunicornError::BadRequest(format!(
                "invalid run_id suffix: {s}"
            )));
        }
        Ok(RunId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}
