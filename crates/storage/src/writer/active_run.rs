// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Process-wide "at most one active run" slot (the write-path contract,
//! the module contract).
//!
//! Mirrors `original_source/src/runicorn/sdk.py`'s single active-run
//! guard: a second `init()` in the same process is rejected rather
//! than silently shadowing the first handle.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use runicorn_core::{Result, RunicornError};

use super::RunHandle;

static ACTIVE_RUN: OnceLock<Mutex<Option<Weak<RunHandle>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Weak<RunHandle>>> {
    ACTIVE_RUN.get_or_init(|| Mutex::new(None))
}

/// Claim the process-wide slot for `handle`. Fails if another run is
/// already active and its handle has not been dropped.
pub(crate) fn acquire(handle: &Arc<RunHandle>) -> Result<()> {
    let mut guard = slot().lock();
    if let Some(existing) = guard.as_ref().and_then(Weak::upgrade) {
        return Err(RunicornError::Conflict(format!(
            "run {} is already active in this process",
            existing.run_id()
        )));
    }
    *guard = Some(Arc::downgrade(handle));
    Ok(())
}

/// Release the slot if it still points at `handle`. A no-op if another
/// run has since claimed the slot (which can only happen after this
/// handle already dropped its `Arc`).
pub(crate) fn release(handle: &Arc<RunHandle>) {
    let mut guard = slot().lock();
    let still_ours = guard
        .as_ref()
        .and_then(Weak::upgrade)
        .is_some_and(|existing| Arc::ptr_eq(&existing, handle));
    if still_ours {
        *guard = None;
    }
}
