// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Liveness correction: for runs whose status is
//! still `running`, detect writer processes that crashed without
//! updating `status.json`.

use nix::sys::signal;
use nix::unistd::Pid;

use runicorn_core::{Result, RunStatus, RunStatusKind, StorageRoot};

use super::{iter_all_runs, DiscoveredRun};

/// Whether a local process with the given PID currently exists.
/// Sending signal `0` performs no action but still reports `ESRCH` if
/// the process is gone (the portable "does this PID exist" probe).
fn process_exists(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true, // exists, but owned by another user
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    Unchanged,
    MarkedFailed,
}

/// Correct a single run's liveness: if it's `running`, the writer's
/// hostname matches the local host, and its PID no longer exists,
/// rewrite status to `failed` with `exit_reason="process_not_found"`.
/// Remote runs (different hostname) are never downgraded.
pub fn correct_one(run: &DiscoveredRun, local_hostname: &str) -> Result<LivenessOutcome> {
    let (Some(meta), Some(status)) = (&run.meta, &run.status) else {
        return Ok(LivenessOutcome::Unchanged);
    };
    if status.status != RunStatusKind::Running {
        return Ok(LivenessOutcome::Unchanged);
    }
    if meta.hostname != local_hostname {
        return Ok(LivenessOutcome::Unchanged);
    }
    if process_exists(meta.writer_pid) {
        return Ok(LivenessOutcome::Unchanged);
    }

    let mut updated: RunStatus = status.clone();
    updated.mark_failed(chrono::Utc::now(), "process_not_found");
    runicorn_core::atomic::write_json_atomic(&run.run_dir.join("status.json"), &updated)?;
    Ok(LivenessOutcome::MarkedFailed)
}

/// The single-pass liveness checker `runicorn-daemon` schedules every
/// ~60 seconds, with exception isolation per run entry.
pub fn check_liveness_once(root: &StorageRoot, local_hostname: &str) -> Result<usize> {
    let runs = iter_all_runs(root, false)?;
    let mut corrected = 0;
    for run in runs {
        match correct_one(&run, local_hostname) {
            Ok(LivenessOutcome::MarkedFailed) => corrected += 1,
            Ok(LivenessOutcome::Unchanged) => {}
            Err(e) => {
                tracing::warn!(run_dir = %run.run_dir.display(), error = %e, "liveness check failed for run");
            }
        }
    }
    Ok(corrected)
}
