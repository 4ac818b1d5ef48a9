// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runicorn-daemon: background orchestration only — the liveness
//! checker, output-scanner watch loops, and the sync/mirror scheduling
//! loop, wired together the way `oj-daemon::lifecycle` wires its own
//! background workers. No HTTP/WebSocket surface is implemented here.

pub mod config;
pub mod supervisor;

pub use config::{Config, RemoteConfig};
pub use supervisor::Supervisor;
