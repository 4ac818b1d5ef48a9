// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Console capture (the write-path contract "Console capture",
//! the module contract, grounded on
//! `original_source/console/log_manager.py`).
//!
//! Rust has no safe equivalent of reassigning the process's real
//! stdout/stderr file descriptors short of `unsafe` `dup2` calls,
//! which this workspace forbids (`unsafe_code = "forbid"`). Instead,
//! `ConsoleCapture::wrap` returns a tee `Write` adapter: callers route
//! their print paths through it explicitly, and every byte still
//! reaches the original stream unchanged while line-framed output is
//! mirrored into `logs.txt`. The three progress-bar modes govern only
//! how carriage-return-bearing updates are framed before that mirror
//! write.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Progress-bar handling mode for console capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    /// Buffer a `\r`-updated line and commit only its final state.
    Smart,
    /// Commit every update as its own line.
    All,
    /// Discard carriage-return-bearing text entirely.
    None,
}

/// Refcounted log-file handle manager keyed by canonicalized path, so
/// console capture and any other logging sink can share one writer
/// without coordinating locks at the call site.
static LOG_HANDLES: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<File>>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<Mutex<File>>>> {
    LOG_HANDLES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or open a shared, refcounted append handle for `path`.
pub fn shared_log_handle(path: &Path) -> io::Result<Arc<Mutex<File>>> {
    let canonical = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            path.to_path_buf()
        }
    };
    let mut map = registry().lock();
    if let Some(existing) = map.get(&canonical).and_then(Weak::upgrade) {
        return Ok(existing);
    }
    let file = OpenOptions::new().create(true).append(true).open(&canonical)?;
    let handle = Arc::new(Mutex::new(file));
    map.insert(canonical, Arc::downgrade(&handle));
    Ok(handle)
}

/// Tees writes to the underlying stream and mirrors line-framed
/// output into a run's `logs.txt`.
pub struct ConsoleCapture {
    mode: ConsoleMode,
    prefix_timestamps: bool,
    log_handle: Arc<Mutex<File>>,
    pending: Mutex<String>,
}

impl ConsoleCapture {
    pub fn new(logs_path: &Path, mode: ConsoleMode, prefix_timestamps: bool) -> io::Result<Self> {
        Ok(Self {
            mode,
            prefix_timestamps,
            log_handle: shared_log_handle(logs_path)?,
            pending: Mutex::new(String::new()),
        })
    }

    /// Wrap `inner` so every write is tee'd through this capture.
    pub fn wrap<'a, W: Write>(&'a self, inner: W) -> TeeWriter<'a, W> {
        TeeWriter { capture: self, inner }
    }

    fn commit_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        let mut f = self.log_handle.lock();
        let _ = f.lock_exclusive();
        let framed = if self.prefix_timestamps {
            format!("{} | {}\n", chrono::Utc::now().format("%H:%M:%S"), line)
        } else {
            format!("{}\n", line)
        };
        let _ = f.write_all(framed.as_bytes());
        let _ = f.flush();
        let _ = f.unlock();
    }

    /// Flush any buffered partial line. Called at `finish()` to cover
    /// the lack of a real process-exit hook.
    pub fn flush_pending(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            self.commit_line(&pending);
            pending.clear();
        }
    }

    fn feed(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut pending = self.pending.lock();
        for ch in text.chars() {
            match ch {
                '\n' => {
                    let line = std::mem::take(&mut *pending);
                    self.commit_line(&line);
                }
                '\r' => match self.mode {
                    ConsoleMode::Smart => {
                        // Buffer is retained; the next newline (or the
                        // next `\r` update) supersedes it.
                        pending.clear();
                    }
                    ConsoleMode::All => {
                        let line = pending.clone();
                        self.commit_line(&line);
                        pending.clear();
                    }
                    ConsoleMode::None => {
                        pending.clear();
                    }
                },
                _ => pending.push(ch),
            }
        }
    }
}

pub struct TeeWriter<'a, W> {
    capture: &'a ConsoleCapture,
    inner: W,
}

impl<W: Write> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.capture.feed(buf);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn smart_mode_keeps_only_final_progress_state() {
        let dir = tempdir().unwrap();
        let logs_path = dir.path().join("logs.txt");
        let capture = ConsoleCapture::new(&logs_path, ConsoleMode::Smart, false).unwrap();
        {
            let mut w = capture.wrap(io::sink());
            write!(w, "50%\rdone\n").unwrap();
        }
        let contents = std::fs::read_to_string(&logs_path).unwrap();
        assert_eq!(contents, "done\n");
    }

    #[test]
    fn all_mode_commits_every_update() {
        let dir = tempdir().unwrap();
        let logs_path = dir.path().join("logs.txt");
        let capture = ConsoleCapture::new(&logs_path, ConsoleMode::All, false).unwrap();
        {
            let mut w = capture.wrap(io::sink());
            write!(w, "10%\r50%\r100%\n").unwrap();
        }
        let contents = std::fs::read_to_string(&logs_path).unwrap();
        assert_eq!(contents, "10%\n50%\n100%\n");
    }

    #[test]
    fn none_mode_discards_progress_updates() {
        let dir = tempdir().unwrap();
        let logs_path = dir.path().join("logs.txt");
        let capture = ConsoleCapture::new(&logs_path, ConsoleMode::None, false).unwrap();
        {
            let mut w = capture.wrap(io::sink());
            write!(w, "10%\r50%\rcomplete\n").unwrap();
        }
        let contents = std::fs::read_to_string(&logs_path).unwrap();
        assert_eq!(contents, "complete\n");
    }

    #[test]
    fn flush_pending_commits_partial_final_line() {
        let dir = tempdir().unwrap();
        let logs_path = dir.path().join("logs.txt");
        let capture = ConsoleCapture::new(&logs_path, ConsoleMode::All, false).unwrap();
        {
            let mut w = capture.wrap(io::sink());
            write!(w, "no trailing newline").unwrap();
        }
        capture.flush_pending();
        let contents = std::fs::read_to_string(&logs_path).unwrap();
        assert_eq!(contents, "no trailing newline\n");
    }

    #[test]
    fn shared_log_handle_returns_same_arc_for_same_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.txt");
        let a = shared_log_handle(&path).unwrap();
        let b = shared_log_handle(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
