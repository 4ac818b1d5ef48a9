// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `ssh2::Sftp`-backed implementations of [`crate::sync_client::RemoteTransport`]
//! and [`crate::mirror::MirrorTransport`], built on the pooled connection
//! from [`crate::ssh_pool`].

use std::io::{Read as _, Seek as _, SeekFrom};
use std::sync::Arc;

use runicorn_core::{Result, RunicornError};

use crate::mirror::{MirrorTransport, RemoteEntry};
use crate::ssh_pool::{ConnectionConfig, ConnectionPool};
use crate::sync_client::RemoteTransport;

/// Shared by both transport traits: a pooled SSH connection plus the
/// config needed to reconnect on failure.
pub struct SftpTransport {
    pool: Arc<ConnectionPool>,
    config: ConnectionConfig,
}

impl SftpTransport {
    pub fn new(pool: Arc<ConnectionPool>, config: ConnectionConfig) -> Self {
        Self { pool, config }
    }

    /// SFTP status code 2 is `SSH_FX_NO_SUCH_FILE`.
    fn not_found_or_io(path: &str, err: ssh2::Error) -> RunicornError {
        if matches!(err.code(), ssh2::ErrorCode::SFTP(2)) {
            RunicornError::NotFound(format!("{path}: no such file"))
        } else {
            RunicornError::IoFailure(format!("{path}: {err}"))
        }
    }
}

impl RemoteTransport for SftpTransport {
    fn read_all(&self, remote_path: &str) -> Result<Vec<u8>> {
        let conn = self.pool.get_or_create(&self.config)?;
        let guard = conn.lock();
        let mut file = guard
            .sftp
            .open(std::path::Path::new(remote_path))
            .map_err(|e| Self::not_found_or_io(remote_path, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| RunicornError::IoFailure(format!("{remote_path}: {e}")))?;
        Ok(buf)
    }

    fn read_range(&self, remote_path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let conn = self.pool.get_or_create(&self.config)?;
        let guard = conn.lock();
        let mut file = guard
            .sftp
            .open(std::path::Path::new(remote_path))
            .map_err(|e| Self::not_found_or_io(remote_path, e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| RunicornError::IoFailure(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        let mut read = 0usize;
        while read < buf.len() {
            let n = file
                .read(&mut buf[read..])
                .map_err(|e| RunicornError::IoFailure(format!("{remote_path}: {e}")))?;
            if n == 0 {
                buf.truncate(read);
                break;
            }
            read += n;
        }
        Ok(buf)
    }
}

impl MirrorTransport for SftpTransport {
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let conn = self.pool.get_or_create(&self.config)?;
        let guard = conn.lock();
        let entries = guard
            .sftp
            .readdir(std::path::Path::new(path))
            .map_err(|e| Self::not_found_or_io(path, e))?;
        Ok(entries
            .into_iter()
            .filter_map(|(p, stat)| {
                let name = p.file_name()?.to_string_lossy().to_string();
                Some(RemoteEntry { name, is_dir: stat.is_dir(), size: stat.size.unwrap_or(0) })
            })
            .collect())
    }

    fn read_full(&self, path: &str) -> Result<Vec<u8>> {
        RemoteTransport::read_all(self, path)
    }

    fn read_from(&self, path: &str, offset: u64) -> Result<Vec<u8>> {
        let size = {
            let conn = self.pool.get_or_create(&self.config)?;
            let guard = conn.lock();
            guard
                .sftp
                .stat(std::path::Path::new(path))
                .map_err(|e| Self::not_found_or_io(path, e))?
                .size
                .unwrap_or(0)
        };
        if offset >= size {
            return Ok(Vec::new());
        }
        RemoteTransport::read_range(self, path, offset, size - offset)
    }
}
