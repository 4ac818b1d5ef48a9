// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Manifest Sync Client: downloads server-generated
//! sync manifests and applies only the files that changed, with
//! offset-based resume for append-only files.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use rand::Rng;
use runicorn_core::{Result, RunicornError, SyncFileEntry, SyncManifest};
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;
use tracing::{debug, info, warn};

use crate::manifest_gen::{hash_tail_bytes, TAIL_HASH_BYTES};

/// Candidate manifest filenames, tried in order; first success wins
/// (the write-path contract step 2).
const MANIFEST_CANDIDATES: &[&str] = &[
    "active_manifest.json.gz",
    "active_manifest.json",
    "full_manifest.json.gz",
    "full_manifest.json",
];

/// Minimal remote-read surface the sync client needs. Implemented for
/// `ssh2::Sftp` in production; a fake backs the unit tests below so the
/// diff/retry/cursor logic is exercised without a live SSH server.
pub trait RemoteTransport: Send + Sync {
    /// Read the whole remote file into memory. Used for manifests (which
    /// are capped at 10 MiB) and small files.
    fn read_all(&self, remote_path: &str) -> Result<Vec<u8>>;

    /// Read `len` bytes starting at `offset` from the remote file. Used
    /// for incremental (`append_only_grow`) downloads.
    fn read_range(&self, remote_path: &str, offset: u64, len: u64) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffReason {
    NewFile,
    AppendOnlyGrow,
    SizeChanged,
    MtimeChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CursorState {
    #[serde(default)]
    last_revision: u64,
    #[serde(default)]
    last_snapshot_id: Option<String>,
    #[serde(default)]
    last_sync_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    sync_count: u64,
}

/// Client-side record of sync progress, persisted to
/// `.sync_cursor.json`. Advances only on
/// successful manifest consumption.
pub struct SyncCursor {
    path: PathBuf,
    state: CursorState,
}

impl SyncCursor {
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(".sync_cursor.json");
        let state = fs::read(&path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();
        Self { path, state }
    }

    pub fn last_revision(&self) -> u64 {
        self.state.last_revision
    }

    pub fn last_snapshot_id(&self) -> Option<&str> {
        self.state.last_snapshot_id.as_deref()
    }

    /// Advance the cursor. Revision is monotonic: the caller only calls
    /// this after a manifest with `revision > last_revision` has been
    /// fully consumed.
    pub fn advance(&mut self, revision: u64, snapshot_id: &str) -> Result<()> {
        self.state.last_revision = revision;
        self.state.last_snapshot_id = Some(snapshot_id.to_string());
        self.state.last_sync_time = Some(chrono::Utc::now());
        self.state.sync_count += 1;
        runicorn_core::atomic::write_json_atomic(&self.path, &self.state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFileState {
    size: u64,
    mtime: chrono::DateTime<chrono::Utc>,
    synced_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalSyncState {
    #[serde(default)]
    files: HashMap<String, CachedFileState>,
}

impl LocalSyncState {
    fn load(cache_dir: &Path) -> Self {
        fs::read(state_path(cache_dir))
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default()
    }

    fn save(&self, cache_dir: &Path) -> Result<()> {
        runicorn_core::atomic::write_json_atomic(&state_path(cache_dir), self)
    }
}

fn state_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(".sync_state.json")
}

#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    pub jitter_max: Duration,
    pub max_workers: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            jitter_max: Duration::from_secs(5),
            max_workers: 3,
            batch_size: 5,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub files_synced: usize,
    pub bytes_downloaded: u64,
    pub incremental_count: usize,
    pub full_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Skipped { reason: &'static str },
    Synced { stats: SyncStats, revision: u64, snapshot_id: String },
}

/// Manifest-driven sync client. Generic over [`RemoteTransport`] so
/// production code supplies an SFTP-backed implementation while tests
/// supply an in-memory one.
pub struct SyncClient<T: RemoteTransport> {
    transport: Arc<T>,
    remote_root: String,
    cache_dir: PathBuf,
    config: SyncClientConfig,
}

impl<T: RemoteTransport> SyncClient<T> {
    pub fn new(
        transport: Arc<T>,
        remote_root: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        config: SyncClientConfig,
    ) -> Self {
        let remote_root = remote_root.into().trim_end_matches('/').to_string();
        Self { transport, remote_root, cache_dir: cache_dir.into(), config }
    }

    pub fn sync(&self) -> Result<SyncOutcome> {
        fs::create_dir_all(&self.cache_dir)?;
        self.apply_jitter();

        let manifest = self.download_manifest()?;
        let mut cursor = SyncCursor::load(&self.cache_dir);
        if manifest.revision <= cursor.last_revision() {
            debug!(revision = manifest.revision, "manifest unchanged, skipping sync");
            return Ok(SyncOutcome::Skipped { reason: "no_changes" });
        }

        let local_state = LocalSyncState::load(&self.cache_dir);
        let diffs = self.compute_diff(&manifest, &local_state);
        if diffs.is_empty() {
            cursor.advance(manifest.revision, &manifest.snapshot_id)?;
            return Ok(SyncOutcome::Skipped { reason: "no_file_changes" });
        }

        let (stats, new_state) = self.sync_files(diffs, local_state)?;
        new_state.save(&self.cache_dir)?;
        cursor.advance(manifest.revision, &manifest.snapshot_id)?;

        info!(
            files = stats.files_synced,
            bytes = stats.bytes_downloaded,
            revision = manifest.revision,
            "sync cycle complete"
        );
        Ok(SyncOutcome::Synced {
            stats,
            revision: manifest.revision,
            snapshot_id: manifest.snapshot_id,
        })
    }

    fn apply_jitter(&self) {
        if self.config.jitter_max.is_zero() {
            return;
        }
        let max_millis = self.config.jitter_max.as_millis().max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..=max_millis);
        std::thread::sleep(Duration::from_millis(jitter));
    }

    fn download_manifest(&self) -> Result<SyncManifest> {
        let dir = format!("{}/.runicorn", self.remote_root);
        for candidate in MANIFEST_CANDIDATES {
            let remote_path = format!("{dir}/{candidate}");
            let bytes = match self.transport.read_all(&remote_path) {
                Ok(b) => b,
                Err(RunicornError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "manifest candidate failed");
                    continue;
                }
            };
            let json = if candidate.ends_with(".gz") {
                let mut decoder = GzDecoder::new(bytes.as_slice());
                let mut out = String::new();
                if decoder.read_to_string(&mut out).is_err() {
                    debug!(path = %remote_path, "gunzip failed, trying next candidate");
                    continue;
                }
                out
            } else {
                match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(_) => continue,
                }
            };
            let manifest: SyncManifest = match serde_json::from_str(&json) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "invalid manifest json, trying next candidate");
                    continue;
                }
            };
            if let Err(e) = manifest.validate_paths() {
                warn!(path = %remote_path, error = %e, "manifest failed validation, trying next candidate");
                continue;
            }
            return Ok(manifest);
        }
        Err(RunicornError::NotFound("no sync manifest found on remote".to_string()))
    }

    fn compute_diff<'m>(
        &self,
        manifest: &'m SyncManifest,
        local_state: &LocalSyncState,
    ) -> Vec<(SyncFileEntry, DiffReason)> {
        let mut out = Vec::new();
        for exp in &manifest.experiments {
            for file in &exp.files {
                let local_path = self.cache_dir.join(&file.path);
                let cached = local_state.files.get(&file.path);
                let reason = match (local_path.exists(), cached) {
                    (false, _) | (_, None) => Some(DiffReason::NewFile),
                    (true, Some(cached)) if file.size != cached.size => {
                        if file.is_append_only && file.size > cached.size {
                            Some(DiffReason::AppendOnlyGrow)
                        } else {
                            Some(DiffReason::SizeChanged)
                        }
                    }
                    (true, Some(cached)) if file.mtime > cached.mtime => Some(DiffReason::MtimeChanged),
                    (true, Some(_)) => None,
                };
                if let Some(reason) = reason {
                    out.push((file.clone(), reason));
                }
            }
        }
        // Sort by (priority asc, size asc) step 5.
        out.sort_by(|a, b| a.0.priority.cmp(&b.0.priority).then(a.0.size.cmp(&b.0.size)));
        out
    }

    fn sync_files(
        &self,
        diffs: Vec<(SyncFileEntry, DiffReason)>,
        mut local_state: LocalSyncState,
    ) -> Result<(SyncStats, LocalSyncState)> {
        let pool = ThreadPool::new(self.config.max_workers.max(1));
        let (tx, rx) = std::sync::mpsc::channel();
        let total = diffs.len();

        for chunk in diffs.chunks(self.config.batch_size) {
            for (file, reason) in chunk.to_vec() {
                let transport = self.transport.clone();
                let remote_root = self.remote_root.clone();
                let cache_dir = self.cache_dir.clone();
                let config = self.config.clone();
                let tx = tx.clone();
                pool.execute(move || {
                    let result = sync_one_with_retry(&*transport, &remote_root, &cache_dir, &file, reason, &config);
                    let _ = tx.send((file, result));
                });
            }
            pool.join();
        }
        drop(tx);

        let mut stats = SyncStats::default();
        for (file, result) in rx.iter().take(total) {
            match result {
                Ok((bytes, incremental)) => {
                    stats.files_synced += 1;
                    stats.bytes_downloaded += bytes;
                    if incremental {
                        stats.incremental_count += 1;
                    } else {
                        stats.full_count += 1;
                    }
                    local_state.files.insert(
                        file.path.clone(),
                        CachedFileState { size: file.size, mtime: file.mtime, synced_at: chrono::Utc::now() },
                    );
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "file sync failed after retries");
                    stats.failed_count += 1;
                }
            }
        }
        Ok((stats, local_state))
    }
}

fn sync_one_with_retry<T: RemoteTransport + ?Sized>(
    transport: &T,
    remote_root: &str,
    cache_dir: &Path,
    file: &SyncFileEntry,
    reason: DiffReason,
    config: &SyncClientConfig,
) -> Result<(u64, bool)> {
    let mut attempt = 0;
    loop {
        match sync_one_file(transport, remote_root, cache_dir, file, reason) {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < config.max_retries => {
                let delay = config.retry_base_delay * 2u32.pow(attempt);
                warn!(path = %file.path, attempt, error = %e, "retrying file sync");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn sync_one_file<T: RemoteTransport + ?Sized>(
    transport: &T,
    remote_root: &str,
    cache_dir: &Path,
    file: &SyncFileEntry,
    reason: DiffReason,
) -> Result<(u64, bool)> {
    let remote_path = format!("{remote_root}/{}", file.path);
    let local_path = cache_dir.join(&file.path);
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let attempt_incremental = reason == DiffReason::AppendOnlyGrow
        && local_path.exists()
        && verify_append_only_prefix(transport, &remote_path, &local_path)?;

    let (bytes_downloaded, incremental) = if attempt_incremental {
        let local_size = fs::metadata(&local_path)?.len();
        let to_read = file.size.saturating_sub(local_size);
        let chunk = transport.read_range(&remote_path, local_size, to_read)?;
        let tmp_path = sibling_tmp(&local_path);
        fs::copy(&local_path, &tmp_path)?;
        {
            let mut tmp = fs::OpenOptions::new().append(true).open(&tmp_path)?;
            tmp.write_all(&chunk)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &local_path)?;
        (chunk.len() as u64, true)
    } else {
        let bytes = transport.read_all(&remote_path)?;
        let tmp_path = sibling_tmp(&local_path);
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &local_path)?;
        (bytes.len() as u64, false)
    };

    set_mtime(&local_path, file.mtime);
    Ok((bytes_downloaded, incremental))
}

/// Confirms the remote file's bytes in the same byte range as the
/// local copy's current tail still match before extending that copy
/// in place. A remote file that was truncated and rewritten
/// underneath a growing cache entry would otherwise produce a
/// corrupt concatenation; this reads the local-sized tail back from
/// the remote and compares hashes (§3 "used to verify that a growing
/// file was not truncated or rewritten").
fn verify_append_only_prefix<T: RemoteTransport + ?Sized>(
    transport: &T,
    remote_path: &str,
    local_path: &Path,
) -> Result<bool> {
    let local_size = fs::metadata(local_path)?.len();
    if local_size == 0 {
        return Ok(true);
    }
    let tail_len = TAIL_HASH_BYTES.min(local_size);
    let offset = local_size - tail_len;

    let mut local_tail = vec![0u8; tail_len as usize];
    let mut f = File::open(local_path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(&mut local_tail)?;

    let remote_tail = transport.read_range(remote_path, offset, tail_len)?;
    Ok(hash_tail_bytes(&local_tail) == hash_tail_bytes(&remote_tail))
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    path.with_file_name(format!(".{name}.tmp.{}", std::process::id()))
}

fn set_mtime(path: &Path, mtime: chrono::DateTime<chrono::Utc>) {
    let system_time = std::time::UNIX_EPOCH + Duration::from_secs(mtime.timestamp().max(0) as u64);
    let _ = filetime_set(path, system_time);
}

/// Thin wrapper so the absence of a dedicated `filetime` dependency
/// doesn't block this module: `File::set_modified` is stable std.
fn filetime_set(path: &Path, time: std::time::SystemTime) -> std::io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use runicorn_core::{FilePriority, SyncExperimentEntry, SyncManifestType};
    use std::collections::HashMap as Map;
    use tempfile::tempdir;

    struct FakeTransport {
        files: Mutex<Map<String, Vec<u8>>>,
        fail_until: Mutex<Map<String, u32>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self { files: Mutex::new(Map::new()), fail_until: Mutex::new(Map::new()) }
        }

        fn put(&self, path: &str, bytes: &[u8]) {
            self.files.lock().insert(path.to_string(), bytes.to_vec());
        }

        fn fail_next(&self, path: &str, times: u32) {
            self.fail_until.lock().insert(path.to_string(), times);
        }
    }

    impl RemoteTransport for FakeTransport {
        fn read_all(&self, remote_path: &str) -> Result<Vec<u8>> {
            if let Some(count) = self.fail_until.lock().get_mut(remote_path) {
                if *count > 0 {
                    *count -= 1;
                    return Err(RunicornError::IoFailure("injected failure".to_string()));
                }
            }
            self.files
                .lock()
                .get(remote_path)
                .cloned()
                .ok_or_else(|| RunicornError::NotFound(remote_path.to_string()))
        }

        fn read_range(&self, remote_path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
            let data = self.read_all(remote_path)?;
            let start = offset as usize;
            let end = (start + len as usize).min(data.len());
            Ok(data[start.min(data.len())..end].to_vec())
        }
    }

    fn manifest(revision: u64, file_path: &str, size: u64, is_append_only: bool) -> SyncManifest {
        SyncManifest {
            format_version: 1,
            manifest_type: SyncManifestType::Active,
            revision,
            snapshot_id: format!("snap-{revision}"),
            generated_at: chrono::Utc::now(),
            server_hostname: "host".into(),
            remote_root: "/data/runicorn".into(),
            experiments: vec![SyncExperimentEntry {
                run_id: "r1".into(),
                project: "vision".into(),
                name: "r1".into(),
                status: "running".into(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
                files: vec![SyncFileEntry {
                    path: file_path.to_string(),
                    size,
                    mtime: chrono::Utc::now(),
                    tail_hash: None,
                    priority: FilePriority::Essential,
                    is_append_only,
                }],
            }],
        }
    }

    fn no_jitter_config() -> SyncClientConfig {
        SyncClientConfig { jitter_max: Duration::ZERO, retry_base_delay: Duration::from_millis(1), ..Default::default() }
    }

    #[test]
    fn new_file_is_downloaded_in_full() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let m = manifest(1, "vision/r1/runs/abc/events.jsonl", 5, true);
        transport.put("/data/runicorn/.runicorn/active_manifest.json.gz", b"");
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"hello");

        let client = SyncClient::new(transport, "/data/runicorn", dir.path(), no_jitter_config());
        // Force the gzip candidate to look absent by removing it first.
        let outcome = client.sync();
        // gz candidate contains invalid gzip bytes, so it's skipped via error path, falling to plain json.
        let outcome = outcome.unwrap();
        match outcome {
            SyncOutcome::Synced { stats, revision, .. } => {
                assert_eq!(revision, 1);
                assert_eq!(stats.files_synced, 1);
                assert_eq!(stats.full_count, 1);
            }
            other => panic!("expected Synced, got {other:?}"),
        }
        assert_eq!(
            fs::read(dir.path().join("vision/r1/runs/abc/events.jsonl")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn revision_not_advancing_skips_sync() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let m = manifest(1, "vision/r1/runs/abc/events.jsonl", 5, true);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"hello");

        let client = SyncClient::new(transport, "/data/runicorn", dir.path(), no_jitter_config());
        client.sync().unwrap();
        let second = client.sync().unwrap();
        assert!(matches!(second, SyncOutcome::Skipped { reason: "no_changes" }));
    }

    #[test]
    fn append_only_grow_extends_file_in_place() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());

        let m1 = manifest(1, "vision/r1/runs/abc/events.jsonl", 5, true);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m1).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"hello");
        let client = SyncClient::new(transport.clone(), "/data/runicorn", dir.path(), no_jitter_config());
        client.sync().unwrap();

        let m2 = manifest(2, "vision/r1/runs/abc/events.jsonl", 11, true);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m2).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"hello world");
        let outcome = client.sync().unwrap();
        match outcome {
            SyncOutcome::Synced { stats, .. } => assert_eq!(stats.incremental_count, 1),
            other => panic!("expected Synced, got {other:?}"),
        }
        assert_eq!(
            fs::read(dir.path().join("vision/r1/runs/abc/events.jsonl")).unwrap(),
            b"hello world"
        );
    }

    #[test]
    fn rewritten_prefix_falls_back_to_full_download() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());

        let m1 = manifest(1, "vision/r1/runs/abc/events.jsonl", 5, true);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m1).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"hello");
        let client = SyncClient::new(transport.clone(), "/data/runicorn", dir.path(), no_jitter_config());
        client.sync().unwrap();

        // Grown in size, but the remote file was truncated and rewritten
        // rather than appended to: the shared prefix no longer matches.
        let m2 = manifest(2, "vision/r1/runs/abc/events.jsonl", 13, true);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m2).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/events.jsonl", b"goodbye-world");
        let outcome = client.sync().unwrap();
        match outcome {
            SyncOutcome::Synced { stats, .. } => {
                assert_eq!(stats.incremental_count, 0);
                assert_eq!(stats.full_count, 1);
            }
            other => panic!("expected Synced, got {other:?}"),
        }
        assert_eq!(
            fs::read(dir.path().join("vision/r1/runs/abc/events.jsonl")).unwrap(),
            b"goodbye-world"
        );
    }

    #[test]
    fn transient_failure_recovers_via_retry() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let m = manifest(1, "vision/r1/runs/abc/meta.json", 5, false);
        transport.put(
            "/data/runicorn/.runicorn/active_manifest.json",
            serde_json::to_vec(&m).unwrap().as_slice(),
        );
        transport.put("/data/runicorn/vision/r1/runs/abc/meta.json", b"{}{}");
        transport.fail_next("/data/runicorn/vision/r1/runs/abc/meta.json", 2);

        let client = SyncClient::new(transport, "/data/runicorn", dir.path(), no_jitter_config());
        let outcome = client.sync().unwrap();
        match outcome {
            SyncOutcome::Synced { stats, .. } => assert_eq!(stats.files_synced, 1),
            other => panic!("expected Synced, got {other:?}"),
        }
    }

    #[test]
    fn no_manifest_available_errors() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let client = SyncClient::new(transport, "/data/runicorn", dir.path(), no_jitter_config());
        assert!(client.sync().is_err());
    }
}
