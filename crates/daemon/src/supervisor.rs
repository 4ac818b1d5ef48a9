// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Background supervisor, modeled on `oj-daemon::lifecycle`'s "load
//! config, acquire lock, spawn workers" shape, generalized from a
//! single IPC daemon to a multi-worker background supervisor: the
//! liveness checker, and one sync/mirror scheduling
//! loop per configured remote (§4.6.2/.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use runicorn_core::{Result, RunStatusKind};
use runicorn_storage::{check_liveness_once, iter_all_runs, BlobStore, Index, OutputScanner, ScannerConfig};
use runicorn_sync::{
    ConnectionPool, KnownHostsStore, MirrorConfig, MirrorTask, SftpTransport, SyncClient,
    SyncClientConfig,
};
use tracing::{info, warn};

use crate::config::{Config, RemoteConfig};

/// Owns every background worker thread the daemon starts. Dropping a
/// `Supervisor` does not stop its workers; call [`Supervisor::shutdown`]
/// explicitly.
pub struct Supervisor {
    config: Config,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
    mirrors: Mutex<Vec<Arc<MirrorTask<SftpTransport>>>>,
    scanners: Arc<Mutex<HashMap<String, Arc<OutputScanner>>>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            mirrors: Mutex::new(Vec::new()),
            scanners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the liveness loop, the output-scanner discovery loop, and
    /// one sync worker per configured remote. Each worker is
    /// exception-isolated: a failed cycle logs a warning and retries on
    /// the next tick rather than taking down the supervisor.
    pub fn start(&self) -> Result<()> {
        self.spawn_liveness_loop()?;
        self.spawn_scanner_discovery_loop()?;
        for remote in self.config.remotes.clone() {
            self.spawn_remote_worker(remote)?;
        }
        Ok(())
    }

    fn spawn_liveness_loop(&self) -> Result<()> {
        let stop = self.stop.clone();
        let root = self.config.storage_root.clone();
        let hostname = self.config.local_hostname.clone();
        let interval = self.config.liveness_interval;
        let handle = std::thread::Builder::new()
            .name("runicorn-liveness".to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match check_liveness_once(&root, &hostname) {
                        Ok(corrected) if corrected > 0 => {
                            info!(corrected, "liveness pass corrected stale run status");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "liveness pass failed"),
                    }
                    sleep_unless_stopped(&stop, interval);
                }
            })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Periodically discover running runs and keep one [`OutputScanner`]
    /// watch loop alive per run, stopping the loop once a run leaves
    /// the `Running` state (the write-path contract "Looping mode", the module contract
    /// §6 "the output-scanner loop per watched run").
    fn spawn_scanner_discovery_loop(&self) -> Result<()> {
        let stop = self.stop.clone();
        let root = self.config.storage_root.clone();
        let interval = self.config.scanner_interval;
        let scanners = self.scanners.clone();
        let handle = std::thread::Builder::new()
            .name("runicorn-scanner-discovery".to_string())
            .spawn(move || {
                let store = Arc::new(BlobStore::new(root.clone()));
                let index = Index::open(&root.index_db_path()).map(Arc::new).ok();
                while !stop.load(Ordering::SeqCst) {
                    match iter_all_runs(&root, false) {
                        Ok(runs) => {
                            let mut live = scanners.lock();
                            let running_ids: Vec<String> = runs
                                .iter()
                                .filter(|r| {
                                    r.status.as_ref().map(|s| s.status) == Some(RunStatusKind::Running)
                                })
                                .filter_map(|r| r.meta.as_ref().map(|m| m.id.as_str().to_string()))
                                .collect();

                            for run in &runs {
                                let (Some(meta), Some(status)) = (&run.meta, &run.status) else {
                                    continue;
                                };
                                if status.status != RunStatusKind::Running {
                                    continue;
                                }
                                if live.contains_key(meta.id.as_str()) {
                                    continue;
                                }
                                let workspace_root =
                                    meta.workspace_root.as_deref().map(std::path::PathBuf::from);
                                let watch_dir =
                                    workspace_root.clone().unwrap_or_else(|| run.run_dir.clone());
                                let mut scanner_config =
                                    ScannerConfig::new(run.run_dir.clone(), meta.id.as_str());
                                scanner_config.workspace_root = workspace_root;
                                scanner_config.watched_dirs = vec![watch_dir];
                                let scanner =
                                    Arc::new(OutputScanner::new(scanner_config, store.clone(), index.clone()));
                                scanner.clone().watch_outputs(interval);
                                live.insert(meta.id.as_str().to_string(), scanner);
                            }

                            live.retain(|run_id, scanner| {
                                let still_running = running_ids.iter().any(|id| id == run_id);
                                if !still_running {
                                    scanner.stop_outputs_watch();
                                }
                                still_running
                            });
                        }
                        Err(err) => warn!(error = %err, "scanner discovery sweep failed"),
                    }
                    sleep_unless_stopped(&stop, interval);
                }
            })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    fn spawn_remote_worker(&self, remote: RemoteConfig) -> Result<()> {
        let stop = self.stop.clone();
        let cache_dir = self.config.storage_root.root().join(".runicorn_sync").join(&remote.name);
        let known_hosts_path = self.config.storage_root.root().join("known_hosts");

        let host_keys = Arc::new(KnownHostsStore::new(known_hosts_path));
        let pool = Arc::new(ConnectionPool::new(host_keys));
        let transport = Arc::new(SftpTransport::new(pool, remote.connection.clone()));

        let sync_client = SyncClient::new(
            transport.clone(),
            remote.remote_root.clone(),
            cache_dir.clone(),
            SyncClientConfig::default(),
        );

        let mirror = remote
            .enable_mirror_fallback
            .then(|| MirrorTask::new(transport, remote.remote_root.clone(), cache_dir, MirrorConfig::default()));
        if let Some(mirror) = &mirror {
            mirror.clone().start()?;
            self.mirrors.lock().push(mirror.clone());
        }

        let interval = remote.sync_interval;
        let name = remote.name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("runicorn-sync-{name}"))
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match sync_client.sync() {
                        Ok(outcome) => info!(remote = %name, ?outcome, "sync cycle finished"),
                        Err(err) => warn!(remote = %name, error = %err, "sync cycle failed"),
                    }
                    sleep_unless_stopped(&stop, interval);
                }
            })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Signal every worker to stop and join them, with a bounded wait
    /// cancellation contract.
    pub fn shutdown(&self, join_timeout: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        for mirror in self.mirrors.lock().drain(..) {
            mirror.stop();
        }
        for scanner in self.scanners.lock().drain().map(|(_, s)| s) {
            scanner.stop_outputs_watch();
        }
        let deadline = std::time::Instant::now() + join_timeout;
        for handle in self.handles.lock().drain(..) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                warn!("daemon shutdown deadline exceeded, leaving worker thread detached");
                continue;
            }
            let _ = handle.join();
        }
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) {
    let deadline = std::time::Instant::now() + interval;
    while !stop.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn start_and_shutdown_is_clean_with_no_remotes_configured() {
        let dir = tempdir().unwrap();
        let mut config = Config::load(Some(dir.path().to_path_buf())).unwrap();
        config.liveness_interval = Duration::from_millis(50);
        let supervisor = Supervisor::new(config);
        supervisor.start().unwrap();
        std::thread::sleep(Duration::from_millis(120));
        supervisor.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn scanner_discovery_loop_picks_up_a_running_run() {
        use runicorn_core::{RunId, RunMeta, RunStatus, SystemClock};

        let dir = tempdir().unwrap();
        let mut config = Config::load(Some(dir.path().to_path_buf())).unwrap();
        config.liveness_interval = Duration::from_secs(60);
        config.scanner_interval = Duration::from_millis(30);

        let run_dir = config.storage_root.runs_dir().join("vision/r1").join("1700000000000_aaaaaa");
        std::fs::create_dir_all(&run_dir).unwrap();
        let meta = RunMeta {
            id: RunId::generate(&SystemClock),
            path: "vision/r1".to_string(),
            created_at: chrono::Utc::now(),
            writer_pid: std::process::id(),
            hostname: "test-host".to_string(),
            python_version: None,
            platform: "test".to_string(),
            storage_root: config.storage_root.root().display().to_string(),
            workspace_root: None,
        };
        runicorn_core::atomic::write_json_atomic(&run_dir.join("meta.json"), &meta).unwrap();
        let status = RunStatus::new_running(chrono::Utc::now());
        runicorn_core::atomic::write_json_atomic(&run_dir.join("status.json"), &status).unwrap();

        let supervisor = Supervisor::new(config);
        supervisor.start().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(supervisor.scanners.lock().len(), 1);
        supervisor.shutdown(Duration::from_secs(2));
        assert!(supervisor.scanners.lock().is_empty());
    }
}
