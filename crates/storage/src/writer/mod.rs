// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Run Writer: append-only
//! metrics/event logging, atomic state files, best-metric tracking,
//! and console capture for a single training run.

mod active_run;
mod best_metric;
mod console;

pub use best_metric::MetricMode;
pub use console::{ConsoleCapture, ConsoleMode};

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use rand::Rng;
use runicorn_core::{
    AssetRole, AssetsJson, AssetsJsonEntry, Clock, DeletedMarker, Result, RunEvent, RunId,
    RunMeta, RunStatus, RunStatusKind, RunSummary, RunicornError, StorageRoot,
};
use serde_json::Value;

use best_metric::BestMetricTracker;

/// A metrics-event field value. Kept distinct from `serde_json::Value`
/// so non-finite floats (which JSON cannot represent) survive until
/// they reach `runicorn_core::event::encode_float`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Int(i64),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    fn into_json(self) -> Value {
        match self {
            FieldValue::Number(v) => runicorn_core::event::encode_float(v),
            FieldValue::Int(v) => serde_json::json!(v),
            FieldValue::Text(v) => serde_json::json!(v),
            FieldValue::Bool(v) => serde_json::json!(v),
        }
    }
}

/// How a run ended, passed to [`RunHandle::finish`].
pub enum FinishStatus<'a> {
    Finished,
    Failed(&'a str),
}

/// Configuration shared by every run a process opens.
#[derive(Clone)]
pub struct RunWriterConfig {
    pub storage_root: StorageRoot,
    pub console_mode: ConsoleMode,
    pub prefix_console_timestamps: bool,
}

impl RunWriterConfig {
    pub fn new(storage_root: StorageRoot) -> Self {
        Self {
            storage_root,
            console_mode: ConsoleMode::Smart,
            prefix_console_timestamps: true,
        }
    }
}

/// Factory for opening runs under a shared [`RunWriterConfig`].
pub struct RunWriter {
    config: RunWriterConfig,
}

impl RunWriter {
    pub fn new(config: RunWriterConfig) -> Self {
        Self { config }
    }

    /// `init(project, path, run_id?, capture_env?, snapshot_code?, workspace_root?)`.
    ///
    /// `capture_env` and `snapshot_code` are accepted for contract
    /// parity but performed by out-of-scope collaborators (the write-path contract
    /// §1): this call records only the resulting `workspace_root`
    /// hint, it does not itself capture the environment or snapshot
    /// source code.
    pub fn init(
        &self,
        clock: &impl Clock,
        path: &str,
        run_id: Option<RunId>,
        workspace_root: Option<String>,
    ) -> Result<Arc<RunHandle>> {
        RunHandle::init(&self.config, clock, path, run_id, workspace_root)
    }
}

/// An open run. Cheaply clonable via `Arc`; console capture and
/// background archival callers may hold their own clone.
pub struct RunHandle {
    storage_root: StorageRoot,
    run_id: RunId,
    run_dir: PathBuf,
    step: AtomicU64,
    best_metric: Mutex<BestMetricTracker>,
    console: Mutex<Option<ConsoleCapture>>,
    finished: AtomicBool,
}

impl RunHandle {
    fn init(
        config: &RunWriterConfig,
        clock: &impl Clock,
        path: &str,
        run_id: Option<RunId>,
        workspace_root: Option<String>,
    ) -> Result<Arc<Self>> {
        let run_id = run_id.unwrap_or_else(|| RunId::generate(clock));
        let run_dir = config.storage_root.runs_dir().join(path).join(run_id.as_str());
        fs::create_dir_all(run_dir.join("media"))?;

        let created_at = chrono::Utc::now();
        let meta = RunMeta {
            id: run_id.clone(),
            path: path.to_string(),
            created_at,
            writer_pid: std::process::id(),
            hostname: hostname(),
            python_version: None,
            platform: std::env::consts::OS.to_string(),
            storage_root: config.storage_root.root().display().to_string(),
            workspace_root,
        };
        runicorn_core::atomic::write_json_atomic(&run_dir.join("meta.json"), &meta)?;

        let status = RunStatus::new_running(created_at);
        runicorn_core::atomic::write_json_atomic(&run_dir.join("status.json"), &status)?;

        runicorn_core::atomic::write_json_atomic(
            &run_dir.join("summary.json"),
            &RunSummary::default(),
        )?;
        runicorn_core::atomic::write_json_atomic(&run_dir.join("assets.json"), &AssetsJson::default())?;

        let console = ConsoleCapture::new(
            &run_dir.join("logs.txt"),
            config.console_mode,
            config.prefix_console_timestamps,
        )
        .ok();

        let handle = Arc::new(Self {
            storage_root: config.storage_root.clone(),
            run_id,
            run_dir,
            step: AtomicU64::new(0),
            best_metric: Mutex::new(BestMetricTracker::default()),
            console: Mutex::new(console),
            finished: AtomicBool::new(false),
        });
        active_run::acquire(&handle)?;
        Ok(handle)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }

    /// `log(data, step?, stage?)`.
    pub fn log(
        &self,
        data: BTreeMap<String, FieldValue>,
        step: Option<i64>,
        stage: Option<&str>,
    ) -> Result<()> {
        let global_step = self.resolve_step(step);
        let improved = self.best_metric.lock().observe(&data, global_step);

        let mut obj = serde_json::Map::new();
        obj.insert("global_step".to_string(), serde_json::json!(global_step));
        obj.insert(
            "time".to_string(),
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );
        if let Some(stage) = stage {
            obj.insert("stage".to_string(), serde_json::json!(stage));
        }
        for (k, v) in data {
            obj.insert(k, v.into_json());
        }

        let event = RunEvent {
            ts: chrono::Utc::now(),
            kind: runicorn_core::EventKind::Metrics,
            data: Value::Object(obj),
        };
        self.append_event(&event)?;

        if improved {
            // Eager flush, per spec.md §4.1 "optionally eagerly".
            let _ = self.flush_summary_best_metric();
        }
        Ok(())
    }

    /// Invalid explicit steps fall back to auto-increment with a warning.
    fn resolve_step(&self, step: Option<i64>) -> u64 {
        match step {
            Some(s) if s >= 0 => {
                let s = s as u64;
                self.step.store(s, Ordering::SeqCst);
                s
            }
            Some(s) => {
                tracing::warn!(run_id = %self.run_id, invalid_step = s, "non-integer/negative step, falling back to auto-increment");
                self.step.fetch_add(1, Ordering::SeqCst) + 1
            }
            None => self.step.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn append_event(&self, event: &RunEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let path = self.run_dir.join("events.jsonl");
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        f.lock_exclusive()?;
        let result = (|| -> Result<()> {
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
            f.flush()?;
            Ok(())
        })();
        let _ = f.unlock();
        result
    }

    /// `log_text(text)`.
    pub fn log_text(&self, text: &str) -> Result<()> {
        let path = self.run_dir.join("logs.txt");
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        f.lock_exclusive()?;
        let line = format!("{} | {}\n", chrono::Utc::now().format("%H:%M:%S"), text);
        let result = f.write_all(line.as_bytes()).map_err(RunicornError::from);
        let _ = f.unlock();
        result
    }

    /// `log_image(key, image, step?, caption?, format, quality)`.
    pub fn log_image(
        &self,
        key: &str,
        img: &image::DynamicImage,
        step: Option<i64>,
        caption: Option<&str>,
        format: image::ImageFormat,
        quality: Option<u8>,
    ) -> Result<()> {
        let ext = match format {
            image::ImageFormat::Jpeg => "jpg",
            _ => "png",
        };
        let ts_millis = chrono::Utc::now().timestamp_millis();
        let rand_suffix: u32 = rand::thread_rng().gen_range(0..=0xFFFF);
        let filename = format!("{ts_millis}_{rand_suffix:04x}_{key}.{ext}");
        let rel_path = format!("media/{filename}");
        let abs_path = self.run_dir.join(&rel_path);

        let mut bytes: Vec<u8> = Vec::new();
        match format {
            image::ImageFormat::Jpeg => {
                let q = quality.unwrap_or(90);
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, q);
                encoder
                    .encode_image(img)
                    .map_err(|e| RunicornError::IoFailure(e.to_string()))?;
            }
            _ => {
                img
                    .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
                    .map_err(|e| RunicornError::IoFailure(e.to_string()))?;
            }
        }
        runicorn_core::atomic::write_atomic(&abs_path, &bytes)?;

        let global_step = step.map(|s| s.max(0) as u64).unwrap_or(self.step.load(Ordering::SeqCst));
        let mut data = serde_json::Map::new();
        data.insert("key".to_string(), serde_json::json!(key));
        data.insert("path".to_string(), serde_json::json!(rel_path));
        data.insert("step".to_string(), serde_json::json!(global_step));
        if let Some(caption) = caption {
            data.insert("caption".to_string(), serde_json::json!(caption));
        }
        let event = RunEvent {
            ts: chrono::Utc::now(),
            kind: runicorn_core::EventKind::Image,
            data: Value::Object(data),
        };
        self.append_event(&event)
    }

    /// `log_config({args?, extra?, config_files?})`.
    pub fn log_config(
        &self,
        args: Option<Value>,
        extra: Option<Value>,
        config_files: Option<Vec<String>>,
    ) -> Result<()> {
        let asset_id = uuid::Uuid::new_v4().to_string();
        let mut payload = serde_json::Map::new();
        if let Some(args) = args {
            payload.insert("args".to_string(), args);
        }
        if let Some(extra) = extra {
            payload.insert("extra".to_string(), extra);
        }
        if let Some(files) = config_files {
            payload.insert("config_files".to_string(), serde_json::json!(files));
        }
        let rel_path = format!("config/{asset_id}.json");
        runicorn_core::atomic::write_json_atomic(
            &self.run_dir.join(&rel_path),
            &Value::Object(payload),
        )?;
        self.update_assets_json(AssetRole::Config, AssetsJsonEntry {
            asset_id,
            name: "config".to_string(),
            archive_uri: Some(rel_path),
            source_uri: None,
            is_archived: true,
            created_at: chrono::Utc::now(),
        })?;
        Ok(())
    }

    /// `set_primary_metric(name, mode)`.
    pub fn set_primary_metric(&self, name: &str, mode: MetricMode) {
        self.best_metric.lock().set_primary(name, mode);
    }

    /// `summary(update)`.
    pub fn summary(&self, update: serde_json::Map<String, Value>) -> Result<()> {
        let path = self.run_dir.join("summary.json");
        let mut current: RunSummary = read_json_or_default(&path);
        current.merge(update);
        runicorn_core::atomic::write_json_atomic(&path, &current)
    }

    fn flush_summary_best_metric(&self) -> Result<()> {
        let fields = self.best_metric.lock().summary_fields();
        if let Some(fields) = fields {
            self.summary(fields)?;
        }
        Ok(())
    }

    fn update_assets_json(&self, role: AssetRole, entry: AssetsJsonEntry) -> Result<()> {
        upsert_assets_json_entry(&self.run_dir, role, entry)
    }

    /// Record a dataset/pretrained asset reference in `assets.json`.
    /// Index wiring (if the caller holds a `storage::Index`) is the
    /// caller's responsibility, matching §4.3's "composite helper"
    /// `record_asset_for_run` living at the Index boundary rather than
    /// inside the writer.
    pub fn record_asset_reference(&self, role: AssetRole, entry: AssetsJsonEntry) -> Result<()> {
        self.update_assets_json(role, entry)
    }

    /// `finish(status)`.
    pub fn finish(self: &Arc<Self>, status: FinishStatus<'_>) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_summary_best_metric()?;

        let path = self.run_dir.join("status.json");
        let mut current: RunStatus = read_json_or_default(&path);
        let ended_at = chrono::Utc::now();
        match status {
            FinishStatus::Finished => current.mark_finished(ended_at),
            FinishStatus::Failed(reason) => current.mark_failed(ended_at, reason),
        }
        runicorn_core::atomic::write_json_atomic(&path, &current)?;

        if let Some(console) = self.console.lock().as_ref() {
            console.flush_pending();
        }
        active_run::release(self);
        Ok(())
    }

    /// Soft-delete marker, exposed here for symmetry with
    /// `discovery::soft_delete_run`; most callers should go through
    /// `discovery` once the run is no longer active.
    pub fn write_deleted_marker(&self, reason: Option<String>, original_status: RunStatusKind) -> Result<()> {
        let marker = DeletedMarker {
            deleted_at: chrono::Utc::now(),
            reason,
            original_status,
        };
        runicorn_core::atomic::write_json_atomic(&self.run_dir.join(".deleted"), &marker)
    }
}

/// Read-modify-write `assets.json` under `run_dir`, upserting one
/// role's entry by `asset_id`. Shared by [`RunHandle`] and the output
/// scanner (the write-path contract step 7), since both write the same file
/// from different call sites (an active writer vs. a background scan).
pub(crate) fn upsert_assets_json_entry(
    run_dir: &std::path::Path,
    role: AssetRole,
    entry: AssetsJsonEntry,
) -> Result<()> {
    let path = run_dir.join("assets.json");
    let mut current: AssetsJson = read_json_or_default(&path);
    current.upsert(role, entry);
    runicorn_core::atomic::write_json_atomic(&path, &current)
}

fn read_json_or_default<T: Default + serde::de::DeserializeOwned>(path: &std::path::Path) -> T {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runicorn_core::FakeClock;
    use tempfile::tempdir;

    fn handle(dir: &std::path::Path) -> Arc<RunHandle> {
        let config = RunWriterConfig::new(StorageRoot::new(dir));
        RunWriter::new(config)
            .init(&FakeClock::new(), "vision/r1", None, None)
            .unwrap()
    }

    #[test]
    fn init_writes_initial_state_files() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        assert!(handle.run_dir().join("meta.json").exists());
        assert!(handle.run_dir().join("status.json").exists());
        let status: RunStatus =
            serde_json::from_slice(&fs::read(handle.run_dir().join("status.json")).unwrap())
                .unwrap();
        assert_eq!(status.status, RunStatusKind::Running);
    }

    #[test]
    fn log_auto_increments_global_step() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        handle.log(BTreeMap::new(), None, None).unwrap();
        handle.log(BTreeMap::new(), None, None).unwrap();
        let contents = fs::read_to_string(handle.run_dir().join("events.jsonl")).unwrap();
        let steps: Vec<u64> = contents
            .lines()
            .map(|l| {
                let v: Value = serde_json::from_str(l).unwrap();
                v["data"]["global_step"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(steps, vec![1, 2]);
    }

    #[test]
    fn log_explicit_step_overrides_counter() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        handle.log(BTreeMap::new(), Some(41), None).unwrap();
        handle.log(BTreeMap::new(), None, None).unwrap();
        let contents = fs::read_to_string(handle.run_dir().join("events.jsonl")).unwrap();
        let steps: Vec<u64> = contents
            .lines()
            .map(|l| {
                let v: Value = serde_json::from_str(l).unwrap();
                v["data"]["global_step"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(steps, vec![41, 42]);
    }

    #[test]
    fn nan_metric_round_trips_through_sentinel() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        let mut data = BTreeMap::new();
        data.insert("loss".to_string(), FieldValue::Number(f64::NAN));
        handle.log(data, None, None).unwrap();
        let contents = fs::read_to_string(handle.run_dir().join("events.jsonl")).unwrap();
        let mut v: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        runicorn_core::event::normalize_for_read(&mut v);
        assert_eq!(v["data"]["loss"], Value::Null);
    }

    #[test]
    fn finish_is_idempotent_and_releases_active_slot() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        handle.finish(FinishStatus::Finished).unwrap();
        handle.finish(FinishStatus::Finished).unwrap();
        let status: RunStatus =
            serde_json::from_slice(&fs::read(handle.run_dir().join("status.json")).unwrap())
                .unwrap();
        assert_eq!(status.status, RunStatusKind::Finished);
    }

    #[test]
    fn finish_failed_records_exit_reason() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        handle.finish(FinishStatus::Failed("oom")).unwrap();
        let status: RunStatus =
            serde_json::from_slice(&fs::read(handle.run_dir().join("status.json")).unwrap())
                .unwrap();
        assert_eq!(status.exit_reason.as_deref(), Some("oom"));
    }

    #[test]
    fn best_metric_flushes_into_summary_on_finish() {
        let dir = tempdir().unwrap();
        let handle = handle(dir.path());
        handle.set_primary_metric("acc", MetricMode::Max);
        let mut data = BTreeMap::new();
        data.insert("acc".to_string(), FieldValue::Number(0.87));
        handle.log(data, None, None).unwrap();
        handle.finish(FinishStatus::Finished).unwrap();
        let summary: RunSummary =
            serde_json::from_slice(&fs::read(handle.run_dir().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary.get("best_metric_value"), Some(&serde_json::json!(0.87)));
    }
}
