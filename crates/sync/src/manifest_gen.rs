// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Manifest Generator: the server-side half of the
//! sync engine. Scans a local [`StorageRoot`] and writes
//! `<root>/.runicorn/<type>_manifest.json` (+ gzip sibling), tracking a
//! monotonic revision counter.

use std::io::{Read, Write as _};

use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use runicorn_core::{Result, RunicornError, StorageRoot, SyncManifestType};
use runicorn_core::{FilePriority, SyncExperimentEntry, SyncFileEntry, SyncManifest};
use runicorn_storage::discovery::iter_all_runs;
use serde::{Deserialize, Serialize};

const METADATA_FILES: &[&str] = &["meta.json", "status.json", "summary.json", "assets.json"];
const ESSENTIAL_FILES: &[&str] = &["events.jsonl", "logs.txt"];
pub(crate) const TAIL_HASH_BYTES: u64 = 4 * 1024;

#[derive(Debug, Clone)]
pub struct ManifestGeneratorConfig {
    pub active_window_seconds: i64,
    pub metadata_size_cap_bytes: u64,
    pub max_manifest_size_bytes: u64,
}

impl Default for ManifestGeneratorConfig {
    fn default() -> Self {
        Self {
            active_window_seconds: 3600,
            metadata_size_cap_bytes: 1024 * 1024,
            max_manifest_size_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestState {
    #[serde(default)]
    last_revision: u64,
}

/// Server-side sync manifest writer.
pub struct ManifestGenerator {
    root: StorageRoot,
    config: ManifestGeneratorConfig,
}

fn runicorn_dir(root: &StorageRoot) -> std::path::PathBuf {
    root.root().join(".runicorn")
}

fn manifest_state_path(root: &StorageRoot) -> std::path::PathBuf {
    runicorn_dir(root).join(".manifest_state.json")
}

/// `meta.path` is `"project/name"`; split it the way the sync manifest
/// schema expects.
fn split_project_name(path: &str) -> (String, String) {
    match path.split_once('/') {
        Some((project, name)) => (project.to_string(), name.to_string()),
        None => (path.to_string(), String::new()),
    }
}

fn tail_hash(path: &std::path::Path, size: u64) -> Result<String> {
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    let offset = size.saturating_sub(TAIL_HASH_BYTES);
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(hash_tail_bytes(&buf))
}

/// MD5 of a tail-window buffer, shared with the sync client so both
/// sides hash the same way when verifying an append-only file wasn't
/// truncated or rewritten underneath a growing cache copy.
pub(crate) fn hash_tail_bytes(buf: &[u8]) -> String {
    hex::encode(Md5::digest(buf))
}

impl ManifestGenerator {
    pub fn new(root: StorageRoot, config: ManifestGeneratorConfig) -> Self {
        Self { root, config }
    }

    fn next_revision(&self) -> Result<u64> {
        let path = manifest_state_path(&self.root);
        let state: ManifestState = std::fs::read(&path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();
        let revision = state.last_revision + 1;
        runicorn_core::atomic::write_json_atomic(&path, &ManifestState { last_revision: revision })?;
        Ok(revision)
    }

    fn collect_files(
        &self,
        run_dir: &std::path::Path,
        path: &str,
        run_id: &str,
    ) -> Result<Vec<SyncFileEntry>> {
        let mut files = Vec::new();
        let wire_prefix = format!("{path}/runs/{run_id}");

        for name in METADATA_FILES {
            let fs_path = run_dir.join(name);
            let Ok(meta) = std::fs::metadata(&fs_path) else { continue };
            if meta.len() > self.config.metadata_size_cap_bytes {
                tracing::warn!(
                    file = %fs_path.display(),
                    size = meta.len(),
                    "metadata file exceeds manifest cap, excluding"
                );
                continue;
            }
            files.push(SyncFileEntry {
                path: format!("{wire_prefix}/{name}"),
                size: meta.len(),
                mtime: file_mtime(&meta),
                tail_hash: None,
                priority: FilePriority::Metadata,
                is_append_only: false,
            });
        }

        for name in ESSENTIAL_FILES {
            let fs_path = run_dir.join(name);
            let Ok(meta) = std::fs::metadata(&fs_path) else { continue };
            files.push(SyncFileEntry {
                path: format!("{wire_prefix}/{name}"),
                size: meta.len(),
                mtime: file_mtime(&meta),
                tail_hash: Some(tail_hash(&fs_path, meta.len())?),
                priority: FilePriority::Essential,
                is_append_only: true,
            });
        }

        let media_dir = run_dir.join("media");
        if media_dir.is_dir() {
            if let Ok(entries) = std::fs::read_dir(&media_dir) {
                for entry in entries.filter_map(|e| e.ok()) {
                    let Ok(meta) = entry.metadata() else { continue };
                    if !meta.is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().to_string();
                    files.push(SyncFileEntry {
                        path: format!("{wire_prefix}/media/{name}"),
                        size: meta.len(),
                        mtime: file_mtime(&meta),
                        tail_hash: None,
                        priority: FilePriority::Media,
                        is_append_only: false,
                    });
                }
            }
        }

        Ok(files)
    }

    /// Scan the storage root and build a [`SyncManifest`], without
    /// writing it. Useful for tests and for callers composing their own
    /// write/compress behavior.
    pub fn build(&self, manifest_type: SyncManifestType) -> Result<SyncManifest> {
        let now = chrono::Utc::now();
        let mut experiments = Vec::new();

        for run in iter_all_runs(&self.root, false)? {
            let Some(meta) = &run.meta else { continue };
            let Some(status) = &run.status else { continue };

            if manifest_type == SyncManifestType::Active {
                let dir_mtime = std::fs::metadata(&run.run_dir)
                    .and_then(|m| m.modified())
                    .map(chrono::DateTime::<chrono::Utc>::from)
                    .unwrap_or(meta.created_at);
                if (now - dir_mtime).num_seconds() > self.config.active_window_seconds {
                    continue;
                }
            }

            let (project, name) = split_project_name(&meta.path);
            let run_id = meta.id.to_string();
            let files = self.collect_files(&run.run_dir, &meta.path, &run_id)?;
            experiments.push(SyncExperimentEntry {
                run_id,
                project,
                name,
                status: status.status.as_str().to_string(),
                created_at: meta.created_at,
                updated_at: status.ended_at.unwrap_or(meta.created_at),
                files,
            });
        }

        let manifest = SyncManifest {
            format_version: 1,
            manifest_type,
            revision: self.next_revision()?,
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            generated_at: now,
            server_hostname: hostname(),
            remote_root: self.root.root().display().to_string(),
            experiments,
        };

        manifest.validate_paths().map_err(RunicornError::BadRequest)?;

        let size = serde_json::to_vec(&manifest)?.len() as u64;
        if size > self.config.max_manifest_size_bytes {
            return Err(RunicornError::Rejected(format!(
                "manifest size {size} exceeds cap {}",
                self.config.max_manifest_size_bytes
            )));
        }

        Ok(manifest)
    }

    /// Build the manifest and write `<root>/.runicorn/<type>_manifest.json`
    /// (temp-rename) plus a `.gz` sibling.
    pub fn generate(&self, manifest_type: SyncManifestType) -> Result<SyncManifest> {
        let manifest = self.build(manifest_type)?;
        let dir = runicorn_dir(&self.root);
        std::fs::create_dir_all(&dir)?;

        let json_path = dir.join(format!("{}.json", manifest_type.file_stem()));
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        runicorn_core::atomic::write_atomic(&json_path, &bytes)?;

        let gz_path = dir.join(format!("{}.json.gz", manifest_type.file_stem()));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        let compressed =
            encoder.finish().map_err(|e| RunicornError::IoFailure(format!("gzip: {e}")))?;
        runicorn_core::atomic::write_atomic(&gz_path, &compressed)?;

        Ok(manifest)
    }
}

fn file_mtime(meta: &std::fs::Metadata) -> chrono::DateTime<chrono::Utc> {
    meta.modified().map(chrono::DateTime::<chrono::Utc>::from).unwrap_or_else(|_| chrono::Utc::now())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runicorn_core::{RunMeta, RunStatus, SystemClock};
    use tempfile::tempdir;

    fn write_run(root: &StorageRoot, path: &str, run_id: &str) {
        let dir = root.runs_dir().join(path).join(run_id);
        std::fs::create_dir_all(&dir).unwrap();
        let meta = RunMeta {
            id: runicorn_core::RunId::parse(run_id).unwrap(),
            path: path.to_string(),
            created_at: chrono::Utc::now(),
            writer_pid: std::process::id(),
            hostname: "host-a".to_string(),
            python_version: None,
            platform: "test".to_string(),
            storage_root: root.root().display().to_string(),
            workspace_root: None,
        };
        runicorn_core::atomic::write_json_atomic(&dir.join("meta.json"), &meta).unwrap();
        let status = RunStatus::new_running(chrono::Utc::now());
        runicorn_core::atomic::write_json_atomic(&dir.join("status.json"), &status).unwrap();
        std::fs::write(dir.join("events.jsonl"), b"{\"ts\":\"2026-01-01T00:00:00Z\"}\n").unwrap();
    }

    fn run_id() -> String {
        runicorn_core::RunId::generate(&SystemClock).to_string()
    }

    #[test]
    fn build_includes_metadata_and_essential_files() {
        let dir = tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        let id = run_id();
        write_run(&root, "vision/r1", &id);

        let generator = ManifestGenerator::new(root, ManifestGeneratorConfig::default());
        let manifest = generator.build(SyncManifestType::Full).unwrap();

        assert_eq!(manifest.experiments.len(), 1);
        let exp = &manifest.experiments[0];
        assert_eq!(exp.project, "vision");
        assert_eq!(exp.name, "r1");
        assert!(exp.files.iter().any(|f| f.path.ends_with("meta.json")));
        assert!(exp.files.iter().any(|f| f.path.ends_with("events.jsonl") && f.is_append_only));
    }

    #[test]
    fn revision_increments_on_each_build() {
        let dir = tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        write_run(&root, "vision/r1", &run_id());

        let generator = ManifestGenerator::new(root, ManifestGeneratorConfig::default());
        let first = generator.build(SyncManifestType::Full).unwrap();
        let second = generator.build(SyncManifestType::Full).unwrap();
        assert_eq!(second.revision, first.revision + 1);
    }

    #[test]
    fn generated_paths_pass_validation() {
        let dir = tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        write_run(&root, "vision/r1", &run_id());

        let generator = ManifestGenerator::new(root, ManifestGeneratorConfig::default());
        let manifest = generator.build(SyncManifestType::Full).unwrap();
        assert!(manifest.validate_paths().is_ok());
    }

    #[test]
    fn generate_writes_json_and_gzip_sibling() {
        let dir = tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        write_run(&root, "vision/r1", &run_id());

        let generator = ManifestGenerator::new(root.clone(), ManifestGeneratorConfig::default());
        generator.generate(SyncManifestType::Full).unwrap();

        assert!(dir.path().join(".runicorn/full_manifest.json").is_file());
        assert!(dir.path().join(".runicorn/full_manifest.json.gz").is_file());
    }

    #[test]
    fn active_manifest_includes_freshly_written_runs() {
        let dir = tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        write_run(&root, "vision/r1", &run_id());

        let config = ManifestGeneratorConfig { active_window_seconds: 3600, ..Default::default() };
        let generator = ManifestGenerator::new(root, config);
        let manifest = generator.build(SyncManifestType::Active).unwrap();
        assert_eq!(manifest.experiments.len(), 1);
    }
}
