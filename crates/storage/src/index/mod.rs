// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Index: the embedded
//! relational store tying runs to assets, with reference counting and
//! orphan-aware deletion.
//!
//! Grounded on `other_examples/manifests/Dicklesworthstone-frankensqlite`,
//! the only manifest in the retrieval pack embedding a SQL engine — see
//! `DESIGN.md`. A process-wide `parking_lot::Mutex` serializes writer
//! access, matching `oj-daemon`'s single-writer-lock-file pattern but
//! scoped in-process; readers open their own connection.

mod queries;
mod schema;

pub use queries::AssetRefCount;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use runicorn_core::{Result, RunicornError};
use rusqlite::Connection;

fn map_db_err(e: rusqlite::Error) -> RunicornError {
    match &e {
        rusqlite::Error::QueryReturnedNoRows => RunicornError::NotFound(e.to_string()),
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RunicornError::Conflict(e.to_string())
        }
        _ => RunicornError::Fatal(e.to_string()),
    }
}

/// Embedded relational index over a single `runicorn.db` file.
pub struct Index {
    db_path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl Index {
    /// Open (creating if needed) the index database at
    /// `storage_root.index_db_path()`, running schema migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(map_db_err)?;
        schema::initialize(&conn)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a fresh, independent read-only connection. Callers doing
    /// many reads across threads should keep one of these per thread
    /// rather than contending on the writer lock.
    pub fn reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(map_db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(map_db_err)?;
        Ok(conn)
    }

    pub fn upsert_run(&self, run: &queries::RunRow) -> Result<()> {
        let conn = self.writer.lock();
        queries::upsert_run(&conn, run)
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: &str,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let conn = self.writer.lock();
        queries::finish_run(&conn, run_id, status, ended_at)
    }

    /// Returns the existing asset id on `(asset_type, fingerprint)` collision.
    pub fn upsert_asset(&self, asset: &runicorn_core::Asset) -> Result<String> {
        let conn = self.writer.lock();
        queries::upsert_asset(&conn, asset)
    }

    pub fn link_run_asset(
        &self,
        run_id: &str,
        asset_id: &str,
        role: runicorn_core::AssetRole,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let conn = self.writer.lock();
        queries::link_run_asset(&conn, run_id, asset_id, role, created_at)
    }

    /// Composite helper: upsert the asset, then link it to the run.
    pub fn record_asset_for_run(
        &self,
        run_id: &str,
        asset: &runicorn_core::Asset,
        role: runicorn_core::AssetRole,
    ) -> Result<String> {
        let conn = self.writer.lock();
        let asset_id = queries::upsert_asset(&conn, asset)?;
        queries::link_run_asset(&conn, run_id, &asset_id, role, asset.created_at)?;
        Ok(asset_id)
    }

    pub fn get_assets_for_run(&self, run_id: &str) -> Result<Vec<runicorn_core::Asset>> {
        let conn = self.reader()?;
        queries::get_assets_for_run(&conn, run_id)
    }

    pub fn get_runs_for_asset(&self, asset_id: &str) -> Result<Vec<String>> {
        let conn = self.reader()?;
        queries::get_runs_for_asset(&conn, asset_id)
    }

    pub fn get_asset_ref_count(&self, asset_id: &str) -> Result<u64> {
        let conn = self.reader()?;
        queries::get_asset_ref_count(&conn, asset_id)
    }

    /// `delete_run_with_orphan_assets(run_id)`: within a single
    /// transaction, compute which linked assets become orphaned and
    /// delete them; cascade removes the run and its links. The caller
    /// is responsible for any filesystem cleanup (blobs/manifests).
    pub fn delete_run_with_orphan_assets(&self, run_id: &str) -> Result<AssetRefCount> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(map_db_err)?;
        let outcome = queries::delete_run_with_orphan_assets(&tx, run_id)?;
        tx.commit().map_err(map_db_err)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queries::RunRow;
    use runicorn_core::{Asset, AssetRole, AssetType, FingerprintKind};
    use tempfile::tempdir;

    fn sample_run(id: &str) -> RunRow {
        RunRow {
            run_id: id.to_string(),
            project: "vision".to_string(),
            name: "r1".to_string(),
            created_at: chrono::Utc::now(),
            ended_at: None,
            status: "running".to_string(),
            run_dir: format!("/runs/{id}"),
            workspace_root: None,
        }
    }

    fn sample_asset(id: &str, fp: &str) -> Asset {
        Asset {
            asset_id: id.to_string(),
            asset_type: AssetType::Dataset,
            name: "data.zip".to_string(),
            source_uri: None,
            archive_uri: None,
            is_archived: false,
            fingerprint_kind: FingerprintKind::Sha256,
            fingerprint: Some(fp.to_string()),
            size_bytes: None,
            mtime: None,
            created_at: chrono::Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn upsert_asset_dedups_on_type_and_fingerprint() {
        let dir = tempdir().unwrap();
        let index = Index::open(&dir.path().join("runicorn.db")).unwrap();
        let id1 = index.upsert_asset(&sample_asset("a1", "deadbeef")).unwrap();
        let id2 = index.upsert_asset(&sample_asset("a2", "deadbeef")).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn delete_run_with_orphan_assets_reclaims_unreferenced_assets() {
        let dir = tempdir().unwrap();
        let index = Index::open(&dir.path().join("runicorn.db")).unwrap();
        index.upsert_run(&sample_run("run1")).unwrap();
        index.upsert_run(&sample_run("run2")).unwrap();

        let asset = sample_asset("a1", "deadbeef");
        let asset_id = index.record_asset_for_run("run1", &asset, AssetRole::Dataset).unwrap();
        index
            .link_run_asset("run2", &asset_id, AssetRole::Dataset, chrono::Utc::now())
            .unwrap();

        let outcome = index.delete_run_with_orphan_assets("run1").unwrap();
        assert!(outcome.orphaned.is_empty());
        assert_eq!(index.get_asset_ref_count(&asset_id).unwrap(), 1);

        let outcome2 = index.delete_run_with_orphan_assets("run2").unwrap();
        assert_eq!(outcome2.orphaned, vec![asset_id.clone()]);
        assert_eq!(index.get_asset_ref_count(&asset_id).unwrap(), 0);
    }

    #[test]
    fn get_assets_for_run_returns_linked_assets() {
        let dir = tempdir().unwrap();
        let index = Index::open(&dir.path().join("runicorn.db")).unwrap();
        index.upsert_run(&sample_run("run1")).unwrap();
        let asset = sample_asset("a1", "deadbeef");
        index.record_asset_for_run("run1", &asset, AssetRole::Dataset).unwrap();

        let assets = index.get_assets_for_run("run1").unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].asset_id, "a1");
    }

    #[test]
    fn finish_run_updates_status_and_ended_at() {
        let dir = tempdir().unwrap();
        let index = Index::open(&dir.path().join("runicorn.db")).unwrap();
        index.upsert_run(&sample_run("run1")).unwrap();
        index.finish_run("run1", "finished", chrono::Utc::now()).unwrap();
    }
}
