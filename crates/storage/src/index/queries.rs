// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Query implementations backing [`super::Index`]'s public methods.

use rusqlite::{params, Connection, OptionalExtension};
use runicorn_core::{Asset, AssetRole, AssetType, FingerprintKind, Result};

use super::map_db_err;

/// Row shape for `upsert_run`.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub project: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: String,
    pub run_dir: String,
    pub workspace_root: Option<String>,
}

/// Outcome of `delete_run_with_orphan_assets`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRefCount {
    pub orphaned: Vec<String>,
    pub kept: Vec<String>,
}

pub(super) fn upsert_run(conn: &Connection, run: &RunRow) -> Result<()> {
    conn.execute(
        "INSERT INTO runs (run_id, project, name, created_at, ended_at, status, run_dir, workspace_root)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(run_id) DO UPDATE SET
             project = excluded.project,
             name = excluded.name,
             ended_at = excluded.ended_at,
             status = excluded.status,
             run_dir = excluded.run_dir,
             workspace_root = excluded.workspace_root",
        params![
            run.run_id,
            run.project,
            run.name,
            run.created_at.to_rfc3339(),
            run.ended_at.map(|t| t.to_rfc3339()),
            run.status,
            run.run_dir,
            run.workspace_root,
        ],
    )
    .map_err(map_db_err)?;
    Ok(())
}

pub(super) fn finish_run(
    conn: &Connection,
    run_id: &str,
    status: &str,
    ended_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE runs SET status = ?1, ended_at = ?2 WHERE run_id = ?3",
        params![status, ended_at.to_rfc3339(), run_id],
    )
    .map_err(map_db_err)?;
    Ok(())
}

pub(super) fn upsert_asset(conn: &Connection, asset: &Asset) -> Result<String> {
    if let Some(fingerprint) = asset.fingerprint.as_deref() {
        let existing: Option<String> = conn
            .query_row(
                "SELECT asset_id FROM assets WHERE asset_type = ?1 AND fingerprint = ?2",
                params![asset.asset_type.as_str(), fingerprint],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)?;
        if let Some(asset_id) = existing {
            return Ok(asset_id);
        }
    }

    conn.execute(
        "INSERT INTO assets (asset_id, asset_type, name, source_uri, archive_uri, is_archived,
             fingerprint_kind, fingerprint, size_bytes, mtime, created_at, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            asset.asset_id,
            asset.asset_type.as_str(),
            asset.name,
            asset.source_uri,
            asset.archive_uri,
            asset.is_archived,
            asset.fingerprint_kind.as_str(),
            asset.fingerprint,
            asset.size_bytes,
            asset.mtime.map(|t| t.to_rfc3339()),
            asset.created_at.to_rfc3339(),
            asset.metadata.to_string(),
        ],
    )
    .map_err(map_db_err)?;
    Ok(asset.asset_id.clone())
}

pub(super) fn link_run_asset(
    conn: &Connection,
    run_id: &str,
    asset_id: &str,
    role: AssetRole,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO run_assets (run_id, asset_id, role, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![run_id, asset_id, role.as_str(), created_at.to_rfc3339()],
    )
    .map_err(map_db_err)?;
    Ok(())
}

fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<Asset> {
    let asset_type: String = row.get("asset_type")?;
    let fingerprint_kind: String = row.get("fingerprint_kind")?;
    let mtime: Option<String> = row.get("mtime")?;
    let created_at: String = row.get("created_at")?;
    let metadata_json: String = row.get("metadata_json")?;
    Ok(Asset {
        asset_id: row.get("asset_id")?,
        asset_type: AssetType::parse(&asset_type).unwrap_or(AssetType::Output),
        name: row.get("name")?,
        source_uri: row.get("source_uri")?,
        archive_uri: row.get("archive_uri")?,
        is_archived: row.get("is_archived")?,
        fingerprint_kind: FingerprintKind::parse(&fingerprint_kind).unwrap_or(FingerprintKind::Stat),
        fingerprint: row.get("fingerprint")?,
        size_bytes: row.get("size_bytes")?,
        mtime: mtime
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    })
}

pub(super) fn get_assets_for_run(conn: &Connection, run_id: &str) -> Result<Vec<Asset>> {
    let mut stmt = conn
        .prepare(
            "SELECT a.* FROM assets a
             JOIN run_assets ra ON ra.asset_id = a.asset_id
             WHERE ra.run_id = ?1
             ORDER BY a.created_at",
        )
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![run_id], row_to_asset)
        .map_err(map_db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
}

pub(super) fn get_runs_for_asset(conn: &Connection, asset_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT run_id FROM run_assets WHERE asset_id = ?1 ORDER BY run_id")
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![asset_id], |row| row.get::<_, String>(0))
        .map_err(map_db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
}

pub(super) fn get_asset_ref_count(conn: &Connection, asset_id: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT run_id) FROM run_assets WHERE asset_id = ?1",
            params![asset_id],
            |row| row.get(0),
        )
        .map_err(map_db_err)?;
    Ok(count as u64)
}

pub(super) fn delete_run_with_orphan_assets(
    conn: &Connection,
    run_id: &str,
) -> Result<AssetRefCount> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT asset_id FROM run_assets WHERE run_id = ?1")
        .map_err(map_db_err)?;
    let linked_asset_ids: Vec<String> = stmt
        .query_map(params![run_id], |row| row.get(0))
        .map_err(map_db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_db_err)?;
    drop(stmt);

    let mut outcome = AssetRefCount::default();
    for asset_id in &linked_asset_ids {
        let other_refs: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT run_id) FROM run_assets WHERE asset_id = ?1 AND run_id != ?2",
                params![asset_id, run_id],
                |row| row.get(0),
            )
            .map_err(map_db_err)?;
        if other_refs == 0 {
            outcome.orphaned.push(asset_id.clone());
        } else {
            outcome.kept.push(asset_id.clone());
        }
    }

    for asset_id in &outcome.orphaned {
        conn.execute("DELETE FROM assets WHERE asset_id = ?1", params![asset_id])
            .map_err(map_db_err)?;
    }
    // Cascades run_assets for this run via ON DELETE CASCADE.
    conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])
        .map_err(map_db_err)?;

    Ok(outcome)
}
