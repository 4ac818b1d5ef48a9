// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Embedded schema: `runs`, `assets`, `run_assets`
//! with WAL journaling and foreign-key cascade deletes.

use rusqlite::Connection;
use runicorn_core::Result;

use super::map_db_err;

pub(super) fn initialize(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").map_err(map_db_err)?;
    conn.pragma_update(None, "foreign_keys", true).map_err(map_db_err)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id         TEXT PRIMARY KEY,
            project        TEXT NOT NULL,
            name           TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            ended_at       TEXT,
            status         TEXT NOT NULL,
            run_dir        TEXT NOT NULL,
            workspace_root TEXT
        );

        CREATE TABLE IF NOT EXISTS assets (
            asset_id        TEXT PRIMARY KEY,
            asset_type      TEXT NOT NULL,
            name            TEXT NOT NULL,
            source_uri      TEXT,
            archive_uri     TEXT,
            is_archived     INTEGER NOT NULL DEFAULT 0,
            fingerprint_kind TEXT NOT NULL,
            fingerprint     TEXT,
            size_bytes      INTEGER,
            mtime           TEXT,
            created_at      TEXT NOT NULL,
            metadata_json   TEXT NOT NULL DEFAULT '{}'
        );

        CREATE UNIQUE INDEX IF NOT EXISTS assets_type_fingerprint_uq
            ON assets(asset_type, fingerprint)
            WHERE fingerprint IS NOT NULL;

        CREATE TABLE IF NOT EXISTS run_assets (
            run_id     TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
            asset_id   TEXT NOT NULL REFERENCES assets(asset_id) ON DELETE CASCADE,
            role       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (run_id, asset_id, role)
        );

        CREATE INDEX IF NOT EXISTS run_assets_by_asset ON run_assets(asset_id);
        "#,
    )
    .map_err(map_db_err)?;
    Ok(())
}
