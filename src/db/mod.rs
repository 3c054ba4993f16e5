//! Local backup catalog on SQLite.
//!
//! The pipeline only uses the narrow surface below: record the intent of a
//! run, append one row per packaged file, update the row once with the
//! outcome. The query side serves the list/show/delete/curator commands.

pub mod model;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{ContentEvent, UploadOutcome};
use model::{BackupRecord, ContentRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS backups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at  TEXT NOT NULL,
    vault       TEXT NOT NULL,
    description TEXT NOT NULL,
    upload_id   TEXT,
    archive_id  TEXT,
    location    TEXT,
    checksum    TEXT,
    length      INTEGER NOT NULL DEFAULT 0,
    error       TEXT,
    passphrase  TEXT
);
CREATE TABLE IF NOT EXISTS contents (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    backup_id    INTEGER NOT NULL REFERENCES backups(id),
    archive_path TEXT NOT NULL,
    real_path    TEXT NOT NULL,
    length       INTEGER NOT NULL,
    modified     TEXT
);
CREATE INDEX IF NOT EXISTS idx_contents_backup ON contents(backup_id);
";

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (and create if necessary) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("could not create the catalog directory '{}'", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("could not open the catalog at '{}'", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("could not initialize the catalog schema")?;
        Ok(Catalog { conn })
    }

    /// Record that a backup run is starting and return its record id.
    /// The passphrase is only stored when the user explicitly opted in.
    pub fn save_intent(
        &self,
        vault: &str,
        description: &str,
        passphrase: Option<&str>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO backups (created_at, vault, description, passphrase)
                 VALUES (?1, ?2, ?3, ?4)",
                params![Utc::now(), vault, description, passphrase],
            )
            .context("could not record the backup intent")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append one packaged file to a backup record.
    pub fn append_content(&self, backup_id: i64, event: &ContentEvent) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO contents (backup_id, archive_path, real_path, length, modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    backup_id,
                    event.archive_path,
                    event.real_path.to_string_lossy(),
                    event.length,
                    event.modified,
                ],
            )
            .context("could not record a packaged file")?;
        Ok(())
    }

    /// Store the final outcome of a backup run, successful or not.
    pub fn update_outcome(
        &self,
        backup_id: i64,
        upload_id: Option<&str>,
        outcome: &UploadOutcome,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE backups
                 SET upload_id = ?2, archive_id = ?3, location = ?4, checksum = ?5,
                     length = ?6, error = ?7
                 WHERE id = ?1",
                params![
                    backup_id,
                    upload_id,
                    outcome.archive_id,
                    outcome.location,
                    outcome.checksum,
                    outcome.total_size,
                    error,
                ],
            )
            .context("could not record the backup outcome")?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<BackupRecord>> {
        self.conn
            .query_row(
                "SELECT id, created_at, vault, description, upload_id, archive_id,
                        location, checksum, length, error, passphrase
                FROM backups WHERE id = ?1",
                params![id],
                backup_from_row,
            )
            .optional()
            .context("could not read the backup record")
    }

    /// All files recorded for one backup, in archive order.
    pub fn contents(&self, backup_id: i64) -> Result<Vec<ContentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, backup_id, archive_path, real_path, length, modified
             FROM contents WHERE backup_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![backup_id], |row| {
                Ok(ContentRecord {
                    id: row.get(0)?,
                    backup_id: row.get(1)?,
                    archive_path: row.get(2)?,
                    real_path: row.get(3)?,
                    length: row.get(4)?,
                    modified: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All backups, newest first, optionally restricted to one vault.
    pub fn enumerate(&self, vault: Option<&str>) -> Result<Vec<BackupRecord>> {
        match vault {
            Some(vault) => self.query_backups(
                "SELECT id, created_at, vault, description, upload_id, archive_id,
                        location, checksum, length, error, passphrase
                FROM backups WHERE vault = ?1 ORDER BY created_at DESC",
                params![vault],
            ),
            None => self.query_backups(
                "SELECT id, created_at, vault, description, upload_id, archive_id,
                        location, checksum, length, error, passphrase
                FROM backups ORDER BY created_at DESC",
                params![],
            ),
        }
    }

    /// Backups in one vault created before the cutoff, oldest first.
    pub fn older_than(&self, vault: &str, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        self.query_backups(
            "SELECT id, created_at, vault, description, upload_id, archive_id,
                    location, checksum, length, error, passphrase
            FROM backups WHERE vault = ?1 AND created_at < ?2 ORDER BY created_at",
            params![vault, cutoff],
        )
    }

    /// Backups in one vault beyond the newest `keep`, newest first. Ties on
    /// the creation time are broken by the record id.
    pub fn beyond_newest(&self, vault: &str, keep: usize) -> Result<Vec<BackupRecord>> {
        self.query_backups(
            "SELECT id, created_at, vault, description, upload_id, archive_id,
                    location, checksum, length, error, passphrase
            FROM backups WHERE vault = ?1
            ORDER BY created_at DESC, id DESC LIMIT -1 OFFSET ?2",
            params![vault, keep as i64],
        )
    }

    /// Remove a backup record together with its content rows, atomically.
    pub fn delete(&self, id: i64) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("could not start the delete transaction")?;
        tx.execute("DELETE FROM contents WHERE backup_id = ?1", params![id])?;
        tx.execute("DELETE FROM backups WHERE id = ?1", params![id])?;
        tx.commit().context("could not delete the backup record")?;
        Ok(())
    }

    fn query_backups(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<BackupRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, backup_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn backup_from_row(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        vault: row.get(2)?,
        description: row.get(3)?,
        upload_id: row.get(4)?,
        archive_id: row.get(5)?,
        location: row.get(6)?,
        checksum: row.get(7)?,
        length: row.get(8)?,
        error: row.get(9)?,
        passphrase: row.get(10)?,
    })
}
