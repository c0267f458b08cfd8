//! Persistent store for share state and file records
//!
//! The crawler only needs four operations from a store, captured by
//! [`IndexStore`]. [`SqliteStore`] implements them over one SQLite
//! connection behind a mutex, so share-state writes from crawl tasks and
//! file inserts from the result writer never run concurrently.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{FileRecord, ShareState};

/// Store operations used by the crawl
pub trait IndexStore: Send + Sync {
    /// Persist one file record
    fn insert_file(&self, record: &FileRecord) -> Result<(), StoreError>;

    /// Insert a `started` share row; fails if the pair already has a row
    fn insert_share_started(&self, server: &str, share: &str) -> Result<(), StoreError>;

    /// Set the state of an existing share row
    fn update_share_state(
        &self,
        server: &str,
        share: &str,
        state: ShareState,
    ) -> Result<(), StoreError>;

    /// Whether any share row exists for the pair
    fn share_exists(&self, server: &str, share: &str) -> Result<bool, StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        server TEXT,
        sharename TEXT,
        name TEXT,
        path TEXT,
        extension TEXT,
        size INTEGER,
        modified_at TEXT,
        mode INTEGER
    );
    CREATE INDEX IF NOT EXISTS files_extension ON files (extension);
    CREATE INDEX IF NOT EXISTS files_name ON files (name);

    CREATE TABLE IF NOT EXISTS shares (
        server TEXT NOT NULL,
        sharename TEXT NOT NULL,
        state TEXT,
        created_at TEXT,
        PRIMARY KEY (server, sharename)
    );
";

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("opened store at {:?}", path);
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Get file count
    pub fn file_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Get the recorded state of a share, if any
    pub fn share_state(&self, server: &str, share: &str) -> Result<Option<ShareState>, StoreError> {
        let state: Option<String> = self
            .conn()?
            .query_row(
                "SELECT state FROM shares WHERE server = ?1 AND sharename = ?2",
                params![server, share],
                |row| row.get(0),
            )
            .optional()?;

        state.map(|s| s.parse::<ShareState>()).transpose()
    }

    /// Get share counts per state
    pub fn share_state_counts(&self) -> Result<HashMap<String, u64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM shares GROUP BY state")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (state, count) = row?;
            counts.insert(state, count);
        }
        Ok(counts)
    }

    /// Get all file records of one share, in insertion order
    pub fn files_for_share(&self, server: &str, share: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT server, sharename, name, path, extension, size, modified_at, mode
             FROM files WHERE server = ?1 AND sharename = ?2 ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![server, share], |row| {
            let modified: String = row.get(6)?;
            Ok(FileRecord {
                server: row.get(0)?,
                share: row.get(1)?,
                name: row.get(2)?,
                folder: row.get(3)?,
                extension: row.get(4)?,
                size: row.get::<_, i64>(5)? as u64,
                modified: DateTime::parse_from_rfc3339(&modified)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_default(),
                mode: row.get::<_, i64>(7)? as u32,
            })
        })?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Delete `failed` share rows so the next run attempts them again
    pub fn reset_failed_shares(&self) -> Result<u64, StoreError> {
        let cleared = self.conn()?.execute(
            "DELETE FROM shares WHERE state = ?1",
            params![ShareState::Failed.as_str()],
        )?;
        Ok(cleared as u64)
    }
}

impl IndexStore for SqliteStore {
    fn insert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO files (server, sharename, name, path, extension, size, modified_at, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.server,
                record.share,
                record.name,
                record.folder,
                record.extension,
                record.size as i64,
                record.modified.to_rfc3339(),
                record.mode as i64,
            ],
        )?;
        Ok(())
    }

    fn insert_share_started(&self, server: &str, share: &str) -> Result<(), StoreError> {
        let result = self.conn()?.execute(
            "INSERT INTO shares (server, sharename, state, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                server,
                share,
                ShareState::Started.as_str(),
                Utc::now().to_rfc3339()
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateShare {
                    server: server.to_string(),
                    share: share.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_share_state(
        &self,
        server: &str,
        share: &str,
        state: ShareState,
    ) -> Result<(), StoreError> {
        let updated = self.conn()?.execute(
            "UPDATE shares SET state = ?1 WHERE server = ?2 AND sharename = ?3",
            params![state.as_str(), server, share],
        )?;

        if updated == 0 {
            return Err(StoreError::MissingShare {
                server: server.to_string(),
                share: share.to_string(),
                state,
            });
        }
        Ok(())
    }

    fn share_exists(&self, server: &str, share: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM shares WHERE server = ?1 AND sharename = ?2",
            params![server, share],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
