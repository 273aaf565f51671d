// src/db/connection.rs
//! Opening and initialising SQLite with runtime parameters.
//!
//! `Database` is the explicitly-passed storage handle every store is built
//! on. It owns one connection; callers that want independent connections to
//! the same file (other threads, other processes) open another handle.
//! Mutual exclusion between handles comes from SQLite's own locking: every
//! mutating operation runs inside `BEGIN IMMEDIATE`, so a read-modify-write
//! sequence holds the write lock from its first read to its commit.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::DatabaseConfig;
use crate::db::error::StoreError;
use crate::queue_log;
use log::Level;

/// Bumped whenever `resources/schema.sql` changes incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = include_str!("../../resources/schema.sql");

const DROP_SCHEMA: &str = "DROP TABLE IF EXISTS storage_records; \
                           DROP TABLE IF EXISTS storage_settings;";

pub fn db_path(base_dir: &Path, cfg: &DatabaseConfig) -> PathBuf {
    base_dir.join(&cfg.path)
}

pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path, cfg: &DatabaseConfig) -> Result<Arc<Self>, StoreError> {
        if cfg.purge_on_restart && path.exists() {
            queue_log!(Level::Warn, "db", "Purging {} on restart", path.display());
            fs::remove_file(path)?;
            // stale WAL/SHM files would be replayed into the fresh database
            for suffix in ["-wal", "-shm"] {
                let mut side = path.as_os_str().to_owned();
                side.push(suffix);
                match fs::remove_file(PathBuf::from(side)) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        apply_pragmas(&conn, cfg)?;
        init_schema(&conn)?;
        queue_log!(Level::Info, "db", "Database ready at {}", path.display());

        Ok(Arc::new(Self { conn: Mutex::new(conn), path: Some(path.to_path_buf()) }))
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Arc<Self>, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Arc::new(Self { conn: Mutex::new(conn), path: None }))
    }

    /// On-disk location, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` returns `Ok`; any error (or unwind) drops the
    /// transaction, which rolls it back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a deferred transaction for a consistent multi-statement read.
    pub fn read<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn run<F, T>(&self, behavior: TransactionBehavior, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Fold the WAL back into the main file and truncate it.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Rebuild the file to return free pages to the filesystem.
    /// Cannot run inside a transaction.
    pub fn vacuum(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Physical size of the main database file (`page_count * page_size`).
    pub fn file_size(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let pages: i64 = conn.pragma_query_value(None, "page_count", |r| r.get(0))?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |r| r.get(0))?;
        Ok((pages * page_size).max(0) as u64)
    }
}

fn apply_pragmas(conn: &Connection, cfg: &DatabaseConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        log::warn!("journal_mode=WAL not accepted, running in {}", mode);
    }
    conn.pragma_update(None, "synchronous", cfg.synchronous.as_str())?;
    let _: i64 = conn.pragma_update_and_check(
        None,
        "journal_size_limit",
        cfg.journal_size_limit as i64,
        |r| r.get(0),
    )?;
    Ok(())
}

/// Create the tables, recreating them if an incompatible schema is found.
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
    if version != 0 && version != SCHEMA_VERSION {
        queue_log!(
            Level::Warn,
            "db",
            "Schema version {} != {}, dropping queued data",
            version,
            SCHEMA_VERSION
        );
        conn.execute_batch(DROP_SCHEMA)?;
    }
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
