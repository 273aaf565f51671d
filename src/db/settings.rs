// src/db/settings.rs
//! Key/value settings sharing the queue's database (cached config, client
//! state). Plain upsert/read/delete, no ordering or lease semantics.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::record::StorageSetting;

#[derive(Debug, Clone)]
pub struct SettingsStore {
    db: Arc<Database>,
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::invalid("setting name must not be empty"));
    }
    Ok(())
}

impl SettingsStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or overwrite `name`.
    pub fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        check_name(name)?;
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO storage_settings (name, value) VALUES (?1, ?2) \
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![name, value],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        check_name(name)?;
        self.db.read(|tx| {
            Ok(tx
                .query_row(
                    "SELECT value FROM storage_settings WHERE name = ?1",
                    params![name],
                    |r| r.get(0),
                )
                .optional()?)
        })
    }

    /// Returns whether a setting was removed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        check_name(name)?;
        self.db.transaction(|tx| {
            Ok(tx.execute("DELETE FROM storage_settings WHERE name = ?1", params![name])? > 0)
        })
    }

    pub fn delete_all(&self) -> Result<u64, StoreError> {
        self.db
            .transaction(|tx| Ok(tx.execute("DELETE FROM storage_settings", [])? as u64))
    }

    /// Every setting, ordered by name.
    pub fn all(&self) -> Result<Vec<StorageSetting>, StoreError> {
        self.db.read(|tx| {
            let mut stmt = tx.prepare_cached("SELECT name, value FROM storage_settings ORDER BY name")?;
            let rows = stmt.query_map([], |r| {
                Ok(StorageSetting { name: r.get(0)?, value: r.get(1)? })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
