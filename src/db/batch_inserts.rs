// src/db/batch_inserts.rs

use rusqlite::{params, Result as SqlResult, Statement};
use crate::record::StorageRecord;

/// Defines how to write one row of type `T` with a prepared statement.
pub trait BatchInsert<T> {
    fn insert_sql() -> &'static str;
    fn bind_and_execute(stmt: &mut Statement<'_>, record: &T) -> SqlResult<()>;
}

/// STORAGE RECORDS
///
/// Insert-or-overwrite keyed by `id`: a second insert with the same id
/// replaces every column, including `retry_count` and `reserved_until`.
impl BatchInsert<StorageRecord> for StorageRecord {
    fn insert_sql() -> &'static str {
        "INSERT INTO storage_records \
           (id, tenant_token, latency, persistence, timestamp, retry_count, reserved_until, blob) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8) \
         ON CONFLICT(id) DO UPDATE SET \
           tenant_token   = excluded.tenant_token, \
           latency        = excluded.latency, \
           persistence    = excluded.persistence, \
           timestamp      = excluded.timestamp, \
           retry_count    = excluded.retry_count, \
           reserved_until = excluded.reserved_until, \
           blob           = excluded.blob"
    }

    fn bind_and_execute(stmt: &mut Statement<'_>, rec: &StorageRecord) -> SqlResult<()> {
        stmt.execute(params![
            rec.id,
            rec.tenant_token,
            rec.latency,
            rec.persistence,
            rec.timestamp,
            rec.retry_count,
            rec.reserved_until,
            rec.blob,
        ])?;
        Ok(())
    }
}
