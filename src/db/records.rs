// src/db/records.rs
//! Record Store: ingestion, size accounting, eviction and teardown drains.
//!
//! Every public operation is one transaction on the shared [`Database`],
//! except the id-list operations, which commit per chunk (see
//! [`crate::db::chunks`]). The lease protocol lives in `lease.rs` as a
//! second `impl RecordStore` block.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::batch_inserts::BatchInsert;
use crate::db::chunks::{bind_ids, per_chunk, placeholders, validate_ids};
use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::maintenance::trim_fraction;
use crate::queue_log;
use crate::record::{EventLatency, EventPersistence, StorageRecord, RECORD_OVERHEAD_BYTES};
use log::Level;

pub(crate) const RECORD_COLUMNS: &str =
    "id, tenant_token, latency, persistence, timestamp, retry_count, reserved_until, blob";

pub(crate) fn map_record(row: &Row<'_>) -> rusqlite::Result<StorageRecord> {
    Ok(StorageRecord {
        id: row.get(0)?,
        tenant_token: row.get(1)?,
        latency: row.get(2)?,
        persistence: row.get(3)?,
        timestamp: row.get(4)?,
        retry_count: row.get(5)?,
        reserved_until: row.get(6)?,
        blob: row.get(7)?,
    })
}

/// SQLite treats a negative LIMIT as "no limit"; clamp instead of wrapping.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub(crate) fn query_records(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<StorageRecord>, StoreError> {
    let mut stmt = tx.prepare_cached(sql)?;
    let rows = stmt.query_map(params, map_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Durable, priority-ordered queue of [`StorageRecord`]s.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pub(crate) db: Arc<Database>,
}

impl RecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Upsert `records` by id in one transaction; returns rows written.
    ///
    /// The whole call is rejected, with nothing written, if any record has an
    /// empty id or is marked `DoNotStoreOnDisk`.
    pub fn insert(&self, records: &[StorageRecord]) -> Result<u64, StoreError> {
        if let Some(bad) = records.iter().find(|r| r.id.is_empty()) {
            return Err(StoreError::invalid(format!(
                "insert: record for tenant '{}' has an empty id",
                bad.tenant_token
            )));
        }
        if let Some(bad) = records
            .iter()
            .find(|r| r.persistence == EventPersistence::DoNotStoreOnDisk)
        {
            return Err(StoreError::invalid(format!(
                "insert: record '{}' must not be stored on disk",
                bad.id
            )));
        }
        if records.is_empty() {
            return Ok(0);
        }

        self.db.transaction(|tx| {
            let mut stmt = tx.prepare_cached(StorageRecord::insert_sql())?;
            for rec in records {
                StorageRecord::bind_and_execute(&mut stmt, rec)?;
            }
            Ok(())
        })?;

        let written = records.len() as u64;
        metrics::counter!("records_inserted_total").increment(written);
        log::trace!("inserted {} record(s)", written);
        Ok(written)
    }

    /// Exact count for one tier; `Unspecified` counts every tier.
    pub fn record_count(&self, latency: EventLatency) -> Result<u64, StoreError> {
        if latency == EventLatency::Unspecified {
            return self.total_record_count();
        }
        self.db.read(|tx| {
            Ok(tx.query_row(
                "SELECT COUNT(*) FROM storage_records WHERE latency = ?1",
                params![latency],
                |r| r.get::<_, i64>(0),
            )? as u64)
        })
    }

    pub fn total_record_count(&self) -> Result<u64, StoreError> {
        self.db.read(|tx| count_all(tx))
    }

    /// `sum(len(id) + len(tenant_token) + len(blob)) + 32 * count`, in bytes.
    pub fn total_size(&self) -> Result<u64, StoreError> {
        self.db.read(|tx| accounted_size(tx))
    }

    /// Evict `ceil(fraction * total)` records, least critical and oldest
    /// first, reserved or not. Returns the number deleted.
    pub fn trim(&self, fraction: f64) -> Result<u64, StoreError> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(StoreError::invalid(format!(
                "trim: fraction {fraction} outside [0, 1]"
            )));
        }
        let dropped = self.db.transaction(|tx| trim_in(tx, fraction))?;
        if dropped > 0 {
            queue_log!(Level::Info, "records", "Trim({}) dropped {} record(s)", fraction, dropped);
        }
        Ok(dropped)
    }

    /// Bring `total_size` under `byte_limit` by evicting at least
    /// `min_fraction` of the records. A limit of 0 disables trimming.
    pub fn trim_to_limit(&self, byte_limit: u64, min_fraction: f64) -> Result<u64, StoreError> {
        if byte_limit == 0 {
            return Ok(0);
        }
        if !min_fraction.is_finite() || !(0.0..=1.0).contains(&min_fraction) {
            return Err(StoreError::invalid(format!(
                "trim_to_limit: min_fraction {min_fraction} outside [0, 1]"
            )));
        }

        let (before, dropped) = self.db.transaction(|tx| {
            let current = accounted_size(tx)?;
            if current <= byte_limit {
                return Ok((current, 0));
            }
            let fraction = trim_fraction(current, byte_limit, min_fraction);
            Ok((current, trim_in(tx, fraction)?))
        })?;

        if dropped > 0 {
            queue_log!(
                Level::Info,
                "records",
                "Size {} over limit {}: dropped {} record(s)",
                before,
                byte_limit,
                dropped
            );
        }
        Ok(dropped)
    }

    /// Delete by id in bounded chunks, one transaction per chunk.
    pub fn delete_by_id(&self, ids: &[String]) -> Result<u64, StoreError> {
        validate_ids(ids, "delete_by_id")?;
        let deleted = per_chunk(&self.db, ids, |tx, chunk| {
            let sql = format!(
                "DELETE FROM storage_records WHERE id IN ({})",
                placeholders(1, chunk.len())
            );
            Ok(tx.execute(&sql, bind_ids(&[], chunk).as_slice())? as u64)
        })?;
        log::debug!("deleted {} of {} requested record(s)", deleted, ids.len());
        Ok(deleted)
    }

    /// Drop every record belonging to `tenant_token`.
    pub fn delete_by_tenant(&self, tenant_token: &str) -> Result<u64, StoreError> {
        if tenant_token.is_empty() {
            return Err(StoreError::invalid("delete_by_tenant: empty tenant token"));
        }
        let deleted = self.db.transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM storage_records WHERE tenant_token = ?1",
                params![tenant_token],
            )? as u64)
        })?;
        queue_log!(Level::Info, "records", "Dropped {} record(s) for tenant {}", deleted, tenant_token);
        Ok(deleted)
    }

    pub fn delete_all(&self) -> Result<u64, StoreError> {
        self.db
            .transaction(|tx| Ok(tx.execute("DELETE FROM storage_records", [])? as u64))
    }

    /// Teardown retrieval.
    ///
    /// With `shutdown`, returns up to `limit` records at or above
    /// `min_latency` in reservation order, ignoring leases. Otherwise returns
    /// the unreserved records of the *least* urgent qualifying tier, so the
    /// most urgent tiers stay queued longest during an orderly drain.
    pub fn get_records(
        &self,
        shutdown: bool,
        min_latency: EventLatency,
        limit: usize,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = sql_limit(limit);

        self.db.read(|tx| {
            if shutdown {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM storage_records \
                     WHERE latency >= ?1 \
                     ORDER BY latency DESC, persistence DESC, timestamp ASC LIMIT ?2"
                );
                return query_records(tx, &sql, params![min_latency, limit]);
            }

            let tier: Option<EventLatency> = tx
                .query_row(
                    "SELECT MIN(latency) FROM storage_records \
                     WHERE latency >= ?1 AND reserved_until = 0",
                    params![min_latency],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let Some(tier) = tier else {
                return Ok(Vec::new());
            };

            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM storage_records \
                 WHERE latency = ?1 AND reserved_until = 0 \
                 ORDER BY persistence DESC, timestamp ASC LIMIT ?2"
            );
            query_records(tx, &sql, params![tier, limit])
        })
    }
}

fn count_all(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    let n: i64 = tx.query_row("SELECT COUNT(*) FROM storage_records", [], |r| r.get(0))?;
    Ok(n as u64)
}

fn accounted_size(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    let (payload, rows): (i64, i64) = tx.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(id AS BLOB)) \
                           + LENGTH(CAST(tenant_token AS BLOB)) \
                           + LENGTH(blob)), 0), \
                COUNT(*) \
         FROM storage_records",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(payload as u64 + RECORD_OVERHEAD_BYTES * rows as u64)
}

fn trim_in(tx: &Transaction<'_>, fraction: f64) -> Result<u64, StoreError> {
    let total = count_all(tx)?;
    let to_drop = (fraction * total as f64).ceil() as u64;
    if to_drop == 0 {
        return Ok(0);
    }
    let deleted = tx.execute(
        "DELETE FROM storage_records WHERE id IN \
           (SELECT id FROM storage_records ORDER BY persistence ASC, timestamp ASC LIMIT ?1)",
        params![sql_limit(to_drop as usize)],
    )? as u64;
    metrics::counter!("records_trimmed_total").increment(deleted);
    Ok(deleted)
}
