// src/db/lease.rs
//! Lease protocol: get-and-reserve, release, retry bookkeeping.
//!
//! A record is leased while `reserved_until > 0`. `get_and_reserve`
//! reclaims expired leases, selects and reserves candidates in a single
//! `BEGIN IMMEDIATE` transaction, so two senders (threads or processes)
//! can never hold an unexpired lease on the same record. A sender that dies
//! mid-batch leaves its lease in place until `lease_until` passes, after
//! which the next caller picks the records up again: delivery is
//! at-least-once.

use std::collections::BTreeMap;

use rusqlite::{params, ToSql, Transaction};

use crate::config::QueueConfig;
use crate::db::chunks::{bind_ids, per_chunk, placeholders, validate_ids, MAX_IDS_PER_CHUNK};
use crate::db::error::StoreError;
use crate::db::records::{query_records, sql_limit, RecordStore, RECORD_COLUMNS};
use crate::queue_log;
use crate::record::{ByTenant, EventLatency, StorageRecord};
use log::Level;

/// Outcome of [`RecordStore::release_records`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Released {
    /// Records deleted because their retry budget was exhausted.
    pub retired: u64,
    /// `retired` broken down per tenant, ordered by tenant token.
    pub by_tenant: Vec<ByTenant>,
}

impl RecordStore {
    /// Pop up to `limit` records at or above `min_latency` and lease them
    /// until `lease_until`.
    ///
    /// Order: latency desc, persistence desc, timestamp asc. Leases that
    /// expired before `now` are released first.
    ///
    /// The returned records are the rows *as selected*, before the lease was
    /// written: their `reserved_until` still holds the pre-lease value (0).
    /// The lease itself is committed.
    pub fn get_and_reserve(
        &self,
        min_latency: EventLatency,
        limit: usize,
        now: i64,
        lease_until: i64,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        if lease_until <= 0 {
            return Err(StoreError::invalid(format!(
                "get_and_reserve: lease_until must be positive, got {lease_until}"
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let selected = self.db.transaction(|tx| {
            let reclaimed = tx.execute(
                "UPDATE storage_records SET reserved_until = 0 \
                 WHERE reserved_until > 0 AND reserved_until < ?1",
                params![now],
            )?;
            if reclaimed > 0 {
                queue_log!(Level::Debug, "lease", "Reclaimed {} expired lease(s)", reclaimed);
            }

            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM storage_records \
                 WHERE latency >= ?1 AND reserved_until = 0 \
                 ORDER BY latency DESC, persistence DESC, timestamp ASC LIMIT ?2"
            );
            let selected = query_records(tx, &sql, params![min_latency, sql_limit(limit)])?;
            if selected.is_empty() {
                return Ok(selected);
            }

            debug_assert!(selected.iter().all(|r| !r.is_reserved()));
            let ids: Vec<String> = selected.iter().map(|r| r.id.clone()).collect();
            for chunk in ids.chunks(MAX_IDS_PER_CHUNK) {
                reserve_chunk(tx, chunk, lease_until)?;
            }
            Ok(selected)
        })?;

        if !selected.is_empty() {
            metrics::counter!("records_reserved_total").increment(selected.len() as u64);
            queue_log!(
                Level::Debug,
                "lease",
                "Reserved {} record(s) until {}",
                selected.len(),
                lease_until
            );
        }
        Ok(selected)
    }

    /// Release the lease on `batch[consumed..]`, leaving retry counts alone.
    ///
    /// `batch` is a result of `get_and_reserve` of which only the first
    /// `consumed` records were processed.
    pub fn release_unconsumed(
        &self,
        batch: &[StorageRecord],
        consumed: usize,
    ) -> Result<u64, StoreError> {
        if consumed > batch.len() {
            return Err(StoreError::invalid(format!(
                "release_unconsumed: consumed {} > batch of {}",
                consumed,
                batch.len()
            )));
        }
        let ids: Vec<String> = batch[consumed..].iter().map(|r| r.id.clone()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.set_reserved(&ids, 0)
    }

    /// Write `reserved_until = until` for `ids`, one transaction per chunk.
    /// `until == 0` releases.
    pub fn set_reserved(&self, ids: &[String], until: i64) -> Result<u64, StoreError> {
        validate_ids(ids, "set_reserved")?;
        if until < 0 {
            return Err(StoreError::invalid(format!("set_reserved: negative until {until}")));
        }
        per_chunk(&self.db, ids, |tx, chunk| reserve_chunk(tx, chunk, until))
    }

    /// Return a delivered-or-abandoned batch to the queue.
    ///
    /// Without `increment_retry` the leases are simply dropped. With it, each
    /// chunk first deletes the ids whose `retry_count >= max_retries`
    /// (tallied per tenant), then releases the rest and bumps their
    /// `retry_count`. Chunks commit independently.
    pub fn release_records(
        &self,
        ids: &[String],
        increment_retry: bool,
        max_retries: u32,
    ) -> Result<Released, StoreError> {
        validate_ids(ids, "release_records")?;
        if !increment_retry {
            self.set_reserved(ids, 0)?;
            return Ok(Released::default());
        }

        let mut tally: BTreeMap<String, u64> = BTreeMap::new();
        let retired = per_chunk(&self.db, ids, |tx, chunk| {
            retire_chunk(tx, chunk, max_retries, &mut tally)
        })?;

        if retired > 0 {
            metrics::counter!("records_retired_total").increment(retired);
            queue_log!(
                Level::Info,
                "lease",
                "Retired {} record(s) past {} retries across {} tenant(s)",
                retired,
                max_retries,
                tally.len()
            );
        }

        Ok(Released {
            retired,
            by_tenant: tally
                .into_iter()
                .map(|(tenant_token, count)| ByTenant { tenant_token, count })
                .collect(),
        })
    }

    /// Return a batch whose upload failed, retiring records that already
    /// used up `cfg.max_retries` attempts.
    pub fn release_failed(&self, ids: &[String], cfg: &QueueConfig) -> Result<Released, StoreError> {
        self.release_records(ids, true, cfg.max_retries)
    }
}

fn reserve_chunk(tx: &Transaction<'_>, chunk: &[String], until: i64) -> Result<u64, StoreError> {
    let sql = format!(
        "UPDATE storage_records SET reserved_until = ?1 WHERE id IN ({})",
        placeholders(2, chunk.len())
    );
    Ok(tx.execute(&sql, bind_ids(&[&until as &dyn ToSql], chunk).as_slice())? as u64)
}

fn retire_chunk(
    tx: &Transaction<'_>,
    chunk: &[String],
    max_retries: u32,
    tally: &mut BTreeMap<String, u64>,
) -> Result<u64, StoreError> {
    let in_list = placeholders(2, chunk.len());

    let expired: Vec<(String, String)> = {
        let sql = format!(
            "SELECT id, tenant_token FROM storage_records \
             WHERE retry_count >= ?1 AND id IN ({in_list})"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(bind_ids(&[&max_retries as &dyn ToSql], chunk).as_slice(), |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut retired = 0;
    for (id, tenant) in &expired {
        retired += tx.execute("DELETE FROM storage_records WHERE id = ?1", params![id])? as u64;
        *tally.entry(tenant.clone()).or_insert(0) += 1;
    }

    let sql = format!(
        "UPDATE storage_records SET reserved_until = 0, retry_count = retry_count + 1 \
         WHERE id IN ({})",
        placeholders(1, chunk.len())
    );
    tx.execute(&sql, bind_ids(&[], chunk).as_slice())?;
    Ok(retired)
}
