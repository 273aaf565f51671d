// src/db/maintenance.rs
//! Periodic capacity trimming & WAL checkpoints.

use std::{sync::Arc, time::Duration};

use log::Level;
use tokio::{runtime::Runtime, task::JoinHandle};

use crate::config::{DatabaseConfig, QueueConfig};
use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::records::RecordStore;
use crate::queue_log;

/// Share of records to evict when `current` bytes exceed `limit`.
///
/// Drops enough to get back under the limit, assuming records are of
/// similar size, but never less than `min_fraction`.
pub fn trim_fraction(current: u64, limit: u64, min_fraction: f64) -> f64 {
    if current == 0 || current <= limit {
        return 0.0;
    }
    let needed = 1.0 - (limit as f64 / current as f64);
    needed.max(min_fraction).min(1.0)
}

/// One capacity pass: trim if over the byte limit, then report the new size.
pub fn check_capacity(store: &RecordStore, cfg: &QueueConfig) -> Result<u64, StoreError> {
    let dropped = store.trim_to_limit(cfg.byte_limit, cfg.min_trim_fraction)?;
    let size = store.total_size()?;
    metrics::gauge!("queue_bytes").set(size as f64);
    if dropped > 0 {
        // freed pages only shrink the file after a vacuum
        if let Err(e) = store.database().vacuum() {
            queue_log!(Level::Warn, "maintenance", "VACUUM after trim failed: {}", e);
        }
        queue_log!(
            Level::Info,
            "maintenance",
            "Capacity trim dropped {} record(s), {} bytes queued",
            dropped,
            size
        );
    }
    Ok(dropped)
}

pub fn spawn_capacity_monitor(rt: &Runtime, store: RecordStore, cfg: &QueueConfig) -> Option<JoinHandle<()>> {
    if cfg.byte_limit == 0 { return None; }          // disabled
    let cfg = cfg.clone();
    Some(rt.spawn(async move {
        let mut ticker = tokio::time::interval(cfg.capacity_check_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = check_capacity(&store, &cfg) {
                queue_log!(Level::Error, "maintenance", "Capacity check failed: {}", e);
            }
        }
    }))
}

pub fn spawn_wal_maintenance(rt: &Runtime, db: Arc<Database>, cfg: &DatabaseConfig) -> Option<JoinHandle<()>> {
    if cfg.checkpoint_seconds == 0 { return None; }  // disabled
    let period = Duration::from_secs(cfg.checkpoint_seconds);
    Some(rt.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = db.checkpoint() {
                log::warn!("WAL checkpoint failed: {}", e);
            }
        }
    }))
}
