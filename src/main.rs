// src/main.rs

//! Queue maintenance daemon.
//!
//! 1. Load configuration & set up structured logging
//! 2. Open the queue database (WAL) and report what is queued
//! 3. Run capacity trimming and WAL checkpoints on a tokio runtime
//! 4. Wait for Ctrl-C, then report again and exit
//!
// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, Result};
use chrono::Local;
use fern::Dispatch;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    process,
    thread,
};
use tokio::runtime::Runtime;

// ───── local imports ────────────────────────────────────────────────────────
use offline_queue::config::{self, Config};
use offline_queue::db::{
    connection::db_path,
    maintenance::{spawn_capacity_monitor, spawn_wal_maintenance},
    Database, RecordStore,
};
use offline_queue::record::EventLatency;

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Configure global logging as requested in `cfg.logging`.
fn setup_logging(base_dir: &Path, cfg: &Config) -> Result<(), fern::InitError> {
    let log_path = cfg
        .logging
        .enable
        .then(|| base_dir.join(cfg.logging.file.as_deref().unwrap_or("offline-queue.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(cfg.logging.level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// What is queued right now, logged as JSON.
#[derive(Debug, Serialize)]
struct QueueStats {
    total_records: u64,
    realtime_records: u64,
    normal_records: u64,
    accounted_bytes: u64,
    file_bytes: u64,
}

fn queue_stats(store: &RecordStore) -> Result<QueueStats> {
    Ok(QueueStats {
        total_records: store.total_record_count()?,
        realtime_records: store.record_count(EventLatency::RealTime)?,
        normal_records: store.record_count(EventLatency::Normal)?,
        accounted_bytes: store.total_size()?,
        file_bytes: store.database().file_size()?,
    })
}

fn log_stats(when: &str, store: &RecordStore) {
    match queue_stats(store).and_then(|s| Ok(serde_json::to_string(&s)?)) {
        Ok(json) => log::info!("{} queue stats: {}", when, json),
        Err(e) => log::warn!("{} queue stats unavailable: {:#}", when, e),
    }
}

// ───── daemon logic ─────────────────────────────────────────────────────────

fn run() -> Result<()> {
    // 1 ─ Context
    let base_dir = exe_dir()?;
    let cfg_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join("default.toml"));
    let cfg = config::load(&cfg_path)
        .with_context(|| format!("loading {}", cfg_path.display()))?;

    // 2 ─ Logging
    setup_logging(&base_dir, &cfg).context("logging setup failed")?;
    log::info!("Queue daemon bootstrap initiated");

    // 3 ─ Database
    let path = db_path(&base_dir, &cfg.database);
    let db = Database::open(&path, &cfg.database)
        .with_context(|| format!("opening {}", path.display()))?;
    let store = RecordStore::new(db.clone());
    log_stats("startup", &store);

    // 4 ─ Tokio runtime & maintenance tasks
    let rt = Runtime::new().context("tokio runtime creation failed")?;
    let capacity = spawn_capacity_monitor(&rt, store.clone(), &cfg.queue);
    let wal = spawn_wal_maintenance(&rt, db.clone(), &cfg.database);
    log::info!(
        "Running (capacity monitor: {}, WAL checkpoints: {})",
        capacity.is_some(),
        wal.is_some()
    );

    // 5 ─ Wait for shutdown
    rt.block_on(tokio::signal::ctrl_c()).context("waiting for Ctrl-C")?;
    log::warn!("Shutdown initiated");
    for task in [capacity, wal].into_iter().flatten() {
        task.abort();
    }

    if let Err(e) = db.checkpoint() {
        log::warn!("final WAL checkpoint failed: {}", e);
    }
    log_stats("shutdown", &store);
    log::info!("Queue daemon stopped cleanly");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!(
            "[{}][ERROR][main] {:#}",
            Local::now().to_rfc3339(),
            e
        );
        process::exit(1);
    }
}
