// src/db/mod.rs
//! Public façade for the queue store (re-exports plus spawn_writer).

pub mod batch_inserts;
pub mod chunks;
pub mod connection;
pub mod db_writer;
pub mod error;
pub mod lease;
pub mod maintenance;
pub mod records;
pub mod settings;

use tokio::{runtime::Runtime, sync::mpsc as async_mpsc, task::JoinHandle};
use crate::config::QueueConfig;
use crate::record::StorageRecord;
pub use connection::Database;
pub use db_writer::DbWriter;
pub use error::StoreError;
pub use lease::Released;
pub use records::RecordStore;
pub use settings::SettingsStore;


/// Spawn a dedicated writer task fed by a bounded channel of
/// `cfg.channel_capacity` records. Dropping every returned sender flushes
/// the last batch and ends the task.
pub fn spawn_writer(
    rt: &Runtime,
    store: RecordStore,
    cfg: &QueueConfig,
) -> (async_mpsc::Sender<StorageRecord>, JoinHandle<()>) {
    let (tx, rx) = async_mpsc::channel(cfg.channel_capacity);

    // Copy what we need so nothing borrowed lives in the async task
    let flush_ms  = cfg.flush_interval_ms;
    let batch_sz  = cfg.batch_size;

    let handle = rt.spawn(async move {
        DbWriter {
            store,
            rx,
            flush_interval_ms: flush_ms,
            batch_size:        batch_sz,
        }
            .run()
            .await;
    });
    (tx, handle)
}
