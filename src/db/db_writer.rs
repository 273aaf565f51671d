// src/db/db_writer.rs

use std::{thread::sleep, time::{Duration, Instant}};

use crate::db::error::StoreError;
use crate::db::records::RecordStore;
use crate::record::{EventPersistence, StorageRecord};

const MAX_BUSY_RETRIES: u64 = 5;

/// A batched producer front-end for the record store.
/// Performs all DB work synchronously to avoid holding the connection across .await.
pub struct DbWriter {
    pub store: RecordStore,
    pub rx: tokio::sync::mpsc::Receiver<StorageRecord>,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
}

impl DbWriter {
    /// Start the writer loop; call inside tokio::spawn.
    /// Returns once the channel is closed and the last batch is flushed.
    pub async fn run(mut self) {
        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut interval = tokio::time::interval(Duration::from_millis(self.flush_interval_ms));

        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(rec) => {
                        if rec.persistence == EventPersistence::DoNotStoreOnDisk {
                            log::debug!("skipping memory-only record {}", rec.id);
                            metrics::counter!("records_skipped_memory_only_total").increment(1);
                            continue;
                        }
                        buffer.push(rec);
                        if buffer.len() >= self.batch_size {
                            self.flush_logged(&mut buffer);
                        }
                    }
                    None => {
                        self.flush_logged(&mut buffer);
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush_logged(&mut buffer);
                }
            }
        }
    }

    fn flush_logged(&self, buffer: &mut Vec<StorageRecord>) {
        if let Err(e) = self.flush_sync(buffer) {
            log::error!("dropping batch after failed flush: {}", e);
            buffer.clear();
        }
    }

    /// Synchronous flush with retry + backoff on `SQLITE_BUSY`.
    fn flush_sync(&self, buffer: &mut Vec<StorageRecord>) -> Result<(), StoreError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            match self.store.insert(buffer) {
                Ok(written) => {
                    buffer.clear();
                    metrics::counter!("writer_flushes_total").increment(1);
                    metrics::histogram!("writer_flush_seconds").record(start.elapsed().as_secs_f64());
                    log::trace!("flushed {} record(s) in {:?}", written, start.elapsed());
                    return Ok(());
                }
                Err(e) if e.is_busy() && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    sleep(Duration::from_millis(50 * attempts));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
