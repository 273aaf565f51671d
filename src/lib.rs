// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

pub mod macros;
pub mod config;
pub mod db;
pub mod record;

pub use db::{Database, RecordStore, Released, SettingsStore, StoreError};
pub use record::{ByTenant, EventLatency, EventPersistence, StorageRecord, StorageSetting};
