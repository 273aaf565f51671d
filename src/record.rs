//! Queue data model.
//!
//! Defines the unit of work held by the offline queue (`StorageRecord`), the
//! urgency and persistence tiers it is ordered by, and the small value types
//! returned to callers (`ByTenant`, `StorageSetting`).
//!
//! Tiers are stored as plain integers; the `ToSql`/`FromSql` impls keep the
//! numeric encoding in one place so the SQL ordering (`latency DESC`,
//! `persistence ASC`) matches the enum ordering.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Fixed per-row overhead used by size accounting.
pub const RECORD_OVERHEAD_BYTES: u64 = 32;

/// Transmission urgency tier. Larger values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventLatency {
    /// Sentinel: "any tier" in queries, never a stored value in practice.
    Unspecified,
    Off,
    Normal,
    CostDeferred,
    RealTime,
    Max,
}

impl EventLatency {
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Unspecified => -1,
            Self::Off => 0,
            Self::Normal => 1,
            Self::CostDeferred => 2,
            Self::RealTime => 3,
            Self::Max => 4,
        }
    }

    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Unspecified),
            0 => Some(Self::Off),
            1 => Some(Self::Normal),
            2 => Some(Self::CostDeferred),
            3 => Some(Self::RealTime),
            4 => Some(Self::Max),
            _ => None,
        }
    }
}

/// Storage priority, used only for eviction and as an ordering tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPersistence {
    Normal,
    Critical,
    /// Must never reach durable storage; rejected by `RecordStore::insert`.
    DoNotStoreOnDisk,
}

impl EventPersistence {
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Normal => 1,
            Self::Critical => 2,
            Self::DoNotStoreOnDisk => 3,
        }
    }

    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::Critical),
            3 => Some(Self::DoNotStoreOnDisk),
            _ => None,
        }
    }
}

impl ToSql for EventLatency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for EventLatency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        Self::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

impl ToSql for EventPersistence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for EventPersistence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        Self::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

/// One queued telemetry event.
///
/// `retry_count` and `reserved_until` are owned by the store: the retirement
/// path bumps the former, the lease protocol writes the latter. A
/// `reserved_until` of `0` means the record is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub id: String,
    pub tenant_token: String,
    pub latency: EventLatency,
    pub persistence: EventPersistence,
    pub timestamp: i64,
    pub retry_count: u32,
    pub reserved_until: i64,
    pub blob: Vec<u8>,
}

impl StorageRecord {
    /// A fresh, unreserved record with no retries.
    pub fn new(
        id: impl Into<String>,
        tenant_token: impl Into<String>,
        latency: EventLatency,
        persistence: EventPersistence,
        timestamp: i64,
        blob: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_token: tenant_token.into(),
            latency,
            persistence,
            timestamp,
            retry_count: 0,
            reserved_until: 0,
            blob: blob.into(),
        }
    }

    /// Bytes this record contributes to `RecordStore::total_size`.
    pub fn accounted_size(&self) -> u64 {
        (self.id.len() + self.tenant_token.len() + self.blob.len()) as u64 + RECORD_OVERHEAD_BYTES
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_until != 0
    }
}

/// Number of records retired for one tenant during a single release call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByTenant {
    pub tenant_token: String,
    pub count: u64,
}

/// A `(name, value)` pair from the settings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSetting {
    pub name: String,
    pub value: String,
}
