// src/db/chunks.rs
//! Bounded-batch helpers for id-list statements.
//!
//! Statements of the form `... WHERE id IN (?, ?, ...)` bind one parameter
//! per id, so long id lists are split into chunks of at most
//! [`MAX_IDS_PER_CHUNK`].
//!
//! Transaction boundary: [`per_chunk`] commits every chunk in its own
//! transaction. A failure in chunk *n* leaves chunks `0..n` committed, so a
//! multi-chunk call is atomic per chunk, not as a whole. Code that needs the
//! whole list inside one transaction (reservation in `get_and_reserve`)
//! iterates `ids.chunks(..)` inside a single `Database::transaction` instead.

use rusqlite::{ToSql, Transaction};

use crate::db::connection::Database;
use crate::db::error::StoreError;

pub const MAX_IDS_PER_CHUNK: usize = 64;

/// `"?2, ?3, ?4"` for `count` parameters starting at index `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Leading scalar parameters followed by one parameter per id.
pub(crate) fn bind_ids<'a>(lead: &[&'a dyn ToSql], ids: &'a [String]) -> Vec<&'a dyn ToSql> {
    let mut params = Vec::with_capacity(lead.len() + ids.len());
    params.extend_from_slice(lead);
    params.extend(ids.iter().map(|id| id as &dyn ToSql));
    params
}

/// Run `f` once per chunk of `ids`, each chunk in its own transaction, and
/// sum the per-chunk counts.
pub(crate) fn per_chunk<F>(db: &Database, ids: &[String], mut f: F) -> Result<u64, StoreError>
where
    F: FnMut(&Transaction<'_>, &[String]) -> Result<u64, StoreError>,
{
    let mut total = 0;
    for chunk in ids.chunks(MAX_IDS_PER_CHUNK) {
        total += db.transaction(|tx| f(tx, chunk))?;
    }
    Ok(total)
}

/// Reject an empty id list or empty ids before anything is written.
pub(crate) fn validate_ids(ids: &[String], op: &str) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Err(StoreError::invalid(format!("{op}: empty id list")));
    }
    if ids.iter().any(|id| id.is_empty()) {
        return Err(StoreError::invalid(format!("{op}: empty id")));
    }
    Ok(())
}
