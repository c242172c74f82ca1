//! Ingestion jobs against the Deadlock API: esports account discovery,
//! per-player match history, and per-match timeline events.

pub mod client;
pub mod discovery;
pub mod events;
pub mod history;
pub mod reference;

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::hash::Hash;

/// Order-preserving dedup on a caller-chosen key; the first occurrence wins.
pub fn dedupe_by_key<T, K, F>(rows: Vec<T>, key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| seen.insert(key_fn(row)))
        .collect()
}

/// API timestamps are unix seconds; out-of-range values clamp to the epoch
/// rather than failing the row.
pub fn epoch_to_utc(epoch_s: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch_s, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}
