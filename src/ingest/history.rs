//! Per-player match history ingestion: upserts matches and the player's
//! performance rows from the history endpoint.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::db::{ops, Db, PerformanceRow};
use crate::ingest::client::{DeadlockClient, HistoryEntry};
use crate::ingest::epoch_to_utc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub created: u64,
    pub updated: u64,
}

#[derive(Debug, Default)]
pub struct HistoryRunSummary {
    pub per_account: BTreeMap<i64, IngestCounts>,
    pub failed_accounts: usize,
}

impl HistoryRunSummary {
    pub fn totals(&self) -> IngestCounts {
        self.per_account.values().fold(
            IngestCounts::default(),
            |acc, counts| IngestCounts {
                created: acc.created + counts.created,
                updated: acc.updated + counts.updated,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub only_stored_history: bool,
    pub max_matches_per_player: Option<usize>,
    pub since_days: Option<i64>,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            only_stored_history: true,
            max_matches_per_player: None,
            since_days: None,
        }
    }
}

/// Drop entries older than the cutoff, then cap the remainder. The cutoff is
/// computed once per run so every account sees the same window.
pub fn apply_window(
    mut entries: Vec<HistoryEntry>,
    cutoff: Option<DateTime<Utc>>,
    cap: Option<usize>,
) -> Vec<HistoryEntry> {
    if let Some(cutoff) = cutoff {
        entries.retain(|e| epoch_to_utc(e.start_time) >= cutoff);
    }
    if let Some(cap) = cap {
        entries.truncate(cap);
    }
    entries
}

pub fn performance_from_entry(account_id: i64, entry: &HistoryEntry) -> PerformanceRow {
    PerformanceRow {
        account_id,
        match_id: entry.match_id,
        kills: entry.player_kills,
        deaths: entry.player_deaths,
        assists: entry.player_assists,
        networth: entry.net_worth,
        team: entry.player_team,
        is_win: entry.player_team == entry.match_result,
    }
}

/// Ingest match history for the given accounts. A fetch failure for one
/// account skips it and continues with the rest.
#[instrument(skip(client, db, account_ids), fields(accounts = account_ids.len()))]
pub async fn ingest_player_match_history(
    client: &DeadlockClient,
    db: &Db,
    account_ids: &[i64],
    options: &HistoryOptions,
) -> Result<HistoryRunSummary> {
    let cutoff = options
        .since_days
        .map(|days| Utc::now() - ChronoDuration::days(days));
    let mut summary = HistoryRunSummary::default();

    for &account_id in account_ids {
        let entries = match client
            .player_match_history(account_id, options.only_stored_history)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(account_id, error = %err, "skipping account, history fetch failed");
                summary.failed_accounts += 1;
                continue;
            }
        };
        let entries = apply_window(entries, cutoff, options.max_matches_per_player);

        let mut counts = IngestCounts::default();
        let mut tx = db.pool.begin().await?;
        ops::refresh_account_username(&mut *tx, account_id).await?;
        for entry in &entries {
            let created = ops::upsert_match(
                &mut *tx,
                entry.match_id,
                epoch_to_utc(entry.start_time),
                entry.match_duration_s,
            )
            .await?;
            if created {
                counts.created += 1;
            } else {
                counts.updated += 1;
            }
            ops::upsert_performance(&mut *tx, &performance_from_entry(account_id, entry)).await?;
        }
        tx.commit().await?;

        info!(
            account_id,
            created = counts.created,
            updated = counts.updated,
            "history ingested"
        );
        summary.per_account.insert(account_id, counts);
    }

    let totals = summary.totals();
    info!(
        accounts = summary.per_account.len(),
        failed = summary.failed_accounts,
        created = totals.created,
        updated = totals.updated,
        "match history run done"
    );
    Ok(summary)
}
