//! Write helpers for the ingestion jobs: account reconciliation, match and
//! performance upserts, and bulk event inserts.
//!
//! All upserts use `INSERT ... ON CONFLICT` so re-running a job against
//! overlapping input never duplicates rows; the uniqueness constraints in
//! the schema are the backstop behind the jobs' in-memory dedup.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashSet;
use tracing::{info, instrument};

use super::{Db, PerformanceRow, PlayerAbilityRow, PlayerItemRow};

/// Rows per bulk INSERT statement; keeps bind counts well under SQLite's
/// variable limit.
const INSERT_CHUNK: usize = 100;

/// Username used when an account is seen before we know who it is.
pub fn placeholder_username(account_id: i64) -> String {
    format!("account-{account_id}")
}

/// FK safety net: create missing account rows with placeholder usernames and
/// `is_notable = false`. Existing rows (curated usernames, notability) are
/// never touched. Returns how many rows were actually inserted.
pub async fn ensure_accounts_exist(
    conn: &mut SqliteConnection,
    account_ids: &HashSet<i64>,
) -> Result<u64> {
    if account_ids.is_empty() {
        return Ok(0);
    }
    let mut ids: Vec<i64> = account_ids.iter().copied().collect();
    ids.sort_unstable();

    let mut inserted = 0u64;
    for chunk in ids.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO accounts (account_id, username, is_notable) ");
        qb.push_values(chunk, |mut b, id| {
            b.push_bind(*id)
                .push_bind(placeholder_username(*id))
                .push_bind(false);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Discovery-side upsert: create the account as notable, or promote an
/// existing one. Notability is only ever raised. Returns true when a new
/// row was created.
pub async fn promote_or_create_notable(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<bool> {
    let existing: Option<bool> =
        sqlx::query_scalar("SELECT is_notable FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;
    match existing {
        None => {
            sqlx::query("INSERT INTO accounts (account_id, username, is_notable) VALUES ($1, $2, 1)")
                .bind(account_id)
                .bind(placeholder_username(account_id))
                .execute(&mut *conn)
                .await?;
            Ok(true)
        }
        Some(false) => {
            sqlx::query("UPDATE accounts SET is_notable = 1 WHERE account_id = $1")
                .bind(account_id)
                .execute(&mut *conn)
                .await?;
            Ok(false)
        }
        Some(true) => Ok(false),
    }
}

/// History-side update-or-create: refreshes the placeholder username,
/// leaving notability alone.
pub async fn refresh_account_username(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO accounts (account_id, username, is_notable) VALUES ($1, $2, 0) \
         ON CONFLICT(account_id) DO UPDATE SET username = excluded.username",
    )
    .bind(account_id)
    .bind(placeholder_username(account_id))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Upsert a match; date and duration are overwritten on re-ingest (benign
/// re-derivation from the same source fields). Returns true when the row
/// was created rather than updated.
pub async fn upsert_match(
    conn: &mut SqliteConnection,
    match_id: i64,
    date: DateTime<Utc>,
    duration_s: i64,
) -> Result<bool> {
    let existed: Option<i64> = sqlx::query_scalar("SELECT 1 FROM matches WHERE match_id = $1")
        .bind(match_id)
        .fetch_optional(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO matches (match_id, date, duration_s) VALUES ($1, $2, $3) \
         ON CONFLICT(match_id) DO UPDATE SET date = excluded.date, duration_s = excluded.duration_s",
    )
    .bind(match_id)
    .bind(date)
    .bind(duration_s)
    .execute(&mut *conn)
    .await?;
    Ok(existed.is_none())
}

/// Upsert a player's stats for one match, keyed on (account, match).
pub async fn upsert_performance(conn: &mut SqliteConnection, row: &PerformanceRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO player_performances \
            (account_id, match_id, kills, deaths, assists, networth, team, is_win) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT(account_id, match_id) DO UPDATE SET \
            kills = excluded.kills, \
            deaths = excluded.deaths, \
            assists = excluded.assists, \
            networth = excluded.networth, \
            team = excluded.team, \
            is_win = excluded.is_win",
    )
    .bind(row.account_id)
    .bind(row.match_id)
    .bind(row.kills)
    .bind(row.deaths)
    .bind(row.assists)
    .bind(row.networth)
    .bind(row.team)
    .bind(row.is_win)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete all event rows for a match (the `replace` path of the events job).
/// Returns (items_deleted, abilities_deleted).
pub async fn delete_match_events(
    conn: &mut SqliteConnection,
    match_id: i64,
) -> Result<(u64, u64)> {
    let items = sqlx::query("DELETE FROM player_items WHERE match_id = $1")
        .bind(match_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    let abilities = sqlx::query("DELETE FROM player_abilities WHERE match_id = $1")
        .bind(match_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok((items, abilities))
}

/// Bulk insert purchase events, ignoring natural-key collisions. Returns the
/// number of rows actually inserted, so an idempotent re-run reports zero.
pub async fn bulk_insert_player_items(
    conn: &mut SqliteConnection,
    rows: &[PlayerItemRow],
) -> Result<u64> {
    let mut inserted = 0u64;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO player_items \
                (account_id, match_id, item_id, game_time, sold_time, is_upgrade, imbued_ability_id) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.account_id)
                .push_bind(row.match_id)
                .push_bind(row.item_id)
                .push_bind(row.game_time)
                .push_bind(row.sold_time)
                .push_bind(row.is_upgrade)
                .push_bind(row.imbued_ability_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Bulk insert ability events; same conflict semantics as items.
pub async fn bulk_insert_player_abilities(
    conn: &mut SqliteConnection,
    rows: &[PlayerAbilityRow],
) -> Result<u64> {
    let mut inserted = 0u64;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO player_abilities (account_id, match_id, ability_id, game_time) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.account_id)
                .push_bind(row.match_id)
                .push_bind(row.ability_id)
                .push_bind(row.game_time);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Every stored account id, for `--all-accounts` runs.
pub async fn all_account_ids(db: &Db) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT account_id FROM accounts ORDER BY account_id")
            .fetch_all(&db.pool)
            .await?,
    )
}

/// Every stored match id, for `--all-matches` runs.
pub async fn all_match_ids(db: &Db) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT match_id FROM matches ORDER BY match_id")
            .fetch_all(&db.pool)
            .await?,
    )
}

const DYNAMIC_TABLES: &[&str] = &[
    "player_items",
    "player_abilities",
    "player_performances",
    "matches",
    "accounts",
];

const CORE_TABLES: &[&str] = &[
    "accounts",
    "matches",
    "player_performances",
    "player_items",
    "player_abilities",
    "heroes",
    "abilities",
    "shop_items",
    "ranks",
];

async fn count_tables(db: &Db, tables: &[&'static str]) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        // Table names come from the const lists above, never from input.
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await?;
        counts.push((*table, n));
    }
    Ok(counts)
}

/// Row counts for the core tables (`db-counts` subcommand).
pub async fn table_counts(db: &Db) -> Result<Vec<(&'static str, i64)>> {
    count_tables(db, CORE_TABLES).await
}

#[derive(Debug)]
pub struct ResetSummary {
    pub counts: Vec<(&'static str, i64)>,
    pub deleted: bool,
}

/// Report dynamic-table row counts and, when `yes` is set, clear them
/// children-first in one transaction. Static tables are never touched.
#[instrument(skip(db))]
pub async fn reset_dynamic_data(db: &Db, yes: bool) -> Result<ResetSummary> {
    let counts = count_tables(db, DYNAMIC_TABLES).await?;
    if !yes {
        return Ok(ResetSummary {
            counts,
            deleted: false,
        });
    }

    let mut tx = db.pool.begin().await?;
    for table in DYNAMIC_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    info!("dynamic tables cleared");
    Ok(ResetSummary {
        counts,
        deleted: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::epoch_to_utc;

    #[tokio::test]
    async fn ensure_accounts_is_idempotent_and_preserves_existing_rows() {
        let db = Db::connect_in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        sqlx::query("INSERT INTO accounts (account_id, username, is_notable) VALUES (7, 'curated', 1)")
            .execute(&mut *conn)
            .await
            .unwrap();

        let ids: HashSet<i64> = [7, 8, 9].into_iter().collect();
        assert_eq!(ensure_accounts_exist(&mut conn, &ids).await.unwrap(), 2);
        assert_eq!(ensure_accounts_exist(&mut conn, &ids).await.unwrap(), 0);

        let (username, notable): (String, bool) =
            sqlx::query_as("SELECT username, is_notable FROM accounts WHERE account_id = 7")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(username, "curated");
        assert!(notable);
    }

    #[tokio::test]
    async fn notability_is_never_demoted() {
        let db = Db::connect_in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        assert!(promote_or_create_notable(&mut conn, 42).await.unwrap());
        assert!(!promote_or_create_notable(&mut conn, 42).await.unwrap());
        refresh_account_username(&mut conn, 42).await.unwrap();

        let notable: bool =
            sqlx::query_scalar("SELECT is_notable FROM accounts WHERE account_id = 42")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert!(notable);
    }

    #[tokio::test]
    async fn upsert_match_classifies_created_vs_updated() {
        let db = Db::connect_in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let date = epoch_to_utc(1_700_000_000);
        assert!(upsert_match(&mut conn, 5, date, 1800).await.unwrap());
        assert!(!upsert_match(&mut conn, 5, date, 2000).await.unwrap());

        let duration: i64 = sqlx::query_scalar("SELECT duration_s FROM matches WHERE match_id = 5")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(duration, 2000);
    }
}
