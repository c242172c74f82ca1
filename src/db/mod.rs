//! SQLite-backed store: connection handling plus the row shapes the
//! ingestion jobs write.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

pub mod ops;
pub mod schema;

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database and bootstrap the schema. The tracker
    /// owns its store outright, so DDL runs idempotently on every connect.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database on a single connection, so every handle sees the
    /// same data. Used by tests and throwaway runs.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }
}

/// One row per (account, match); stats for a single player's match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceRow {
    pub account_id: i64,
    pub match_id: i64,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub networth: i64,
    pub team: i64,
    pub is_win: bool,
}

/// A shop purchase event; unique on (account, match, item, game_time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerItemRow {
    pub account_id: i64,
    pub match_id: i64,
    pub item_id: i64,
    pub game_time: i64,
    pub sold_time: i64,
    pub is_upgrade: bool,
    pub imbued_ability_id: Option<i64>,
}

/// An ability-point allocation event; unique on (account, match, ability,
/// game_time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAbilityRow {
    pub account_id: i64,
    pub match_id: i64,
    pub ability_id: i64,
    pub game_time: i64,
}
