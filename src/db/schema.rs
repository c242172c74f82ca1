//! Schema bootstrap. Statements are idempotent (`IF NOT EXISTS`) so connect
//! can run them on every startup against new or existing files.
//!
//! Static tables (heroes, abilities, shop_items, shop_item_upgrades, ranks)
//! are populated by a separate import; ingestion only reads their id sets.

use anyhow::Result;
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    // ---- static reference tables ----
    "CREATE TABLE IF NOT EXISTS heroes (
        hero_id   INTEGER PRIMARY KEY,
        name      TEXT NOT NULL,
        icon_key  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS abilities (
        ability_id INTEGER PRIMARY KEY,
        name       TEXT NOT NULL,
        icon_key   TEXT NOT NULL,
        hero_id    INTEGER NOT NULL REFERENCES heroes(hero_id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS shop_items (
        item_id   INTEGER PRIMARY KEY,
        name      TEXT NOT NULL,
        icon_key  TEXT NOT NULL,
        imbue     INTEGER NOT NULL DEFAULT 0,
        item_type TEXT NOT NULL CHECK (item_type IN ('spirit', 'weapon', 'vitality')),
        cost      INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS shop_item_upgrades (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        from_item INTEGER NOT NULL REFERENCES shop_items(item_id) ON DELETE CASCADE,
        to_item   INTEGER NOT NULL REFERENCES shop_items(item_id) ON DELETE CASCADE,
        UNIQUE (from_item, to_item)
    )",
    "CREATE TABLE IF NOT EXISTS ranks (
        rank_id  INTEGER PRIMARY KEY,
        name     TEXT NOT NULL,
        icon_key TEXT NOT NULL
    )",
    // ---- dynamic tables ----
    "CREATE TABLE IF NOT EXISTS accounts (
        account_id INTEGER PRIMARY KEY,
        username   TEXT NOT NULL,
        is_notable INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS matches (
        match_id    INTEGER PRIMARY KEY,
        date        TEXT NOT NULL,
        duration_s  INTEGER NOT NULL,
        avg_rank_id INTEGER REFERENCES ranks(rank_id)
    )",
    "CREATE TABLE IF NOT EXISTS player_performances (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
        match_id   INTEGER NOT NULL REFERENCES matches(match_id) ON DELETE CASCADE,
        kills      INTEGER NOT NULL,
        deaths     INTEGER NOT NULL,
        assists    INTEGER NOT NULL,
        networth   INTEGER NOT NULL,
        team       INTEGER NOT NULL,
        is_win     INTEGER NOT NULL,
        UNIQUE (account_id, match_id)
    )",
    // Uniqueness on the natural event key protects re-runs of the same match
    // from inserting duplicates.
    "CREATE TABLE IF NOT EXISTS player_items (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id        INTEGER NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
        match_id          INTEGER NOT NULL REFERENCES matches(match_id) ON DELETE CASCADE,
        item_id           INTEGER NOT NULL REFERENCES shop_items(item_id) ON DELETE CASCADE,
        game_time         INTEGER NOT NULL,
        sold_time         INTEGER NOT NULL,
        is_upgrade        INTEGER,
        imbued_ability_id INTEGER REFERENCES abilities(ability_id) ON DELETE CASCADE,
        UNIQUE (account_id, match_id, item_id, game_time)
    )",
    "CREATE TABLE IF NOT EXISTS player_abilities (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
        match_id   INTEGER NOT NULL REFERENCES matches(match_id) ON DELETE CASCADE,
        ability_id INTEGER NOT NULL REFERENCES abilities(ability_id) ON DELETE CASCADE,
        game_time  INTEGER NOT NULL,
        UNIQUE (account_id, match_id, ability_id, game_time)
    )",
    // Event lookups are match-scoped, so index the common prefixes.
    "CREATE INDEX IF NOT EXISTS idx_pitem_match ON player_items (match_id)",
    "CREATE INDEX IF NOT EXISTS idx_pitem_match_account ON player_items (match_id, account_id)",
    "CREATE INDEX IF NOT EXISTS idx_pitem_match_acc_t ON player_items (match_id, account_id, game_time)",
    "CREATE INDEX IF NOT EXISTS idx_pability_match ON player_abilities (match_id)",
    "CREATE INDEX IF NOT EXISTS idx_pability_match_account ON player_abilities (match_id, account_id)",
    "CREATE INDEX IF NOT EXISTS idx_pability_match_acc_t ON player_abilities (match_id, account_id, game_time)",
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
