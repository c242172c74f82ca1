//! Match event ingestion: flatten per-player timelines from match metadata,
//! classify each event as an ability unlock or a shop purchase, and bulk
//! insert the results.

use anyhow::Result;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::db::{ops, Db, PlayerAbilityRow, PlayerItemRow};
use crate::ingest::client::{DeadlockClient, MatchMetadata};
use crate::ingest::dedupe_by_key;
use crate::ingest::reference::{EventClass, ReferenceIds};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MatchEventsResult {
    pub match_id: i64,
    pub items_created: u64,
    pub abilities_created: u64,
    pub unknown_item_ids: usize,
    pub deduped_items: usize,
    pub deduped_abilities: usize,
}

#[derive(Debug, Default)]
pub struct EventsRunSummary {
    pub per_match: Vec<MatchEventsResult>,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

impl EventsRunSummary {
    pub fn total_created(&self) -> u64 {
        self.per_match
            .iter()
            .map(|r| r.items_created + r.abilities_created)
            .sum()
    }
}

/// One raw timeline event with its owning account attached.
#[derive(Debug, Clone)]
pub struct FlatEvent {
    pub account_id: i64,
    pub item_id: i64,
    pub game_time: i64,
    pub sold_time: i64,
    pub upgrade_id: i64,
    pub imbued_ability_id: i64,
}

/// Flatten the per-player timelines. Players without an account id and
/// events without an item id carry nothing ingestible and are skipped.
pub fn extract_events(metadata: &MatchMetadata) -> Vec<FlatEvent> {
    let mut events = Vec::new();
    for player in &metadata.match_info.players {
        let Some(account_id) = player.account_id else {
            continue;
        };
        for item in &player.items {
            let Some(item_id) = item.item_id else {
                continue;
            };
            events.push(FlatEvent {
                account_id,
                item_id,
                game_time: item.game_time_s,
                sold_time: item.sold_time_s,
                upgrade_id: item.upgrade_id,
                imbued_ability_id: item.imbued_ability_id,
            });
        }
    }
    events
}

#[derive(Debug, Default)]
pub struct ClassifiedBatches {
    pub items: Vec<PlayerItemRow>,
    pub abilities: Vec<PlayerAbilityRow>,
    pub unknown_ids: HashSet<i64>,
}

/// Split flat events into item and ability rows by id lookup. An imbuement
/// marker only becomes a FK when it names a known ability; zero means none.
pub fn classify_events(
    match_id: i64,
    events: &[FlatEvent],
    refs: &ReferenceIds,
) -> ClassifiedBatches {
    let mut batches = ClassifiedBatches::default();
    for event in events {
        match refs.classify(event.item_id) {
            EventClass::Ability => batches.abilities.push(PlayerAbilityRow {
                account_id: event.account_id,
                match_id,
                ability_id: event.item_id,
                game_time: event.game_time,
            }),
            EventClass::ShopItem => batches.items.push(PlayerItemRow {
                account_id: event.account_id,
                match_id,
                item_id: event.item_id,
                game_time: event.game_time,
                sold_time: event.sold_time,
                is_upgrade: event.upgrade_id != 0,
                imbued_ability_id: refs
                    .is_ability(event.imbued_ability_id)
                    .then_some(event.imbued_ability_id),
            }),
            EventClass::Unknown => {
                batches.unknown_ids.insert(event.item_id);
            }
        }
    }
    batches
}

/// Ingest timeline events for the given matches. A metadata fetch failure
/// skips that match; each match's writes happen in one transaction.
#[instrument(skip(client, db, refs, match_ids), fields(matches = match_ids.len()))]
pub async fn ingest_match_events(
    client: &DeadlockClient,
    db: &Db,
    refs: &ReferenceIds,
    match_ids: &[i64],
    replace: bool,
) -> Result<EventsRunSummary> {
    let started = Instant::now();
    let total = match_ids.len();
    info!(
        matches = total,
        abilities = refs.ability_count(),
        shop_items = refs.shop_item_count(),
        "starting match event ingestion"
    );

    let mut summary = EventsRunSummary {
        total,
        ..EventsRunSummary::default()
    };
    for &match_id in match_ids {
        let metadata = match client.match_metadata(match_id).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(match_id, error = %err, "skipping match, metadata fetch failed");
                summary.failed += 1;
                continue;
            }
        };

        let events = extract_events(&metadata);
        let account_ids: HashSet<i64> = events.iter().map(|e| e.account_id).collect();
        let batches = classify_events(match_id, &events, refs);
        if !batches.unknown_ids.is_empty() {
            warn!(
                match_id,
                unknown = batches.unknown_ids.len(),
                "events with unknown ids dropped"
            );
        }

        let raw_items = batches.items.len();
        let raw_abilities = batches.abilities.len();
        let items = dedupe_by_key(batches.items, |r| {
            (r.account_id, r.match_id, r.item_id, r.game_time)
        });
        let abilities = dedupe_by_key(batches.abilities, |r| {
            (r.account_id, r.match_id, r.ability_id, r.game_time)
        });

        let mut tx = db.pool.begin().await?;
        ops::ensure_accounts_exist(&mut *tx, &account_ids).await?;
        if replace {
            let (items_deleted, abilities_deleted) =
                ops::delete_match_events(&mut *tx, match_id).await?;
            info!(match_id, items_deleted, abilities_deleted, "replaced prior events");
        }
        let items_created = ops::bulk_insert_player_items(&mut *tx, &items).await?;
        let abilities_created = ops::bulk_insert_player_abilities(&mut *tx, &abilities).await?;
        tx.commit().await?;

        summary.per_match.push(MatchEventsResult {
            match_id,
            items_created,
            abilities_created,
            unknown_item_ids: batches.unknown_ids.len(),
            deduped_items: raw_items - items.len(),
            deduped_abilities: raw_abilities - abilities.len(),
        });
        summary.processed += 1;

        let elapsed = started.elapsed().as_secs_f64();
        let remaining = total - summary.processed - summary.failed;
        let eta_s = (elapsed / summary.processed as f64 * remaining as f64).round();
        info!(
            match_id,
            items_created,
            abilities_created,
            processed = summary.processed,
            total,
            eta_s,
            "match events ingested"
        );
    }

    info!(
        processed = summary.processed,
        failed = summary.failed,
        created = summary.total_created(),
        "match event run done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::client::ClientConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_refs() -> ReferenceIds {
        ReferenceIds::new(
            [100, 101].into_iter().collect(),
            [500, 501].into_iter().collect(),
        )
    }

    async fn seed_reference(db: &Db) {
        sqlx::query("INSERT INTO heroes (hero_id, name, icon_key) VALUES (1, 'Infernus', 'infernus')")
            .execute(&db.pool)
            .await
            .unwrap();
        for ability_id in [100, 101] {
            sqlx::query(
                "INSERT INTO abilities (ability_id, name, icon_key, hero_id) VALUES ($1, 'ability', 'a', 1)",
            )
            .bind(ability_id)
            .execute(&db.pool)
            .await
            .unwrap();
        }
        for item_id in [500, 501] {
            sqlx::query(
                "INSERT INTO shop_items (item_id, name, icon_key, item_type, cost) VALUES ($1, 'item', 'i', 'spirit', 500)",
            )
            .bind(item_id)
            .execute(&db.pool)
            .await
            .unwrap();
        }
        sqlx::query("INSERT INTO matches (match_id, date, duration_s) VALUES (1, '2024-01-01T00:00:00Z', 1800)")
            .execute(&db.pool)
            .await
            .unwrap();
    }

    fn test_client(base_url: &str) -> DeadlockClient {
        DeadlockClient::new(ClientConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            sleep: Duration::from_millis(1),
            max_retries: 1,
        })
    }

    #[test]
    fn classification_and_imbuement() {
        let refs = test_refs();
        let events = vec![
            FlatEvent {
                account_id: 10,
                item_id: 500,
                game_time: 60,
                sold_time: 0,
                upgrade_id: 9,
                imbued_ability_id: 100,
            },
            FlatEvent {
                account_id: 10,
                item_id: 501,
                game_time: 90,
                sold_time: 0,
                upgrade_id: 0,
                imbued_ability_id: 77,
            },
            FlatEvent {
                account_id: 10,
                item_id: 100,
                game_time: 30,
                sold_time: 0,
                upgrade_id: 0,
                imbued_ability_id: 0,
            },
            FlatEvent {
                account_id: 10,
                item_id: 999,
                game_time: 10,
                sold_time: 0,
                upgrade_id: 0,
                imbued_ability_id: 0,
            },
        ];
        let batches = classify_events(7, &events, &refs);
        assert_eq!(batches.items.len(), 2);
        assert_eq!(batches.abilities.len(), 1);
        assert_eq!(batches.unknown_ids, [999].into_iter().collect());

        assert!(batches.items[0].is_upgrade);
        assert_eq!(batches.items[0].imbued_ability_id, Some(100));
        assert!(!batches.items[1].is_upgrade);
        assert_eq!(batches.items[1].imbued_ability_id, None);
        assert_eq!(batches.abilities[0].ability_id, 100);
    }

    #[test]
    fn players_without_account_id_are_skipped() {
        let metadata: MatchMetadata = serde_json::from_value(serde_json::json!({
            "match_info": {"players": [
                {"items": [{"item_id": 500}]},
                {"account_id": 10, "items": [{"item_id": 500}, {}]}
            ]}
        }))
        .unwrap();
        let events = extract_events(&metadata);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].account_id, 10);
    }

    #[tokio::test]
    async fn ingestion_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/matches/1/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "match_info": {"players": [
                    {"account_id": 10, "items": [
                        {"item_id": 500, "game_time_s": 60, "upgrade_id": 9, "imbued_ability_id": 100},
                        {"item_id": 500, "game_time_s": 60},
                        {"item_id": 100, "game_time_s": 30}
                    ]}
                ]}
            })))
            .mount(&server)
            .await;

        let db = Db::connect_in_memory().await.unwrap();
        seed_reference(&db).await;
        let client = test_client(&server.uri());
        let refs = test_refs();

        let first = ingest_match_events(&client, &db, &refs, &[1], false)
            .await
            .unwrap();
        assert_eq!(first.per_match[0].items_created, 1);
        assert_eq!(first.per_match[0].abilities_created, 1);
        assert_eq!(first.per_match[0].deduped_items, 1);

        // Account 10 was unknown; the FK safety net must have created it.
        let username: String =
            sqlx::query_scalar("SELECT username FROM accounts WHERE account_id = 10")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(username, "account-10");

        let second = ingest_match_events(&client, &db, &refs, &[1], false)
            .await
            .unwrap();
        assert_eq!(second.total_created(), 0);
    }

    #[tokio::test]
    async fn replace_clears_prior_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/matches/1/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "match_info": {"players": []}
            })))
            .mount(&server)
            .await;

        let db = Db::connect_in_memory().await.unwrap();
        seed_reference(&db).await;
        sqlx::query("INSERT INTO accounts (account_id, username, is_notable) VALUES (10, 'a', 0)")
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO player_items (account_id, match_id, item_id, game_time, sold_time) VALUES (10, 1, 500, 60, 0)",
        )
        .execute(&db.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO player_abilities (account_id, match_id, ability_id, game_time) VALUES (10, 1, 100, 30)",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        ingest_match_events(&test_client(&server.uri()), &db, &test_refs(), &[1], true)
            .await
            .unwrap();

        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM player_items")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let abilities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM player_abilities")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(items, 0);
        assert_eq!(abilities, 0);
    }
}
