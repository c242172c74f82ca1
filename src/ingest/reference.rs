//! Static reference ids used to classify raw timeline events.

use anyhow::Result;
use std::collections::HashSet;
use tracing::instrument;

use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Ability,
    ShopItem,
    Unknown,
}

/// Known ability and shop-item ids, loaded once per run; a raw event id that
/// appears in neither set is counted and dropped downstream.
#[derive(Debug, Default)]
pub struct ReferenceIds {
    ability_ids: HashSet<i64>,
    shop_item_ids: HashSet<i64>,
}

impl ReferenceIds {
    #[instrument(skip(db))]
    pub async fn load(db: &Db) -> Result<Self> {
        let ability_ids = sqlx::query_scalar("SELECT ability_id FROM abilities")
            .fetch_all(&db.pool)
            .await?
            .into_iter()
            .collect();
        let shop_item_ids = sqlx::query_scalar("SELECT item_id FROM shop_items")
            .fetch_all(&db.pool)
            .await?
            .into_iter()
            .collect();
        Ok(Self {
            ability_ids,
            shop_item_ids,
        })
    }

    #[cfg(test)]
    pub fn new(ability_ids: HashSet<i64>, shop_item_ids: HashSet<i64>) -> Self {
        Self {
            ability_ids,
            shop_item_ids,
        }
    }

    pub fn is_ability(&self, id: i64) -> bool {
        self.ability_ids.contains(&id)
    }

    pub fn is_shop_item(&self, id: i64) -> bool {
        self.shop_item_ids.contains(&id)
    }

    /// Ability wins if an id is somehow present in both sets.
    pub fn classify(&self, id: i64) -> EventClass {
        if self.is_ability(id) {
            EventClass::Ability
        } else if self.is_shop_item(id) {
            EventClass::ShopItem
        } else {
            EventClass::Unknown
        }
    }

    pub fn ability_count(&self) -> usize {
        self.ability_ids.len()
    }

    pub fn shop_item_count(&self) -> usize {
        self.shop_item_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_exhaustive_and_ability_wins_overlap() {
        let refs = ReferenceIds::new(
            [100, 200].into_iter().collect(),
            [200, 500].into_iter().collect(),
        );
        assert_eq!(refs.classify(100), EventClass::Ability);
        assert_eq!(refs.classify(500), EventClass::ShopItem);
        assert_eq!(refs.classify(999), EventClass::Unknown);
        assert_eq!(refs.classify(200), EventClass::Ability);
    }
}
