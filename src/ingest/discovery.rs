//! Esports account discovery: walk completed esports matches and mark every
//! participating account as notable.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use crate::db::{ops, Db};
use crate::ingest::client::DeadlockClient;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub created: u64,
    pub updated: u64,
    pub matches_scanned: usize,
    pub failed_matches: usize,
}

/// Discover notable accounts from the esports match listing. A failure to
/// fetch the listing itself aborts the run; a failure on any single match's
/// metadata skips that match and continues.
#[instrument(skip(client, db))]
pub async fn ingest_esports_accounts(
    client: &DeadlockClient,
    db: &Db,
    max_matches: Option<usize>,
) -> Result<DiscoveryResult> {
    let listing = client.esports_matches().await?;
    let mut completed: Vec<i64> = listing
        .into_iter()
        .filter(|m| m.status == "Completed")
        .map(|m| m.match_id)
        .collect();
    if let Some(cap) = max_matches {
        completed.truncate(cap);
    }
    info!(matches = completed.len(), "scanning completed esports matches");

    let mut account_ids: HashSet<i64> = HashSet::new();
    let mut result = DiscoveryResult::default();
    for match_id in completed {
        let metadata = match client.match_metadata(match_id).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(match_id, error = %err, "skipping match, metadata fetch failed");
                result.failed_matches += 1;
                continue;
            }
        };
        for player in &metadata.match_info.players {
            if let Some(account_id) = player.account_id {
                account_ids.insert(account_id);
            }
        }
        result.matches_scanned += 1;
    }

    let mut tx = db.pool.begin().await?;
    let mut ids: Vec<i64> = account_ids.into_iter().collect();
    ids.sort_unstable();
    for account_id in ids {
        if ops::promote_or_create_notable(&mut *tx, account_id).await? {
            result.created += 1;
        } else {
            result.updated += 1;
        }
    }
    tx.commit().await?;

    info!(
        created = result.created,
        updated = result.updated,
        matches_scanned = result.matches_scanned,
        failed_matches = result.failed_matches,
        "esports account discovery done"
    );
    Ok(result)
}
