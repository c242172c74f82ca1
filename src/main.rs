use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deadlock_tracker::db::{ops, Db};
use deadlock_tracker::ingest::client::{ClientConfig, DeadlockClient};
use deadlock_tracker::ingest::history::HistoryOptions;
use deadlock_tracker::ingest::reference::ReferenceIds;
use deadlock_tracker::ingest::{discovery, events, history};
use deadlock_tracker::util::env as env_util;

#[derive(Parser)]
#[command(name = "tracker", version, about = "Deadlock match data ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover notable accounts from completed esports matches.
    IngestEsportsAccounts {
        /// Only scan the first N completed matches.
        #[arg(long)]
        max_matches: Option<usize>,
    },
    /// Ingest match history and performances for players.
    IngestMatchHistory {
        /// Account to ingest; repeatable.
        #[arg(long = "account-id")]
        account_ids: Vec<i64>,
        /// Ingest every stored account instead.
        #[arg(long, conflicts_with = "account_ids")]
        all_accounts: bool,
        /// Cap history entries per player.
        #[arg(long)]
        max_matches: Option<usize>,
        /// Only ingest matches newer than this many days.
        #[arg(long)]
        since_days: Option<i64>,
        /// Ask the API for history it has not stored yet.
        #[arg(long)]
        include_unstored: bool,
    },
    /// Ingest timeline events (abilities, purchases) for matches.
    IngestMatchEvents {
        /// Match to ingest; repeatable.
        #[arg(long = "match-id")]
        match_ids: Vec<i64>,
        /// Ingest every stored match instead.
        #[arg(long, conflicts_with = "match_ids")]
        all_matches: bool,
        /// Cap the number of matches processed.
        #[arg(long)]
        limit: Option<usize>,
        /// Delete existing events for each match before inserting.
        #[arg(long)]
        replace: bool,
    },
    /// Clear accounts, matches, performances and events. Dry run by default.
    ResetDynamicData {
        /// Actually delete.
        #[arg(long)]
        yes: bool,
    },
    /// Print row counts for the core tables.
    DbCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let cli = Cli::parse();
    let db = Db::connect(
        &env_util::db_url(),
        env_util::env_parse("DB_MAX_CONNECTIONS", 5),
    )
    .await?;

    match cli.command {
        Commands::IngestEsportsAccounts { max_matches } => {
            let client = DeadlockClient::new(ClientConfig::from_env());
            let result = discovery::ingest_esports_accounts(&client, &db, max_matches).await?;
            println!(
                "accounts: {} created, {} updated ({} matches scanned, {} failed)",
                result.created, result.updated, result.matches_scanned, result.failed_matches
            );
        }
        Commands::IngestMatchHistory {
            account_ids,
            all_accounts,
            max_matches,
            since_days,
            include_unstored,
        } => {
            let account_ids = if all_accounts {
                ops::all_account_ids(&db).await?
            } else if account_ids.is_empty() {
                bail!("no accounts selected, use --account-id or --all-accounts");
            } else {
                account_ids
            };
            let client = DeadlockClient::new(ClientConfig::from_env());
            let options = HistoryOptions {
                only_stored_history: !include_unstored,
                max_matches_per_player: max_matches,
                since_days,
            };
            let summary =
                history::ingest_player_match_history(&client, &db, &account_ids, &options).await?;
            let totals = summary.totals();
            println!(
                "matches: {} created, {} updated across {} accounts ({} failed)",
                totals.created,
                totals.updated,
                summary.per_account.len(),
                summary.failed_accounts
            );
        }
        Commands::IngestMatchEvents {
            match_ids,
            all_matches,
            limit,
            replace,
        } => {
            let mut match_ids = if all_matches {
                ops::all_match_ids(&db).await?
            } else if match_ids.is_empty() {
                bail!("no matches selected, use --match-id or --all-matches");
            } else {
                match_ids
            };
            if let Some(limit) = limit {
                match_ids.truncate(limit);
            }
            let client = DeadlockClient::new(ClientConfig::from_env());
            let refs = ReferenceIds::load(&db).await?;
            let summary =
                events::ingest_match_events(&client, &db, &refs, &match_ids, replace).await?;
            println!(
                "events: {} created across {} matches ({} failed)",
                summary.total_created(),
                summary.processed,
                summary.failed
            );
        }
        Commands::ResetDynamicData { yes } => {
            let summary = ops::reset_dynamic_data(&db, yes).await?;
            for (table, count) in &summary.counts {
                println!("{table}: {count} rows");
            }
            if summary.deleted {
                println!("dynamic tables cleared");
            } else {
                println!("dry run, re-run with --yes to delete");
            }
        }
        Commands::DbCounts => {
            for (table, count) in ops::table_counts(&db).await? {
                println!("{table}: {count} rows");
            }
        }
    }
    Ok(())
}
