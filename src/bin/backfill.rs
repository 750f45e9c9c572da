//! Index bootstrap runner.
//!
//! Usage:
//!   cms-backfill <post-type|feed-key|tag-index|all> [--reset]
//!   cms-backfill verify

use std::env;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use cms_feed::config::Config;
use cms_feed::db::backfill::{run_backfill, verify_tag_index, Backfill, BackfillConfig};
use cms_feed::db::Database;
use cms_feed::logging::init_tracing;

fn usage() {
    eprintln!("Usage:");
    eprintln!("  cms-backfill <post-type|feed-key|tag-index|all> [--reset]");
    eprintln!("  cms-backfill verify");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        std::process::exit(1);
    }

    if let Err(e) = run(&args).await {
        error!("Backfill failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let reset = args.iter().skip(1).any(|a| a == "--reset");
    if let Some(extra) = args.iter().skip(1).find(|a| *a != "--reset") {
        usage();
        bail!("unexpected argument: {extra}");
    }

    let kinds = match args[0].as_str() {
        "verify" => None,
        "all" => Some(Backfill::ALL.to_vec()),
        name => match Backfill::from_name(name) {
            Some(kind) => Some(vec![kind]),
            None => {
                usage();
                bail!("unknown backfill: {name}");
            }
        },
    };

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?
        .with_limits(config.store_limits());

    let Some(kinds) = kinds else {
        let report = verify_tag_index(&db, config.backfill_page_size).await?;
        if !report.is_clean() {
            warn!(?report, "Tag index has drifted; run `cms-backfill tag-index`");
            std::process::exit(2);
        }
        return Ok(());
    };

    let backfill_config = BackfillConfig {
        page_size: config.backfill_page_size,
        ..BackfillConfig::default()
    };
    for kind in kinds {
        let report = run_backfill(&db, kind, &backfill_config, reset).await?;
        info!(
            backfill = kind.name(),
            processed = report.processed,
            updated = report.updated,
            skipped = report.skipped,
            "Finished"
        );
    }

    Ok(())
}
