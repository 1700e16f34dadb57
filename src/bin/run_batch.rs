//! One-shot batch entry point for an external scheduler (cron).
//!
//! Usage: run_batch <dispatch|follow-ups> [--dry-run]
//!
//! Prints the JSON run report. Per-item failures are part of the report and do
//! not change the exit code; startup failures exit non-zero.

use chrono::Utc;
use lead_quote_api::app::build_state;
use lead_quote_api::config::Config;
use lead_quote_api::db::Database;
use lead_quote_api::models::RunOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Dispatch,
    FollowUps,
}

fn parse_args(args: &[String]) -> anyhow::Result<(Job, RunOptions)> {
    let mut job = None;
    let mut options = RunOptions::default();

    for arg in args {
        match arg.as_str() {
            "dispatch" => job = Some(Job::Dispatch),
            "follow-ups" => job = Some(Job::FollowUps),
            "--dry-run" => options.dry_run = true,
            other => anyhow::bail!("unknown argument '{}'", other),
        }
    }

    let job = job.ok_or_else(|| anyhow::anyhow!("usage: run_batch <dispatch|follow-ups> [--dry-run]"))?;
    Ok((job, options))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_quote_api=info,run_batch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (job, options) = parse_args(&args)?;

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    let state = build_state(&config, db.pool.clone())?;

    tracing::info!("Running {:?} (dry_run={})", job, options.dry_run);
    let report = match job {
        Job::Dispatch => serde_json::to_string_pretty(&state.dispatch.run_once(options, Utc::now()).await)?,
        Job::FollowUps => serde_json::to_string_pretty(&state.follow_ups.run_due(options, Utc::now()).await)?,
    };
    println!("{}", report);

    Ok(())
}
