use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use cassa_print::{ClaimStrategy, LockSettings, RunOutcome, WorkerOptions};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Claims pending print jobs and sends them to their printers, then exits. Meant to be run by cron or a systemd timer."
)]
struct Args {
    /// Jobs claimed by this run
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(i64).range(1..))]
    limit: i64,

    /// Jobs that already had this many attempts are left alone
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i32).range(1..))]
    max_tries: i32,

    /// Milliseconds to sleep between two printed jobs
    #[arg(long, default_value_t = 200)]
    sleep_ms: u64,

    /// Mark jobs as sent without printing anything
    #[arg(long)]
    dry_run: bool,

    /// Attempts at taking the claim lock before giving up
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    retry_lock: u32,

    /// How long one attempt waits for the claim lock
    #[arg(long, default_value_t = 2000)]
    lock_timeout_ms: u64,

    /// Sleep after the first failed lock attempt, doubled after each further one
    #[arg(long, default_value_t = 1000)]
    lock_backoff_ms: u64,

    /// auto, skip-locked or advisory-lock
    #[arg(long, default_value = "auto")]
    claim_strategy: ClaimStrategy,

    /// lp compatible print command
    #[arg(long, default_value = "lp", env = "CASSA_LP_BIN")]
    lp_bin: PathBuf,

    /// Longest a single print command may run
    #[arg(long, default_value_t = 30000)]
    dispatch_timeout_ms: u64,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Schema holding the print queue tables
    #[arg(long, default_value = "cassa", env = "CASSA_SCHEMA")]
    schema: String,
}

fn enable_logs() {
    let fmt_layer = tracing_subscriber::fmt::layer();
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sqlx=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    enable_logs();

    let worker = WorkerOptions::default()
        .database_url(&args.database_url)
        .schema(&args.schema)
        .batch_limit(args.limit)
        .max_attempts(args.max_tries)
        .pause(Duration::from_millis(args.sleep_ms))
        .dry_run(args.dry_run)
        .claim_strategy(args.claim_strategy)
        .lock_settings(LockSettings {
            retries: args.retry_lock,
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
            backoff_base: Duration::from_millis(args.lock_backoff_ms),
        })
        .print_binary(args.lp_bin)
        .dispatch_timeout(Duration::from_millis(args.dispatch_timeout_ms))
        .init()
        .await;

    let worker = match worker {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Could not start worker");
            return ExitCode::FAILURE;
        }
    };

    info!(worker_id = %worker.worker_id(), dry_run = args.dry_run, "Worker started");

    match worker.run_once().await {
        Ok(summary) => {
            if summary.outcome == RunOutcome::LockUnavailable {
                info!("Could not acquire lock, another worker is busy");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Worker run aborted");
            ExitCode::FAILURE
        }
    }
}
