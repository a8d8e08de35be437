use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_storage::ReportStore;
use reel_sync::{render_brief, summarize_recent_runs, CollectionsFile, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "reel")]
#[command(about = "Sync media-server collections from catalog feeds")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured collection once.
    Sync {
        /// Plan changes without writing to the library or acquisition queues.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run syncs on the configured cron schedule until interrupted.
    Serve,
    /// Check collections.yaml without syncing.
    Validate,
    /// Summarize the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("reel=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => {
            config.dry_run |= dry_run;
            let pipeline = SyncPipeline::from_config(config).await?;
            let report = pipeline.run_once().await?;
            print!("{}", render_brief(&report));
            println!(
                "sync complete: run_id={} collections={} failed={} reports={}",
                report.run_id,
                report.totals.collections,
                report.totals.failed,
                pipeline.reports().run_dir(report.run_id).display()
            );
        }
        Commands::Serve => {
            config.scheduler_enabled = true;
            let cron = config.sync_cron.clone();
            let pipeline = Arc::new(SyncPipeline::from_config(config).await?);
            let Some(mut sched) = SyncPipeline::maybe_build_scheduler(pipeline).await? else {
                bail!("scheduler could not be built");
            };
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler started; waiting for ctrl-c");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
        Commands::Validate => {
            let path = config.resolve(&config.collections_file);
            let collections = CollectionsFile::load(&path).await?;
            collections
                .validate()
                .with_context(|| format!("validating {}", path.display()))?;
            let count = collections
                .libraries
                .iter()
                .map(|l| l.collections.len())
                .sum::<usize>();
            println!(
                "{} is valid: sources={} libraries={} collections={}",
                path.display(),
                collections.sources.len(),
                collections.libraries.len(),
                count
            );
        }
        Commands::Report { runs } => {
            let store = ReportStore::new(config.resolve(&config.reports_dir));
            print!("{}", summarize_recent_runs(&store, runs)?);
        }
    }

    Ok(())
}
