use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roadmap_sync::{build_scheduler, maybe_build_scheduler, RunMode, SyncConfig, SyncRunSummary};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roadmap")]
#[command(about = "Sync a roadmap spreadsheet into GitHub issues and a project board")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update one issue per roadmap row.
    Sync {
        /// File path, `sheets:<id>/<range>` or values URL; overrides ROADMAP_SOURCE.
        #[arg(long)]
        source: Option<String>,
        /// Pause after each processed row; overrides ROADMAP_ROW_DELAY_MS.
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Print what a sync would do without writing anything.
    Plan {
        #[arg(long)]
        source: Option<String>,
    },
    /// Serve the read-only dashboard.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run sync on ROADMAP_SYNC_CRON until interrupted.
    Schedule,
    /// Summarise recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();
}

fn print_summary(summary: &SyncRunSummary) {
    if summary.mode == RunMode::DryRun {
        for row in &summary.rows {
            let target = row
                .item_number
                .map(|n| format!("#{n}"))
                .unwrap_or_else(|| "new".to_string());
            println!(
                "row {:>3}  {:<8} {:<6} {}  [{}]",
                row.row_number,
                row.action.as_str(),
                target,
                row.title,
                row.labels.join(", ")
            );
        }
    }
    println!(
        "{} complete: run_id={} created={} updated={} skipped={}{}",
        match summary.mode {
            RunMode::Apply => "sync",
            RunMode::DryRun => "plan",
        },
        summary.run_id,
        summary.created,
        summary.updated,
        summary.skipped,
        summary
            .reports_dir
            .as_deref()
            .map(|dir| format!(" reports={dir}"))
            .unwrap_or_default()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        source: None,
        delay_ms: None,
    }) {
        Commands::Sync { source, delay_ms } => {
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(delay_ms) = delay_ms {
                config.row_delay_ms = delay_ms;
            }
            let summary = roadmap_sync::run_sync_once(&config, RunMode::Apply).await?;
            print_summary(&summary);
        }
        Commands::Plan { source } => {
            if let Some(source) = source {
                config.source = source;
            }
            let summary = roadmap_sync::run_sync_once(&config, RunMode::DryRun).await?;
            print_summary(&summary);
        }
        Commands::Serve { port } => {
            let scheduler = maybe_build_scheduler(&config).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.sync_cron, "background sync scheduler started");
            }
            roadmap_web::serve_from_env(port).await?;
        }
        Commands::Schedule => {
            let mut sched = build_scheduler(&config).await?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { runs, state_dir } => {
            let state_dir = state_dir.unwrap_or(config.state_dir);
            println!("{}", roadmap_sync::report_recent_runs(runs, &state_dir)?);
        }
    }

    Ok(())
}
