//! Fidsync CLI
//!
//! Command-line interface for the fiducial event builder.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fidsync_core::{
    load_source_list, replay, source_index, EventBus, RowWriter, Settings, UpdateLog,
};
use fidsync_ring::Correlator;
use fidsync_schema::SourceMode;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fidsync")]
#[command(about = "Fidsync - builds per-pulse rows from timestamped source updates", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate a recorded update log into a row file
    Run {
        /// Source list file (NAME [FLAGS] per line)
        #[arg(short, long)]
        sources: PathBuf,

        /// Row output file
        #[arg(short, long)]
        output: PathBuf,

        /// Update log to replay
        #[arg(short, long)]
        replay: PathBuf,

        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Settings file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Evaluate the open output window before exiting
        #[arg(long)]
        drain: bool,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Check a source list without running
    Validate {
        /// Source list file
        #[arg(short, long)]
        sources: PathBuf,
    },

    /// Print every record of an update log
    Dump {
        /// Update log file
        log: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            sources,
            output,
            replay,
            timeout,
            config,
            drain,
            log_level,
        } => {
            setup_logging(&log_level)?;
            run_correlator(sources, output, replay, timeout, config, drain).await?;
        }
        Commands::Validate { sources } => {
            setup_logging("info")?;
            validate_sources(sources)?;
        }
        Commands::Dump { log } => {
            setup_logging("warn")?;
            dump_log(log)?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    Ok(())
}

async fn run_correlator(
    sources_path: PathBuf,
    output: PathBuf,
    log_path: PathBuf,
    timeout: Option<u64>,
    config: Option<PathBuf>,
    drain: bool,
) -> Result<()> {
    let started = Instant::now();

    let mut settings = match config {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    if drain {
        settings.drain_on_shutdown = true;
    }

    let sources = load_source_list(&sources_path)?;
    let index = source_index(&sources);
    let records = UpdateLog::read(&log_path)?;

    let correlator = Correlator::new(settings.correlator_config(), sources)
        .context("Invalid correlator configuration")?;
    let writer = RowWriter::create(&output)?;
    let bus = EventBus::new(settings.bus_config(), correlator, Box::new(writer));

    info!(
        output = %output.display(),
        replay = %log_path.display(),
        records = records.len(),
        "Fidsync running. Press Ctrl+C to stop."
    );

    let handle = bus.handle();
    let mut replay_task = tokio::spawn(async move { replay(&records, &handle, &index).await });
    let abort = replay_task.abort_handle();

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let replay_finished = tokio::select! {
        result = &mut replay_task => {
            match result {
                Ok(Ok(stats)) => info!(published = stats.published, skipped = stats.skipped, "End of update log"),
                Ok(Err(e)) => warn!(error = %e, "Replay stopped early"),
                Err(e) => warn!(error = %e, "Replay task failed"),
            }
            true
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            abort.abort();
            false
        }
        _ = deadline => {
            info!(timeout_secs = timeout, "Timeout reached, shutting down");
            abort.abort();
            false
        }
    };

    // the aborted task still holds a bus handle until it is joined
    if !replay_finished {
        let _ = replay_task.await;
    }

    let report = bus.shutdown().await?;

    println!("Runtime: {:.3} s", started.elapsed().as_secs_f64());
    println!("Rows written: {}", report.rows_written);
    if report.rows_drained > 0 {
        println!("Rows drained at shutdown: {}", report.rows_drained);
    }
    println!(
        "Updates accepted: {}, rejected: {}, duplicates: {}, dropped slots: {}",
        report.metrics.updates_accepted,
        report.metrics.updates_rejected,
        report.metrics.duplicates,
        report.metrics.slots_dropped
    );

    Ok(())
}

fn validate_sources(path: PathBuf) -> Result<()> {
    info!("Validating source list {}", path.display());

    let sources = load_source_list(&path)?;
    let continuous = sources
        .iter()
        .filter(|s| s.mode == SourceMode::Continuous)
        .count();
    let traced = sources.iter().filter(|s| s.trace).count();

    for (id, source) in sources.iter().enumerate() {
        println!(
            "{:4} {:<40} {}{}",
            id,
            source.name,
            source.mode,
            if source.trace { " (trace)" } else { "" }
        );
    }
    println!(
        "{} sources: {} continuous, {} non-continuous, {} traced",
        sources.len(),
        continuous,
        sources.len() - continuous,
        traced
    );

    Ok(())
}

fn dump_log(path: PathBuf) -> Result<()> {
    let records = UpdateLog::read(&path)?;
    for record in &records {
        println!("{}", record.dump_line());
    }
    Ok(())
}
