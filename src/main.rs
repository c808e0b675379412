#[macro_use]
extern crate log;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs, process, thread};

use anyhow::{anyhow, bail, ensure, Context, Result};
use chrono::Local;
use env_logger::Env;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use toml::Value;

use crate::args::{Args, Command};
use crate::common::helpers::print_error_chain;
use crate::config::{Config, SettingsConfig};
use crate::connection::DatabaseConnectionFactory;
use crate::database::ConnectionProvider;
use crate::error::{MigrationError, Side};
use crate::extract::extractor::DatabaseExtractor;
use crate::insert::inserter::DatabaseInserter;
use crate::migrate::migration_result::{MigrationReport, MigrationStatus, TerminalEvent};
use crate::migrate::migrator::MigrationCoordinator;
use crate::migrate::rollback::RollbackCoordinator;
use crate::migrate::watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
use crate::report::{JsonFileSink, LogNotifier};

mod args;
mod common;
mod config;
mod connection;
mod database;
mod error;
mod extract;
mod insert;
mod migrate;
mod report;
#[cfg(test)]
mod testing;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = init().await {
        print_error_chain(&err);
        process::exit(1);
    }
}

async fn init() -> Result<()> {
    let options = Args::from_args();

    initialize_logger(options.verbose, options.quiet);

    ensure!(options.parallelism > 0, "Parallelism must be at least 1");

    let config = load_config(&options.config)
        .with_context(|| format!("Failed to load config file {}", options.config.display()))?;

    info!("Initializing connections...");

    // One connection per worker plus one for schema inspection
    let max_connections = options.parallelism as u32 + 1;
    let inserter = create_inserter(&config, max_connections).await?;

    match options.command {
        Command::Migrate {
            report,
            batch_size,
            rollback_on_error,
            full,
        } => {
            let extractor = create_extractor(&config, max_connections).await?;
            let mut settings = config.settings().clone();
            if let Some(batch_size) = batch_size {
                ensure!(batch_size > 0, "Batch size must be at least 1");
                settings.batch_size = batch_size;
            }

            run_migration(
                extractor,
                inserter,
                settings,
                options.parallelism,
                report,
                rollback_on_error,
                full,
            )
            .await
        }
        Command::Rollback { report } => {
            run_rollback(inserter, config.settings(), &report).await
        }
    }
}

async fn create_extractor(config: &Config, max_connections: u32) -> Result<DatabaseExtractor> {
    let factory = DatabaseConnectionFactory::<DatabaseExtractor>::new(config.source().clone());
    let extractor = factory
        .create_connection(max_connections)
        .await
        .map_err(|source| MigrationError::Connection {
            side: Side::Source,
            source,
        })?;
    Ok(extractor)
}

async fn create_inserter(config: &Config, max_connections: u32) -> Result<DatabaseInserter> {
    let factory = DatabaseConnectionFactory::<DatabaseInserter>::new(config.target().clone());
    let inserter = factory
        .create_connection(max_connections)
        .await
        .map_err(|source| MigrationError::Connection {
            side: Side::Target,
            source,
        })?;

    let max_allowed_packet = inserter.get_max_allowed_packet().await?;
    check_packet_size(config.settings().max_packet_bytes, max_allowed_packet)?;

    Ok(inserter.with_max_packet_bytes(config.settings().max_packet_bytes))
}

async fn run_migration(
    extractor: DatabaseExtractor,
    inserter: DatabaseInserter,
    settings: SettingsConfig,
    parallelism: usize,
    report_path: PathBuf,
    rollback_on_error: bool,
    full: bool,
) -> Result<()> {
    let watermarks: Arc<dyn WatermarkStore> = if full {
        info!("Full migration requested, stored watermarks are ignored");
        Arc::new(MemoryWatermarkStore::new())
    } else {
        let store = FileWatermarkStore::open(&settings.watermark_file).await?;
        info!("Using watermark file {}", store.path().display());
        Arc::new(store)
    };
    let migration_options = settings.migration_options(parallelism);

    let coordinator =
        MigrationCoordinator::new(extractor, inserter, watermarks, migration_options)
            .with_sink(Arc::new(JsonFileSink::new(report_path)))
            .with_notifier(Arc::new(LogNotifier));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batches");
            signal_token.cancel();
        }
    });

    let (report, persist_error) = match coordinator.migrate(&cancel).await {
        Ok(report) => (report, None),
        Err(MigrationError::Report { report, source }) => (*report, Some(source)),
        Err(err) => return Err(err.into()),
    };

    if report.is_incompatible() {
        if let Some(compatibility) = report.compatibility.clone() {
            if let Some(source) = &persist_error {
                error!("Failed to persist migration report: {:#}", source);
            }
            return Err(MigrationError::Compatibility(compatibility).into());
        }
    }

    let outcome = match report.outcome() {
        TerminalEvent::Success => Ok(()),
        TerminalEvent::Aborted => Err(anyhow!("Migration was cancelled before all tables finished")),
        TerminalEvent::Partial => {
            if rollback_on_error {
                warn!("Rolling back migrated tables after failures");
                coordinator.rollback(&report).await?;
            }
            Err(anyhow!("{} tables failed to migrate", failed_count(&report)))
        }
    };

    match persist_error {
        Some(source) => {
            if let Err(err) = outcome {
                print_error_chain(&err);
            }
            Err(source.context("Failed to persist migration report"))
        }
        None => outcome,
    }
}

async fn run_rollback(
    inserter: DatabaseInserter,
    settings: &SettingsConfig,
    report_path: &Path,
) -> Result<()> {
    let report = JsonFileSink::load(report_path).await?;
    let watermarks = Arc::new(FileWatermarkStore::open(&settings.watermark_file).await?);

    let mut conn = inserter
        .connect()
        .await
        .map_err(|source| MigrationError::Connection {
            side: Side::Target,
            source,
        })?;

    let summary = RollbackCoordinator::with_watermarks(watermarks)
        .rollback(&report, &mut conn)
        .await
        .map_err(MigrationError::from)?;

    for (table, rows) in &summary.rolled_back {
        info!("Rolled back {}: {} rows deleted", table, rows);
    }

    Ok(())
}

fn failed_count(report: &MigrationReport) -> usize {
    report
        .records_with_status(MigrationStatus::Failed)
        .count()
}

fn check_packet_size(config_send_packet_size: usize, max_allowed_packet: usize) -> Result<()> {
    debug!(
        "Max allowed packet size - Current: {} MB | Maximum {} MB",
        config_send_packet_size as f64 / 1_048_576.0,
        max_allowed_packet as f64 / 1_048_576.0
    );

    if config_send_packet_size > max_allowed_packet {
        bail!("Configured send packet size exceeds maximum allowed packet size")
    }

    Ok(())
}

fn initialize_logger(verbose: bool, quiet: bool) {
    if quiet {
        env::set_var("RUST_LOG", "warn");
    } else {
        env::set_var("RUST_LOG", if verbose { "debug" } else { "info" });
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("tiberius", log::LevelFilter::Error)
        .filter_module("sqlx", log::LevelFilter::Error)
        .format(|buf, record| {
            let timestamp = Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "{} {:<5} [{}] - {}",
                timestamp,
                record.level(),
                thread::current().name().unwrap_or("<unnamed>"),
                record.args()
            )
        })
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let value = content.parse::<Value>()?;
    let config = Config::from_toml(value)?;
    Ok(config)
}
