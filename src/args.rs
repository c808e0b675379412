use std::path::PathBuf;

use structopt::clap::AppSettings;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
name = "DBMigrator",
version = env ! ("CARGO_PKG_VERSION"),
about = "Incrementally copies table rows from an MSSQL database into a MySQL database with a matching schema, resuming from per-table watermarks.",
setting = AppSettings::ColoredHelp,
)]
pub struct Args {
    /// Activate verbose mode
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Activate quiet mode
    #[structopt(short = "q", long = "quiet")]
    pub quiet: bool,

    /// Config file
    #[structopt(
        short = "c",
        long = "config",
        default_value = "config.toml",
        parse(from_os_str)
    )]
    pub config: PathBuf,

    /// Number of tables migrated in parallel
    #[structopt(short = "p", long = "parallelism", default_value = "4")]
    pub parallelism: usize,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Copy rows changed since the last run
    Migrate {
        /// Where the migration report is written
        #[structopt(
            long = "report",
            default_value = "migration_report.json",
            parse(from_os_str)
        )]
        report: PathBuf,

        /// Override the configured batch size
        #[structopt(long = "batch-size")]
        batch_size: Option<usize>,

        /// Roll back successfully migrated tables when any table fails
        #[structopt(long = "rollback-on-error")]
        rollback_on_error: bool,

        /// Ignore stored watermarks and copy every row
        #[structopt(long = "full")]
        full: bool,
    },
    /// Delete the rows of every table a previous report marks as migrated
    Rollback {
        /// Report produced by an earlier migrate run
        #[structopt(long = "report", parse(from_os_str))]
        report: PathBuf,
    },
}
