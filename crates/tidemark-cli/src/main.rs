//! tidemark: apply and revert SQLite schema migrations.
//!
//! ```bash
//! tidemark                      # mode from tidemark.yml (default: latest)
//! tidemark up                   # apply the next pending migration
//! tidemark down                 # revert the last applied migration
//! tidemark status --json
//! ```

mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tidemark_common::{Error, Mode};
use tidemark_config::{ConfigLoader, RunnerConfig};
use tidemark_migrate::{Migration, Runner, SqlMigrationSource};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::status::StatusReport;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ledger-backed SQLite schema migrations", long_about = None)]
struct Cli {
    /// Config file (.yml, .yaml or .toml); missing file means defaults
    #[arg(short, long, env = "TIDEMARK_CONFIG", default_value = "tidemark.yml")]
    config: PathBuf,

    /// SQLite database file
    #[arg(short, long, env = "TIDEMARK_DATABASE")]
    database: Option<PathBuf>,

    /// Directory holding <id>.up.sql / <id>.down.sql files
    #[arg(short, long, env = "TIDEMARK_MIGRATIONS")]
    migrations: Option<PathBuf>,

    /// Ledger table name
    #[arg(short, long, env = "TIDEMARK_TABLE")]
    table: Option<String>,

    /// Emit tracing events as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending migration
    Latest,
    /// Apply the next pending migration
    Up,
    /// Revert the most recently applied migration
    Down,
    /// Show applied and pending migrations
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = resolve_config(&cli)?;
    match cli.command {
        Some(Commands::Status { json }) => status(&config, json),
        Some(Commands::Latest) => migrate(&config, Mode::Latest),
        Some(Commands::Up) => migrate(&config, Mode::Up),
        Some(Commands::Down) => migrate(&config, Mode::Down),
        None => migrate(&config, config.mode),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// Config file values, overridden by flags and environment.
fn resolve_config(cli: &Cli) -> Result<RunnerConfig> {
    let mut config = ConfigLoader::load_or_default(&cli.config)?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(migrations) = &cli.migrations {
        config.migrations_dir = migrations.clone();
    }
    if let Some(table) = &cli.table {
        config.table = table.clone();
    }
    Ok(config)
}

fn build_runner(config: &RunnerConfig) -> Result<Runner<Connection>> {
    let source = SqlMigrationSource::new(&config.migrations_dir);
    let migrations: Vec<Migration<Connection>> = source
        .load()
        .with_context(|| {
            format!(
                "failed to load migrations from {}",
                source.dir().display()
            )
        })?;
    Ok(Runner::new(migrations).with_table(config.table_name()?))
}

fn open(path: &Path) -> tidemark_common::Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| Error::Database(format!("failed to open {}: {e}", path.display())))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

fn close(conn: Connection) -> tidemark_common::Result<()> {
    conn.close()
        .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))
}

fn migrate(config: &RunnerConfig, mode: Mode) -> Result<()> {
    let runner = build_runner(config)?.with_mode(mode);
    info!(
        "running {} against {} ({} migrations declared)",
        runner.mode(),
        config.database.display(),
        runner.migrations().len()
    );

    let executed = runner.run_with(|| open(&config.database), close)?;
    info!("{} migrations executed", executed.len());
    Ok(())
}

fn status(config: &RunnerConfig, json: bool) -> Result<()> {
    let runner = build_runner(config)?;
    let state = runner.status_with(|| open(&config.database), close)?;
    let report = StatusReport::new(runner.table(), &state);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in report.render() {
            println!("{line}");
        }
    }
    Ok(())
}
