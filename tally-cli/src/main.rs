use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tally_store::{
    BootstrapError, Bootstrapper, ConfigError, Database, DbError, SnapshotError, StoreConfig,
    connect, snapshot,
};

mod backup;

use backup::BackupStore;

#[derive(Parser, Debug)]
#[command(name = "tally", version)]
#[command(about = "Tally backup orchestrator and maintenance commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export a full snapshot to a timestamped file
    Backup {
        /// Backup directory (default: $TALLY_BACKUP_DIR or ./backups)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Export periodically until interrupted
    Schedule {
        /// Interval between backups, e.g. "6h" or "30m"
        #[arg(long, value_parser = humantime::parse_duration)]
        every: Duration,
        /// Keep only the newest N backups
        #[arg(long)]
        keep: Option<usize>,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List backups, newest first
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Replace all data with the contents of a backup
    Restore {
        /// Backup file, or a bare name inside the backup directory
        file: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Create or upgrade the schema and seed the admin account
    Bootstrap,
    /// Check that the configured backend answers
    Check,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("backup {} already exists", .0.display())]
    ArtifactExists(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Connect and bring the schema up to date before touching any data.
async fn open_store() -> Result<Arc<dyn Database>, CliError> {
    let config = StoreConfig::from_env()?;
    let db = connect(&config.backend).await?;
    Bootstrapper::new(Arc::clone(&db), config.admin).run().await?;
    Ok(db)
}

async fn backup_once(db: &dyn Database, store: &BackupStore) -> Result<PathBuf, CliError> {
    let envelope = snapshot::export(db).await?;
    store.write(&envelope).await
}

async fn run_schedule(
    db: &dyn Database,
    store: &BackupStore,
    every: Duration,
    keep: Option<usize>,
) -> Result<(), CliError> {
    if every < Duration::from_secs(1) {
        return Err(CliError::InvalidArgument(
            "--every must be at least one second".to_string(),
        ));
    }
    if keep == Some(0) {
        return Err(CliError::InvalidArgument(
            "--keep must be at least 1".to_string(),
        ));
    }

    tracing::info!(
        interval = %humantime::format_duration(every),
        keep = ?keep,
        dir = %store.dir().display(),
        "Backup schedule started"
    );

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed run is logged and retried on the next tick
                match backup_once(db, store).await {
                    Ok(path) => println!("{}", path.display()),
                    Err(e) => tracing::error!(error = %e, "Scheduled backup failed"),
                }
                if let Some(keep) = keep {
                    if let Err(e) = store.prune(keep).await {
                        tracing::error!(error = %e, "Pruning old backups failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Backup schedule stopped");
                return Ok(());
            }
        }
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Backup { dir } => {
            let db = open_store().await?;
            let path = backup_once(db.as_ref(), &BackupStore::resolve(dir)).await?;
            println!("{}", path.display());
        }
        Commands::Schedule { every, keep, dir } => {
            let db = open_store().await?;
            run_schedule(db.as_ref(), &BackupStore::resolve(dir), every, keep).await?;
        }
        Commands::List { dir } => {
            let store = BackupStore::resolve(dir);
            let artifacts = store.list().await?;
            if artifacts.is_empty() {
                println!("No backups in {}", store.dir().display());
            }
            for artifact in artifacts {
                println!(
                    "{}  {}  {} bytes",
                    artifact.taken_at.to_rfc3339(),
                    artifact.path.display(),
                    artifact.size_bytes
                );
            }
        }
        Commands::Restore { file, dir } => {
            let store = BackupStore::resolve(dir);
            // Validate the artifact before connecting
            let envelope = store.read(&file).await?;
            let db = open_store().await?;
            let report = snapshot::import(db.as_ref(), &envelope).await?;
            println!(
                "{}",
                serde_json::json!({
                    "status": "restored",
                    "restoredAt": report.restored_at,
                    "counts": report.counts,
                })
            );
        }
        Commands::Bootstrap => {
            let config = StoreConfig::from_env()?;
            let db = connect(&config.backend).await?;
            let boot = Bootstrapper::new(db, config.admin);
            let report = boot.run().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(report).map_err(SnapshotError::from)?
            );
        }
        Commands::Check => {
            let config = StoreConfig::from_env()?;
            let db = connect(&config.backend).await?;
            db.ping().await?;
            println!("{} backend reachable", db.backend());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
