//! Manual store backups: `backup create [label]`, `backup list`, `backup clean [keep]`.
//! Paths follow the daemon: `DB_PATH` / `BACKUP_DIR`, else `/app/data`, else `data/`.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tremor_watch::backup::{BackupManager, DEFAULT_KEEP};
use tremor_watch::config::{resolve_backup_dir, resolve_db_path, DOCKER_DATA_DIR};

/// Tremor Watch database backup utility
#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(version)]
#[command(after_help = "Environment variables:\n  DB_PATH      Custom database path\n  BACKUP_DIR   Custom backup directory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new backup
    Create {
        /// Optional label embedded in the file name
        label: Option<String>,
    },

    /// List all backups, newest first
    List,

    /// Delete old backups
    Clean {
        /// How many of the newest backups to keep
        #[arg(default_value_t = DEFAULT_KEEP)]
        keep: usize,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
    let cli = Cli::parse();

    let docker = Path::new(DOCKER_DATA_DIR);
    let db = resolve_db_path(std::env::var("DB_PATH").ok().as_deref(), docker);
    let dir = resolve_backup_dir(std::env::var("BACKUP_DIR").ok().as_deref(), docker);
    let mgr = BackupManager::new(db, dir);
    println!(
        "Database: {}\nBackups:  {}",
        mgr.store_path().display(),
        mgr.backup_dir().display()
    );

    match cli.command {
        Commands::Create { label } => match mgr.snapshot(label.as_deref()) {
            Ok(path) => {
                println!("✅ Backup created: {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Backup failed: {e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::List => match mgr.list() {
            Ok(backups) => {
                println!("\n📋 Available backups ({}):\n", backups.len());
                if backups.is_empty() {
                    println!("  No backups found");
                }
                for (i, b) in backups.iter().enumerate() {
                    println!("  {}. {}", i + 1, b.filename);
                    println!("     Size: {:.2} KB", b.size as f64 / 1024.0);
                    println!("     Date: {}\n", b.created.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Could not list backups: {e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::Clean { keep } => match mgr.prune(keep) {
            Ok(0) => {
                println!("📊 Nothing to clean (keeping {keep})");
                ExitCode::SUCCESS
            }
            Ok(n) => {
                println!("✅ Cleanup complete: deleted {n} old backup(s), kept {keep}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Cleanup failed: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}
