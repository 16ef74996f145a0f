//! Operator CLI for the payments store.
//!
//! # Responsibility
//! - Apply schema migrations to a database file.
//! - Rotate the field encryption key.
//! - Keep output deterministic for quick local sanity checks.

use clap::{Parser, Subcommand};
use paystore_core::crypto::{rotate_all, EncryptionKey, FieldCipher};
use paystore_core::db::migrations::current_version;
use paystore_core::{init_logging, open_db, StorageError};
use std::path::{Path, PathBuf};

const ENV_OLD_KEY: &str = "PAYSTORE_OLD_ENCRYPTION_KEY";
const ENV_NEW_KEY: &str = "PAYSTORE_NEW_ENCRYPTION_KEY";

#[derive(Parser)]
#[command(name = "paystore", version, about = "Payments store maintenance")]
struct Cli {
    /// Absolute directory for rolling log files
    #[arg(long, global = true)]
    log_dir: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the database and apply pending migrations
    Migrate {
        /// Database file path
        #[arg(long)]
        db: PathBuf,
    },
    /// Re-encrypt every encrypted column under a new key
    RotateKey {
        /// Database file path
        #[arg(long)]
        db: PathBuf,
    },
    /// Print the core version and a liveness probe
    Ping,
}

fn main() {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        if let Err(err) = init_logging(&cli.log_level, log_dir) {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    }

    let result = match cli.command {
        Commands::Migrate { db } => migrate(&db),
        Commands::RotateKey { db } => rotate_key(&db),
        Commands::Ping => {
            println!("paystore_core ping={}", paystore_core::ping());
            println!("paystore_core version={}", paystore_core::core_version());
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn migrate(db: &Path) -> Result<(), StorageError> {
    let conn = open_db(db)?;
    let version = current_version(&conn)?;
    println!("schema_version={version}");
    Ok(())
}

fn rotate_key(db: &Path) -> Result<(), StorageError> {
    let old = FieldCipher::new(key_from_env(ENV_OLD_KEY)?);
    let new = FieldCipher::new(key_from_env(ENV_NEW_KEY)?);

    let conn = open_db(db)?;
    for rotation in rotate_all(&conn, &old, &new)? {
        println!(
            "rotated {}.{} rows={}",
            rotation.table, rotation.blob_column, rotation.rows
        );
    }
    Ok(())
}

fn key_from_env(name: &str) -> Result<EncryptionKey, StorageError> {
    let value = std::env::var(name)
        .map_err(|_| StorageError::validation(format!("{name} must be set")))?;
    EncryptionKey::new(value)
}
