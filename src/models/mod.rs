use anyhow::{Context, Result};
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::path::Path;

pub mod agent;
pub mod billing_transaction;
pub mod call_record;
pub mod campaign;
pub mod contact;
pub mod migration;
pub mod ticket;
pub mod ticket_message;
pub mod user;

/// Creates the parent directory and an empty file for `sqlite://` URLs so the
/// driver can open them. Other backends and in-memory URLs are left untouched.
pub fn prepare_sqlite_database(database_url: &str) -> Result<()> {
    let Some(path_part) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };

    let (path_str, _) = path_part.split_once('?').unwrap_or((path_part, ""));
    if path_str.is_empty() || path_str.starts_with(':') {
        return Ok(());
    }

    let path = Path::new(path_str);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to create database file {}", path.display()))?;
    }
    Ok(())
}

pub async fn create_db(database_url: &str) -> Result<DatabaseConnection> {
    prepare_sqlite_database(database_url)?;
    let db = Database::connect(database_url)
        .await
        .with_context(|| format!("failed to connect database: {}", database_url))?;

    migration::Migrator::up(&db, None)
        .await
        .context("failed to run database migrations")?;
    Ok(db)
}
