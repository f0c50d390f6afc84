//! Migration applier
//!
//! Compares the scripts' head revision with the database's current revision and
//! upgrades to head when they differ. All three tool calls share one transactional
//! connection on the sync bridge.

use crate::error::InitError;
use crate::migration::revision::extract_revision;
use crate::migration::tool::{MigrationTool, OutputBuffer, HEAD_TARGET};
use crate::session::{SessionProvider, SyncConnection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Upgrade the target database to head if it is behind.
pub async fn apply_migrations(
    provider: &dyn SessionProvider,
    tool: Arc<dyn MigrationTool>,
    config_path: PathBuf,
) -> Result<(), InitError> {
    provider
        .run_sync(Box::new(move |conn: &mut dyn SyncConnection| {
            migrate_if_needed(tool.as_ref(), &config_path, conn)
        }))
        .await
}

fn migrate_if_needed(
    tool: &dyn MigrationTool,
    config_path: &Path,
    conn: &mut dyn SyncConnection,
) -> Result<(), InitError> {
    let mut buffer = OutputBuffer::new();

    tool.heads(config_path, &mut buffer)?;
    let heads = extract_revision(&buffer.take_text());

    tool.current(config_path, conn, &mut buffer)?;
    let current = extract_revision(&buffer.take_text());

    if current.is_in_sync_with(&heads) {
        info!("Database schema is up to date at revision [{}]", current);
        return Ok(());
    }

    info!("Upgrading database schema from [{}] to [{}]", current, heads);
    tool.upgrade(config_path, conn, HEAD_TARGET, &mut buffer)?;
    for line in buffer.take_text().lines().filter(|l| !l.is_empty()) {
        info!("{}", line);
    }

    Ok(())
}
