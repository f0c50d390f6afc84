//! Create the target database if it does not exist yet

use crate::admin::{create_database_sql, AdminConnector};
use crate::error::{ConnectError, InitError};
use crate::session::DatabaseIdentity;
use tracing::{debug, info};

/// Probe the target database and create it when the server reports an unknown catalog.
///
/// Any other connection failure is returned unchanged. Every connection opened here
/// is closed before returning.
pub async fn ensure_database_exists(
    connector: &dyn AdminConnector,
    identity: &DatabaseIdentity,
) -> Result<(), InitError> {
    let probe = connector
        .connect(&identity.database, &identity.user, &identity.password)
        .await;

    match probe {
        Ok(conn) => {
            conn.close().await;
            debug!("Database [{}] already exists", identity.database);
            Ok(())
        }
        Err(ConnectError::UnknownCatalog(_)) => create_database(connector, identity).await,
        Err(e) => Err(e.into()),
    }
}

async fn create_database(
    connector: &dyn AdminConnector,
    identity: &DatabaseIdentity,
) -> Result<(), InitError> {
    let admin_database = match identity.dialect.admin_database() {
        Some(database) if identity.dialect.supports_creation() => database,
        _ => return Err(InitError::UnsupportedDialect(identity.dialect.to_string())),
    };

    // The target can't be connected to yet, so create it from a database every server has.
    let mut conn = connector
        .connect(admin_database, &identity.user, &identity.password)
        .await?;
    let created = conn
        .execute(&create_database_sql(&identity.database, &identity.user))
        .await;
    conn.close().await;
    created?;

    info!(
        "Created database [{}] owned by [{}]",
        identity.database, identity.user
    );
    Ok(())
}
