//! Raw administrative connector
//!
//! Direct, unpooled connections against arbitrary database names on the target
//! server. Used to probe for the target database and to create it.

use crate::error::ConnectError;
use crate::session::{make_tls, DatabaseIdentity};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, NoTls, Socket};
use tracing::{debug, warn};

/// An open administrative connection
#[async_trait]
pub trait AdminConnection: Send {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectError>;

    async fn close(self: Box<Self>);
}

/// Opens administrative connections by database name
#[async_trait]
pub trait AdminConnector: Send + Sync {
    /// Connect to `database`.
    ///
    /// Fails with [`ConnectError::UnknownCatalog`] when the database does not exist.
    async fn connect(
        &self,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn AdminConnection>, ConnectError>;
}

/// tokio-postgres administrative connector for one server
#[derive(Debug, Clone)]
pub struct PgAdminConnector {
    host: String,
    port: u16,
    use_tls: bool,
}

impl PgAdminConnector {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
        }
    }

    /// Connector for the server hosting `identity`
    pub fn for_identity(identity: &DatabaseIdentity) -> Self {
        Self::new(identity.host.clone(), identity.port, identity.use_tls)
    }
}

#[async_trait]
impl AdminConnector for PgAdminConnector {
    async fn connect(
        &self,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn AdminConnection>, ConnectError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(user)
            .password(password)
            .dbname(database);

        let opened = if self.use_tls {
            open(&config, make_tls()).await
        } else {
            open(&config, NoTls).await
        };

        let (client, driver) = opened.map_err(|e| {
            if e.code() == Some(&SqlState::INVALID_CATALOG_NAME) {
                ConnectError::UnknownCatalog(database.to_string())
            } else {
                ConnectError::Failed {
                    database: database.to_string(),
                    source: Box::new(e),
                }
            }
        })?;

        debug!("Opened administrative connection to {}", database);
        Ok(Box::new(PgAdminConnection { client, driver }))
    }
}

async fn open<T>(
    config: &tokio_postgres::Config,
    tls: T,
) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error>
where
    T: MakeTlsConnect<Socket> + Send + 'static,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = config.connect(tls).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Administrative connection error: {}", e);
        }
    });
    Ok((client, driver))
}

struct PgAdminConnection {
    client: Client,
    driver: JoinHandle<()>,
}

#[async_trait]
impl AdminConnection for PgAdminConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectError> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| ConnectError::Execute(Box::new(e)))
    }

    async fn close(self: Box<Self>) {
        let PgAdminConnection { client, driver } = *self;
        // Dropping the client terminates the session; the driver task then finishes.
        drop(client);
        if let Err(e) = driver.await {
            warn!("Administrative connection task failed: {}", e);
        }
    }
}

/// Quote an identifier for PostgreSQL DDL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE DATABASE` statement owned by `owner`
pub fn create_database_sql(database: &str, owner: &str) -> String {
    format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(database),
        quote_ident(owner)
    )
}
