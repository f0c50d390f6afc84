//! Connection / session provider
//!
//! Owns the pooled engine for the target database and exposes the bridge used to
//! run blocking migration-tool code against a transactional connection.

use crate::config::DatabaseConfig;
use crate::error::{internal_error, InitError, MigrationError};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::fmt;
use tokio::runtime::Handle;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// SQL dialect of the target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    Postgresql,
    Mysql,
    Sqlite,
    Other(String),
}

impl Dialect {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Dialect::Postgresql,
            "mysql" | "mariadb" => Dialect::Mysql,
            "sqlite" => Dialect::Sqlite,
            other => Dialect::Other(other.to_string()),
        }
    }

    /// Whether the administrative connector knows how to create a database for this dialect
    pub fn supports_creation(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }

    /// Administrative database that always exists on a server of this dialect
    pub fn admin_database(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgresql => Some("template1"),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgresql => f.write_str("postgresql"),
            Dialect::Mysql => f.write_str("mysql"),
            Dialect::Sqlite => f.write_str("sqlite"),
            Dialect::Other(name) => f.write_str(name),
        }
    }
}

/// Identifies the administrative target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseIdentity {
    pub dialect: Dialect,
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl DatabaseIdentity {
    /// Connection URL with the password masked for display
    pub fn connection_url(&self) -> String {
        format!(
            "{}://{}:****@{}:{}/{}",
            self.dialect, self.user, self.host, self.port, self.database
        )
    }
}

impl From<&DatabaseConfig> for DatabaseIdentity {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            dialect: Dialect::from_name(&config.dialect),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            host: config.host.clone(),
            port: config.port,
            use_tls: config.use_tls,
        }
    }
}

/// Blocking connection handed to synchronous jobs.
///
/// Every call completes before returning; the job runs on a dedicated blocking worker
/// and never on an async executor thread.
pub trait SyncConnection: Send {
    /// Execute one or more statements, discarding any rows
    fn batch_execute(&mut self, sql: &str) -> Result<(), MigrationError>;

    /// Run a query and return the first column of every row as text.
    /// NULL values are skipped.
    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, MigrationError>;
}

/// Synchronous callable run to completion against a transactional connection
pub type SyncJob = Box<dyn FnOnce(&mut dyn SyncConnection) -> Result<(), InitError> + Send>;

/// Connection / session provider consumed by the initializer
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Engine metadata of the target database
    fn identity(&self) -> &DatabaseIdentity;

    /// Open a transactional scope, run `job` on a dedicated blocking context and await it.
    ///
    /// Commits when the job succeeds, rolls back when it fails.
    async fn run_sync(&self, job: SyncJob) -> Result<(), InitError>;
}

/// deadpool-backed session provider for PostgreSQL
pub struct PgSessionProvider {
    pool: Pool,
    identity: DatabaseIdentity,
    echo: bool,
}

impl PgSessionProvider {
    /// Create the pool. No connection is opened until the first `run_sync`, so the target
    /// database may not exist yet.
    pub fn new(config: &DatabaseConfig) -> Result<Self, InitError> {
        let pool = create_pool(config)?;
        let identity = DatabaseIdentity::from(config);

        info!("Session provider ready for {}", identity.connection_url());

        Ok(Self {
            pool,
            identity,
            echo: config.echo,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    async fn run_sync(&self, job: SyncJob) -> Result<(), InitError> {
        let client = self.pool.get().await?;
        let mut conn = PgSyncConnection {
            client,
            handle: Handle::current(),
            echo: self.echo,
        };

        tokio::task::spawn_blocking(move || run_in_transaction(&mut conn, job))
            .await
            .map_err(|e| internal_error(format!("Sync bridge task failed: {}", e)))?
    }
}

/// Run `job` between BEGIN and COMMIT, rolling back instead when it fails
pub(crate) fn run_in_transaction(
    conn: &mut dyn SyncConnection,
    job: SyncJob,
) -> Result<(), InitError> {
    conn.batch_execute("BEGIN")?;
    match job(&mut *conn) {
        Ok(()) => {
            conn.batch_execute("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = conn.batch_execute("ROLLBACK") {
                warn!("Rollback after failed sync job also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// Pooled client driven from a blocking worker through the runtime handle
struct PgSyncConnection {
    client: Object,
    handle: Handle,
    echo: bool,
}

impl SyncConnection for PgSyncConnection {
    fn batch_execute(&mut self, sql: &str) -> Result<(), MigrationError> {
        if self.echo {
            debug!(target: "db_initializer::echo", "{}", sql);
        }
        self.handle.block_on(self.client.batch_execute(sql))?;
        Ok(())
    }

    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, MigrationError> {
        if self.echo {
            debug!(target: "db_initializer::echo", "{}", sql);
        }
        let rows = self.handle.block_on(self.client.query(sql, &[]))?;
        rows.iter()
            .filter_map(|row| row.try_get::<_, Option<String>>(0).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(MigrationError::from)
    }
}

/// Create a connection pool with given configuration
fn create_pool(config: &DatabaseConfig) -> Result<Pool, InitError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if config.use_tls {
        cfg.create_pool(Some(Runtime::Tokio1), make_tls())
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
    };

    pool.map_err(|e| InitError::Config(format!("Failed to create pool: {}", e)))
}

/// rustls connector trusting the platform's native roots
pub(crate) fn make_tls() -> tokio_postgres_rustls::MakeRustlsConnect {
    let certs = rustls_native_certs::load_native_certs();
    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs.certs {
        root_store.add(cert).ok();
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tokio_postgres_rustls::MakeRustlsConnect::new(tls_config)
}
