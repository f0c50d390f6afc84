//! Error handling module
//!
//! Provides the error types shared by the initializer, its steps and collaborators.
//! Only the initializer translates failures into [`InitError::StepFailed`]; every
//! other error bubbles up unchanged.

use thiserror::Error;

/// Driver-level cause carried by connector errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initialization-wide error type
#[derive(Error, Debug)]
pub enum InitError {
    /// A step body failed; no later step ran in that `initialize()` call.
    #[error("Init step [{index}] was failed by executing [{name}]: {source}")]
    StepFailed {
        index: usize,
        name: String,
        #[source]
        source: Box<InitError>,
    },

    #[error("No database creation for dialect [{0}]")]
    UnsupportedDialect(String),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Arbitrary failure raised by a caller-registered step
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InitError {
    /// Step index (1-based) and name when this is a step failure
    pub fn failed_step(&self) -> Option<(usize, &str)> {
        match self {
            InitError::StepFailed { index, name, .. } => Some((*index, name.as_str())),
            _ => None,
        }
    }
}

/// Errors raised by the raw administrative connector
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The named database does not exist on the server
    #[error("Database \"{0}\" does not exist")]
    UnknownCatalog(String),

    #[error("Failed to connect to database \"{database}\": {source}")]
    Failed {
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to execute statement: {0}")]
    Execute(#[source] BoxError),
}

/// Errors raised by the migration tool and the sync bridge it runs on
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to load migration config from {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("Failed to read migration scripts: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid migration script {file}: {reason}")]
    InvalidScript { file: String, reason: String },

    #[error("Multiple head revisions present: {0}")]
    MultipleHeads(String),

    #[error("Can't locate revision identified by '{0}'")]
    UnknownRevision(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

/// Result type alias for initialization operations
pub type InitResult<T> = Result<T, InitError>;

/// Helper function to create an internal error
pub fn internal_error(msg: impl Into<String>) -> InitError {
    InitError::Internal(msg.into())
}
