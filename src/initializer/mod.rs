//! Database initializer
//!
//! Runs an ordered, append-only list of idempotent steps before the service starts
//! serving traffic. The two default steps make sure the target database exists and
//! that its schema is at the latest revision. Each step body runs under the
//! initializer's mutex; the mutex is released between steps.

pub mod existence;

use crate::admin::{AdminConnector, PgAdminConnector};
use crate::error::InitError;
use crate::migration::{apply_migrations, MigrationTool, ScriptMigrationTool};
use crate::session::{DatabaseIdentity, SessionProvider};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

pub use existence::ensure_database_exists;

/// Name of the default step creating the target database
pub const ENSURE_DATABASE_STEP: &str = "ensure_database_exists";
/// Name of the default step upgrading the schema
pub const APPLY_MIGRATIONS_STEP: &str = "apply_migrations";

pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), InitError>> + Send>>;

type StepAction = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// A named, argument-less unit of work. Must be safe to run again from scratch.
#[derive(Clone)]
pub struct InitializationStep {
    name: String,
    action: StepAction,
}

impl InitializationStep {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), InitError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || Box::pin(action()) as StepFuture),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), InitError> {
        (self.action)().await
    }
}

impl fmt::Debug for InitializationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A single step can be passed wherever a sequence of steps is accepted
impl IntoIterator for InitializationStep {
    type Item = InitializationStep;
    type IntoIter = std::iter::Once<InitializationStep>;

    fn into_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}

/// Outcome of the latest `initialize()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Schema metadata descriptor for the target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    pub schema: String,
    pub tables: Vec<String>,
}

impl Default for SchemaMetadata {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            tables: Vec::new(),
        }
    }
}

pub struct Initializer {
    identity: DatabaseIdentity,
    metadata: SchemaMetadata,
    steps: Vec<InitializationStep>,
    lock: Mutex<()>,
    state: RwLock<RunState>,
}

impl Initializer {
    /// Initializer using the PostgreSQL administrative connector and the SQL script
    /// migration tool configured at `migrations_config`.
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        metadata: SchemaMetadata,
        migrations_config: impl Into<PathBuf>,
    ) -> Self {
        let connector = Arc::new(PgAdminConnector::for_identity(provider.identity()));
        Self::with_collaborators(
            provider,
            connector,
            Arc::new(ScriptMigrationTool::new()),
            metadata,
            migrations_config,
        )
    }

    pub fn with_collaborators(
        provider: Arc<dyn SessionProvider>,
        connector: Arc<dyn AdminConnector>,
        tool: Arc<dyn MigrationTool>,
        metadata: SchemaMetadata,
        migrations_config: impl Into<PathBuf>,
    ) -> Self {
        let identity = provider.identity().clone();
        let migrations_config = migrations_config.into();

        let ensure_database = {
            let connector = Arc::clone(&connector);
            let identity = identity.clone();
            InitializationStep::new(ENSURE_DATABASE_STEP, move || {
                let connector = Arc::clone(&connector);
                let identity = identity.clone();
                async move { ensure_database_exists(connector.as_ref(), &identity).await }
            })
        };

        let migrate = InitializationStep::new(APPLY_MIGRATIONS_STEP, move || {
            let provider = Arc::clone(&provider);
            let tool = Arc::clone(&tool);
            let config = migrations_config.clone();
            async move { apply_migrations(provider.as_ref(), tool, config).await }
        });

        Self {
            identity,
            metadata,
            steps: vec![ensure_database, migrate],
            lock: Mutex::new(()),
            state: RwLock::new(RunState::Idle),
        }
    }

    /// Append one step or a sequence of steps, preserving order
    pub fn add_initialization_steps<I>(&mut self, steps: I)
    where
        I: IntoIterator<Item = InitializationStep>,
    {
        self.steps.extend(steps);
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(InitializationStep::name).collect()
    }

    pub fn metadata(&self) -> &SchemaMetadata {
        &self.metadata
    }

    pub fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    /// Run every registered step in order, stopping at the first failure.
    ///
    /// Each call starts again from the first step.
    pub async fn initialize(&self) -> Result<(), InitError> {
        info!("Run initialization for db [{}]", self.identity.database);
        *self.state.write().await = RunState::Running;

        for (offset, step) in self.steps.iter().enumerate() {
            if let Err(e) = self.run_step(offset + 1, step).await {
                *self.state.write().await = RunState::Failed;
                return Err(e);
            }
        }

        *self.state.write().await = RunState::Completed;
        info!("Initialization for db [{}] completed", self.identity.database);
        Ok(())
    }

    async fn run_step(&self, index: usize, step: &InitializationStep) -> Result<(), InitError> {
        let result = {
            let _guard = self.lock.lock().await;
            info!(
                step = index,
                step_name = step.name(),
                "Run init step [{}], execute [{}]",
                index,
                step.name()
            );
            step.run().await
        };

        result.map_err(|source| {
            error!(
                step = index,
                step_name = step.name(),
                "Init step [{}] was failed by executing [{}]: {}",
                index,
                step.name(),
                source
            );
            InitError::StepFailed {
                index,
                name: step.name().to_string(),
                source: Box::new(source),
            }
        })
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer")
            .field("database", &self.identity.database)
            .field("steps", &self.step_names())
            .finish_non_exhaustive()
    }
}
