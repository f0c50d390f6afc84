//! In-memory collaborators for unit tests

use crate::admin::{AdminConnection, AdminConnector};
use crate::error::{ConnectError, InitError, MigrationError};
use crate::migration::tool::MigrationTool;
use crate::session::{
    run_in_transaction, DatabaseIdentity, Dialect, SessionProvider, SyncConnection, SyncJob,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn identity(dialect: Dialect) -> DatabaseIdentity {
    DatabaseIdentity {
        dialect,
        database: "orders".to_string(),
        user: "app".to_string(),
        password: "secret".to_string(),
        host: "localhost".to_string(),
        port: 5432,
        use_tls: false,
    }
}

/// Connection that understands just enough SQL to emulate a version table
#[derive(Debug, Default)]
pub struct FakeConnection {
    pub version_table_exists: bool,
    pub version: Option<String>,
    pub executed: Vec<String>,
}

impl FakeConnection {
    pub fn at_revision(revision: &str) -> Self {
        Self {
            version_table_exists: true,
            version: Some(revision.to_string()),
            executed: Vec::new(),
        }
    }
}

impl SyncConnection for FakeConnection {
    fn batch_execute(&mut self, sql: &str) -> Result<(), MigrationError> {
        self.executed.push(sql.to_string());
        if sql.contains("CREATE TABLE IF NOT EXISTS") {
            self.version_table_exists = true;
        }
        if let Some((_, rest)) = sql.split_once("VALUES ('") {
            if let Some((revision, _)) = rest.split_once("')") {
                self.version = Some(revision.to_string());
            }
        }
        Ok(())
    }

    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, MigrationError> {
        if sql.contains("information_schema.tables") {
            return Ok(if self.version_table_exists {
                vec!["schema_version".to_string()]
            } else {
                Vec::new()
            });
        }
        Ok(self.version.iter().cloned().collect())
    }
}

/// Session provider running jobs on a blocking worker against a [`FakeConnection`]
pub struct FakeSessionProvider {
    identity: DatabaseIdentity,
    pub conn: Arc<Mutex<FakeConnection>>,
    pub runs: Mutex<usize>,
}

impl FakeSessionProvider {
    pub fn new(identity: DatabaseIdentity) -> Self {
        Self {
            identity,
            conn: Arc::new(Mutex::new(FakeConnection::default())),
            runs: Mutex::new(0),
        }
    }
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    async fn run_sync(&self, job: SyncJob) -> Result<(), InitError> {
        *self.runs.lock().unwrap() += 1;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            run_in_transaction(&mut *conn, job)
        })
        .await
        .map_err(|e| InitError::Internal(e.to_string()))?
    }
}

/// Everything a [`FakeConnector`] was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    Connect(String),
    Execute(String),
    Close(String),
}

/// Administrative connector backed by a set of existing database names
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub databases: Arc<Mutex<HashSet<String>>>,
    pub calls: Arc<Mutex<Vec<AdminCall>>>,
    pub refuse: bool,
    pub fail_execute: bool,
}

impl FakeConnector {
    pub fn with_databases(names: &[&str]) -> Self {
        let connector = Self::default();
        connector
            .databases
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        connector
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AdminCall::Connect(_)))
            .count()
    }
}

#[async_trait]
impl AdminConnector for FakeConnector {
    async fn connect(
        &self,
        database: &str,
        _user: &str,
        _password: &str,
    ) -> Result<Box<dyn AdminConnection>, ConnectError> {
        self.calls.lock().unwrap().push(AdminCall::Connect(database.to_string()));
        if self.refuse {
            return Err(ConnectError::Failed {
                database: database.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
                    .into(),
            });
        }
        if !self.databases.lock().unwrap().contains(database) {
            return Err(ConnectError::UnknownCatalog(database.to_string()));
        }
        Ok(Box::new(FakeAdminConnection {
            database: database.to_string(),
            connector: self.clone(),
        }))
    }
}

struct FakeAdminConnection {
    database: String,
    connector: FakeConnector,
}

#[async_trait]
impl AdminConnection for FakeAdminConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectError> {
        self.connector.calls.lock().unwrap().push(AdminCall::Execute(sql.to_string()));
        if self.connector.fail_execute {
            return Err(ConnectError::Execute(
                io::Error::new(io::ErrorKind::PermissionDenied, "permission denied").into(),
            ));
        }
        if let Some(rest) = sql.strip_prefix("CREATE DATABASE \"") {
            if let Some((name, _)) = rest.split_once('"') {
                self.connector.databases.lock().unwrap().insert(name.to_string());
            }
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.connector.calls.lock().unwrap().push(AdminCall::Close(self.database.clone()));
    }
}

/// Migration tool replaying canned output and counting upgrades
#[derive(Default)]
pub struct FakeTool {
    pub heads_output: String,
    pub current_output: String,
    pub fail_heads: bool,
    pub upgrades: Mutex<Vec<String>>,
}

impl FakeTool {
    pub fn new(heads_output: &str, current_output: &str) -> Self {
        Self {
            heads_output: heads_output.to_string(),
            current_output: current_output.to_string(),
            ..Self::default()
        }
    }

    pub fn upgrades(&self) -> Vec<String> {
        self.upgrades.lock().unwrap().clone()
    }
}

impl MigrationTool for FakeTool {
    fn heads(&self, _config: &Path, out: &mut dyn Write) -> Result<(), MigrationError> {
        if self.fail_heads {
            return Err(MigrationError::MultipleHeads("a, b".to_string()));
        }
        out.write_all(self.heads_output.as_bytes())?;
        Ok(())
    }

    fn current(
        &self,
        _config: &Path,
        _conn: &mut dyn SyncConnection,
        out: &mut dyn Write,
    ) -> Result<(), MigrationError> {
        out.write_all(self.current_output.as_bytes())?;
        Ok(())
    }

    fn upgrade(
        &self,
        _config: &Path,
        _conn: &mut dyn SyncConnection,
        target: &str,
        _out: &mut dyn Write,
    ) -> Result<(), MigrationError> {
        self.upgrades.lock().unwrap().push(target.to_string());
        Ok(())
    }
}
