//! Database bootstrap for services backed by PostgreSQL
//!
//! Before a service starts serving traffic, [`Initializer::initialize`] makes sure the
//! target database exists and that its schema is at the latest revision known to the
//! migration scripts. Callers may append their own idempotent steps.

pub mod admin;
pub mod config;
pub mod error;
pub mod initializer;
pub mod migration;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ConnectError, InitError, InitResult, MigrationError};
pub use initializer::{InitializationStep, Initializer, RunState, SchemaMetadata};
pub use session::{DatabaseIdentity, Dialect, PgSessionProvider, SessionProvider};
