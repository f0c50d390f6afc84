//! Schema migration: revision extraction, the migration tool and the applier step

pub mod applier;
pub mod revision;
pub mod scripts;
pub mod tool;

pub use applier::apply_migrations;
pub use revision::{extract_revision, RevisionSet};
pub use scripts::ScriptMigrationTool;
pub use tool::{MigrationTool, OutputBuffer, HEAD_TARGET};
