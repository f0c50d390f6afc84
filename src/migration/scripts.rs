//! SQL script migration tool
//!
//! Revisions are plain `.sql` files in a script directory. Each file starts with a
//! comment header naming its revision and its parent:
//!
//! ```sql
//! -- Revision ID: 2b7c1f
//! -- Revises: 9a01e3
//! -- Message: add orders table
//! CREATE TABLE orders (...);
//! ```
//!
//! The applied revision is recorded in a single-row version table.

use crate::admin::quote_ident;
use crate::error::MigrationError;
use crate::migration::tool::{MigrationTool, HEAD_TARGET};
use crate::session::SyncConnection;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

fn default_version_table() -> String {
    "schema_version".to_string()
}

#[derive(Debug, Deserialize)]
struct ToolFile {
    migrations: ToolSection,
}

#[derive(Debug, Deserialize)]
struct ToolSection {
    script_location: PathBuf,
    #[serde(default = "default_version_table")]
    version_table: String,
}

/// Resolved migration tool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptConfig {
    pub script_location: PathBuf,
    pub version_table: String,
}

impl ScriptConfig {
    /// Load the `[migrations]` section of a TOML config file.
    ///
    /// A relative `script_location` is resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let config_error = |reason: String| MigrationError::Config {
            path: path.display().to_string(),
            reason,
        };

        let file: ToolFile = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| config_error(e.to_string()))?;

        let section = file.migrations;
        if section.version_table.trim().is_empty() {
            return Err(config_error("version_table must not be empty".to_string()));
        }

        let script_location = if section.script_location.is_relative() {
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&section.script_location)
        } else {
            section.script_location
        };

        Ok(Self {
            script_location,
            version_table: section.version_table,
        })
    }
}

/// One revision script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub revision: String,
    pub down_revision: Option<String>,
    pub message: String,
    pub path: PathBuf,
    pub sql: String,
}

impl Script {
    /// Parse a script's header. The whole file is kept as the upgrade SQL.
    pub fn parse(path: &Path, text: &str) -> Result<Self, MigrationError> {
        let mut revision = None;
        let mut down_revision = None;
        let mut message = String::new();

        let header = text
            .lines()
            .map(str::trim)
            .take_while(|line| line.is_empty() || line.starts_with("--"));

        for line in header {
            let Some((key, value)) = line.trim_start_matches('-').split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Revision ID" => revision = Some(value.to_string()),
                "Revises" if !value.is_empty() => down_revision = Some(value.to_string()),
                "Message" => message = value.to_string(),
                _ => {}
            }
        }

        let revision = revision
            .filter(|r| !r.is_empty())
            .ok_or_else(|| MigrationError::InvalidScript {
                file: path.display().to_string(),
                reason: "missing '-- Revision ID:' header".to_string(),
            })?;

        Ok(Self {
            revision,
            down_revision,
            message,
            path: path.to_path_buf(),
            sql: text.to_string(),
        })
    }

    fn describe(&self, is_head: bool, out: &mut dyn Write) -> std::io::Result<()> {
        let parent = self.down_revision.as_deref();
        writeln!(
            out,
            "Rev: {}{}",
            self.revision,
            if is_head { " (head)" } else { "" }
        )?;
        writeln!(out, "Parent: {}", parent.unwrap_or("<base>"))?;
        writeln!(out, "Path: {}", self.path.display())?;
        writeln!(out)?;
        writeln!(out, "    {}", self.message)?;
        writeln!(out)?;
        writeln!(out, "    Revision ID: {}", self.revision)?;
        writeln!(out, "    Revises: {}", parent.unwrap_or(""))?;
        writeln!(out)
    }
}

/// All scripts found in a script directory, keyed by revision
#[derive(Debug, Default)]
pub struct ScriptDirectory {
    scripts: HashMap<String, Script>,
}

impl ScriptDirectory {
    pub fn load(dir: &Path) -> Result<Self, MigrationError> {
        let mut paths = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.retain(|p| p.extension().is_some_and(|ext| ext == "sql"));
        paths.sort();

        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            scripts.push(Script::parse(&path, &text)?);
        }

        debug!("Loaded {} migration scripts from {}", scripts.len(), dir.display());
        Self::from_scripts(scripts)
    }

    /// Validate revision ids and parent links
    pub fn from_scripts(scripts: Vec<Script>) -> Result<Self, MigrationError> {
        let mut by_revision: HashMap<String, Script> = HashMap::with_capacity(scripts.len());
        for script in scripts {
            if let Some(existing) = by_revision.get(&script.revision) {
                return Err(MigrationError::InvalidScript {
                    file: script.path.display().to_string(),
                    reason: format!(
                        "revision {} already defined in {}",
                        script.revision,
                        existing.path.display()
                    ),
                });
            }
            by_revision.insert(script.revision.clone(), script);
        }

        for script in by_revision.values() {
            if let Some(parent) = &script.down_revision {
                if !by_revision.contains_key(parent) {
                    return Err(MigrationError::InvalidScript {
                        file: script.path.display().to_string(),
                        reason: format!("revises unknown revision {}", parent),
                    });
                }
            }
        }

        let directory = Self {
            scripts: by_revision,
        };
        directory.check_acyclic()?;
        Ok(directory)
    }

    /// Every parent chain must end at a base revision
    fn check_acyclic(&self) -> Result<(), MigrationError> {
        for script in self.scripts.values() {
            let mut seen = HashSet::new();
            let mut cursor = Some(script);
            while let Some(current) = cursor {
                if !seen.insert(current.revision.as_str()) {
                    return Err(MigrationError::InvalidScript {
                        file: script.path.display().to_string(),
                        reason: "revision cycle detected".to_string(),
                    });
                }
                cursor = current.down_revision.as_deref().and_then(|parent| self.get(parent));
            }
        }
        Ok(())
    }

    pub fn get(&self, revision: &str) -> Option<&Script> {
        self.scripts.get(revision)
    }

    /// Revisions no other script revises, sorted
    pub fn heads(&self) -> Vec<&Script> {
        let parents: HashSet<&str> = self
            .scripts
            .values()
            .filter_map(|s| s.down_revision.as_deref())
            .collect();

        let mut heads: Vec<&Script> = self
            .scripts
            .values()
            .filter(|s| !parents.contains(s.revision.as_str()))
            .collect();
        heads.sort_by(|a, b| a.revision.cmp(&b.revision));
        heads
    }

    /// Scripts to apply, in order, to move from `from` (exclusive) to `to` (inclusive)
    pub fn upgrade_path(
        &self,
        from: Option<&str>,
        to: &str,
    ) -> Result<Vec<&Script>, MigrationError> {
        let mut path = Vec::new();
        let mut cursor = Some(to);

        while cursor != from {
            let Some(revision) = cursor else {
                // Walked past the base without meeting `from`
                let from = from.unwrap_or_default();
                return Err(MigrationError::UnknownRevision(from.to_string()));
            };
            let script = self
                .get(revision)
                .ok_or_else(|| MigrationError::UnknownRevision(revision.to_string()))?;
            path.push(script);
            cursor = script.down_revision.as_deref();
        }

        path.reverse();
        Ok(path)
    }
}

/// Migration tool driven by a directory of SQL scripts
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptMigrationTool;

impl ScriptMigrationTool {
    pub fn new() -> Self {
        Self
    }

    fn load(config: &Path) -> Result<(ScriptConfig, ScriptDirectory), MigrationError> {
        let config = ScriptConfig::load(config)?;
        let directory = ScriptDirectory::load(&config.script_location)?;
        Ok((config, directory))
    }

    /// Revision recorded in the version table, if the table exists
    fn applied_revision(
        conn: &mut dyn SyncConnection,
        version_table: &str,
    ) -> Result<Option<String>, MigrationError> {
        let exists = conn.query_strings(&format!(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = '{}'",
            version_table.replace('\'', "''")
        ))?;
        if exists.is_empty() {
            return Ok(None);
        }

        let versions = conn.query_strings(&format!(
            "SELECT version_num FROM {}",
            quote_ident(version_table)
        ))?;
        Ok(versions.into_iter().next())
    }
}

impl MigrationTool for ScriptMigrationTool {
    fn heads(&self, config: &Path, out: &mut dyn Write) -> Result<(), MigrationError> {
        let (_, directory) = Self::load(config)?;
        for head in directory.heads() {
            head.describe(true, out)?;
        }
        Ok(())
    }

    fn current(
        &self,
        config: &Path,
        conn: &mut dyn SyncConnection,
        out: &mut dyn Write,
    ) -> Result<(), MigrationError> {
        let (config, directory) = Self::load(config)?;
        let Some(revision) = Self::applied_revision(conn, &config.version_table)? else {
            return Ok(());
        };

        let script = directory
            .get(&revision)
            .ok_or_else(|| MigrationError::UnknownRevision(revision.clone()))?;
        let is_head = directory.heads().iter().any(|h| h.revision == revision);
        script.describe(is_head, out)?;
        Ok(())
    }

    fn upgrade(
        &self,
        config: &Path,
        conn: &mut dyn SyncConnection,
        target: &str,
        out: &mut dyn Write,
    ) -> Result<(), MigrationError> {
        let (config, directory) = Self::load(config)?;

        let target = if target == HEAD_TARGET {
            let heads = directory.heads();
            match heads.as_slice() {
                [] => return Ok(()),
                [head] => head.revision.clone(),
                _ => {
                    let names: Vec<&str> = heads.iter().map(|h| h.revision.as_str()).collect();
                    return Err(MigrationError::MultipleHeads(names.join(", ")));
                }
            }
        } else {
            target.to_string()
        };

        let current = Self::applied_revision(conn, &config.version_table)?;
        let table = quote_ident(&config.version_table);

        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(64) NOT NULL PRIMARY KEY)",
            table
        ))?;

        let mut previous = current.clone();
        for script in directory.upgrade_path(current.as_deref(), &target)? {
            writeln!(
                out,
                "Running upgrade {} -> {}, {}",
                previous.as_deref().unwrap_or(""),
                script.revision,
                script.message
            )?;
            conn.batch_execute(&script.sql)?;
            conn.batch_execute(&format!(
                "DELETE FROM {table}; INSERT INTO {table} (version_num) VALUES ('{}')",
                script.revision.replace('\'', "''")
            ))?;
            previous = Some(script.revision.clone());
        }

        Ok(())
    }
}
