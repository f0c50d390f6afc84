//! Database bootstrap binary
//!
//! Creates the configured database if needed and upgrades its schema to head,
//! then exits. Intended to run once before the hosting service starts.

use db_initializer::config::Settings;
use db_initializer::{Initializer, PgSessionProvider, SchemaMetadata};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting database initialization...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let provider = Arc::new(PgSessionProvider::new(&settings.database)?);
    let initializer = Initializer::new(
        provider,
        SchemaMetadata::default(),
        settings.migrations.config_path.clone(),
    );

    info!(
        "🗄️  Target {} (schema [{}])",
        initializer.identity().connection_url(),
        initializer.metadata().schema
    );

    // Any failed step aborts startup; the failing step has already been logged
    initializer.initialize().await?;

    info!("✅ Database [{}] is ready", settings.database.database);
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,db_initializer=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}
