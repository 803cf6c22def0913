//! Dashboard server binary.
//!
//! Reads configuration from flags and environment, opens the connection
//! pool and serves the change channel until shutdown.

use clap::Parser;
use dashboard_core::api::{self, ApiError};
use dashboard_core::config::{Config, ConfigError, redact_url};
use dashboard_core::db::{Database, DatabasePool, DbError};
use dashboard_core::realtime::ChangeNotifier;
use miette::Diagnostic;
use thiserror::Error;
use tracing::info;

#[derive(Error, Diagnostic, Debug)]
enum BinaryError {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(dashboard::binary::config))]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    #[diagnostic(code(dashboard::binary::database))]
    Database(#[from] DbError),

    #[error("API server error: {0}")]
    #[diagnostic(code(dashboard::binary::api))]
    Api(#[from] ApiError),
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let config = Config::parse();
    api::init_tracing();

    serve(config).await?;
    Ok(())
}

async fn serve(config: Config) -> Result<(), BinaryError> {
    config.validate()?;

    info!(
        "Opening database {} ({} connections)",
        redact_url(&config.database_url),
        config.pool_max
    );
    let pool = DatabasePool::connect(config.pool()).await?;

    let notifier = ChangeNotifier::new();
    let db = Database::new(pool).with_notifier(notifier.clone());

    api::run(&config, db, notifier).await?;
    Ok(())
}
