use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod db;
mod error;
mod llm;
mod pipeline;
mod report;
mod schema;
mod sql;
mod util;
mod web;

#[cfg(test)]
mod test_support;

use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::build_pool;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = AppConfig::new(&args).context("failed to load configuration")?;

    // Initialize logging
    init_tracing(config.debug, config.log_json);

    info!(
        "Initializing DuckDB connection pool for {} (read-only: {})",
        if config.database.is_in_memory() {
            "an in-memory database"
        } else {
            "a database file"
        },
        config.database.read_only
    );
    let pool = build_pool(&config.database);

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = match LlmManager::new(&config.llm) {
        Ok(manager) => manager,
        Err(e) => {
            warn!("AI generation unavailable, every report will use rule-based SQL: {}", e);
            LlmManager::disabled(&config.llm)
        }
    };

    let app_state = Arc::new(
        AppState::new(config.clone(), pool, llm_manager)
            .context("failed to initialize application state")?,
    );

    // Warm the schema cache
    info!("Initializing schema cache");
    match app_state.schema_manager.snapshot().await {
        Ok(snapshot) => info!(
            "Schema cache ready: {} tables (version {})",
            snapshot.schema.tables.len(),
            snapshot.version
        ),
        Err(e) => {
            // Continue anyway, the first request analyzes again
            error!("Failed to initialize schema cache: {}", app_state.sanitize(e));
        }
    }

    // Start the web server
    info!("Starting NL-JRXML server on {}:{}", config.web.host, config.web.port);
    web::run_server(config.web, app_state).await?;
    info!("Server stopped gracefully");

    Ok(())
}
