use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::db::analyzer::SchemaAnalyzer;
use crate::db::db_pool::DuckDbPool;
use crate::db::schema_manager::SchemaManager;
use crate::error::ReportError;
use crate::llm::LlmManager;
use crate::pipeline::ReportPipeline;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub schema_manager: Arc<SchemaManager>,
    pub llm_manager: Arc<LlmManager>,
    pub pipeline: ReportPipeline,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: DuckDbPool,
        llm_manager: LlmManager,
    ) -> Result<Self, ReportError> {
        let analyzer = SchemaAnalyzer::new(db_pool.clone(), &config.database);
        let schema_manager = Arc::new(SchemaManager::new(
            analyzer,
            config.database.connection_string.clone(),
        ));
        let llm_manager = Arc::new(llm_manager);

        let pipeline = ReportPipeline::new(
            &config,
            db_pool,
            Arc::clone(&schema_manager),
            Arc::clone(&llm_manager),
        )?;

        info!(
            "Application state ready (AI backend: {}, read-only: {})",
            llm_manager.backend(),
            config.database.read_only
        );

        Ok(Self {
            config,
            schema_manager,
            llm_manager,
            pipeline,
            startup_time: Utc::now(),
        })
    }

    /// Applies the connection-string scrubber to errors leaving the server.
    pub fn sanitize(&self, error: ReportError) -> ReportError {
        error.sanitize(&self.config.database.connection_string)
    }
}
