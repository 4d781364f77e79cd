use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ReportConfig};
use crate::db::db_pool::DuckDbPool;
use crate::db::executor::QueryExecutor;
use crate::db::schema_manager::SchemaManager;
use crate::error::ReportError;
use crate::llm::LlmManager;
use crate::llm::models::{GeneratedQuery, Provenance};
use crate::report::jrxml::JrxmlGenerator;
use crate::report::layout::{ReportOptions, build_spec};
use crate::schema::SchemaDescription;
use crate::sql::fallback::FallbackGenerator;
use crate::sql::classify::{Complexity, QueryType, assess_complexity, classify_request};
use crate::sql::guard::{apply_default_order, apply_row_limit, check_read_only, referenced_tables};

/// A rendered report plus everything the caller may want to show about it.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub jrxml: String,
    pub file_name: String,
    pub sql: String,
    pub provenance: Provenance,
    pub explanation: Option<String>,
    pub row_count: usize,
    pub truncated: bool,
    pub model_used: Option<String>,
    pub tables_used: Vec<String>,
    pub query_type: QueryType,
    pub complexity: Complexity,
    pub schema_version: u64,
    pub warnings: Vec<String>,
    pub execution_ms: u128,
}

/// Request text to JRXML: schema, SQL generation, gate, execution, rendering.
pub struct ReportPipeline {
    schema_manager: Arc<SchemaManager>,
    llm: Arc<LlmManager>,
    executor: QueryExecutor,
    fallback: FallbackGenerator,
    jrxml: JrxmlGenerator,
    report_config: ReportConfig,
    connection_string: String,
}

impl ReportPipeline {
    pub fn new(
        config: &AppConfig,
        pool: DuckDbPool,
        schema_manager: Arc<SchemaManager>,
        llm: Arc<LlmManager>,
    ) -> Result<Self, ReportError> {
        let jrxml = JrxmlGenerator::new()
            .map_err(|e| ReportError::Internal(format!("failed to load report template: {}", e)))?;

        Ok(Self {
            schema_manager,
            llm,
            executor: QueryExecutor::new(pool, &config.database),
            fallback: FallbackGenerator::new(config.report.fallback_row_limit),
            jrxml,
            report_config: config.report.clone(),
            connection_string: config.database.connection_string.clone(),
        })
    }

    pub async fn generate(
        &self,
        request: &str,
        model: Option<&str>,
    ) -> Result<GeneratedReport, ReportError> {
        self.run(request.trim(), model)
            .await
            .map_err(|e| e.sanitize(&self.connection_string))
    }

    async fn run(&self, request: &str, model: Option<&str>) -> Result<GeneratedReport, ReportError> {
        let start_time = Instant::now();
        let snapshot = self.schema_manager.snapshot().await?;
        let schema = &snapshot.schema;
        if schema.is_empty() {
            return Err(ReportError::EmptySchema);
        }

        let mut warnings = Vec::new();
        let (query, model_used) = self.generate_sql(schema, request, model, &mut warnings).await;
        if query.is_empty() {
            return Err(ReportError::EmptySchema);
        }

        let sql = match query.provenance() {
            Provenance::Ai => {
                let ordered = order_listing(query.sql(), schema);
                self.limit_large_reads(&ordered, schema, &mut warnings)
            }
            Provenance::Fallback => query.sql().to_string(),
        };
        let sql = check_read_only(&sql).map_err(|e| {
            ReportError::Internal(format!("generated SQL failed the read-only check: {}", e))
        })?;

        let result = self.executor.execute(&sql).await?;
        debug!("Result columns: {:?}", result.column_names());
        if result.truncated {
            warnings.push(format!(
                "Result truncated to the first {} rows",
                result.row_count()
            ));
        }

        let now = Utc::now();
        let report_name = format!("report_{}", now.format("%Y%m%d_%H%M%S"));
        let spec = build_spec(
            &result,
            &ReportOptions {
                title: request,
                report_name: &report_name,
                sql: &sql,
                hints: query.hints(),
            },
        );
        let jrxml = self.jrxml.render(&spec)?;

        let query_type = classify_request(request);
        let elapsed = start_time.elapsed().as_millis();
        info!(
            "Generated {} {} report from {} SQL with {} rows in {}ms",
            query_type,
            report_name,
            query.provenance(),
            result.row_count(),
            elapsed
        );

        Ok(GeneratedReport {
            jrxml,
            file_name: format!("{}.jrxml", report_name),
            tables_used: referenced_tables(&sql),
            query_type,
            complexity: assess_complexity(&sql),
            sql,
            provenance: query.provenance(),
            explanation: query.explanation().map(str::to_string),
            row_count: result.row_count(),
            truncated: result.truncated,
            model_used,
            schema_version: snapshot.version,
            warnings,
            execution_ms: elapsed,
        })
    }

    /// AI first when enabled. Every AI-side failure lands on the fallback generator.
    async fn generate_sql(
        &self,
        schema: &SchemaDescription,
        request: &str,
        model: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> (GeneratedQuery, Option<String>) {
        if self.llm.is_enabled() {
            let model_name = model.unwrap_or(self.llm.default_model()).to_string();

            match self.llm.generate_query(schema, request, model).await {
                Ok(query) if query.is_empty() => {
                    warn!("AI returned no SQL, using fallback generator");
                    warnings.push("AI returned no SQL; a rule-based query was used".to_string());
                }
                Ok(query) => match check_read_only(query.sql()) {
                    Ok(sql) => return (query.with_sql(sql), Some(model_name)),
                    Err(e) => {
                        warn!("Rejected AI SQL ({}): {}", e, query.sql());
                        warnings.push(format!(
                            "AI query rejected ({}); a rule-based query was used",
                            e
                        ));
                    }
                },
                Err(e) => {
                    warn!("AI generation failed, using fallback generator: {}", e);
                    warnings.push(format!(
                        "AI generation failed ({}); a rule-based query was used",
                        e
                    ));
                }
            }
        }

        (self.fallback.generate(schema, request), None)
    }

    fn limit_large_reads(
        &self,
        sql: &str,
        schema: &SchemaDescription,
        warnings: &mut Vec<String>,
    ) -> String {
        match apply_row_limit(
            sql,
            schema,
            self.report_config.large_table_threshold,
            self.report_config.ai_row_limit,
        ) {
            Some(limited) => {
                info!("Appended LIMIT {} to a query over a large table", self.report_config.ai_row_limit);
                warnings.push(format!(
                    "LIMIT {} added because the query reads a large table",
                    self.report_config.ai_row_limit
                ));
                limited
            }
            None => sql.to_string(),
        }
    }
}

/// Plain AI listings come back newest first when the table has an obvious key or date.
fn order_listing(sql: &str, schema: &SchemaDescription) -> String {
    match apply_default_order(sql, schema) {
        Some(ordered) => {
            debug!("Added a default ORDER BY to AI SQL");
            ordered
        }
        None => sql.to_string(),
    }
}
