use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::Connection;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::db::db_pool::DuckDbPool;
use crate::error::ReportError;
use crate::report::model::{QueryResult, ResultColumn};
use crate::schema::ColumnType;

/// Runs gated SQL on a pooled connection with a row cap and a timeout.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: DuckDbPool,
    max_rows: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: DuckDbPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            max_rows: config.max_rows.max(1),
            timeout: config.query_timeout(),
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryResult, ReportError> {
        let start_time = Instant::now();
        info!("Executing SQL query: {}", sql);

        let pool = self.pool.clone();
        let max_rows = self.max_rows;
        let owned_sql = sql.to_string();

        // The pooled connection lives inside the blocking task and goes back on every exit path
        let task = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| ReportError::Connection(e.to_string()))?;
            run_query(&conn, &owned_sql, max_rows)
        });

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                error!("Query task failed: {}", e);
                return Err(ReportError::Internal(format!("query task failed: {}", e)));
            }
            Err(_) => {
                error!("Query timed out after {:?}", self.timeout);
                return Err(ReportError::Timeout {
                    stage: "query",
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        info!(
            "Query executed successfully. Row count: {}, truncated: {}, execution time: {}ms",
            result.row_count(),
            result.truncated,
            start_time.elapsed().as_millis()
        );

        Ok(result)
    }
}

/// Executes `sql` on `conn`, keeping at most `max_rows` rows.
pub fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryResult, ReportError> {
    let execution_error = |e: duckdb::Error| ReportError::QueryExecution {
        sql: sql.to_string(),
        message: e.to_string(),
    };

    let mut stmt = conn.prepare(sql).map_err(execution_error)?;
    let arrow_batches = stmt.query_arrow([]).map_err(execution_error)?;
    let schema = arrow_batches.get_schema();

    let columns = schema
        .fields()
        .iter()
        .map(|field| ResultColumn {
            name: field.name().clone(),
            column_type: ColumnType::from(field.data_type()),
        })
        .collect::<Vec<_>>();

    let mut batches = Vec::new();
    let mut total = 0;
    let mut truncated = false;

    for batch in arrow_batches {
        if batch.num_rows() == 0 {
            continue;
        }
        if total >= max_rows {
            truncated = true;
            break;
        }
        let take = (max_rows - total).min(batch.num_rows());
        if take < batch.num_rows() {
            truncated = true;
        }
        total += take;
        batches.push(batch.slice(0, take));
    }

    let mut rows = Vec::with_capacity(total);
    for batch in &batches {
        rows.extend(batch_to_rows(batch)?);
    }

    debug!("Captured {} rows across {} batches", rows.len(), batches.len());

    Ok(QueryResult {
        columns,
        rows,
        truncated,
    })
}

/// Converts a record batch to JSON objects keyed by column name.
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Map<String, Value>>, ReportError> {
    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());

    let written = writer.write_batches(&[batch]).and_then(|_| writer.finish());
    if let Err(e) = written {
        debug!("JSON writer rejected batch ({}), formatting values as text", e);
        return display_rows(batch);
    }

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&buffer).map_err(|e| ReportError::Internal(e.to_string()))
}

// Types the JSON writer cannot encode are rendered with Arrow's display formatting
fn display_rows(batch: &RecordBatch) -> Result<Vec<Map<String, Value>>, ReportError> {
    let options = FormatOptions::default();
    let schema = batch.schema();

    let formatters = batch
        .columns()
        .iter()
        .map(|array| ArrayFormatter::try_new(array.as_ref(), &options))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ReportError::Internal(e.to_string()))?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut object = Map::new();
        for (i, formatter) in formatters.iter().enumerate() {
            let value = if batch.column(i).is_null(row) {
                Value::Null
            } else {
                Value::String(formatter.value(row).to_string())
            };
            object.insert(schema.field(i).name().clone(), value);
        }
        rows.push(object);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::db_pool::build_pool;

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR, created_at DATE, active BOOLEAN);
             INSERT INTO customers VALUES
                (1, 'Ada', DATE '2024-01-02', true),
                (2, 'Grace', DATE '2024-02-03', NULL),
                (3, 'Linus', NULL, false);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn captures_columns_types_and_rows() {
        let conn = seeded_connection();
        let result = run_query(&conn, "SELECT id, name, created_at, active FROM customers ORDER BY id", 100)
            .unwrap();

        assert_eq!(result.column_names(), vec!["id", "name", "created_at", "active"]);
        assert_eq!(result.columns[0].column_type, ColumnType::Integer);
        assert_eq!(result.columns[1].column_type, ColumnType::Text);
        assert_eq!(result.columns[2].column_type, ColumnType::Date);
        assert_eq!(result.columns[3].column_type, ColumnType::Boolean);

        assert_eq!(result.row_count(), 3);
        assert!(!result.truncated);
        assert_eq!(result.rows[0]["name"], "Ada");
        assert_eq!(result.rows[1]["active"], Value::Null);
    }

    #[test]
    fn enforces_the_row_limit() {
        let conn = seeded_connection();
        let result = run_query(&conn, "SELECT * FROM customers", 2).unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn empty_results_keep_column_metadata() {
        let conn = seeded_connection();
        let result = run_query(&conn, "SELECT id, name FROM customers WHERE id < 0", 10).unwrap();
        assert_eq!(result.column_names(), vec!["id", "name"]);
        assert_eq!(result.row_count(), 0);
    }

    #[test]
    fn missing_objects_are_execution_errors() {
        let conn = seeded_connection();
        let err = run_query(&conn, "SELECT * FROM invoices", 10).unwrap_err();
        match err {
            ReportError::QueryExecution { sql, message } => {
                assert_eq!(sql, "SELECT * FROM invoices");
                assert!(message.contains("invoices"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn executes_through_the_pool() {
        let mut config = AppConfig::default().database;
        config.connection_string = ":memory:".to_string();
        let pool = build_pool(&config);
        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE t AS SELECT range AS n FROM range(50)")
            .unwrap();

        config.max_rows = 10;
        let executor = QueryExecutor::new(pool, &config);
        let result = executor.execute("SELECT n FROM t ORDER BY n").await.unwrap();

        assert_eq!(result.row_count(), 10);
        assert!(result.truncated);
        assert_eq!(result.columns[0].column_type, ColumnType::BigInt);
    }
}
