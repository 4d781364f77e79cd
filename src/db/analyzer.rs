use duckdb::Connection;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::db::db_pool::DuckDbPool;
use crate::db::executor::run_query;
use crate::error::ReportError;
use crate::schema::{
    ColumnInfo, ColumnType, IndexInfo, Relationship, RelationshipKind, SchemaDescription,
    TableInfo, table_key,
};

const TABLES_QUERY: &str = "
    SELECT table_schema, table_name
    FROM information_schema.tables
    WHERE table_catalog = current_database()
      AND table_schema NOT IN ('information_schema', 'pg_catalog')
      AND table_type IN ('BASE TABLE', 'VIEW')
    ORDER BY table_schema, table_name";

const COLUMNS_QUERY: &str = "
    SELECT column_name, data_type, is_nullable
    FROM information_schema.columns
    WHERE table_catalog = current_database()
      AND table_schema = ?
      AND table_name = ?
    ORDER BY ordinal_position";

const CONSTRAINTS_QUERY: &str = "
    SELECT schema_name, table_name, constraint_type, constraint_text
    FROM duckdb_constraints()
    WHERE database_name = current_database()
      AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY')";

const INDEXES_QUERY: &str = "
    SELECT schema_name, table_name, index_name, is_unique
    FROM duckdb_indexes()
    WHERE database_name = current_database()";

/// Key and index metadata for one table, collected from the catalog functions.
#[derive(Debug, Default)]
struct TableKeys {
    primary_key: Vec<String>,
    foreign_keys: Vec<Relationship>,
    indexes: Vec<IndexInfo>,
}

/// Introspects the database behind the pool into a `SchemaDescription`.
pub struct SchemaAnalyzer {
    pool: DuckDbPool,
    sample_rows: usize,
    timeout: Duration,
}

impl SchemaAnalyzer {
    pub fn new(pool: DuckDbPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            sample_rows: config.sample_rows(),
            timeout: config.connect_timeout() + config.query_timeout(),
        }
    }

    pub async fn analyze(&self) -> Result<SchemaDescription, ReportError> {
        let start_time = Instant::now();
        let pool = self.pool.clone();
        let sample_rows = self.sample_rows;

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| {
                error!("Failed to get a database connection: {}", e);
                ReportError::Connection(e.to_string())
            })?;
            analyze_connection(&conn, sample_rows)
        });

        let schema = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(schema)) => schema?,
            Ok(Err(e)) => return Err(ReportError::Internal(format!("schema analysis failed: {}", e))),
            Err(_) => {
                return Err(ReportError::Timeout {
                    stage: "schema analysis",
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        info!(
            "Analyzed {} tables ({} warnings) in {}ms",
            schema.tables.len(),
            schema.warnings.len(),
            start_time.elapsed().as_millis()
        );
        Ok(schema)
    }
}

/// Full analysis on one connection. Only failure to list tables is fatal.
pub fn analyze_connection(
    conn: &Connection,
    sample_rows: usize,
) -> Result<SchemaDescription, ReportError> {
    let mut schema = SchemaDescription::default();

    let tables = list_tables(conn).map_err(|e| {
        error!("Failed to list tables: {}", e);
        ReportError::Connection(format!("could not read the table catalog: {}", e))
    })?;
    debug!("Found {} tables", tables.len());

    let mut keys = match load_keys(conn) {
        Ok(keys) => keys,
        Err(e) => {
            record_warning(&mut schema, format!("Key metadata unavailable: {}", e));
            HashMap::new()
        }
    };

    match load_indexes(conn) {
        Ok(indexes) => {
            for (key, index) in indexes {
                keys.entry(key).or_default().indexes.push(index);
            }
        }
        Err(e) => record_warning(&mut schema, format!("Index metadata unavailable: {}", e)),
    }

    for (table_schema, table_name) in tables {
        let mut table = TableInfo::new(&table_schema, &table_name);

        match load_columns(conn, &table_schema, &table_name) {
            Ok(columns) => table.columns = columns,
            Err(e) => {
                record_warning(
                    &mut schema,
                    format!("Skipped table {}: column metadata failed: {}", table.name, e),
                );
                continue;
            }
        }

        if let Some(table_keys) = keys.remove(&table.name) {
            for column in table.columns.iter_mut() {
                column.primary_key = table_keys
                    .primary_key
                    .iter()
                    .any(|pk| pk.eq_ignore_ascii_case(&column.name));
            }
            table.relationships = table_keys.foreign_keys;
            table.indexes = table_keys.indexes;
        }

        let count_sql = format!("SELECT COUNT(*) FROM {}", table.sql_name());
        match conn.query_row(&count_sql, [], |row| row.get::<_, i64>(0)) {
            Ok(count) => table.row_count = count.max(0) as u64,
            Err(e) => record_warning(
                &mut schema,
                format!("Row count unavailable for {}: {}", table.name, e),
            ),
        }

        if sample_rows > 0 {
            let sample_sql = format!("SELECT * FROM {} LIMIT {}", table.sql_name(), sample_rows);
            match run_query(conn, &sample_sql, sample_rows) {
                Ok(result) => table.sample_rows = result.rows,
                Err(e) => record_warning(
                    &mut schema,
                    format!("Sample rows unavailable for {}: {}", table.name, e),
                ),
            }
        }

        schema.tables.push(table);
    }

    schema.infer_heuristic_relationships();
    Ok(schema)
}

fn record_warning(schema: &mut SchemaDescription, message: String) {
    warn!("{}", message);
    schema.warnings.push(message);
}

fn list_tables(conn: &Connection) -> Result<Vec<(String, String)>, duckdb::Error> {
    let mut stmt = conn.prepare(TABLES_QUERY)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    rows.collect()
}

fn load_columns(
    conn: &Connection,
    table_schema: &str,
    table_name: &str,
) -> Result<Vec<ColumnInfo>, duckdb::Error> {
    let mut stmt = conn.prepare(COLUMNS_QUERY)?;
    let rows = stmt.query_map([table_schema, table_name], |row| {
        let declared_type: String = row.get(1)?;
        Ok(ColumnInfo {
            name: row.get(0)?,
            column_type: ColumnType::from_sql_type(&declared_type),
            declared_type,
            nullable: row.get::<_, String>(2)? == "YES",
            primary_key: false,
        })
    })?;
    rows.collect()
}

fn primary_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)PRIMARY KEY\s*\(([^)]*)\)").ok())
        .as_ref()
}

fn foreign_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)FOREIGN KEY\s*\(([^)]*)\)\s*REFERENCES\s+([^\s(]+)\s*\(([^)]*)\)").ok()
        })
        .as_ref()
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn load_keys(conn: &Connection) -> Result<HashMap<String, TableKeys>, duckdb::Error> {
    let mut stmt = conn.prepare(CONSTRAINTS_QUERY)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut keys: HashMap<String, TableKeys> = HashMap::new();
    for (table_schema, table_name, constraint_type, text) in rows {
        let entry = keys.entry(table_key(&table_schema, &table_name)).or_default();

        if constraint_type == "PRIMARY KEY" {
            if let Some(caps) = primary_key_pattern().and_then(|re| re.captures(&text)) {
                entry.primary_key = split_columns(&caps[1]);
            }
            continue;
        }

        let Some(caps) = foreign_key_pattern().and_then(|re| re.captures(&text)) else {
            debug!("Unrecognized foreign key definition: {}", text);
            continue;
        };
        let referenced = caps[2].replace('"', "");
        let target_table = match referenced.split_once('.') {
            Some((target_schema, target)) => table_key(target_schema, target),
            None => table_key(&table_schema, &referenced),
        };

        let sources = split_columns(&caps[1]);
        let targets = split_columns(&caps[3]);
        for (source_column, target_column) in sources.into_iter().zip(targets) {
            entry.foreign_keys.push(Relationship {
                source_column,
                target_table: target_table.clone(),
                target_column,
                kind: RelationshipKind::Declared,
            });
        }
    }

    Ok(keys)
}

fn load_indexes(conn: &Connection) -> Result<Vec<(String, IndexInfo)>, duckdb::Error> {
    let mut stmt = conn.prepare(INDEXES_QUERY)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            table_key(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?),
            IndexInfo {
                name: row.get(2)?,
                unique: row.get(3)?,
            },
        ))
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::db_pool::build_pool;

    const FIXTURE: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR NOT NULL, email VARCHAR);
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER,
            total DECIMAL(10,2),
            created_at TIMESTAMP,
            FOREIGN KEY (customer_id) REFERENCES customers(id)
        );
        CREATE TABLE order_lines (id INTEGER PRIMARY KEY, order_id INTEGER, qty INTEGER);
        CREATE TABLE audit_log (customer_id INTEGER, tags VARCHAR[]);
        CREATE SCHEMA erp;
        CREATE TABLE erp.c_invoice (c_invoice_id INTEGER PRIMARY KEY, grandtotal DECIMAL(12,2));
        CREATE INDEX idx_orders_created ON orders(created_at);

        INSERT INTO customers VALUES (1, 'Ada', 'ada@example.com'), (2, 'Grace', NULL);
        INSERT INTO orders SELECT range, 1 + range % 2, range * 10.5, TIMESTAMP '2024-01-01 00:00:00'
            FROM range(1, 9);
        INSERT INTO audit_log VALUES (1, ['a', 'b']);
    ";

    fn analyzed(sample_rows: usize) -> SchemaDescription {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(FIXTURE).unwrap();
        analyze_connection(&conn, sample_rows).unwrap()
    }

    #[test]
    fn lists_tables_with_qualified_names() {
        let schema = analyzed(3);
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["erp.c_invoice", "audit_log", "customers", "order_lines", "orders"]
        );
        assert!(schema.warnings.is_empty(), "{:?}", schema.warnings);
    }

    #[test]
    fn reads_columns_keys_counts_and_samples() {
        let schema = analyzed(3);
        let orders = schema.table("orders").unwrap();

        let id = orders.column("id").unwrap();
        assert!(id.primary_key);
        assert_eq!(id.column_type, ColumnType::Integer);
        assert_eq!(orders.column("total").unwrap().column_type, ColumnType::Decimal);
        assert_eq!(orders.column("created_at").unwrap().column_type, ColumnType::Timestamp);

        assert_eq!(orders.row_count, 8);
        assert_eq!(orders.sample_rows.len(), 3);
        assert_eq!(orders.indexes.len(), 1);
        assert_eq!(orders.indexes[0].name, "idx_orders_created");

        let customers = schema.table("customers").unwrap();
        assert!(!customers.column("name").unwrap().nullable);
        assert!(customers.column("email").unwrap().nullable);
    }

    #[test]
    fn declared_and_heuristic_relationships_are_labeled() {
        let schema = analyzed(0);

        let orders = schema.table("orders").unwrap();
        assert_eq!(
            orders.relationships,
            vec![Relationship {
                source_column: "customer_id".to_string(),
                target_table: "customers".to_string(),
                target_column: "id".to_string(),
                kind: RelationshipKind::Declared,
            }]
        );

        let lines = schema.table("order_lines").unwrap();
        assert_eq!(lines.relationships.len(), 1);
        assert_eq!(lines.relationships[0].target_table, "orders");
        assert_eq!(lines.relationships[0].kind, RelationshipKind::Heuristic);

        // no primary key, so no relationships either way
        assert!(schema.table("audit_log").unwrap().relationships.is_empty());
    }

    #[test]
    fn unknown_types_are_surfaced_not_rejected() {
        let schema = analyzed(5);
        let audit = schema.table("audit_log").unwrap();
        assert!(matches!(
            audit.column("tags").unwrap().column_type,
            ColumnType::Unknown(_)
        ));
        assert_eq!(audit.sample_rows.len(), 1);
        assert!(schema.table("customers").unwrap().sample_rows.len() <= 5);
    }

    #[test]
    fn parses_composite_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE regions (country VARCHAR, code VARCHAR, PRIMARY KEY (country, code));
             CREATE TABLE stores (id INTEGER PRIMARY KEY, country VARCHAR, region_code VARCHAR,
                 FOREIGN KEY (country, region_code) REFERENCES regions (country, code));",
        )
        .unwrap();

        let schema = analyze_connection(&conn, 0).unwrap();
        let regions = schema.table("regions").unwrap();
        assert!(regions.columns.iter().all(|c| c.primary_key));

        let stores = schema.table("stores").unwrap();
        let targets: Vec<(&str, &str)> = stores
            .relationships
            .iter()
            .map(|r| (r.source_column.as_str(), r.target_column.as_str()))
            .collect();
        assert_eq!(targets, vec![("country", "country"), ("region_code", "code")]);
    }

    #[test]
    fn broken_objects_degrade_to_warnings() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR);
             INSERT INTO customers VALUES (1, 'Ada'), (2, 'Grace');
             CREATE TABLE legacy_orders (id INTEGER, total DOUBLE);
             CREATE VIEW stale_orders AS SELECT id, total FROM legacy_orders;
             DROP TABLE legacy_orders;",
        )
        .unwrap();

        let schema = analyze_connection(&conn, 2).unwrap();

        assert!(
            schema.warnings.iter().any(|w| w.contains("stale_orders")),
            "{:?}",
            schema.warnings
        );

        let customers = schema.table("customers").unwrap();
        assert_eq!(customers.row_count, 2);
        assert_eq!(customers.sample_rows.len(), 2);
        assert!(customers.column("id").unwrap().primary_key);

        // either skipped outright or kept without counts and samples
        if let Some(stale) = schema.table("stale_orders") {
            assert_eq!(stale.row_count, 0);
            assert!(stale.sample_rows.is_empty());
        }
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default().database;
        config.connection_string = dir
            .path()
            .join("missing")
            .join("erp.duckdb")
            .to_string_lossy()
            .to_string();
        config.connect_timeout_secs = 1;

        let analyzer = SchemaAnalyzer::new(build_pool(&config), &config);
        assert!(matches!(analyzer.analyze().await, Err(ReportError::Connection(_))));
    }
}
