use duckdb::{AccessMode, Config, Connection};
use r2d2::ManageConnection;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::config::DatabaseConfig;

pub type DuckDbPool = r2d2::Pool<DuckDBConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<DuckDBConnectionManager>;

/// Hands out clones of a single lazily-opened database handle, so every pooled
/// connection (in-memory databases included) sees the same database.
pub struct DuckDBConnectionManager {
    connection_string: String,
    read_only: bool,
    root: Mutex<Option<Connection>>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String, read_only: bool) -> Self {
        Self {
            connection_string,
            read_only,
            root: Mutex::new(None),
        }
    }

    fn is_in_memory(&self) -> bool {
        let conn = self.connection_string.trim();
        conn.is_empty() || conn == ":memory:"
    }

    fn open(&self) -> Result<Connection, duckdb::Error> {
        if self.is_in_memory() {
            return Connection::open_in_memory();
        }

        let path = self.connection_string.trim();
        if self.read_only {
            info!("Opening database read-only");
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            Connection::open_with_flags(path, config)
        } else {
            Connection::open(path)
        }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = root.as_ref() {
            return conn.try_clone();
        }

        debug!("Opening database handle");
        let conn = root.insert(self.open()?);
        conn.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Builds the pool without connecting; an unreachable database surfaces on first checkout.
pub fn build_pool(config: &DatabaseConfig) -> DuckDbPool {
    let manager =
        DuckDBConnectionManager::new(config.connection_string.clone(), config.read_only);

    r2d2::Pool::builder()
        .max_size(config.pool_size.max(1) as u32)
        .min_idle(Some(0))
        .connection_timeout(config.connect_timeout())
        .build_unchecked(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn db_config(connection_string: &str, read_only: bool) -> DatabaseConfig {
        let mut config = AppConfig::default().database;
        config.connection_string = connection_string.to_string();
        config.read_only = read_only;
        config.connect_timeout_secs = 1;
        config
    }

    #[test]
    fn in_memory_connections_share_one_database() {
        let pool = build_pool(&db_config(":memory:", true));

        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2);")
                .unwrap();
        }

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        let count: i64 = second
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        drop(first);
    }

    #[test]
    fn file_databases_open_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.duckdb");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1);")
                .unwrap();
        }

        let pool = build_pool(&db_config(path.to_str().unwrap(), true));
        let conn = pool.get().unwrap();

        let a: i32 = conn.query_row("SELECT a FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(a, 1);
        assert!(conn.execute_batch("INSERT INTO t VALUES (2)").is_err());
    }

    #[test]
    fn missing_database_fails_on_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("missing.duckdb");

        let pool = build_pool(&db_config(path.to_str().unwrap(), true));
        assert!(pool.get().is_err());
    }
}
