use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::db::analyzer::SchemaAnalyzer;
use crate::error::ReportError;
use crate::schema::SchemaDescription;

/// One immutable result of schema analysis.
#[derive(Debug, Serialize)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub analyzed_at: DateTime<Utc>,
    pub schema: SchemaDescription,
}

/// A struct to cache and manage database schema information
pub struct SchemaManager {
    /// Identity of the database the analyzer talks to
    connection_key: String,
    analyzer: SchemaAnalyzer,
    /// Installed snapshots by connection identity
    schema_cache: RwLock<HashMap<String, Arc<SchemaSnapshot>>>,
    /// Serializes analysis so concurrent misses analyze once
    refresh_lock: Mutex<()>,
    next_version: AtomicU64,
}

impl SchemaManager {
    pub fn new(analyzer: SchemaAnalyzer, connection_key: impl Into<String>) -> Self {
        Self {
            connection_key: connection_key.into(),
            analyzer,
            schema_cache: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    /// The installed snapshot, if analysis has run.
    pub async fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        self.schema_cache.read().await.get(&self.connection_key).cloned()
    }

    /// Cached snapshot, analyzing on first use.
    pub async fn snapshot(&self) -> Result<Arc<SchemaSnapshot>, ReportError> {
        if let Some(snapshot) = self.current().await {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another request may have finished analysis while we waited
        if let Some(snapshot) = self.current().await {
            debug!("Schema snapshot v{} installed while waiting", snapshot.version);
            return Ok(snapshot);
        }

        self.analyze_and_install().await
    }

    /// Forces re-analysis. Requests holding the previous snapshot keep it.
    pub async fn refresh_cache(&self) -> Result<Arc<SchemaSnapshot>, ReportError> {
        info!("Refreshing schema cache");
        let _guard = self.refresh_lock.lock().await;
        self.analyze_and_install().await
    }

    async fn analyze_and_install(&self) -> Result<Arc<SchemaSnapshot>, ReportError> {
        let schema = self.analyzer.analyze().await?;

        let snapshot = Arc::new(SchemaSnapshot {
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
            analyzed_at: Utc::now(),
            schema,
        });

        let mut cache = self.schema_cache.write().await;
        cache.insert(self.connection_key.clone(), Arc::clone(&snapshot));

        info!(
            "Schema cache refreshed: version {} with {} tables",
            snapshot.version,
            snapshot.schema.tables.len()
        );
        Ok(snapshot)
    }
}
