use axum::Router;

use crate::config::AppConfig;

/// Defaults pointed at a private in-memory database with the AI disabled.
pub fn memory_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.connection_string = ":memory:".to_string();
    config.database.connect_timeout_secs = 1;
    config.llm.backend = "none".to_string();
    config
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
