pub mod handlers;
pub mod routes;
pub mod state;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue},
    Router,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::WebConfig;
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("cannot resolve {}:{}", config.host, config.port))?
        .next()
        .with_context(|| format!("no address for {}:{}", config.host, config.port))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    let listener = tokio::net::TcpListener::from_std(socket.into())?;

    info!("Listening on http://{}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(e) => error!("Failed to listen for the shutdown signal: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::db_pool::build_pool;
    use crate::llm::LlmManager;
    use crate::test_support::memory_config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(config: AppConfig, setup: &str) -> Router {
        let pool = build_pool(&config.database);
        if !setup.is_empty() {
            pool.get().unwrap().execute_batch(setup).unwrap();
        }
        let llm = LlmManager::disabled(&config.llm);
        build_router(Arc::new(AppState::new(config, pool, llm).unwrap()))
    }

    fn customers_app() -> Router {
        app(
            memory_config(),
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR, email VARCHAR);
             INSERT INTO customers VALUES (1, 'Ada', 'ada@example.com'), (2, 'Linus', 'linus@example.com');",
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn report_download_carries_metadata_headers() {
        let response = customers_app()
            .oneshot(post_json(
                "/api/reports",
                json!({ "request": "Show me all customers" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/xml"));
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"report_"));
        assert!(disposition.ends_with(".jrxml\""));
        assert_eq!(
            headers["x-generated-sql"],
            "SELECT * FROM customers LIMIT 100"
        );
        assert_eq!(headers["x-query-provenance"], "fallback");
        assert_eq!(headers["x-total-count"], "2");
        assert!(headers.contains_key("x-execution-time"));
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let jrxml = body_text(response).await;
        assert!(roxmltree::Document::parse(&jrxml).is_ok());
    }

    #[tokio::test]
    async fn preview_returns_json() {
        let response = customers_app()
            .oneshot(post_json(
                "/api/reports/preview",
                json!({ "request": "how many customers" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["provenance"], "fallback");
        assert_eq!(body["row_count"], 1);
        assert!(body["jrxml"].as_str().unwrap().starts_with("<?xml"));
        assert!(body["sql"].as_str().unwrap().contains("COUNT(*)"));
    }

    #[tokio::test]
    async fn blank_requests_are_rejected() {
        let response = customers_app()
            .oneshot(post_json("/api/reports", json!({ "request": "  " })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn empty_database_is_a_bad_request() {
        let response = app(memory_config(), "")
            .oneshot(post_json("/api/reports", json!({ "request": "anything" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"], "empty_schema");
    }

    #[tokio::test]
    async fn unreachable_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.database.connection_string = dir
            .path()
            .join("missing")
            .join("db.duckdb")
            .to_string_lossy()
            .to_string();
        config.database.read_only = true;

        let response = app(config.clone(), "")
            .oneshot(post_json("/api/reports", json!({ "request": "customers" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let text = body_text(response).await;
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["error"], "connection_error");
        assert!(!text.contains(&config.database.connection_string));
    }

    #[tokio::test]
    async fn schema_refresh_and_status() {
        let app = customers_app();

        let response = app.clone().oneshot(get("/api/schema")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let schema: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(schema["version"], 1);
        assert_eq!(schema["schema"]["tables"][0]["name"], "customers");

        let response = app
            .clone()
            .oneshot(post_json("/api/schema/refresh", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let refreshed: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(refreshed["version"], 2);
        assert_eq!(refreshed["table_count"], 1);

        let response = app.oneshot(get("/api/status")).await.unwrap();
        let status: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(status["ai_backend"], "none");
        assert_eq!(status["ai_enabled"], false);
        assert_eq!(status["schema_version"], 2);
    }
}
