use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::controller;
use crate::api::handlers::AppState;
use crate::services::ControllerRegistry;

/// Create router over the controllers held by `registry`
pub fn create_router(registry: ControllerRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/controllers", get(controller::list_controllers))
        .route(
            "/api/controllers/{id}",
            delete(controller::remove_controller),
        )
        .route("/api/controllers/{id}/connect", post(controller::connect))
        .route("/api/controllers/{id}/execute", post(controller::execute))
        .route("/api/controllers/{id}/explain", post(controller::explain))
        .route("/api/controllers/{id}/cost", post(controller::estimated_cost))
        .route(
            "/api/controllers/{id}/hints",
            put(controller::set_hint).delete(controller::reset_hints),
        )
        .route(
            "/api/controllers/{id}/indexes",
            get(controller::list_indexes)
                .post(controller::create_index)
                .delete(controller::drop_indexes),
        )
        .route("/api/controllers/{id}/indexes/size", get(controller::index_size))
        .route("/api/controllers/{id}/tables", get(controller::list_tables))
        .route(
            "/api/controllers/{id}/tables/{table}/rows",
            get(controller::table_row_count),
        )
        .route("/api/controllers/{id}/pull", post(controller::pull_data))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    async fn app_with_spark() -> Router {
        let registry = ControllerRegistry::new();
        registry.open("local", ConnectionConfig::spark("api")).await.unwrap();
        create_router(registry)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(ControllerRegistry::new());
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("OK".to_string()));
    }

    #[tokio::test]
    async fn test_execute_and_explain_over_http() {
        let app = app_with_spark().await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/controllers/local/execute",
            Some(json!({ "sql": "CREATE TABLE t (id INT) AS VALUES (1), (2)", "fetch": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/controllers/local/execute",
            Some(json!({ "sql": "SELECT id FROM t ORDER BY id", "fetch_column_names": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], json!([["id"], [1], [2]]));
        assert_eq!(body["execution"]["outcome"]["status"], "completed");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/controllers/local/explain",
            Some(json!({ "sql": "SELECT id FROM t", "comment": "tagged" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"]["kind"], "physical");
    }

    #[tokio::test]
    async fn test_unsupported_maps_to_not_implemented() {
        let app = app_with_spark().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/controllers/local/cost",
            Some(json!({ "sql": "SELECT 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"]["code"], "UNSUPPORTED_OPERATION");
    }

    #[tokio::test]
    async fn test_unknown_controller() {
        let app = app_with_spark().await;
        let (status, body) = send(&app, Method::POST, "/api/controllers/nope/connect", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_pull_and_remove() {
        let app = app_with_spark().await;

        let (_, body) = send(&app, Method::GET, "/api/controllers", None).await;
        assert_eq!(body["controllers"][0]["name"], "local");
        assert_eq!(body["controllers"][0]["kind"], "spark");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/controllers/local/pull",
            Some(json!({ "sql": "SELECT 1 AS one", "products": ["records", "estimated_cost"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pull"]["unavailable"], json!(["estimated_cost"]));
        assert_eq!(body["pull"]["records"]["rows"], json!([[1]]));

        let (status, _) = send(&app, Method::DELETE, "/api/controllers/local", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, "/api/controllers/local", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
