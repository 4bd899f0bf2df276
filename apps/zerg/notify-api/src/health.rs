use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use redis::aio::ConnectionManager;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `/health` (liveness) and `/ready` (backend reachable)
pub fn router(redis: Option<ConnectionManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(redis)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready_handler(State(redis): State<Option<ConnectionManager>>) -> Response {
    let Some(redis) = redis else {
        return Json(ReadyResponse {
            ready: true,
            backend: "in-memory",
            error: None,
        })
        .into_response();
    };

    let mut conn = redis.clone();
    match redis::cmd("PING").query_async::<String>(&mut conn).await {
        Ok(_) => Json(ReadyResponse {
            ready: true,
            backend: "redis",
            error: None,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                backend: "redis",
                error: Some(format!("Redis ping failed: {}", e)),
            }),
        )
            .into_response(),
    }
}
