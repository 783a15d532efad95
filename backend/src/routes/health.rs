use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
}

/// GET /ping - liveness check
async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ok" })
}

pub fn router() -> Router {
    Router::new().route("/ping", get(ping))
}
