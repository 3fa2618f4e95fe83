use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

async fn handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "shopchat"
    }))
}

pub fn routes() -> Router {
    Router::new().route("/health", get(handler))
}
