use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(payments_health))
        .route("/stk-push", post(payment_handlers::initiate_stk_push))
        .route("/callback", post(payment_handlers::mpesa_callback))
        .route("/query", post(payment_handlers::query_transaction_status))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "status-query"]
    }))
}
