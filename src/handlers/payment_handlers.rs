// handlers/payment_handlers.rs
use axum::{
    extract::{Json, State},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::{AppError, Result};
use crate::models::callback::CallbackEnvelope;
use crate::services::mpesa_gateway::{StkPushResponse, StkQueryResponse};
use crate::state::AppState;

// Callers send numeric fields as either JSON strings or numbers; accept
// both.
fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn initiate_stk_push(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<StkPushResponse>> {
    let full_name = string_field(&payload, "full_name");
    let phone_number = string_field(&payload, "phone_number");
    let amount = string_field(&payload, "amount");

    let response = state
        .payments
        .initiate(full_name, phone_number, amount)
        .await?;
    Ok(Json(response))
}

/// Inbound Daraja callback. A malformed envelope or an unknown
/// `CheckoutRequestID` gets the fixed `{"ok": false}` body with HTTP 200,
/// so the gateway does not keep retrying a payload we can never apply;
/// replays are harmless either way.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    let envelope: CallbackEnvelope = match serde_json::from_value(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("discarding malformed callback envelope: {}", e);
            return Json(json!({ "ok": false })).into_response();
        }
    };

    match state
        .payments
        .handle_callback(envelope.body.stk_callback)
        .await
    {
        Ok(transaction) => Json(json!({ "ok": true, "transaction": transaction })).into_response(),
        Err(AppError::TransactionNotFound(checkout_request_id)) => {
            warn!(
                checkout_request_id = %checkout_request_id,
                "callback for unknown transaction"
            );
            Json(json!({ "ok": false })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn query_transaction_status(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<StkQueryResponse>> {
    let checkout_request_id = string_field(&payload, "checkout_request_id");
    let response = state.payments.query(checkout_request_id).await?;
    Ok(Json(response))
}
