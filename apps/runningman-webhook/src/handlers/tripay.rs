use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use runningman_shared::payment::PaymentNotice;
use runningman_shared::tripay::{verify_callback, CallbackPayload};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "X-Callback-Signature";

/// Tripay payment callback. The signature covers the raw body, so it is
/// checked before anything is parsed.
pub async fn handle_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::SignatureInvalid)?;
    if !verify_callback(&state.private_key, &body, signature) {
        return Err(WebhookError::SignatureInvalid);
    }

    let payload: CallbackPayload = serde_json::from_slice(&body)?;
    let invoice_id = Uuid::parse_str(payload.merchant_ref.trim())
        .map_err(|_| WebhookError::InvalidMerchantRef(payload.merchant_ref.clone()))?;

    let notice = PaymentNotice {
        reference: payload.reference,
        invoice_id,
        amount: payload.total_amount,
        status: payload.status,
    };
    let outcome = state.payments.reconcile(&notice).await?;
    info!(
        reference = %notice.reference,
        invoice_id = %invoice_id,
        status = %notice.status,
        ?outcome,
        "Tripay callback handled"
    );

    Ok(Json(json!({ "status": true })))
}
