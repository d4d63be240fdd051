use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use runningman_shared::payment::PaymentError;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error("Undecodable callback body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("merchant_ref {0:?} is not an invoice id")]
    InvalidMerchantRef(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::SignatureInvalid => StatusCode::FORBIDDEN,
            WebhookError::Decode(_)
            | WebhookError::InvalidMerchantRef(_)
            | WebhookError::Payment(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %self, "Tripay callback failed");
        } else {
            tracing::warn!(%status, error = %self, "Tripay callback rejected");
        }

        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}
