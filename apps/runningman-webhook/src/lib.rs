//! HTTP receiver for Tripay payment callbacks.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, Request};
use axum::routing::post;
use axum::Router;
use runningman_shared::payment::PaymentService;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn};
use uuid::Uuid;

pub mod error;
pub mod handlers;

pub use error::WebhookError;

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentService,
    pub private_key: Arc<str>,
}

impl AppState {
    pub fn new(payments: PaymentService, private_key: impl Into<Arc<str>>) -> Self {
        Self {
            payments,
            private_key: private_key.into(),
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::POST]);
    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
        info_span!(
            "callback",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            uri = %req.uri(),
        )
    });

    Router::new()
        .route("/", post(handlers::tripay::handle_callback))
        .layer(cors_layer(allowed_origins))
        .layer(trace)
        .with_state(state)
}
