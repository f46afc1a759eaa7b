//! # API Routes
//!
//! Route definitions for the Axum application.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router
///
/// Routes:
/// - GET  /health - Health check and configured providers
///
/// - API v1, scoped by tenant:
///   - POST /api/v1/{tenant_id}/charges - Issue a charge
///   - GET  /api/v1/{tenant_id}/charges - List charges
///   - GET  /api/v1/{tenant_id}/charges/{charge_id} - Get a charge
///   - GET  /api/v1/{tenant_id}/charges/{charge_id}/events - Audit rows
///   - POST /api/v1/{tenant_id}/charges/{charge_id}/cancel - Cancel a pending charge
///
/// - Webhooks:
///   - POST /webhook/pix - PIX notifications
///   - POST /webhook/boleto - Bank-slip notifications
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/{tenant_id}/charges",
            get(handlers::list_charges).post(handlers::create_charge),
        )
        .route("/{tenant_id}/charges/{charge_id}", get(handlers::get_charge))
        .route(
            "/{tenant_id}/charges/{charge_id}/events",
            get(handlers::charge_events),
        )
        .route(
            "/{tenant_id}/charges/{charge_id}/cancel",
            post(handlers::cancel_charge),
        );

    // Webhook routes (must accept raw body for signatures)
    let webhook_routes = Router::new()
        .route("/pix", post(handlers::pix_webhook))
        .route("/boleto", post(handlers::boleto_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
