//! # charge-api
//!
//! HTTP API layer for the charge engine.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for issuing, querying and cancelling charges
//! - Webhook handlers for provider notifications
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/{tenant_id}/charges` | Issue a charge |
//! | GET | `/api/v1/{tenant_id}/charges` | List charges |
//! | GET | `/api/v1/{tenant_id}/charges/{charge_id}` | Get a charge |
//! | GET | `/api/v1/{tenant_id}/charges/{charge_id}/events` | Charge audit rows |
//! | POST | `/api/v1/{tenant_id}/charges/{charge_id}/cancel` | Cancel a charge |
//! | POST | `/webhook/pix` | PIX webhook |
//! | POST | `/webhook/boleto` | Boleto webhook |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
