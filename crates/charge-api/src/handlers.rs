//! # Request Handlers
//!
//! Axum request handlers for the charge API and the provider webhooks.
//! Every charge route is scoped by the tenant in the path.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use charge_core::{
    Charge, ChargeError, ChargeMethod, ChargeRequest, ChargeStatus, ChargeStore, IssueMode,
    PayerRequest, PaymentRail, ProviderKind, ProviderNotification, ReconcileOutcome,
};
use charge_providers::{
    parse_boleto_notification, parse_pix_notifications, verify_signature, SIGNATURE_HEADER,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Create charge request
#[derive(Debug, Deserialize)]
pub struct CreateChargeRequest {
    #[serde(default)]
    pub unit_id: Option<String>,
    /// Decimal amount in BRL, e.g. `"150.00"`
    pub amount: Decimal,
    pub payer: PayerRequest,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    /// `pix` (default) or `boleto`
    #[serde(default)]
    pub rail: PaymentRail,
    /// `dynamic` (default) or `static`
    #[serde(default)]
    pub mode: IssueMode,
    /// Retry token (optional, `Idempotency-Key` header also accepted)
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Create charge response
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub charge_id: String,
    pub method: ChargeMethod,
    /// QR payload or digitable line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub status: ChargeStatus,
    pub amount: String,
    pub due_date: NaiveDate,
}

impl From<Charge> for ChargeResponse {
    fn from(charge: Charge) -> Self {
        Self {
            charge_id: charge.id,
            method: charge.method,
            payload: charge.payload,
            provider_ref: charge.provider_ref,
            payment_url: charge.payment_url,
            status: charge.status,
            amount: charge.amount.to_fixed(),
            due_date: charge.due_at,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn charge_error_to_response(err: ChargeError) -> ApiError {
    let code = err.status_code();
    let mut response = ErrorResponse::new(err.to_string(), code);
    if let ChargeError::IssuanceFailed { charge_id } = &err {
        response = response.with_details(format!("charge_id={}", charge_id));
    }
    if code >= 500 {
        error!("Request failed: {}", err);
    }
    (StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(response))
}

/// Load a charge owned by `tenant_id`
async fn tenant_charge(state: &AppState, tenant_id: &str, charge_id: &str) -> Result<Charge, ApiError> {
    state
        .store
        .get(charge_id)
        .await
        .map_err(charge_error_to_response)?
        .filter(|c| c.tenant_id == tenant_id)
        .ok_or_else(|| {
            charge_error_to_response(ChargeError::NotFound {
                charge_id: charge_id.to_string(),
            })
        })
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<_> = state.providers().iter().map(|p| p.as_str()).collect();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "charge-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers
    }))
}

/// Issue a charge for a tenant
#[instrument(skip(state, headers, request), fields(tenant_id = %tenant_id))]
pub async fn create_charge(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateChargeRequest>,
) -> Result<(StatusCode, Json<ChargeResponse>), ApiError> {
    let idempotency_key = request.idempotency_key.or_else(|| {
        headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });

    let charge = state
        .issuer
        .issue(ChargeRequest {
            tenant_id,
            unit_id: request.unit_id,
            amount: request.amount,
            payer: request.payer,
            due_date: request.due_date,
            description: request.description,
            rail: request.rail,
            mode: request.mode,
            idempotency_key,
        })
        .await
        .map_err(charge_error_to_response)?;

    Ok((StatusCode::CREATED, Json(charge.into())))
}

/// List a tenant's charges, newest first
pub async fn list_charges(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let charges = state
        .store
        .list_by_tenant(&tenant_id)
        .await
        .map_err(charge_error_to_response)?;
    Ok(Json(serde_json::json!({
        "count": charges.len(),
        "charges": charges
    })))
}

/// Get one charge
pub async fn get_charge(
    State(state): State<AppState>,
    Path((tenant_id, charge_id)): Path<(String, String)>,
) -> Result<Json<Charge>, ApiError> {
    tenant_charge(&state, &tenant_id, &charge_id).await.map(Json)
}

/// Audit rows tied to a charge
pub async fn charge_events(
    State(state): State<AppState>,
    Path((tenant_id, charge_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let charge = tenant_charge(&state, &tenant_id, &charge_id).await?;
    let events = state
        .store
        .events_for_charge(&charge.id)
        .await
        .map_err(charge_error_to_response)?;
    Ok(Json(serde_json::json!({
        "charge_id": charge.id,
        "events": events
    })))
}

/// Cancel a pending charge that its provider never registered
#[instrument(skip(state))]
pub async fn cancel_charge(
    State(state): State<AppState>,
    Path((tenant_id, charge_id)): Path<(String, String)>,
) -> Result<Json<ChargeResponse>, ApiError> {
    let charge = state
        .issuer
        .cancel(&tenant_id, &charge_id)
        .await
        .map_err(charge_error_to_response)?;
    Ok(Json(charge.into()))
}

/// Handle a PIX provider notification
#[instrument(skip(state, headers, body))]
pub async fn pix_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    authenticate(&state, ProviderKind::Pix, &headers, &body)?;
    let notifications = parse_pix_notifications(&body).map_err(|e| {
        warn!("Rejected PIX notification: {}", e);
        charge_error_to_response(e)
    })?;
    reconcile_all(&state, notifications).await
}

/// Handle a Boleto provider notification
#[instrument(skip(state, headers, body))]
pub async fn boleto_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    authenticate(&state, ProviderKind::Boleto, &headers, &body)?;
    let notification = parse_boleto_notification(&body).map_err(|e| {
        warn!("Rejected bank-slip notification: {}", e);
        charge_error_to_response(e)
    })?;
    reconcile_all(&state, vec![notification]).await
}

fn authenticate(
    state: &AppState,
    provider: ProviderKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_signature(state.webhooks.for_provider(provider), body, signature).map_err(|e| {
        warn!("{} webhook verification failed: {}", provider, e);
        charge_error_to_response(e)
    })
}

/// Apply notifications in order; outcomes other than storage failures are 200
async fn reconcile_all(
    state: &AppState,
    notifications: Vec<ProviderNotification>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut outcomes: Vec<ReconcileOutcome> = Vec::with_capacity(notifications.len());
    for notification in notifications {
        let outcome = state
            .reconciler
            .handle(notification)
            .await
            .map_err(charge_error_to_response)?;
        outcomes.push(outcome);
    }

    info!("Processed {} provider notification(s)", outcomes.len());
    Ok(Json(serde_json::json!({
        "received": outcomes.len(),
        "outcomes": outcomes
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Test error", 400);
        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_charge_error_conversion() {
        let (status, _json) = charge_error_to_response(ChargeError::Validation("Bad data".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _json) = charge_error_to_response(ChargeError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_issuance_failure_hides_provider_details() {
        let (status, Json(body)) = charge_error_to_response(ChargeError::IssuanceFailed {
            charge_id: "c1".to_string(),
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error, "Could not issue this charge");
        assert_eq!(body.details.as_deref(), Some("charge_id=c1"));
    }
}
