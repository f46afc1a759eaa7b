//! # Charge Error Types
//!
//! Typed error handling for the charge engine.
//! All charge operations return `Result<T, ChargeError>`.
//!
//! Provider failures are carried separately as [`ProviderUnavailable`] so the
//! PIX fallback decision is an explicit match on a typed value rather than a
//! caught error.

use crate::charge::ChargeStatus;
use crate::provider::ProviderKind;
use thiserror::Error;

/// Core error type for all charge operations
#[derive(Debug, Error)]
pub enum ChargeError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad amount / payer data, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// The charge could not be issued. Provider details stay in the audit log.
    #[error("Could not issue this charge")]
    IssuanceFailed { charge_id: String },

    /// Same idempotency token already used for a different request
    #[error("Idempotency conflict: key {key} already used with different parameters")]
    Conflict { key: String },

    /// Stale or duplicate state change
    #[error("Invalid transition for charge {charge_id}: expected {expected}, found {actual} (target {target})")]
    InvalidTransition {
        charge_id: String,
        expected: ChargeStatus,
        actual: ChargeStatus,
        target: ChargeStatus,
    },

    /// Registered charges change only through provider notifications
    #[error("Charge {charge_id} is registered with its provider and cannot be cancelled locally")]
    ProviderManaged { charge_id: String },

    /// Charge not found
    #[error("Charge not found: {charge_id}")]
    NotFound { charge_id: String },

    /// Static payment code could not be encoded or decoded
    #[error("Payment code error: {0}")]
    Encoding(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload is structurally invalid
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ChargeError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChargeError::Storage(_))
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ChargeError::Configuration(_) => 500,
            ChargeError::Validation(_) => 400,
            ChargeError::IssuanceFailed { .. } => 502,
            ChargeError::Conflict { .. } => 409,
            ChargeError::InvalidTransition { .. } => 409,
            ChargeError::ProviderManaged { .. } => 409,
            ChargeError::NotFound { .. } => 404,
            ChargeError::Encoding(_) => 500,
            ChargeError::WebhookVerificationFailed(_) => 401,
            ChargeError::WebhookParseError(_) => 400,
            ChargeError::Storage(_) => 500,
        }
    }
}

/// Result type alias for charge operations
pub type ChargeResult<T> = Result<T, ChargeError>;

/// Why a provider could not serve a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Provider not configured (no credentials / certificate material)
    NotConfigured,
    /// Certificate or key could not be loaded
    Certificate,
    /// Token endpoint rejected the credentials
    CredentialsRejected,
    /// Connection failure
    Network,
    /// Connect or total timeout elapsed
    Timeout,
    /// Provider answered with a non-2xx status
    Rejected,
    /// Provider answered 2xx with a body we could not use
    MalformedResponse,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnavailableReason::NotConfigured => "not configured",
            UnavailableReason::Certificate => "certificate rejected",
            UnavailableReason::CredentialsRejected => "credentials rejected",
            UnavailableReason::Network => "network failure",
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::Rejected => "request rejected",
            UnavailableReason::MalformedResponse => "malformed response",
        };
        f.write_str(s)
    }
}

/// A provider session or call could not be completed.
///
/// Callers only decide between proceeding and falling back; the reason, HTTP
/// status and raw body exist for logs and the audit trail.
#[derive(Debug, Clone, Error)]
#[error("Provider {provider} unavailable: {reason}")]
pub struct ProviderUnavailable {
    pub provider: ProviderKind,
    pub reason: UnavailableReason,
    pub http_status: Option<u16>,
    pub raw_response: Option<String>,
}

impl ProviderUnavailable {
    pub fn new(provider: ProviderKind, reason: UnavailableReason) -> Self {
        Self {
            provider,
            reason,
            http_status: None,
            raw_response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_raw_response(mut self, body: impl Into<String>) -> Self {
        self.raw_response = Some(body.into());
        self
    }

    /// Network blips, timeouts and 5xx answers may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self.reason {
            UnavailableReason::Network | UnavailableReason::Timeout => true,
            UnavailableReason::Rejected => self.http_status.map(|s| s >= 500).unwrap_or(false),
            _ => false,
        }
    }
}
