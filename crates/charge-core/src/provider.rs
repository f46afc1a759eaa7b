//! # Provider Traits
//!
//! The two payment providers sit behind one trait each side of the session
//! boundary:
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │   SessionSource (trait)      │      │   ChargeProvider (trait)     │
//! │  └── get_session(provider)   │      │  ├── kind()                  │
//! └──────────────────────────────┘      │  └── create_charge(session)  │
//!                ▲                      └──────────────────────────────┘
//!                │                                     ▲
//!   ProviderSessionManager               ┌─────────────┴─────────────┐
//!   (mTLS + OAuth2 / bearer)        PixProvider               BoletoProvider
//! ```
//!
//! The set of providers is closed: [`ProviderKind`] is an enum and
//! [`ProviderSet`] has one slot per variant, so a third provider is a
//! compile-checked addition.

use crate::charge::{Amount, Payer};
use crate::error::ProviderUnavailable;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The two payment providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Instant-transfer provider (mutual TLS + OAuth2 client credentials)
    Pix,
    /// Bank-slip provider (static bearer token)
    Boleto,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Pix => "pix",
            ProviderKind::Boleto => "boleto",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usable credential for one provider
#[derive(Clone)]
pub struct ProviderSession {
    pub provider: ProviderKind,
    /// Bearer token sent as `Authorization: Bearer ...`
    pub access_token: String,
    /// `None` for long-lived keys
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderSession {
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Produces sessions. Failures are reported, never raised.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn get_session(
        &self,
        provider: ProviderKind,
    ) -> Result<ProviderSession, ProviderUnavailable>;

    /// Drop any cached session for `provider` after the provider refused it
    async fn invalidate(&self, _provider: ProviderKind) {}
}

/// What a provider needs to register a charge
#[derive(Debug, Clone)]
pub struct ProviderChargeRequest {
    /// Local charge id, sent as the provider idempotency key
    pub charge_id: String,
    pub amount: Amount,
    pub payer: Payer,
    pub due_at: NaiveDate,
    pub description: Option<String>,
}

/// Provider-side registration of a charge
#[derive(Debug, Clone)]
pub struct ProviderCharge {
    pub provider_ref: String,
    /// PIX copy-and-paste code or bank-slip digitable line
    pub payload: String,
    pub payment_url: Option<String>,
    pub http_status: u16,
    pub raw_response: String,
}

/// A payment provider that registers charges.
#[async_trait]
pub trait ChargeProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Register the charge. The provider must de-duplicate on
    /// `request.charge_id`.
    async fn create_charge(
        &self,
        session: &ProviderSession,
        request: &ProviderChargeRequest,
    ) -> Result<ProviderCharge, ProviderUnavailable>;
}

pub type BoxedChargeProvider = Arc<dyn ChargeProvider>;

/// One slot per provider variant
#[derive(Clone, Default)]
pub struct ProviderSet {
    pix: Option<BoxedChargeProvider>,
    boleto: Option<BoxedChargeProvider>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider in the slot matching its kind
    pub fn register(&mut self, provider: BoxedChargeProvider) {
        match provider.kind() {
            ProviderKind::Pix => self.pix = Some(provider),
            ProviderKind::Boleto => self.boleto = Some(provider),
        }
    }

    /// Register with builder pattern
    pub fn with_provider(mut self, provider: BoxedChargeProvider) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&BoxedChargeProvider> {
        match kind {
            ProviderKind::Pix => self.pix.as_ref(),
            ProviderKind::Boleto => self.boleto.as_ref(),
        }
    }

    /// Configured providers
    pub fn kinds(&self) -> Vec<ProviderKind> {
        [ProviderKind::Pix, ProviderKind::Boleto]
            .into_iter()
            .filter(|k| self.get(*k).is_some())
            .collect()
    }
}
