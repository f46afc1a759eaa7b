//! # charge-core
//!
//! Core types and logic for the charge issuance and reconciliation engine.
//!
//! This crate provides:
//! - `StaticCodeEncoder` for provider-free PIX codes (and `decode` to check them)
//! - `ChargeProvider` and `SessionSource` traits implemented by provider adapters
//! - `ChargeIssuer` for issuing charges with the static-code fallback
//! - `ChargeStore` with an in-memory implementation
//! - `ReconciliationHandler` for applying provider notifications
//! - `ChargeError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use charge_core::{ChargeIssuer, InMemoryChargeStore, ProviderSet, StaticCodeConfig, StaticCodeEncoder};
//!
//! let store = Arc::new(InMemoryChargeStore::new());
//! let encoder = StaticCodeEncoder::new(StaticCodeConfig::new("11122233344", "CONDOMINIO", "SAO PAULO"));
//! let issuer = ChargeIssuer::new(store, sessions, ProviderSet::new(), encoder);
//!
//! let charge = issuer.issue(request).await?;
//! // Show charge.payload as a QR code
//! ```

pub mod brcode;
pub mod charge;
pub mod error;
pub mod event;
pub mod issuer;
pub mod memory;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod sweep;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use brcode::{DecodedCode, StaticCodeConfig, StaticCodeEncoder};
pub use charge::{
    Amount, Charge, ChargeMethod, ChargeRequest, ChargeStatus, IssueMode, Payer, PayerRequest,
    PaymentRail, TaxId,
};
pub use error::{ChargeError, ChargeResult, ProviderUnavailable, UnavailableReason};
pub use event::{
    ChannelEventSink, EventOutcome, EventSource, LoggingEventSink, PaymentConfirmed,
    PaymentEventSink, ProviderNotification, ReconciliationEvent,
};
pub use issuer::ChargeIssuer;
pub use memory::InMemoryChargeStore;
pub use provider::{
    BoxedChargeProvider, ChargeProvider, ProviderCharge, ProviderChargeRequest, ProviderKind,
    ProviderSession, ProviderSet, SessionSource,
};
pub use reconcile::{ReconcileOutcome, ReconciliationHandler};
pub use store::{ChargeStore, CreateOutcome, EventClaim};
pub use sweep::ExpirySweeper;
