//! # Charge Store
//!
//! The only writer of charge rows after creation. Implementations must make
//! `create` a single atomic check-and-insert, `update_status` a
//! compare-and-swap on the stored status, and `claim_event` the serialization
//! point for a provider event id.

use crate::charge::{Charge, ChargeStatus};
use crate::error::ChargeResult;
use crate::event::{EventOutcome, ReconciliationEvent};
use crate::provider::ProviderKind;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Result of [`ChargeStore::create`]
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// Row written
    Created(Charge),
    /// Identical retry; the stored row is returned untouched
    Existing(Charge),
}

impl CreateOutcome {
    pub fn into_charge(self) -> Charge {
        match self {
            CreateOutcome::Created(c) | CreateOutcome::Existing(c) => c,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Result of [`ChargeStore::claim_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClaim {
    /// First delivery; the caller owns processing
    Claimed,
    /// Seen before; a `duplicate` row was appended
    Duplicate { original_event_id: String },
}

#[async_trait]
pub trait ChargeStore: Send + Sync {
    /// Insert a new charge.
    ///
    /// Fails with `Conflict` when the tenant's idempotency token (or the
    /// provider reference) is taken by a different request; returns
    /// `Existing` when the stored charge matches the same logical request.
    async fn create(&self, charge: Charge) -> ChargeResult<CreateOutcome>;

    async fn get(&self, charge_id: &str) -> ChargeResult<Option<Charge>>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> ChargeResult<Option<Charge>>;

    /// Unique on (`provider`, `provider_ref`)
    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> ChargeResult<Option<Charge>>;

    /// Move `from → to` only if the stored status is still `from`.
    /// `proof` is the audit event id that triggered the change.
    async fn update_status(
        &self,
        charge_id: &str,
        from: ChargeStatus,
        to: ChargeStatus,
        proof: Option<&str>,
    ) -> ChargeResult<Charge>;

    /// Newest first
    async fn list_by_tenant(&self, tenant_id: &str) -> ChargeResult<Vec<Charge>>;

    /// Pending charges whose due date is before `today`
    async fn list_overdue(&self, today: NaiveDate) -> ChargeResult<Vec<Charge>>;

    /// Record a notification keyed by (`provider`, `provider_event_id`)
    async fn claim_event(&self, event: ReconciliationEvent) -> ChargeResult<EventClaim>;

    /// Append an audit row without de-duplication (provider calls)
    async fn append_event(&self, event: ReconciliationEvent) -> ChargeResult<()>;

    /// Give up a claim whose processing failed.
    ///
    /// The row is kept as `failed` and the provider event id becomes
    /// claimable again, so the provider's redelivery is processed.
    async fn release_event(&self, event_id: &str) -> ChargeResult<()>;

    /// Finalise a claimed row's outcome
    async fn resolve_event(
        &self,
        event_id: &str,
        charge_id: Option<&str>,
        outcome: EventOutcome,
    ) -> ChargeResult<()>;

    async fn events_for_charge(&self, charge_id: &str) -> ChargeResult<Vec<ReconciliationEvent>>;

    async fn events_for_provider_event(
        &self,
        provider: ProviderKind,
        provider_event_id: &str,
    ) -> ChargeResult<Vec<ReconciliationEvent>>;
}
