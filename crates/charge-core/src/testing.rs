//! Store wrapper that injects failures and hides rows, for unit tests.

use crate::charge::{Charge, ChargeStatus};
use crate::error::{ChargeError, ChargeResult};
use crate::event::{EventOutcome, ReconciliationEvent};
use crate::memory::InMemoryChargeStore;
use crate::provider::ProviderKind;
use crate::store::{ChargeStore, CreateOutcome, EventClaim};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub inner: InMemoryChargeStore,
    /// Number of upcoming `update_status` calls that fail with `Storage`
    pub failing_updates: AtomicUsize,
    /// Make `find_by_idempotency_key` miss, as a racing request would see it
    pub hide_idempotency: AtomicBool,
}

impl ScriptedStore {
    pub fn over(inner: InMemoryChargeStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ChargeStore for ScriptedStore {
    async fn create(&self, charge: Charge) -> ChargeResult<CreateOutcome> {
        self.inner.create(charge).await
    }

    async fn get(&self, charge_id: &str) -> ChargeResult<Option<Charge>> {
        self.inner.get(charge_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> ChargeResult<Option<Charge>> {
        if self.hide_idempotency.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_idempotency_key(tenant_id, key).await
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> ChargeResult<Option<Charge>> {
        self.inner.find_by_provider_ref(provider, provider_ref).await
    }

    async fn update_status(
        &self,
        charge_id: &str,
        from: ChargeStatus,
        to: ChargeStatus,
        proof: Option<&str>,
    ) -> ChargeResult<Charge> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChargeError::Storage("connection reset".to_string()));
        }
        self.inner.update_status(charge_id, from, to, proof).await
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> ChargeResult<Vec<Charge>> {
        self.inner.list_by_tenant(tenant_id).await
    }

    async fn list_overdue(&self, today: NaiveDate) -> ChargeResult<Vec<Charge>> {
        self.inner.list_overdue(today).await
    }

    async fn claim_event(&self, event: ReconciliationEvent) -> ChargeResult<EventClaim> {
        self.inner.claim_event(event).await
    }

    async fn append_event(&self, event: ReconciliationEvent) -> ChargeResult<()> {
        self.inner.append_event(event).await
    }

    async fn release_event(&self, event_id: &str) -> ChargeResult<()> {
        self.inner.release_event(event_id).await
    }

    async fn resolve_event(
        &self,
        event_id: &str,
        charge_id: Option<&str>,
        outcome: EventOutcome,
    ) -> ChargeResult<()> {
        self.inner.resolve_event(event_id, charge_id, outcome).await
    }

    async fn events_for_charge(&self, charge_id: &str) -> ChargeResult<Vec<ReconciliationEvent>> {
        self.inner.events_for_charge(charge_id).await
    }

    async fn events_for_provider_event(
        &self,
        provider: ProviderKind,
        provider_event_id: &str,
    ) -> ChargeResult<Vec<ReconciliationEvent>> {
        self.inner
            .events_for_provider_event(provider, provider_event_id)
            .await
    }
}
