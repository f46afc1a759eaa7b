//! # In-Memory Charge Store
//!
//! A single `RwLock` guards every index, so each trait method is one atomic
//! step: the idempotency check and insert in `create`, the status compare and
//! write in `update_status`, and the event claim.

use crate::charge::{Charge, ChargeStatus};
use crate::error::{ChargeError, ChargeResult};
use crate::event::{EventOutcome, EventSource, ReconciliationEvent};
use crate::provider::ProviderKind;
use crate::store::{ChargeStore, CreateOutcome, EventClaim};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    charges: HashMap<String, Charge>,
    /// (tenant_id, idempotency_key) → charge id
    by_key: HashMap<(String, String), String>,
    /// (provider, provider_ref) → charge id
    by_provider_ref: HashMap<(ProviderKind, String), String>,
    events: Vec<ReconciliationEvent>,
    /// (provider, provider_event_id) → first audit row id
    claims: HashMap<(ProviderKind, String), String>,
}

/// Thread-safe in-memory store for charges and their audit log.
#[derive(Default, Clone)]
pub struct InMemoryChargeStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryChargeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit row in insertion order
    pub async fn all_events(&self) -> Vec<ReconciliationEvent> {
        self.inner.read().await.events.clone()
    }

    pub async fn charge_count(&self) -> usize {
        self.inner.read().await.charges.len()
    }
}

#[async_trait]
impl ChargeStore for InMemoryChargeStore {
    async fn create(&self, charge: Charge) -> ChargeResult<CreateOutcome> {
        let mut inner = self.inner.write().await;

        let key = (charge.tenant_id.clone(), charge.idempotency_key.clone());
        if let Some(existing_id) = inner.by_key.get(&key) {
            let existing = inner
                .charges
                .get(existing_id)
                .ok_or_else(|| ChargeError::Storage("idempotency index is stale".to_string()))?;
            if existing.same_request_as(&charge) {
                debug!("Idempotent retry for key {}", charge.idempotency_key);
                return Ok(CreateOutcome::Existing(existing.clone()));
            }
            return Err(ChargeError::Conflict {
                key: charge.idempotency_key,
            });
        }

        if inner.charges.contains_key(&charge.id) {
            return Err(ChargeError::Conflict { key: charge.id });
        }

        let provider_key = match (charge.provider, &charge.provider_ref) {
            (Some(provider), Some(reference)) => {
                let k = (provider, reference.clone());
                if inner.by_provider_ref.contains_key(&k) {
                    return Err(ChargeError::Conflict {
                        key: format!("{}:{}", provider, reference),
                    });
                }
                Some(k)
            }
            _ => None,
        };

        inner.by_key.insert(key, charge.id.clone());
        if let Some(k) = provider_key {
            inner.by_provider_ref.insert(k, charge.id.clone());
        }
        inner.charges.insert(charge.id.clone(), charge.clone());

        Ok(CreateOutcome::Created(charge))
    }

    async fn get(&self, charge_id: &str) -> ChargeResult<Option<Charge>> {
        Ok(self.inner.read().await.charges.get(charge_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> ChargeResult<Option<Charge>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_key
            .get(&(tenant_id.to_string(), key.to_string()))
            .and_then(|id| inner.charges.get(id))
            .cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> ChargeResult<Option<Charge>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_provider_ref
            .get(&(provider, provider_ref.to_string()))
            .and_then(|id| inner.charges.get(id))
            .cloned())
    }

    async fn update_status(
        &self,
        charge_id: &str,
        from: ChargeStatus,
        to: ChargeStatus,
        proof: Option<&str>,
    ) -> ChargeResult<Charge> {
        let mut inner = self.inner.write().await;
        let charge = inner
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| ChargeError::NotFound {
                charge_id: charge_id.to_string(),
            })?;

        if charge.status != from || !from.can_transition_to(to) {
            return Err(ChargeError::InvalidTransition {
                charge_id: charge_id.to_string(),
                expected: from,
                actual: charge.status,
                target: to,
            });
        }

        let now = Utc::now();
        charge.status = to;
        charge.status_proof = proof.map(String::from);
        charge.updated_at = now;
        if to == ChargeStatus::Paid {
            charge.paid_at = Some(now);
        }

        Ok(charge.clone())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> ChargeResult<Vec<Charge>> {
        let inner = self.inner.read().await;
        let mut charges: Vec<Charge> = inner
            .charges
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        charges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(charges)
    }

    async fn list_overdue(&self, today: NaiveDate) -> ChargeResult<Vec<Charge>> {
        let inner = self.inner.read().await;
        Ok(inner
            .charges
            .values()
            .filter(|c| c.is_overdue(today))
            .cloned()
            .collect())
    }

    async fn claim_event(&self, event: ReconciliationEvent) -> ChargeResult<EventClaim> {
        let mut inner = self.inner.write().await;
        let key = (event.provider, event.provider_event_id.clone());

        if let Some(original) = inner.claims.get(&key) {
            let original_event_id = original.clone();
            inner.events.push(event.with_outcome(EventOutcome::Duplicate));
            return Ok(EventClaim::Duplicate { original_event_id });
        }

        inner.claims.insert(key, event.id.clone());
        inner.events.push(event);
        Ok(EventClaim::Claimed)
    }

    async fn append_event(&self, event: ReconciliationEvent) -> ChargeResult<()> {
        self.inner.write().await.events.push(event);
        Ok(())
    }

    async fn release_event(&self, event_id: &str) -> ChargeResult<()> {
        let mut inner = self.inner.write().await;
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == event_id && e.source == EventSource::Notification)
            .ok_or_else(|| ChargeError::Storage(format!("audit event {} not found", event_id)))?;

        if event.outcome != EventOutcome::Received {
            return Err(ChargeError::Storage(format!(
                "audit event {} already resolved as {:?}",
                event_id, event.outcome
            )));
        }
        event.outcome = EventOutcome::Failed;
        let key = (event.provider, event.provider_event_id.clone());

        if inner.claims.get(&key).map(String::as_str) == Some(event_id) {
            inner.claims.remove(&key);
        }
        Ok(())
    }

    async fn resolve_event(
        &self,
        event_id: &str,
        charge_id: Option<&str>,
        outcome: EventOutcome,
    ) -> ChargeResult<()> {
        let mut inner = self.inner.write().await;
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == event_id && e.source == EventSource::Notification)
            .ok_or_else(|| ChargeError::Storage(format!("audit event {} not found", event_id)))?;

        if event.outcome != EventOutcome::Received {
            return Err(ChargeError::Storage(format!(
                "audit event {} already resolved as {:?}",
                event_id, event.outcome
            )));
        }
        event.outcome = outcome;
        event.charge_id = charge_id.map(String::from);
        Ok(())
    }

    async fn events_for_charge(&self, charge_id: &str) -> ChargeResult<Vec<ReconciliationEvent>> {
        let inner = self.inner.read().await;
        // duplicate and orphaned deliveries only carry the provider reference
        let reference = inner
            .charges
            .get(charge_id)
            .and_then(|c| c.provider.zip(c.provider_ref.clone()));
        Ok(inner
            .events
            .iter()
            .filter(|e| {
                e.charge_id.as_deref() == Some(charge_id)
                    || matches!(
                        (&reference, &e.provider_ref),
                        (Some((provider, r)), Some(er))
                            if e.source == EventSource::Notification
                                && e.provider == *provider
                                && er == r
                    )
            })
            .cloned()
            .collect())
    }

    async fn events_for_provider_event(
        &self,
        provider: ProviderKind,
        provider_event_id: &str,
    ) -> ChargeResult<Vec<ReconciliationEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.provider == provider && e.provider_event_id == provider_event_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge::{Amount, ChargeMethod, ChargeRequest, IssueMode, PayerRequest, PaymentRail, Payer};
    use crate::event::ProviderNotification;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request(key: &str) -> ChargeRequest {
        ChargeRequest {
            tenant_id: "condo-1".to_string(),
            unit_id: None,
            amount: dec!(150.00),
            payer: PayerRequest {
                name: "Maria Silva".to_string(),
                email: None,
                tax_id: "52998224725".to_string(),
            },
            due_date: NaiveDate::from_ymd_opt(2030, 1, 10).unwrap(),
            description: None,
            rail: PaymentRail::Pix,
            mode: IssueMode::Static,
            idempotency_key: Some(key.to_string()),
        }
    }

    fn charge(key: &str) -> Charge {
        let req = request(key);
        Charge::pending(
            &req,
            req.charge_id(),
            Amount::new(req.amount).unwrap(),
            Payer::new("Maria Silva", None, "52998224725").unwrap(),
            ChargeMethod::PixStatic,
        )
        .with_payload("000201...")
    }

    fn notification(event_id: &str) -> ReconciliationEvent {
        ReconciliationEvent::from_notification(&ProviderNotification {
            provider: ProviderKind::Pix,
            event_id: event_id.to_string(),
            provider_ref: "tx1".to_string(),
            status: Some(ChargeStatus::Paid),
            occurred_at: None,
            raw: json!({}),
        })
    }

    #[tokio::test]
    async fn test_create_and_identical_retry() {
        let store = InMemoryChargeStore::new();
        let first = store.create(charge("k1")).await.unwrap();
        assert!(first.is_new());

        let retry = store.create(charge("k1")).await.unwrap();
        assert!(!retry.is_new());
        assert_eq!(retry.into_charge().id, first.into_charge().id);
        assert_eq!(store.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_conflict_on_different_request() {
        let store = InMemoryChargeStore::new();
        store.create(charge("k1")).await.unwrap();

        let mut different = charge("k1");
        different.amount = Amount::new(dec!(99.00)).unwrap();
        assert!(matches!(
            store.create(different).await,
            Err(ChargeError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_create_yields_one_charge() {
        let store = InMemoryChargeStore::new();
        let a = tokio::spawn({
            let store = store.clone();
            async move { store.create(charge("same")).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.create(charge("same")).await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_ne!(a.is_new(), b.is_new());
        assert_eq!(a.into_charge().id, b.into_charge().id);
        assert_eq!(store.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_provider_ref_is_unique() {
        let store = InMemoryChargeStore::new();
        let c1 = charge("k1").with_provider(ProviderKind::Pix, Some("tx1".to_string()));
        let c2 = charge("k2").with_provider(ProviderKind::Pix, Some("tx1".to_string()));
        store.create(c1.clone()).await.unwrap();
        assert!(matches!(store.create(c2).await, Err(ChargeError::Conflict { .. })));

        let found = store
            .find_by_provider_ref(ProviderKind::Pix, "tx1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, c1.id);
        assert!(store
            .find_by_provider_ref(ProviderKind::Boleto, "tx1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_status_compare_and_swap() {
        let store = InMemoryChargeStore::new();
        let c = store.create(charge("k1")).await.unwrap().into_charge();

        let paid = store
            .update_status(&c.id, ChargeStatus::Pending, ChargeStatus::Paid, Some("evt"))
            .await
            .unwrap();
        assert_eq!(paid.status, ChargeStatus::Paid);
        assert_eq!(paid.status_proof.as_deref(), Some("evt"));
        assert!(paid.paid_at.is_some());
        assert_eq!(paid.payload, c.payload);

        let again = store
            .update_status(&c.id, ChargeStatus::Pending, ChargeStatus::Cancelled, None)
            .await;
        assert!(matches!(
            again,
            Err(ChargeError::InvalidTransition {
                actual: ChargeStatus::Paid,
                ..
            })
        ));

        let from_terminal = store
            .update_status(&c.id, ChargeStatus::Paid, ChargeStatus::Cancelled, None)
            .await;
        assert!(matches!(from_terminal, Err(ChargeError::InvalidTransition { .. })));

        assert!(matches!(
            store
                .update_status("missing", ChargeStatus::Pending, ChargeStatus::Paid, None)
                .await,
            Err(ChargeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_event_detects_duplicates() {
        let store = InMemoryChargeStore::new();
        let first = notification("e2e-1");
        let first_id = first.id.clone();

        assert_eq!(store.claim_event(first).await.unwrap(), EventClaim::Claimed);
        assert_eq!(
            store.claim_event(notification("e2e-1")).await.unwrap(),
            EventClaim::Duplicate {
                original_event_id: first_id.clone()
            }
        );

        store
            .resolve_event(&first_id, Some("c1"), EventOutcome::Applied)
            .await
            .unwrap();
        assert!(store
            .resolve_event(&first_id, None, EventOutcome::Orphaned)
            .await
            .is_err());

        let rows = store
            .events_for_provider_event(ProviderKind::Pix, "e2e-1")
            .await
            .unwrap();
        let outcomes: Vec<_> = rows.iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![EventOutcome::Applied, EventOutcome::Duplicate]);
    }

    #[tokio::test]
    async fn test_released_claim_can_be_claimed_again() {
        let store = InMemoryChargeStore::new();
        let first = notification("e2e-2");
        let first_id = first.id.clone();
        store.claim_event(first).await.unwrap();

        store.release_event(&first_id).await.unwrap();
        assert!(store.release_event(&first_id).await.is_err());

        let second = notification("e2e-2");
        let second_id = second.id.clone();
        assert_eq!(store.claim_event(second).await.unwrap(), EventClaim::Claimed);
        assert_eq!(
            store.claim_event(notification("e2e-2")).await.unwrap(),
            EventClaim::Duplicate {
                original_event_id: second_id
            }
        );

        let outcomes: Vec<_> = store
            .events_for_provider_event(ProviderKind::Pix, "e2e-2")
            .await
            .unwrap()
            .iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![EventOutcome::Failed, EventOutcome::Received, EventOutcome::Duplicate]
        );
    }

    #[tokio::test]
    async fn test_list_overdue_and_by_tenant() {
        let store = InMemoryChargeStore::new();
        let c = store.create(charge("k1")).await.unwrap().into_charge();

        let before_due = NaiveDate::from_ymd_opt(2030, 1, 10).unwrap();
        let after_due = NaiveDate::from_ymd_opt(2030, 1, 11).unwrap();
        assert!(store.list_overdue(before_due).await.unwrap().is_empty());
        assert_eq!(store.list_overdue(after_due).await.unwrap().len(), 1);

        assert_eq!(store.list_by_tenant("condo-1").await.unwrap()[0].id, c.id);
        assert!(store.list_by_tenant("condo-2").await.unwrap().is_empty());
    }
}
