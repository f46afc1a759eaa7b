//! # Charge Issuer
//!
//! Validates a charge request, decides between the provider and the static
//! code fallback, and writes the resulting charge.
//!
//! ```text
//! request ─► validate ─► stored? ──yes──► replay stored charge
//!                          │
//!                          no
//!                          ▼
//!          PIX dynamic: session + provider ──ok──► pix_dynamic
//!                          │ ProviderUnavailable
//!                          ▼
//!                    static code ──────────────► pix_static
//!
//!          Boleto: session + provider ──ok──► boleto (pending)
//!                          │ ProviderUnavailable
//!                          ▼
//!                  boleto (cancelled) + IssuanceFailed
//! ```

use crate::brcode::{self, StaticCodeEncoder};
use crate::charge::{
    Amount, Charge, ChargeMethod, ChargeRequest, ChargeStatus, IssueMode, Payer, PaymentRail,
};
use crate::error::{ChargeError, ChargeResult, ProviderUnavailable, UnavailableReason};
use crate::event::ReconciliationEvent;
use crate::provider::{
    ProviderCharge, ProviderChargeRequest, ProviderKind, ProviderSet, SessionSource,
};
use crate::store::{ChargeStore, CreateOutcome};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Issues charges against the configured providers
pub struct ChargeIssuer {
    store: Arc<dyn ChargeStore>,
    sessions: Arc<dyn SessionSource>,
    providers: ProviderSet,
    static_codes: StaticCodeEncoder,
}

/// Validated request parts
struct Validated {
    id: String,
    amount: Amount,
    payer: Payer,
}

impl ChargeIssuer {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        sessions: Arc<dyn SessionSource>,
        providers: ProviderSet,
        static_codes: StaticCodeEncoder,
    ) -> Self {
        Self {
            store,
            sessions,
            providers,
            static_codes,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChargeStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Issue a charge, or return the stored one for a retried request
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, rail = ?request.rail))]
    pub async fn issue(&self, request: ChargeRequest) -> ChargeResult<Charge> {
        let validated = validate(&request)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self
                .store
                .find_by_idempotency_key(&request.tenant_id, key)
                .await?
            {
                let probe = Charge::pending(
                    &request,
                    validated.id.clone(),
                    validated.amount,
                    validated.payer.clone(),
                    existing.method,
                );
                if !existing.same_request_as(&probe) {
                    return Err(ChargeError::Conflict { key: key.clone() });
                }
                debug!("Returning stored charge {} for retried request", existing.id);
                return replay(existing);
            }
        }

        // a stored charge replays even after its due date has passed
        check_due_date(&request)?;

        match request.rail {
            PaymentRail::Pix => self.issue_pix(&request, validated).await,
            PaymentRail::Boleto => self.issue_boleto(&request, validated).await,
        }
    }

    async fn issue_pix(&self, request: &ChargeRequest, v: Validated) -> ChargeResult<Charge> {
        let registered = match request.mode {
            IssueMode::Dynamic => {
                let provider_request = provider_request(request, &v);
                match self.call_provider(ProviderKind::Pix, &provider_request).await {
                    Ok(registered) => Some(registered),
                    Err(unavailable) => {
                        warn!(
                            "PIX provider unavailable for charge {} ({}), issuing static code",
                            v.id, unavailable.reason
                        );
                        None
                    }
                }
            }
            IssueMode::Static => None,
        };

        let charge = match registered {
            Some(registered) => {
                Charge::pending(request, v.id, v.amount, v.payer, ChargeMethod::PixDynamic)
                    .with_provider(ProviderKind::Pix, Some(registered.provider_ref))
                    .with_payload(registered.payload)
                    .with_payment_url(registered.payment_url)
            }
            None => {
                let reference = request.description.as_deref().unwrap_or(&v.id);
                let payload = self.static_codes.encode(v.amount.value(), Some(reference))?;
                Charge::pending(request, v.id, v.amount, v.payer, ChargeMethod::PixStatic)
                    .with_payload(payload)
            }
        };

        let stored = self.persist(charge).await?;
        info!(
            "Issued charge {}: method={}, amount={}",
            stored.id,
            stored.method.as_str(),
            stored.amount
        );
        Ok(stored)
    }

    async fn issue_boleto(&self, request: &ChargeRequest, v: Validated) -> ChargeResult<Charge> {
        if request.mode == IssueMode::Static {
            return Err(ChargeError::Validation(
                "static mode is only available for PIX".to_string(),
            ));
        }

        let provider_request = provider_request(request, &v);
        match self.call_provider(ProviderKind::Boleto, &provider_request).await {
            Ok(registered) => {
                let charge =
                    Charge::pending(request, v.id, v.amount, v.payer, ChargeMethod::Boleto)
                        .with_provider(ProviderKind::Boleto, Some(registered.provider_ref))
                        .with_payload(registered.payload)
                        .with_payment_url(registered.payment_url);
                let stored = self.persist(charge).await?;
                if stored.status == ChargeStatus::Cancelled {
                    warn!(
                        "Bank slip registered for charge {}, but a concurrent attempt already stored it as failed",
                        stored.id
                    );
                    return replay(stored);
                }
                info!("Registered bank slip for charge {}", stored.id);
                Ok(stored)
            }
            Err(unavailable) => {
                error!(
                    "Bank slip registration failed for charge {}: {}",
                    v.id, unavailable
                );
                let charge =
                    Charge::pending(request, v.id, v.amount, v.payer, ChargeMethod::Boleto)
                        .with_provider(ProviderKind::Boleto, None)
                        .with_status(ChargeStatus::Cancelled);
                let stored = self.persist(charge).await?;
                // a concurrent retry may have registered the slip first
                replay(stored)
            }
        }
    }

    /// Get a session, call the provider, and audit the outcome
    async fn call_provider(
        &self,
        kind: ProviderKind,
        request: &ProviderChargeRequest,
    ) -> Result<ProviderCharge, ProviderUnavailable> {
        let result = self.try_provider(kind, request).await;

        let audit = match &result {
            Ok(registered) => ReconciliationEvent::call_succeeded(kind, &request.charge_id, registered),
            Err(unavailable) => ReconciliationEvent::call_failed(&request.charge_id, unavailable),
        };
        if let Err(e) = self.store.append_event(audit).await {
            error!("Failed to audit provider call for {}: {}", request.charge_id, e);
        }

        result
    }

    async fn try_provider(
        &self,
        kind: ProviderKind,
        request: &ProviderChargeRequest,
    ) -> Result<ProviderCharge, ProviderUnavailable> {
        let provider = self
            .providers
            .get(kind)
            .ok_or_else(|| ProviderUnavailable::new(kind, UnavailableReason::NotConfigured))?;
        let session = self.sessions.get_session(kind).await?;
        let registered = match provider.create_charge(&session, request).await {
            Ok(registered) => registered,
            Err(unavailable) => {
                if unavailable.reason == UnavailableReason::CredentialsRejected {
                    self.sessions.invalidate(kind).await;
                }
                return Err(unavailable);
            }
        };

        if kind == ProviderKind::Pix {
            if let Err(e) = brcode::decode(&registered.payload) {
                warn!("Provider returned an unusable PIX code: {}", e);
                return Err(
                    ProviderUnavailable::new(kind, UnavailableReason::MalformedResponse)
                        .with_status(registered.http_status)
                        .with_raw_response(registered.raw_response),
                );
            }
        }

        Ok(registered)
    }

    async fn persist(&self, charge: Charge) -> ChargeResult<Charge> {
        match self.store.create(charge).await? {
            CreateOutcome::Created(stored) => Ok(stored),
            CreateOutcome::Existing(stored) => {
                debug!("Concurrent retry already stored charge {}", stored.id);
                Ok(stored)
            }
        }
    }

    /// Cancel a pending charge on the tenant's request.
    ///
    /// Only charges the provider does not know about can be cancelled here;
    /// a registered charge stays payable at the provider, so its status
    /// follows the provider's notifications.
    #[instrument(skip(self))]
    pub async fn cancel(&self, tenant_id: &str, charge_id: &str) -> ChargeResult<Charge> {
        let charge = self
            .store
            .get(charge_id)
            .await?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| ChargeError::NotFound {
                charge_id: charge_id.to_string(),
            })?;

        if charge.provider_ref.is_some() {
            return Err(ChargeError::ProviderManaged {
                charge_id: charge.id,
            });
        }

        let cancelled = self
            .store
            .update_status(&charge.id, charge.status, ChargeStatus::Cancelled, None)
            .await?;
        info!("Cancelled charge {}", cancelled.id);
        Ok(cancelled)
    }
}

fn validate(request: &ChargeRequest) -> ChargeResult<Validated> {
    if request.tenant_id.trim().is_empty() {
        return Err(ChargeError::Validation("tenant_id is required".to_string()));
    }
    let amount = Amount::new(request.amount)?;
    let payer = Payer::new(
        &request.payer.name,
        request.payer.email.as_deref(),
        &request.payer.tax_id,
    )?;
    Ok(Validated {
        id: request.charge_id(),
        amount,
        payer,
    })
}

fn check_due_date(request: &ChargeRequest) -> ChargeResult<()> {
    if request.due_date < Utc::now().date_naive() {
        return Err(ChargeError::Validation(format!(
            "due date {} is in the past",
            request.due_date
        )));
    }
    Ok(())
}

fn provider_request(request: &ChargeRequest, v: &Validated) -> ProviderChargeRequest {
    ProviderChargeRequest {
        charge_id: v.id.clone(),
        amount: v.amount,
        payer: v.payer.clone(),
        due_at: request.due_date,
        description: request.description.clone(),
    }
}

/// A failed bank-slip registration stays a failure on every retry
fn replay(charge: Charge) -> ChargeResult<Charge> {
    if charge.method == ChargeMethod::Boleto
        && charge.status == ChargeStatus::Cancelled
        && charge.payload.is_none()
    {
        return Err(ChargeError::IssuanceFailed {
            charge_id: charge.id,
        });
    }
    Ok(charge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brcode::StaticCodeConfig;
    use crate::charge::PayerRequest;
    use crate::event::{EventOutcome, EventSource, LoggingEventSink, ProviderNotification};
    use crate::memory::InMemoryChargeStore;
    use crate::provider::{ChargeProvider, ProviderSession};
    use crate::reconcile::{ReconcileOutcome, ReconciliationHandler};
    use crate::testing::ScriptedStore;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder =
        Box<dyn Fn(&ProviderChargeRequest) -> Result<ProviderCharge, ProviderUnavailable> + Send + Sync>;

    struct FakeProvider {
        kind: ProviderKind,
        calls: AtomicUsize,
        respond: Responder,
    }

    #[async_trait]
    impl ChargeProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn create_charge(
            &self,
            _session: &ProviderSession,
            request: &ProviderChargeRequest,
        ) -> Result<ProviderCharge, ProviderUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(request)
        }
    }

    #[derive(Default)]
    struct FakeSessions {
        available: bool,
        invalidated: AtomicUsize,
    }

    #[async_trait]
    impl SessionSource for FakeSessions {
        async fn get_session(
            &self,
            provider: ProviderKind,
        ) -> Result<ProviderSession, ProviderUnavailable> {
            if self.available {
                Ok(ProviderSession {
                    provider,
                    access_token: "token".to_string(),
                    expires_at: None,
                })
            } else {
                Err(ProviderUnavailable::new(provider, UnavailableReason::Certificate))
            }
        }

        async fn invalidate(&self, _provider: ProviderKind) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn encoder() -> StaticCodeEncoder {
        StaticCodeEncoder::new(StaticCodeConfig::new(
            "11122233344",
            "CONDOMINIO EXEMPLO",
            "SAO PAULO",
        ))
    }

    fn dynamic_pix_ok() -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            kind: ProviderKind::Pix,
            calls: AtomicUsize::new(0),
            respond: Box::new(|req: &ProviderChargeRequest| {
                let payload = encoder()
                    .encode(req.amount.value(), Some("dyn"))
                    .map_err(|_| ProviderUnavailable::new(ProviderKind::Pix, UnavailableReason::MalformedResponse))?;
                Ok(ProviderCharge {
                    provider_ref: req.charge_id.replace('-', ""),
                    payload,
                    payment_url: None,
                    http_status: 201,
                    raw_response: "{}".to_string(),
                })
            }),
        })
    }

    fn failing(kind: ProviderKind, status: u16) -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            kind,
            calls: AtomicUsize::new(0),
            respond: Box::new(move |_: &ProviderChargeRequest| -> Result<ProviderCharge, ProviderUnavailable> {
                Err(ProviderUnavailable::new(kind, UnavailableReason::Rejected)
                    .with_status(status)
                    .with_raw_response("{\"error\":\"provider exploded\"}"))
            }),
        })
    }

    fn boleto_ok() -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            kind: ProviderKind::Boleto,
            calls: AtomicUsize::new(0),
            respond: Box::new(|req: &ProviderChargeRequest| {
                Ok(ProviderCharge {
                    provider_ref: format!("pay_{}", &req.charge_id[..8]),
                    payload: "34191.79001 01043.510047 91020.150008 1 96610000015000".to_string(),
                    payment_url: Some("https://slips.example/b/1".to_string()),
                    http_status: 200,
                    raw_response: "{}".to_string(),
                })
            }),
        })
    }

    fn issuer(
        store: &InMemoryChargeStore,
        sessions_available: bool,
        providers: Vec<Arc<FakeProvider>>,
    ) -> ChargeIssuer {
        let sessions = Arc::new(FakeSessions {
            available: sessions_available,
            ..Default::default()
        });
        issuer_over(Arc::new(store.clone()), sessions, providers)
    }

    fn issuer_over(
        store: Arc<dyn ChargeStore>,
        sessions: Arc<FakeSessions>,
        providers: Vec<Arc<FakeProvider>>,
    ) -> ChargeIssuer {
        let mut set = ProviderSet::new();
        for p in providers {
            set.register(p);
        }
        ChargeIssuer::new(store, sessions, set, encoder())
    }

    fn request(rail: PaymentRail, mode: IssueMode, key: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            tenant_id: "condo-1".to_string(),
            unit_id: Some("apt-101".to_string()),
            amount: dec!(150.00),
            payer: PayerRequest {
                name: "Maria Silva".to_string(),
                email: Some("maria@example.com".to_string()),
                tax_id: "529.982.247-25".to_string(),
            },
            due_date: Utc::now().date_naive() + Duration::days(10),
            description: Some("Test".to_string()),
            rail,
            mode,
            idempotency_key: key.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_static_mode_never_calls_provider() {
        let store = InMemoryChargeStore::new();
        let pix = dynamic_pix_ok();
        let issuer = issuer(&store, true, vec![pix.clone()]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Static, None))
            .await
            .unwrap();

        assert_eq!(charge.method, ChargeMethod::PixStatic);
        assert_eq!(charge.status, ChargeStatus::Pending);
        assert!(charge.provider_ref.is_none());
        let decoded = brcode::decode(charge.payload.as_deref().unwrap()).unwrap();
        assert_eq!(decoded.amount.as_deref(), Some("150.00"));
        assert_eq!(pix.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dynamic_success() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![dynamic_pix_ok()]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, Some("k1")))
            .await
            .unwrap();

        assert_eq!(charge.method, ChargeMethod::PixDynamic);
        assert_eq!(charge.provider, Some(ProviderKind::Pix));
        assert_eq!(charge.provider_ref, Some(charge.id.replace('-', "")));

        let audit = store.events_for_charge(&charge.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].source, EventSource::ProviderCall);
        assert_eq!(audit[0].outcome, EventOutcome::CallSucceeded);
    }

    #[tokio::test]
    async fn test_provider_500_falls_back_to_static() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![failing(ProviderKind::Pix, 500)]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();

        assert_eq!(charge.method, ChargeMethod::PixStatic);
        assert_eq!(charge.status, ChargeStatus::Pending);
        assert!(charge.provider_ref.is_none());
        assert!(!charge.payload.as_deref().unwrap_or_default().is_empty());

        let audit = store.events_for_charge(&charge.id).await.unwrap();
        assert_eq!(audit[0].outcome, EventOutcome::CallFailed);
        assert_eq!(audit[0].http_status, Some(500));
        assert!(audit[0].raw.contains("provider exploded"));
    }

    #[tokio::test]
    async fn test_missing_session_falls_back_to_static() {
        let store = InMemoryChargeStore::new();
        let pix = dynamic_pix_ok();
        let issuer = issuer(&store, false, vec![pix.clone()]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(charge.method, ChargeMethod::PixStatic);
        assert_eq!(pix.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_falls_back_to_static() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![]);
        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(charge.method, ChargeMethod::PixStatic);
    }

    #[tokio::test]
    async fn test_invalid_provider_code_falls_back() {
        let store = InMemoryChargeStore::new();
        let broken = Arc::new(FakeProvider {
            kind: ProviderKind::Pix,
            calls: AtomicUsize::new(0),
            respond: Box::new(|_: &ProviderChargeRequest| {
                Ok(ProviderCharge {
                    provider_ref: "tx-bad".to_string(),
                    payload: "not a pix code".to_string(),
                    payment_url: None,
                    http_status: 201,
                    raw_response: "{}".to_string(),
                })
            }),
        });
        let issuer = issuer(&store, true, vec![broken]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(charge.method, ChargeMethod::PixStatic);
        assert!(charge.provider_ref.is_none());
    }

    #[tokio::test]
    async fn test_retry_returns_stored_charge_without_provider_call() {
        let store = InMemoryChargeStore::new();
        let pix = dynamic_pix_ok();
        let issuer = issuer(&store, true, vec![pix.clone()]);

        let first = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, Some("k1")))
            .await
            .unwrap();
        let second = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, Some("k1")))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.payload, second.payload);
        assert_eq!(pix.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_retry_with_different_fields_conflicts() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![]);

        issuer
            .issue(request(PaymentRail::Pix, IssueMode::Static, Some("k1")))
            .await
            .unwrap();

        let mut changed = request(PaymentRail::Pix, IssueMode::Static, Some("k1"));
        changed.amount = dec!(10.00);
        assert!(matches!(
            issuer.issue(changed).await,
            Err(ChargeError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_issue_same_key() {
        let store = InMemoryChargeStore::new();
        let issuer = Arc::new(issuer(&store, true, vec![dynamic_pix_ok()]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let issuer = issuer.clone();
                tokio::spawn(async move {
                    issuer
                        .issue(request(PaymentRail::Pix, IssueMode::Dynamic, Some("same")))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_io() {
        let store = InMemoryChargeStore::new();
        let pix = dynamic_pix_ok();
        let issuer = issuer(&store, true, vec![pix.clone()]);

        let mut zero = request(PaymentRail::Pix, IssueMode::Dynamic, None);
        zero.amount = dec!(0);
        assert!(matches!(issuer.issue(zero).await, Err(ChargeError::Validation(_))));

        let mut bad_tax = request(PaymentRail::Pix, IssueMode::Dynamic, None);
        bad_tax.payer.tax_id = "123".to_string();
        assert!(matches!(issuer.issue(bad_tax).await, Err(ChargeError::Validation(_))));

        let mut past = request(PaymentRail::Pix, IssueMode::Dynamic, None);
        past.due_date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert!(matches!(issuer.issue(past).await, Err(ChargeError::Validation(_))));

        assert_eq!(pix.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.charge_count().await, 0);
        assert!(store.all_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_boleto_success() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![boleto_ok()]);

        let charge = issuer
            .issue(request(PaymentRail::Boleto, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(charge.method, ChargeMethod::Boleto);
        assert_eq!(charge.status, ChargeStatus::Pending);
        assert!(charge.provider_ref.as_deref().unwrap().starts_with("pay_"));
        assert!(charge.payment_url.is_some());
    }

    #[tokio::test]
    async fn test_boleto_failure_is_cancelled_and_surfaced() {
        let store = InMemoryChargeStore::new();
        let boleto = failing(ProviderKind::Boleto, 401);
        let issuer = issuer(&store, true, vec![boleto.clone()]);

        let req = request(PaymentRail::Boleto, IssueMode::Dynamic, Some("slip-1"));
        let charge_id = req.charge_id();
        let err = issuer.issue(req.clone()).await.unwrap_err();
        assert!(matches!(err, ChargeError::IssuanceFailed { .. }));

        let stored = store.get(&charge_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChargeStatus::Cancelled);
        assert!(stored.payload.is_none());

        // retry re-surfaces the failure without a second registration attempt
        assert!(matches!(
            issuer.issue(req).await,
            Err(ChargeError::IssuanceFailed { .. })
        ));
        assert_eq!(boleto.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_boleto_rejects_static_mode() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![boleto_ok()]);
        assert!(matches!(
            issuer
                .issue(request(PaymentRail::Boleto, IssueMode::Static, None))
                .await,
            Err(ChargeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_charge() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![]);
        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Static, None))
            .await
            .unwrap();

        assert!(matches!(
            issuer.cancel("other-tenant", &charge.id).await,
            Err(ChargeError::NotFound { .. })
        ));

        let cancelled = issuer.cancel("condo-1", &charge.id).await.unwrap();
        assert_eq!(cancelled.status, ChargeStatus::Cancelled);
        assert_eq!(cancelled.payload, charge.payload);

        assert!(matches!(
            issuer.cancel("condo-1", &charge.id).await,
            Err(ChargeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_after_due_date_returns_stored_charge() {
        let store = InMemoryChargeStore::new();
        let pix = dynamic_pix_ok();
        let issuer = issuer(&store, true, vec![pix.clone()]);

        let mut req = request(PaymentRail::Pix, IssueMode::Static, Some("k1"));
        req.due_date = Utc::now().date_naive() - Duration::days(1);
        let stored = Charge::pending(
            &req,
            req.charge_id(),
            Amount::new(req.amount).unwrap(),
            Payer::new("Maria Silva", Some("maria@example.com"), "52998224725").unwrap(),
            ChargeMethod::PixStatic,
        )
        .with_payload(encoder().encode(req.amount, Some("Test")).unwrap());
        store.create(stored.clone()).await.unwrap();

        let replayed = issuer.issue(req.clone()).await.unwrap();
        assert_eq!(replayed.id, stored.id);
        assert_eq!(replayed.payload, stored.payload);
        assert_eq!(pix.calls.load(Ordering::SeqCst), 0);

        // a new request with the same past date is still rejected
        req.idempotency_key = Some("k2".to_string());
        assert!(matches!(issuer.issue(req).await, Err(ChargeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_registered_charge_cannot_be_cancelled_locally() {
        let store = InMemoryChargeStore::new();
        let issuer = issuer(&store, true, vec![boleto_ok()]);
        let charge = issuer
            .issue(request(PaymentRail::Boleto, IssueMode::Dynamic, None))
            .await
            .unwrap();
        let provider_ref = charge.provider_ref.clone().unwrap();

        assert!(matches!(
            issuer.cancel("condo-1", &charge.id).await,
            Err(ChargeError::ProviderManaged { .. })
        ));

        // the payer can still pay and the payment is recorded
        let handler = ReconciliationHandler::new(Arc::new(store.clone()), Arc::new(LoggingEventSink));
        let outcome = handler
            .handle(ProviderNotification {
                provider: ProviderKind::Boleto,
                event_id: "evt_1".to_string(),
                provider_ref,
                status: Some(ChargeStatus::Paid),
                occurred_at: None,
                raw: serde_json::json!({"event": "PAYMENT_RECEIVED"}),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                charge_id: charge.id.clone(),
                status: ChargeStatus::Paid
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials_invalidate_session() {
        let store = InMemoryChargeStore::new();
        let sessions = Arc::new(FakeSessions {
            available: true,
            ..Default::default()
        });
        let rejected = Arc::new(FakeProvider {
            kind: ProviderKind::Pix,
            calls: AtomicUsize::new(0),
            respond: Box::new(|_: &ProviderChargeRequest| -> Result<ProviderCharge, ProviderUnavailable> {
                Err(
                    ProviderUnavailable::new(ProviderKind::Pix, UnavailableReason::CredentialsRejected)
                        .with_status(401),
                )
            }),
        });
        let issuer = issuer_over(Arc::new(store.clone()), sessions.clone(), vec![rejected]);

        let charge = issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(charge.method, ChargeMethod::PixStatic);
        assert_eq!(sessions.invalidated.load(Ordering::SeqCst), 1);

        let sessions = Arc::new(FakeSessions {
            available: true,
            ..Default::default()
        });
        let issuer = issuer_over(
            Arc::new(store.clone()),
            sessions.clone(),
            vec![failing(ProviderKind::Pix, 500)],
        );
        issuer
            .issue(request(PaymentRail::Pix, IssueMode::Dynamic, None))
            .await
            .unwrap();
        assert_eq!(sessions.invalidated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_boleto_success_losing_to_stored_failure_is_surfaced() {
        let memory = InMemoryChargeStore::new();
        let store = Arc::new(ScriptedStore::over(memory.clone()));
        // both attempts miss each other on lookup, as racing requests do
        store.hide_idempotency.store(true, Ordering::SeqCst);

        let req = request(PaymentRail::Boleto, IssueMode::Dynamic, Some("slip-race"));
        let failed_attempt = issuer_over(
            store.clone(),
            Arc::new(FakeSessions {
                available: true,
                ..Default::default()
            }),
            vec![failing(ProviderKind::Boleto, 503)],
        );
        assert!(matches!(
            failed_attempt.issue(req.clone()).await,
            Err(ChargeError::IssuanceFailed { .. })
        ));

        let slow_success = boleto_ok();
        let succeeded_attempt = issuer_over(
            store.clone(),
            Arc::new(FakeSessions {
                available: true,
                ..Default::default()
            }),
            vec![slow_success.clone()],
        );
        assert!(matches!(
            succeeded_attempt.issue(req.clone()).await,
            Err(ChargeError::IssuanceFailed { .. })
        ));
        assert_eq!(slow_success.calls.load(Ordering::SeqCst), 1);

        let stored = memory.get(&req.charge_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, ChargeStatus::Cancelled);
        assert_eq!(memory.charge_count().await, 1);
    }
}
