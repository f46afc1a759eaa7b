//! # Reconciliation Handler
//!
//! Applies provider notifications to stored charges. Every delivery gets an
//! audit row; the first delivery of a provider event id is the only one that
//! may change a charge's status.

use crate::charge::ChargeStatus;
use crate::error::{ChargeError, ChargeResult};
use crate::event::{
    EventOutcome, PaymentConfirmed, PaymentEventSink, ProviderNotification, ReconciliationEvent,
};
use crate::store::{ChargeStore, EventClaim};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What a notification did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        charge_id: String,
        status: ChargeStatus,
    },
    Duplicate {
        original_event_id: String,
    },
    Orphaned,
    Ignored {
        charge_id: String,
    },
    /// The charge had already left `pending`
    Stale {
        charge_id: String,
        status: ChargeStatus,
    },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Duplicate { .. } => "duplicate",
            ReconcileOutcome::Orphaned => "orphaned",
            ReconcileOutcome::Ignored { .. } => "ignored",
            ReconcileOutcome::Stale { .. } => "stale",
        }
    }
}

pub struct ReconciliationHandler {
    store: Arc<dyn ChargeStore>,
    sink: Arc<dyn PaymentEventSink>,
}

impl ReconciliationHandler {
    pub fn new(store: Arc<dyn ChargeStore>, sink: Arc<dyn PaymentEventSink>) -> Self {
        Self { store, sink }
    }

    /// Apply one notification.
    ///
    /// Only storage failures are errors; unknown references, unmapped
    /// statuses and late deliveries are recorded outcomes. A failure before
    /// the status change commits releases the claim, so the provider's
    /// redelivery is processed instead of being taken for a duplicate.
    #[instrument(skip(self, notification), fields(provider = %notification.provider, event_id = %notification.event_id))]
    pub async fn handle(&self, notification: ProviderNotification) -> ChargeResult<ReconcileOutcome> {
        let event = ReconciliationEvent::from_notification(&notification);
        let event_id = event.id.clone();

        if let EventClaim::Duplicate { original_event_id } = self.store.claim_event(event).await? {
            info!(
                "Duplicate delivery of provider event {} (first recorded as {})",
                notification.event_id, original_event_id
            );
            return Ok(ReconcileOutcome::Duplicate { original_event_id });
        }

        match self.apply(&notification, &event_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Failed to apply provider event {}: {}", notification.event_id, e);
                if let Err(release) = self.store.release_event(&event_id).await {
                    error!("Could not release claim {} for redelivery: {}", event_id, release);
                }
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        notification: &ProviderNotification,
        event_id: &str,
    ) -> ChargeResult<ReconcileOutcome> {
        let Some(charge) = self
            .store
            .find_by_provider_ref(notification.provider, &notification.provider_ref)
            .await?
        else {
            warn!(
                "Orphaned notification: no charge for {} reference {}",
                notification.provider, notification.provider_ref
            );
            self.store
                .resolve_event(event_id, None, EventOutcome::Orphaned)
                .await?;
            return Ok(ReconcileOutcome::Orphaned);
        };

        let Some(target) = notification.status else {
            info!("Ignoring unmapped provider status for charge {}", charge.id);
            self.store
                .resolve_event(event_id, Some(&charge.id), EventOutcome::Ignored)
                .await?;
            return Ok(ReconcileOutcome::Ignored {
                charge_id: charge.id,
            });
        };

        match self
            .store
            .update_status(&charge.id, ChargeStatus::Pending, target, Some(event_id))
            .await
        {
            Ok(updated) => {
                // the transition is committed; a missing audit outcome must not hide it
                if let Err(e) = self
                    .store
                    .resolve_event(event_id, Some(&updated.id), EventOutcome::Applied)
                    .await
                {
                    error!(
                        "Charge {} changed but audit row {} was not resolved: {}",
                        updated.id, event_id, e
                    );
                }
                info!("Charge {} is now {}", updated.id, updated.status);

                if updated.status == ChargeStatus::Paid {
                    self.sink
                        .payment_confirmed(PaymentConfirmed {
                            charge_id: updated.id.clone(),
                            tenant_id: updated.tenant_id.clone(),
                            amount: updated.amount,
                            paid_at: updated.paid_at.unwrap_or_else(Utc::now),
                        })
                        .await;
                }

                Ok(ReconcileOutcome::Applied {
                    charge_id: updated.id,
                    status: updated.status,
                })
            }
            Err(ChargeError::InvalidTransition { actual, .. }) => {
                info!(
                    "Late notification for charge {}: already {}, provider reports {}",
                    charge.id, actual, target
                );
                self.store
                    .resolve_event(event_id, Some(&charge.id), EventOutcome::Stale)
                    .await?;
                Ok(ReconcileOutcome::Stale {
                    charge_id: charge.id,
                    status: actual,
                })
            }
            Err(e) => Err(e),
        }
    }
}
