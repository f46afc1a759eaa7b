//! # Audit and Domain Events
//!
//! `ReconciliationEvent` is the append-only audit row written for every
//! inbound provider notification and every outbound provider call.
//! `PaymentConfirmed` is the domain event emitted once per `paid` transition.

use crate::charge::{Amount, ChargeStatus};
use crate::error::ProviderUnavailable;
use crate::provider::{ProviderCharge, ProviderKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Where an audit row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Inbound provider webhook
    Notification,
    /// Outbound provider call made during issuance
    ProviderCall,
}

/// What happened with an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// Claimed, processing not finished
    Received,
    /// Status transition applied
    Applied,
    /// Same provider event id seen before
    Duplicate,
    /// No charge with that provider reference
    Orphaned,
    /// Provider status has no mapping
    Ignored,
    /// Charge already left the expected state
    Stale,
    /// Processing hit a storage error; a redelivery is processed again
    Failed,
    CallSucceeded,
    CallFailed,
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    /// Local id, stored on the charge as transition proof
    pub id: String,
    pub source: EventSource,
    pub provider: ProviderKind,
    /// Provider event id for notifications; charge id for calls
    pub provider_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,
    /// Status the provider reported, translated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<ChargeStatus>,
    pub outcome: EventOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Raw provider body, kept for dispute evidence
    pub raw: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationEvent {
    /// Audit row for an inbound notification, before processing
    pub fn from_notification(notification: &ProviderNotification) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: EventSource::Notification,
            provider: notification.provider,
            provider_event_id: notification.event_id.clone(),
            provider_ref: Some(notification.provider_ref.clone()),
            charge_id: None,
            reported_status: notification.status,
            outcome: EventOutcome::Received,
            http_status: None,
            raw: notification.raw.to_string(),
            recorded_at: Utc::now(),
        }
    }

    /// Audit row for a provider call that succeeded
    pub fn call_succeeded(provider: ProviderKind, charge_id: &str, response: &ProviderCharge) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: EventSource::ProviderCall,
            provider,
            provider_event_id: charge_id.to_string(),
            provider_ref: Some(response.provider_ref.clone()),
            charge_id: Some(charge_id.to_string()),
            reported_status: None,
            outcome: EventOutcome::CallSucceeded,
            http_status: Some(response.http_status),
            raw: response.raw_response.clone(),
            recorded_at: Utc::now(),
        }
    }

    /// Audit row for a provider call that failed
    pub fn call_failed(charge_id: &str, failure: &ProviderUnavailable) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: EventSource::ProviderCall,
            provider: failure.provider,
            provider_event_id: charge_id.to_string(),
            provider_ref: None,
            charge_id: Some(charge_id.to_string()),
            reported_status: None,
            outcome: EventOutcome::CallFailed,
            http_status: failure.http_status,
            raw: failure
                .raw_response
                .clone()
                .unwrap_or_else(|| failure.reason.to_string()),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// A provider notification, normalised by the provider adapter
#[derive(Debug, Clone)]
pub struct ProviderNotification {
    pub provider: ProviderKind,
    /// Provider's unique id for this delivery's event
    pub event_id: String,
    /// Provider's id for the charge
    pub provider_ref: String,
    /// Translated status, `None` when the provider status has no mapping
    pub status: Option<ChargeStatus>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

/// Emitted once per successful `pending → paid` transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub charge_id: String,
    pub tenant_id: String,
    pub amount: Amount,
    pub paid_at: DateTime<Utc>,
}

/// Receives domain events for downstream notification
#[async_trait]
pub trait PaymentEventSink: Send + Sync {
    async fn payment_confirmed(&self, event: PaymentConfirmed);
}

/// Default sink (just logs events)
pub struct LoggingEventSink;

#[async_trait]
impl PaymentEventSink for LoggingEventSink {
    async fn payment_confirmed(&self, event: PaymentConfirmed) {
        info!(
            "Payment confirmed: charge={}, tenant={}, amount={}, paid_at={}",
            event.charge_id,
            event.tenant_id,
            event.amount,
            event.paid_at.to_rfc3339()
        );
    }
}

/// Sink that forwards events over a channel
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::UnboundedSender<PaymentConfirmed>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<PaymentConfirmed>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PaymentEventSink for ChannelEventSink {
    async fn payment_confirmed(&self, event: PaymentConfirmed) {
        if self.sender.send(event).is_err() {
            tracing::warn!("Payment event receiver dropped");
        }
    }
}
