//! # Provider Webhooks
//!
//! Parses provider notification bodies into [`ProviderNotification`]s and
//! verifies the optional shared-secret signature.
//!
//! Parsing only rejects bodies that lack the fields reconciliation needs (an
//! event id and a provider charge id). Unknown provider statuses parse fine
//! and come out with `status: None`.

use charge_core::{ChargeError, ChargeResult, ChargeStatus, ProviderKind, ProviderNotification};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

/// Header carrying `hex(HMAC-SHA256(secret, body))`
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Bank-slip events that move a charge, and where to
pub const BOLETO_STATUS_TABLE: &[(&str, ChargeStatus)] = &[
    ("PAYMENT_RECEIVED", ChargeStatus::Paid),
    ("PAYMENT_CONFIRMED", ChargeStatus::Paid),
    ("PAYMENT_RECEIVED_IN_CASH", ChargeStatus::Paid),
    ("PAYMENT_DELETED", ChargeStatus::Cancelled),
    ("PAYMENT_REFUNDED", ChargeStatus::Cancelled),
    ("PAYMENT_OVERDUE", ChargeStatus::Expired),
];

/// Translate a bank-slip event name
pub fn boleto_status(event: &str) -> Option<ChargeStatus> {
    BOLETO_STATUS_TABLE
        .iter()
        .find(|(name, _)| *name == event)
        .map(|(_, status)| *status)
}

// =============================================================================
// PIX
// =============================================================================

#[derive(Debug, Deserialize)]
struct PixWebhookBody {
    #[serde(default)]
    pix: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PixReceipt {
    #[serde(rename = "endToEndId")]
    end_to_end_id: String,
    txid: String,
    #[serde(default)]
    horario: Option<String>,
}

/// Parse a PIX notification. Each received transfer is one notification and
/// always means `paid`.
pub fn parse_pix_notifications(body: &[u8]) -> ChargeResult<Vec<ProviderNotification>> {
    let parsed: PixWebhookBody = serde_json::from_slice(body)
        .map_err(|e| ChargeError::WebhookParseError(format!("Invalid PIX notification: {}", e)))?;

    if parsed.pix.is_empty() {
        return Err(ChargeError::WebhookParseError(
            "PIX notification has no transfers".to_string(),
        ));
    }

    parsed
        .pix
        .into_iter()
        .map(|raw| {
            let receipt: PixReceipt = serde_json::from_value(raw.clone()).map_err(|e| {
                ChargeError::WebhookParseError(format!("Invalid PIX transfer: {}", e))
            })?;
            if receipt.end_to_end_id.is_empty() || receipt.txid.is_empty() {
                return Err(ChargeError::WebhookParseError(
                    "PIX transfer without endToEndId or txid".to_string(),
                ));
            }
            Ok(ProviderNotification {
                provider: ProviderKind::Pix,
                event_id: receipt.end_to_end_id,
                provider_ref: receipt.txid,
                status: Some(ChargeStatus::Paid),
                occurred_at: receipt.horario.as_deref().and_then(parse_timestamp),
                raw,
            })
        })
        .collect()
}

// =============================================================================
// Boleto
// =============================================================================

#[derive(Debug, Deserialize)]
struct BoletoWebhookBody {
    id: String,
    event: String,
    payment: BoletoWebhookPayment,
    #[serde(rename = "dateCreated", default)]
    date_created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoletoWebhookPayment {
    id: String,
}

pub fn parse_boleto_notification(body: &[u8]) -> ChargeResult<ProviderNotification> {
    let raw: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        ChargeError::WebhookParseError(format!("Invalid bank-slip notification: {}", e))
    })?;
    let parsed: BoletoWebhookBody = serde_json::from_value(raw.clone()).map_err(|e| {
        ChargeError::WebhookParseError(format!("Invalid bank-slip notification: {}", e))
    })?;

    if parsed.id.is_empty() || parsed.payment.id.is_empty() {
        return Err(ChargeError::WebhookParseError(
            "Bank-slip notification without event or payment id".to_string(),
        ));
    }

    let status = boleto_status(&parsed.event);
    if status.is_none() {
        debug!("Bank-slip event {} has no status mapping", parsed.event);
    }

    Ok(ProviderNotification {
        provider: ProviderKind::Boleto,
        event_id: parsed.id,
        provider_ref: parsed.payment.id,
        status,
        occurred_at: parsed.date_created.as_deref().and_then(parse_timestamp),
        raw,
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// Signature Verification
// =============================================================================

/// Check `signature` against the body when a secret is configured
pub fn verify_signature(secret: Option<&str>, body: &[u8], signature: Option<&str>) -> ChargeResult<()> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let signature = signature.ok_or_else(|| {
        ChargeError::WebhookVerificationFailed("Missing signature header".to_string())
    })?;

    let expected = compute_hmac_sha256(secret, body)?;
    if !constant_time_compare(&signature.trim().to_ascii_lowercase(), &expected) {
        return Err(ChargeError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }
    Ok(())
}

pub fn compute_hmac_sha256(secret: &str, body: &[u8]) -> ChargeResult<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ChargeError::Configuration(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
