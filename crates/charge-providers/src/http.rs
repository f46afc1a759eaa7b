//! Shared HTTP plumbing for provider calls.
//!
//! Every transport or HTTP failure becomes a [`ProviderUnavailable`]; the
//! reason only feeds logs and the audit trail.

use crate::config::HttpTimeouts;
use charge_core::{ProviderKind, ProviderUnavailable, UnavailableReason};
use reqwest::{Client, Identity, Response};
use tracing::error;

/// Build a client bounded by `timeouts`, optionally presenting `identity`
pub fn build_client(timeouts: &HttpTimeouts, identity: Option<Identity>) -> reqwest::Result<Client> {
    let builder = Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.total);
    match identity {
        Some(identity) => builder.identity(identity).build(),
        None => builder.build(),
    }
}

/// Classify a transport error
pub fn transport_failure(provider: ProviderKind, err: reqwest::Error) -> ProviderUnavailable {
    let reason = if err.is_timeout() {
        UnavailableReason::Timeout
    } else {
        UnavailableReason::Network
    };
    error!("{} provider request failed ({}): {}", provider, reason, err);
    ProviderUnavailable::new(provider, reason)
}

/// Read status and body, turning non-2xx answers into failures
pub async fn read_success(
    provider: ProviderKind,
    response: Response,
) -> Result<(u16, String), ProviderUnavailable> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_failure(provider, e))?;

    if !status.is_success() {
        error!("{} provider API error: status={}, body={}", provider, status, body);
        let reason = match status.as_u16() {
            401 | 403 => UnavailableReason::CredentialsRejected,
            _ => UnavailableReason::Rejected,
        };
        return Err(ProviderUnavailable::new(provider, reason)
            .with_status(status.as_u16())
            .with_raw_response(body));
    }

    Ok((status.as_u16(), body))
}

/// Parse a 2xx body, keeping it for the audit row when it does not fit
pub fn parse_body<T: serde::de::DeserializeOwned>(
    provider: ProviderKind,
    status: u16,
    body: &str,
) -> Result<T, ProviderUnavailable> {
    serde_json::from_str(body).map_err(|e| {
        error!("Failed to parse {} provider response: {}", provider, e);
        ProviderUnavailable::new(provider, UnavailableReason::MalformedResponse)
            .with_status(status)
            .with_raw_response(body)
    })
}
