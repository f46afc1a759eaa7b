//! # charge-providers
//!
//! Provider clients for the charge engine.
//!
//! This crate provides the two charge providers and the session manager that
//! authenticates them:
//!
//! 1. **PixChargeProvider** - dynamic PIX charges (`cob`)
//!    - Mutual TLS client certificate
//!    - OAuth2 client-credentials token, cached until shortly before expiry
//!
//! 2. **BoletoChargeProvider** - registered bank slips
//!    - Long-lived API key
//!    - `Idempotency-Key` header carries the local charge id
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use charge_providers::{build_providers, ProvidersConfig};
//!
//! let config = ProvidersConfig::from_env()?;
//! let (sessions, providers) = build_providers(&config)?;
//!
//! let issuer = ChargeIssuer::new(store, sessions, providers, encoder);
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! use charge_providers::webhook::{parse_boleto_notification, verify_signature};
//!
//! verify_signature(config.webhooks.boleto.as_deref(), &body, signature)?;
//! let notification = parse_boleto_notification(&body)?;
//! reconciler.handle(notification).await?;
//! ```

pub mod boleto;
pub mod config;
pub mod http;
pub mod pix;
pub mod session;
pub mod webhook;

use charge_core::{ChargeResult, ProviderSet};
use std::sync::Arc;
use tracing::info;

// Re-exports
pub use boleto::BoletoChargeProvider;
pub use config::{
    BoletoProviderConfig, HttpTimeouts, PixProviderConfig, ProvidersConfig, WebhookSecrets,
};
pub use pix::PixChargeProvider;
pub use session::ProviderSessionManager;
pub use webhook::{
    parse_boleto_notification, parse_pix_notifications, verify_signature, SIGNATURE_HEADER,
};

/// Build the session manager and register every provider that can be used.
///
/// PIX is registered only when its mTLS client could be built; otherwise PIX
/// issuance falls back to static codes.
pub fn build_providers(
    config: &ProvidersConfig,
) -> ChargeResult<(Arc<ProviderSessionManager>, ProviderSet)> {
    let mut sessions = ProviderSessionManager::new();
    let mut providers = ProviderSet::new();

    if let Some(pix) = &config.pix {
        sessions = sessions.with_pix(pix.clone(), &config.timeouts);
        if let Some(client) = sessions.pix_client() {
            providers.register(Arc::new(PixChargeProvider::new(pix.clone(), client)));
            info!("Registered PIX provider at {}", pix.api_base_url);
        }
    }

    if let Some(boleto) = &config.boleto {
        sessions = sessions.with_boleto(boleto.clone());
        providers.register(Arc::new(BoletoChargeProvider::new(
            boleto.clone(),
            &config.timeouts,
        )?));
        info!("Registered Boleto provider at {}", boleto.api_base_url);
    }

    Ok((Arc::new(sessions), providers))
}
