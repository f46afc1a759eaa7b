//! # Provider Sessions
//!
//! [`ProviderSessionManager`] owns the credentials for both providers.
//!
//! - PIX: the client presents a certificate (mutual TLS) and exchanges Basic
//!   credentials for a bearer token. The token is cached under an `RwLock`
//!   and refreshed `token_refresh_margin` before it expires; only one task
//!   performs a refresh while the rest wait on the lock.
//! - Boleto: the configured API key is the session. No cache, no expiry.
//!
//! Missing or unreadable certificate material leaves the PIX slot reporting
//! `ProviderUnavailable` on every call instead of failing startup.

use crate::config::{BoletoProviderConfig, HttpTimeouts, PixProviderConfig};
use crate::http;
use async_trait::async_trait;
use charge_core::{ProviderKind, ProviderSession, ProviderUnavailable, SessionSource, UnavailableReason};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Identity};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, margin: Duration) -> bool {
        Utc::now() + margin < self.expires_at
    }
}

struct PixSessions {
    config: PixProviderConfig,
    /// mTLS client, or why it could not be built
    client: Result<Client, UnavailableReason>,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Produces sessions for the configured providers
#[derive(Default)]
pub struct ProviderSessionManager {
    pix: Option<PixSessions>,
    boleto: Option<BoletoProviderConfig>,
}

impl ProviderSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable PIX, loading the certificate bundle from `config.cert_path`
    pub fn with_pix(mut self, config: PixProviderConfig, timeouts: &HttpTimeouts) -> Self {
        let client = load_identity(&config).and_then(|identity| {
            http::build_client(timeouts, Some(identity)).map_err(|e| {
                warn!("PIX client certificate rejected: {}", e);
                UnavailableReason::Certificate
            })
        });
        if client.is_ok() {
            info!("PIX provider session configured (mTLS)");
        }
        self.pix = Some(PixSessions {
            config,
            client,
            token: RwLock::new(None),
        });
        self
    }

    /// Enable PIX with a prebuilt client (for testing against a mock server)
    pub fn with_pix_client(mut self, config: PixProviderConfig, client: Client) -> Self {
        self.pix = Some(PixSessions {
            config,
            client: Ok(client),
            token: RwLock::new(None),
        });
        self
    }

    pub fn with_boleto(mut self, config: BoletoProviderConfig) -> Self {
        self.boleto = Some(config);
        self
    }

    /// The mTLS client PIX calls must go through, when one could be built
    pub fn pix_client(&self) -> Option<Client> {
        self.pix.as_ref().and_then(|p| p.client.as_ref().ok().cloned())
    }

    /// Drop the cached PIX token so the next call fetches a new one
    pub async fn invalidate_pix_token(&self) {
        if let Some(pix) = &self.pix {
            *pix.token.write().await = None;
        }
    }

    async fn pix_session(&self) -> Result<ProviderSession, ProviderUnavailable> {
        let pix = self.pix.as_ref().ok_or_else(|| {
            ProviderUnavailable::new(ProviderKind::Pix, UnavailableReason::NotConfigured)
        })?;
        let client = pix
            .client
            .as_ref()
            .map_err(|reason| ProviderUnavailable::new(ProviderKind::Pix, *reason))?;
        let margin = Duration::from_std(pix.config.token_refresh_margin)
            .unwrap_or_else(|_| Duration::seconds(60));

        if let Some(token) = pix.token.read().await.as_ref().filter(|t| t.is_fresh(margin)) {
            return Ok(token_session(token));
        }

        let mut cached = pix.token.write().await;
        // another task may have refreshed while we waited
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(margin)) {
            return Ok(token_session(token));
        }

        let token = fetch_token(client, &pix.config).await?;
        let session = token_session(&token);
        *cached = Some(token);
        Ok(session)
    }
}

fn token_session(token: &CachedToken) -> ProviderSession {
    ProviderSession {
        provider: ProviderKind::Pix,
        access_token: token.access_token.clone(),
        expires_at: Some(token.expires_at),
    }
}

fn load_identity(config: &PixProviderConfig) -> Result<Identity, UnavailableReason> {
    let Some(path) = &config.cert_path else {
        warn!("PIX_CERT_PATH not set; dynamic PIX charges are disabled");
        return Err(UnavailableReason::NotConfigured);
    };
    let pem = std::fs::read(path).map_err(|e| {
        warn!("Cannot read PIX certificate {}: {}", path.display(), e);
        UnavailableReason::Certificate
    })?;
    Identity::from_pem(&pem).map_err(|e| {
        warn!("Invalid PIX certificate {}: {}", path.display(), e);
        UnavailableReason::Certificate
    })
}

#[instrument(skip(client, config))]
async fn fetch_token(
    client: &Client,
    config: &PixProviderConfig,
) -> Result<CachedToken, ProviderUnavailable> {
    let url = format!("{}/oauth/token", config.api_base_url);
    debug!("Requesting PIX access token");

    let response = client
        .post(&url)
        .basic_auth(&config.client_id, Some(&config.client_secret))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await
        .map_err(|e| http::transport_failure(ProviderKind::Pix, e))?;

    let (status, body) = http::read_success(ProviderKind::Pix, response).await?;
    let token: TokenResponse = http::parse_body(ProviderKind::Pix, status, &body)?;

    info!("Obtained PIX access token (expires in {}s)", token.expires_in);
    Ok(CachedToken {
        access_token: token.access_token,
        expires_at: Utc::now() + Duration::seconds(token.expires_in),
    })
}

#[async_trait]
impl SessionSource for ProviderSessionManager {
    async fn get_session(
        &self,
        provider: ProviderKind,
    ) -> Result<ProviderSession, ProviderUnavailable> {
        match provider {
            ProviderKind::Pix => self.pix_session().await,
            ProviderKind::Boleto => self
                .boleto
                .as_ref()
                .map(|config| ProviderSession {
                    provider: ProviderKind::Boleto,
                    access_token: config.api_key.clone(),
                    expires_at: None,
                })
                .ok_or_else(|| {
                    ProviderUnavailable::new(ProviderKind::Boleto, UnavailableReason::NotConfigured)
                }),
        }
    }

    async fn invalidate(&self, provider: ProviderKind) {
        // bank-slip sessions are a static key
        if provider == ProviderKind::Pix {
            debug!("Discarding cached PIX token");
            self.invalidate_pix_token().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_providers_are_unavailable() {
        let manager = ProviderSessionManager::new();
        let err = manager.get_session(ProviderKind::Pix).await.unwrap_err();
        assert_eq!(err.reason, UnavailableReason::NotConfigured);
        let err = manager.get_session(ProviderKind::Boleto).await.unwrap_err();
        assert_eq!(err.reason, UnavailableReason::NotConfigured);
    }

    #[tokio::test]
    async fn test_missing_certificate_is_unavailable() {
        let config = PixProviderConfig::new("id", "secret", "key")
            .with_api_base_url("https://pix.example")
            .with_cert_path("/nonexistent/pix-cert.pem");
        let manager = ProviderSessionManager::new().with_pix(config, &HttpTimeouts::default());

        assert!(manager.pix_client().is_none());
        let err = manager.get_session(ProviderKind::Pix).await.unwrap_err();
        assert_eq!(err.reason, UnavailableReason::Certificate);
    }

    #[tokio::test]
    async fn test_malformed_certificate_is_unavailable() {
        let path = std::env::temp_dir().join("charge-engine-bad-cert.pem");
        std::fs::write(&path, "not a certificate").unwrap();
        let config = PixProviderConfig::new("id", "secret", "key")
            .with_api_base_url("https://pix.example")
            .with_cert_path(&path);
        let manager = ProviderSessionManager::new().with_pix(config, &HttpTimeouts::default());

        let err = manager.get_session(ProviderKind::Pix).await.unwrap_err();
        assert_eq!(err.reason, UnavailableReason::Certificate);
    }

    #[tokio::test]
    async fn test_boleto_session_is_the_api_key() {
        let manager = ProviderSessionManager::new()
            .with_boleto(BoletoProviderConfig::new("slip-key", "https://slips.example"));
        let session = manager.get_session(ProviderKind::Boleto).await.unwrap();
        assert_eq!(session.authorization(), "Bearer slip-key");
        assert!(session.expires_at.is_none());
    }

    #[test]
    fn test_token_freshness_margin() {
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::seconds(90),
        };
        assert!(token.is_fresh(Duration::seconds(60)));
        assert!(!token.is_fresh(Duration::seconds(120)));
    }
}
