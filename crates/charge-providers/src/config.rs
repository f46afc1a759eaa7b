//! # Provider Configuration
//!
//! Configuration management for the PIX and Boleto providers.
//! All secrets are loaded from environment variables. Both providers are
//! optional; an unconfigured PIX provider means every PIX charge is issued as
//! a static code.

use charge_core::{ChargeError, ChargeResult, ProviderKind};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Timeouts applied to every provider HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub total: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            total: Duration::from_secs(30),
        }
    }
}

impl HttpTimeouts {
    /// Reads `PROVIDER_CONNECT_TIMEOUT_SECS` and `PROVIDER_TIMEOUT_SECS`
    pub fn from_env() -> ChargeResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            connect: Duration::from_secs(parse_secs(
                "PROVIDER_CONNECT_TIMEOUT_SECS",
                defaults.connect.as_secs(),
            )?),
            total: Duration::from_secs(parse_secs(
                "PROVIDER_TIMEOUT_SECS",
                defaults.total.as_secs(),
            )?),
        })
    }
}

/// Instant-transfer provider: mutual TLS plus OAuth2 client credentials
#[derive(Clone)]
pub struct PixProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// PEM file holding the client certificate and its private key
    pub cert_path: Option<PathBuf>,
    pub api_base_url: String,
    /// Receiving key sent on every dynamic charge
    pub pix_key: String,
    /// Refresh the token this long before it expires
    pub token_refresh_margin: Duration,
}

impl PixProviderConfig {
    /// Create config with explicit values (for testing)
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        pix_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cert_path: None,
            api_base_url: String::new(),
            pix_key: pix_key.into(),
            token_refresh_margin: Duration::from_secs(60),
        }
    }

    /// Builder: set the API base URL
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: set the certificate bundle path
    pub fn with_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    /// Load from environment. `Ok(None)` when `PIX_CLIENT_ID` is not set.
    ///
    /// Required once enabled: `PIX_CLIENT_SECRET`, `PIX_API_BASE_URL`,
    /// `PIX_KEY`. `PIX_CERT_PATH` may be absent; the session manager then
    /// reports the provider unavailable.
    pub fn from_env() -> ChargeResult<Option<Self>> {
        let Some(client_id) = optional("PIX_CLIENT_ID") else {
            return Ok(None);
        };

        let config = Self::new(
            client_id,
            required("PIX_CLIENT_SECRET")?,
            required("PIX_KEY")?,
        )
        .with_api_base_url(required("PIX_API_BASE_URL")?)
        .with_token_refresh_margin(Duration::from_secs(parse_secs(
            "PIX_TOKEN_REFRESH_MARGIN_SECS",
            60,
        )?));

        Ok(Some(match optional("PIX_CERT_PATH") {
            Some(path) => config.with_cert_path(path),
            None => config,
        }))
    }
}

impl std::fmt::Debug for PixProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("cert_path", &self.cert_path)
            .field("api_base_url", &self.api_base_url)
            .field("pix_key", &self.pix_key)
            .field("token_refresh_margin", &self.token_refresh_margin)
            .finish()
    }
}

/// Bank-slip provider: one long-lived API key
#[derive(Clone)]
pub struct BoletoProviderConfig {
    pub api_key: String,
    pub api_base_url: String,
}

impl BoletoProviderConfig {
    pub fn new(api_key: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Load from environment. `Ok(None)` when `BOLETO_API_KEY` is not set.
    pub fn from_env() -> ChargeResult<Option<Self>> {
        let Some(api_key) = optional("BOLETO_API_KEY") else {
            return Ok(None);
        };
        Ok(Some(Self::new(api_key, required("BOLETO_API_BASE_URL")?)))
    }
}

impl std::fmt::Debug for BoletoProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoletoProviderConfig")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Shared secrets for webhook signatures; `None` leaves the endpoint open
#[derive(Clone, Default)]
pub struct WebhookSecrets {
    pub pix: Option<String>,
    pub boleto: Option<String>,
}

impl WebhookSecrets {
    pub fn from_env() -> Self {
        Self {
            pix: optional("PIX_WEBHOOK_SECRET"),
            boleto: optional("BOLETO_WEBHOOK_SECRET"),
        }
    }

    pub fn for_provider(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Pix => self.pix.as_deref(),
            ProviderKind::Boleto => self.boleto.as_deref(),
        }
    }
}

impl std::fmt::Debug for WebhookSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecrets")
            .field("pix", &self.pix.as_ref().map(|_| "<redacted>"))
            .field("boleto", &self.boleto.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything the provider layer reads from the environment
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub pix: Option<PixProviderConfig>,
    pub boleto: Option<BoletoProviderConfig>,
    pub timeouts: HttpTimeouts,
    pub webhooks: WebhookSecrets,
}

impl ProvidersConfig {
    pub fn from_env() -> ChargeResult<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            pix: PixProviderConfig::from_env()?,
            boleto: BoletoProviderConfig::from_env()?,
            timeouts: HttpTimeouts::from_env()?,
            webhooks: WebhookSecrets::from_env(),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> ChargeResult<String> {
    optional(name).ok_or_else(|| ChargeError::Configuration(format!("{} not set", name)))
}

fn parse_secs(name: &str, default: u64) -> ChargeResult<u64> {
    match optional(name) {
        Some(v) => v.parse().map_err(|_| {
            ChargeError::Configuration(format!("{} must be a whole number of seconds", name))
        }),
        None => Ok(default),
    }
}
