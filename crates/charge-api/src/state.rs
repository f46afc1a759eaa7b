//! # Application State
//!
//! Shared state for the Axum application.
//! Holds the issuer, the reconciliation handler, the store, and the webhook
//! secrets.

use charge_core::{
    ChargeIssuer, ChargeStore, ExpirySweeper, InMemoryChargeStore, LoggingEventSink,
    PaymentEventSink, ProviderKind, ProviderSet, ReconciliationHandler, SessionSource,
    StaticCodeConfig, StaticCodeEncoder,
};
use charge_providers::{build_providers, ProvidersConfig, WebhookSecrets};
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// How often overdue charges are expired; `None` disables the sweep
    pub sweep_interval: Option<Duration>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let sweep_secs = std::env::var("EXPIRY_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(300);

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
            sweep_interval: None,
        }
    }
}

/// Static code merchant settings from `PIX_STATIC_KEY`, `PIX_MERCHANT_NAME`
/// and `PIX_MERCHANT_CITY`. A missing key surfaces when a static code is
/// first needed.
pub fn static_code_config_from_env() -> StaticCodeConfig {
    let var = |name: &str| std::env::var(name).unwrap_or_default();
    StaticCodeConfig::new(
        var("PIX_STATIC_KEY"),
        var("PIX_MERCHANT_NAME"),
        var("PIX_MERCHANT_CITY"),
    )
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<ChargeIssuer>,
    pub reconciler: Arc<ReconciliationHandler>,
    pub store: Arc<dyn ChargeStore>,
    pub webhooks: WebhookSecrets,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Create the state from environment variables
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let providers_config = ProvidersConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load provider config: {}", e))?;
        let (sessions, providers) = build_providers(&providers_config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize providers: {}", e))?;

        Ok(Self::build(
            config,
            Arc::new(InMemoryChargeStore::new()),
            sessions,
            providers,
            StaticCodeEncoder::new(static_code_config_from_env()),
            Arc::new(LoggingEventSink),
            providers_config.webhooks,
        ))
    }

    /// Wire the state from its parts
    pub fn build(
        config: AppConfig,
        store: Arc<dyn ChargeStore>,
        sessions: Arc<dyn SessionSource>,
        providers: ProviderSet,
        static_codes: StaticCodeEncoder,
        sink: Arc<dyn PaymentEventSink>,
        webhooks: WebhookSecrets,
    ) -> Self {
        let issuer = ChargeIssuer::new(store.clone(), sessions, providers, static_codes);
        let reconciler = ReconciliationHandler::new(store.clone(), sink);
        Self {
            issuer: Arc::new(issuer),
            reconciler: Arc::new(reconciler),
            store,
            webhooks,
            config,
        }
    }

    /// Configured providers
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.issuer.providers().kinds()
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.store.clone())
    }
}
