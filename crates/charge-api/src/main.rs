//! # Charge Engine
//!
//! PIX and Boleto charge issuance with webhook reconciliation.
//!
//! ## Usage
//!
//! ```bash
//! # Static code fallback (always available)
//! export PIX_STATIC_KEY=11122233344
//! export PIX_MERCHANT_NAME="CONDOMINIO EXEMPLO"
//! export PIX_MERCHANT_CITY="SAO PAULO"
//!
//! # Dynamic PIX (optional)
//! export PIX_CLIENT_ID=... PIX_CLIENT_SECRET=... PIX_CERT_PATH=/etc/pix/cert.pem
//! export PIX_API_BASE_URL=https://pix.example PIX_KEY=...
//!
//! # Run the server
//! charge-engine
//! ```

use chrono::Utc;
use charge_api::{routes, state::AppState};
use charge_core::ExpirySweeper;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    print_banner();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment providers: {:?}", state.providers());

    if let Some(interval) = state.config.sweep_interval {
        tokio::spawn(run_expiry_sweep(state.sweeper(), interval));
        info!("Expiry sweep every {}s", interval.as_secs());
    }

    let app = routes::create_router(state);

    info!("Charge engine starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Charges: POST http://{}/api/v1/{{tenant_id}}/charges", addr);
        info!("Webhooks: POST http://{}/webhook/pix, /webhook/boleto", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured output
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run_expiry_sweep(sweeper: ExpirySweeper, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = sweeper.sweep(Utc::now().date_naive()).await {
            error!("Expiry sweep failed: {}", e);
        }
    }
}

fn print_banner() {
    println!(
        r#"
  Charge Engine
  ━━━━━━━━━━━━━━━━━━━━━━━
  PIX / Boleto issuance and reconciliation
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
