//! # Boleto Registration
//!
//! Registers bank slips with the bank-slip provider. The local charge id is
//! sent both as `Idempotency-Key` and as `externalReference`.

use crate::config::{BoletoProviderConfig, HttpTimeouts};
use crate::http;
use async_trait::async_trait;
use charge_core::{
    ChargeError, ChargeProvider, ChargeResult, ProviderCharge, ProviderChargeRequest,
    ProviderKind, ProviderSession, ProviderUnavailable, UnavailableReason,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

pub struct BoletoChargeProvider {
    config: BoletoProviderConfig,
    client: Client,
}

impl BoletoChargeProvider {
    /// Create a new bank-slip provider
    pub fn new(config: BoletoProviderConfig, timeouts: &HttpTimeouts) -> ChargeResult<Self> {
        let client = http::build_client(timeouts, None).map_err(|e| {
            ChargeError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self { config, client })
    }

    /// Use a prebuilt client
    pub fn with_client(config: BoletoProviderConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_request(request: &ProviderChargeRequest) -> BoletoPaymentBody {
        BoletoPaymentBody {
            billing_type: "BOLETO",
            value: request.amount.to_fixed(),
            due_date: request.due_at.format("%Y-%m-%d").to_string(),
            description: request.description.clone(),
            external_reference: request.charge_id.clone(),
            payer: BoletoPayer {
                name: request.payer.name.clone(),
                cpf_cnpj: request.payer.tax_id.as_str().to_string(),
                email: request.payer.email.clone(),
            },
        }
    }
}

#[async_trait]
impl ChargeProvider for BoletoChargeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Boleto
    }

    #[instrument(skip(self, session, request), fields(charge_id = %request.charge_id))]
    async fn create_charge(
        &self,
        session: &ProviderSession,
        request: &ProviderChargeRequest,
    ) -> Result<ProviderCharge, ProviderUnavailable> {
        let body = Self::build_request(request);
        let url = format!("{}/v3/payments", self.config.api_base_url);

        debug!("Registering bank slip: value={}, due={}", body.value, body.due_date);

        let response = self
            .client
            .post(&url)
            .header("Authorization", session.authorization())
            .header("Idempotency-Key", &request.charge_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_failure(ProviderKind::Boleto, e))?;

        let (status, raw) = http::read_success(ProviderKind::Boleto, response).await?;
        let created: BoletoPaymentResponse = http::parse_body(ProviderKind::Boleto, status, &raw)?;

        // a slip without its digitable line cannot be paid
        let Some(digitable_line) = created.identification_field.filter(|l| !l.is_empty()) else {
            return Err(ProviderUnavailable::new(
                ProviderKind::Boleto,
                UnavailableReason::MalformedResponse,
            )
            .with_status(status)
            .with_raw_response(raw));
        };

        info!("Registered bank slip: id={}", created.id);

        Ok(ProviderCharge {
            provider_ref: created.id,
            payload: digitable_line,
            payment_url: created.bank_slip_url,
            http_status: status,
            raw_response: raw,
        })
    }
}

// =============================================================================
// Boleto API Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BoletoPaymentBody {
    billing_type: &'static str,
    value: String,
    due_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    external_reference: String,
    payer: BoletoPayer,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BoletoPayer {
    name: String,
    cpf_cnpj: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoletoPaymentResponse {
    id: String,
    #[serde(default)]
    identification_field: Option<String>,
    #[serde(default)]
    bank_slip_url: Option<String>,
}
