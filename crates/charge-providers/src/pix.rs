//! # PIX Dynamic Charges
//!
//! Registers immediate charges (`cob`) with the instant-transfer provider.
//! The local charge id, without hyphens, is the provider `txid`; a `PUT` on
//! the same `txid` never creates a second charge.

use crate::config::PixProviderConfig;
use crate::http;
use async_trait::async_trait;
use charge_core::{
    ChargeProvider, ProviderCharge, ProviderChargeRequest, ProviderKind, ProviderSession,
    ProviderUnavailable, UnavailableReason,
};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Longest payer message the provider accepts
const MAX_PAYER_MESSAGE: usize = 140;
/// Floor for the charge lifetime, in seconds
const MIN_EXPIRATION_SECS: i64 = 3600;

pub struct PixChargeProvider {
    config: PixProviderConfig,
    client: Client,
}

impl PixChargeProvider {
    /// `client` must be the session manager's mTLS client
    pub fn new(config: PixProviderConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Provider transaction id for a local charge id
    pub fn txid(charge_id: &str) -> String {
        charge_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    fn build_request(&self, request: &ProviderChargeRequest) -> PixChargeBody {
        let tax_id = request.payer.tax_id.as_str().to_string();
        let (cpf, cnpj) = if request.payer.tax_id.is_individual() {
            (Some(tax_id), None)
        } else {
            (None, Some(tax_id))
        };

        PixChargeBody {
            calendario: PixCalendar {
                expiracao: expiration_secs(request),
            },
            devedor: PixDebtor {
                cpf,
                cnpj,
                nome: request.payer.name.clone(),
            },
            valor: PixValue {
                original: request.amount.to_fixed(),
            },
            chave: self.config.pix_key.clone(),
            solicitacao_pagador: request
                .description
                .as_ref()
                .map(|d| d.chars().take(MAX_PAYER_MESSAGE).collect()),
        }
    }
}

/// Seconds until the end of the due date, at least one hour
fn expiration_secs(request: &ProviderChargeRequest) -> i64 {
    let end_of_due_date = request
        .due_at
        .and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now);
    (end_of_due_date - Utc::now())
        .num_seconds()
        .max(MIN_EXPIRATION_SECS)
}

#[async_trait]
impl ChargeProvider for PixChargeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pix
    }

    #[instrument(skip(self, session, request), fields(charge_id = %request.charge_id))]
    async fn create_charge(
        &self,
        session: &ProviderSession,
        request: &ProviderChargeRequest,
    ) -> Result<ProviderCharge, ProviderUnavailable> {
        let txid = Self::txid(&request.charge_id);
        let body = self.build_request(request);
        let url = format!("{}/v2/cob/{}", self.config.api_base_url, txid);

        debug!("Creating PIX charge: txid={}, amount={}", txid, body.valor.original);

        let response = self
            .client
            .put(&url)
            .header("Authorization", session.authorization())
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_failure(ProviderKind::Pix, e))?;

        let (status, raw) = http::read_success(ProviderKind::Pix, response).await?;
        let created: PixChargeResponse = http::parse_body(ProviderKind::Pix, status, &raw)?;

        let Some(payload) = created.pix_copia_e_cola.filter(|p| !p.is_empty()) else {
            return Err(
                ProviderUnavailable::new(ProviderKind::Pix, UnavailableReason::MalformedResponse)
                    .with_status(status)
                    .with_raw_response(raw),
            );
        };

        info!("Created PIX charge: txid={}", created.txid);

        Ok(ProviderCharge {
            provider_ref: created.txid,
            payload,
            payment_url: created.location,
            http_status: status,
            raw_response: raw,
        })
    }
}

// =============================================================================
// PIX API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct PixChargeBody {
    calendario: PixCalendar,
    devedor: PixDebtor,
    valor: PixValue,
    chave: String,
    #[serde(rename = "solicitacaoPagador", skip_serializing_if = "Option::is_none")]
    solicitacao_pagador: Option<String>,
}

#[derive(Debug, Serialize)]
struct PixCalendar {
    expiracao: i64,
}

#[derive(Debug, Serialize)]
struct PixDebtor {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cnpj: Option<String>,
    nome: String,
}

#[derive(Debug, Serialize)]
struct PixValue {
    original: String,
}

#[derive(Debug, Deserialize)]
struct PixChargeResponse {
    txid: String,
    #[serde(rename = "pixCopiaECola", default)]
    pix_copia_e_cola: Option<String>,
    #[serde(default)]
    location: Option<String>,
}
