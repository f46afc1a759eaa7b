//! # Charge Types
//!
//! The canonical charge record, its status machine, and the validated value
//! types (amount, payer tax id) a charge is built from.

use crate::error::{ChargeError, ChargeResult};
use crate::provider::ProviderKind;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for charge ids derived from caller idempotency keys
const CHARGE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_0b7e_52a4_4d2b_9c1e_8a53_d1f0_7c42);

/// Positive BRL amount with at most two fraction digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Validate a decimal amount
    pub fn new(value: Decimal) -> ChargeResult<Self> {
        if value <= Decimal::ZERO {
            return Err(ChargeError::Validation(format!(
                "amount must be positive, got {}",
                value
            )));
        }
        if value.normalize().scale() > 2 {
            return Err(ChargeError::Validation(format!(
                "amount must have at most 2 fraction digits, got {}",
                value
            )));
        }
        let mut value = value;
        value.rescale(2);
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Exactly two fraction digits, no rounding (e.g. "150.00")
    pub fn to_fixed(&self) -> String {
        self.0.to_string()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = ChargeError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R$ {}", self.0)
    }
}

/// Brazilian tax identifier: CPF (11 digits) or CNPJ (14 digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Normalise punctuation away and check length and check digits
    pub fn parse(raw: &str) -> ChargeResult<Self> {
        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
            .collect();

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChargeError::Validation(
                "tax id must contain only digits".to_string(),
            ));
        }

        let valid = match digits.len() {
            11 => cpf_is_valid(&digits),
            14 => cnpj_is_valid(&digits),
            n => {
                return Err(ChargeError::Validation(format!(
                    "tax id must have 11 or 14 digits, got {}",
                    n
                )))
            }
        };

        if !valid {
            return Err(ChargeError::Validation(
                "tax id check digits do not match".to_string(),
            ));
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Individual (CPF) as opposed to company (CNPJ)
    pub fn is_individual(&self) -> bool {
        self.0.len() == 11
    }
}

impl TryFrom<String> for TaxId {
    type Error = ChargeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxId::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(id: TaxId) -> Self {
        id.0
    }
}

fn digit_values(s: &str) -> Vec<u32> {
    s.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn all_same(d: &[u32]) -> bool {
    d.iter().all(|x| *x == d[0])
}

fn mod11_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

fn cpf_is_valid(s: &str) -> bool {
    let d = digit_values(s);
    if all_same(&d) {
        return false;
    }
    let w1: Vec<u32> = (2..=10).rev().collect();
    let w2: Vec<u32> = (2..=11).rev().collect();
    mod11_digit(&d[..9], &w1) == d[9] && mod11_digit(&d[..10], &w2) == d[10]
}

fn cnpj_is_valid(s: &str) -> bool {
    let d = digit_values(s);
    if all_same(&d) {
        return false;
    }
    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    mod11_digit(&d[..12], &W1) == d[12] && mod11_digit(&d[..13], &W2) == d[13]
}

/// Who pays the charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub tax_id: TaxId,
}

impl Payer {
    pub fn new(name: &str, email: Option<&str>, tax_id: &str) -> ChargeResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChargeError::Validation("payer name is required".to_string()));
        }
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        if let Some(e) = email {
            if !e.contains('@') {
                return Err(ChargeError::Validation(format!(
                    "payer email is invalid: {}",
                    e
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            email: email.map(String::from),
            tax_id: TaxId::parse(tax_id)?,
        })
    }
}

/// Payment rail requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    #[default]
    Pix,
    Boleto,
}

/// PIX issuance mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueMode {
    #[default]
    Dynamic,
    Static,
}

/// How a charge was actually issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMethod {
    PixDynamic,
    PixStatic,
    Boleto,
}

impl ChargeMethod {
    pub fn rail(&self) -> PaymentRail {
        match self {
            ChargeMethod::PixDynamic | ChargeMethod::PixStatic => PaymentRail::Pix,
            ChargeMethod::Boleto => PaymentRail::Boleto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeMethod::PixDynamic => "pix_dynamic",
            ChargeMethod::PixStatic => "pix_static",
            ChargeMethod::Boleto => "boleto",
        }
    }
}

/// Charge lifecycle status.
///
/// ```text
/// pending ──► paid
///    │
///    ├──────► cancelled
///    │
///    └──────► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl ChargeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChargeStatus::Pending)
    }

    /// Only `pending` moves, and only to a terminal state
    pub fn can_transition_to(&self, to: ChargeStatus) -> bool {
        matches!(self, ChargeStatus::Pending) && to.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Paid => "paid",
            ChargeStatus::Cancelled => "cancelled",
            ChargeStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payer fields as received from the caller, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerRequest {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub tax_id: String,
}

/// A request to issue a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub unit_id: Option<String>,
    pub amount: Decimal,
    pub payer: PayerRequest,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rail: PaymentRail,
    #[serde(default)]
    pub mode: IssueMode,
    /// Caller retry token; the charge id is derived from it
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ChargeRequest {
    /// Charge id for this request: stable across retries when a key is given
    pub fn charge_id(&self) -> String {
        match &self.idempotency_key {
            Some(key) => {
                let name = format!("{}:{}", self.tenant_id, key);
                Uuid::new_v5(&CHARGE_ID_NAMESPACE, name.as_bytes()).to_string()
            }
            None => Uuid::new_v4().to_string(),
        }
    }
}

/// The canonical unit of billing intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    /// Unique id, also the idempotency key sent to providers
    pub id: String,

    /// Token the store de-duplicates on (caller key, or the id itself)
    pub idempotency_key: String,

    pub tenant_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,

    pub amount: Amount,

    pub method: ChargeMethod,

    pub payer: Payer,

    pub due_at: NaiveDate,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: ChargeStatus,

    /// Provider that registered the charge (none for static codes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    /// Provider-assigned identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,

    /// Code handed to the payer. Never recomputed once issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Hosted slip / QR page when the provider returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,

    /// Audit event id that caused the last status change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_proof: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Charge {
    /// Build a pending charge from validated parts
    pub fn pending(
        request: &ChargeRequest,
        id: String,
        amount: Amount,
        payer: Payer,
        method: ChargeMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: request
                .idempotency_key
                .clone()
                .unwrap_or_else(|| id.clone()),
            id,
            tenant_id: request.tenant_id.clone(),
            unit_id: request.unit_id.clone(),
            amount,
            method,
            payer,
            due_at: request.due_date,
            description: request.description.clone(),
            status: ChargeStatus::Pending,
            provider: None,
            provider_ref: None,
            payload: None,
            payment_url: None,
            status_proof: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the provider registration
    pub fn with_provider(mut self, provider: ProviderKind, provider_ref: Option<String>) -> Self {
        self.provider = Some(provider);
        self.provider_ref = provider_ref;
        self
    }

    /// Set the payer-facing code (only used while building)
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_payment_url(mut self, url: Option<String>) -> Self {
        self.payment_url = url;
        self
    }

    pub fn with_status(mut self, status: ChargeStatus) -> Self {
        self.status = status;
        self
    }

    /// Same logical request: tenant, rail, amount, payer and due date agree
    pub fn same_request_as(&self, other: &Charge) -> bool {
        self.tenant_id == other.tenant_id
            && self.method.rail() == other.method.rail()
            && self.amount == other.amount
            && self.payer == other.payer
            && self.due_at == other.due_at
    }

    /// Past due and still awaiting payment
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == ChargeStatus::Pending && self.due_at < today
    }
}
