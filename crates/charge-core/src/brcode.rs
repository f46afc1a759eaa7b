//! # Static PIX Codes
//!
//! Builds and parses the EMV-style "copy and paste" payload carried by PIX QR
//! codes. Used as the fallback whenever no provider session is available.
//!
//! Every field is `TT LL VALUE`: a two-digit tag, a two-digit zero-padded
//! length of the value, then the value. Templates (tags 26 and 62) carry
//! nested fields as their value. The payload ends with `6304` followed by the
//! CRC-16/CCITT-FALSE of everything before it, as four uppercase hex digits.

use crate::charge::Amount;
use crate::error::{ChargeError, ChargeResult};
use rust_decimal::Decimal;

/// Globally unique identifier of the PIX arrangement (tag 26.00)
pub const PIX_GUI: &str = "br.gov.bcb.pix";

const TAG_FORMAT: &str = "00";
const TAG_INITIATION: &str = "01";
const TAG_MERCHANT_ACCOUNT: &str = "26";
const TAG_CATEGORY: &str = "52";
const TAG_CURRENCY: &str = "53";
const TAG_AMOUNT: &str = "54";
const TAG_COUNTRY: &str = "58";
const TAG_MERCHANT_NAME: &str = "59";
const TAG_MERCHANT_CITY: &str = "60";
const TAG_ADDITIONAL_DATA: &str = "62";
const TAG_CRC: &str = "63";

const SUB_GUI: &str = "00";
const SUB_KEY: &str = "01";
const SUB_REFERENCE: &str = "05";

/// ISO 4217 numeric code for BRL
pub const CURRENCY_BRL: &str = "986";
pub const COUNTRY_BR: &str = "BR";

const MAX_NAME_LEN: usize = 25;
const MAX_CITY_LEN: usize = 15;
const MAX_REFERENCE_LEN: usize = 25;
const MAX_AMOUNT_LEN: usize = 13;
const NO_REFERENCE: &str = "***";

/// Fixed, tenant-independent merchant data for static codes
#[derive(Debug, Clone)]
pub struct StaticCodeConfig {
    /// PIX key that receives static-code payments
    pub merchant_key: String,
    pub merchant_name: String,
    pub merchant_city: String,
}

impl StaticCodeConfig {
    pub fn new(
        merchant_key: impl Into<String>,
        merchant_name: impl Into<String>,
        merchant_city: impl Into<String>,
    ) -> Self {
        Self {
            merchant_key: merchant_key.into(),
            merchant_name: merchant_name.into(),
            merchant_city: merchant_city.into(),
        }
    }
}

/// Encodes static PIX codes for one merchant configuration
#[derive(Debug, Clone)]
pub struct StaticCodeEncoder {
    config: StaticCodeConfig,
}

impl StaticCodeEncoder {
    pub fn new(config: StaticCodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StaticCodeConfig {
        &self.config
    }

    /// Encode a payload for `amount` with an optional free-text reference
    pub fn encode(&self, amount: Decimal, reference: Option<&str>) -> ChargeResult<String> {
        let key = self.config.merchant_key.trim();
        if key.is_empty() {
            return Err(ChargeError::Configuration(
                "PIX merchant key is not configured".to_string(),
            ));
        }
        let amount = Amount::new(amount)?.to_fixed();
        if amount.len() > MAX_AMOUNT_LEN {
            return Err(ChargeError::Validation(format!(
                "amount {} does not fit a PIX code ({} characters max)",
                amount, MAX_AMOUNT_LEN
            )));
        }

        let name = sanitize_text(&self.config.merchant_name, MAX_NAME_LEN);
        let city = sanitize_text(&self.config.merchant_city, MAX_CITY_LEN);
        if name.is_empty() || city.is_empty() {
            return Err(ChargeError::Configuration(
                "PIX merchant name and city are required".to_string(),
            ));
        }
        let reference = sanitize_reference(reference.unwrap_or_default());

        let merchant_account = [tlv(SUB_GUI, PIX_GUI)?, tlv(SUB_KEY, key)?].concat();
        let additional_data = tlv(SUB_REFERENCE, &reference)?;

        let mut payload = [
            tlv(TAG_FORMAT, "01")?,
            tlv(TAG_INITIATION, "12")?,
            tlv(TAG_MERCHANT_ACCOUNT, &merchant_account)?,
            tlv(TAG_CATEGORY, "0000")?,
            tlv(TAG_CURRENCY, CURRENCY_BRL)?,
            tlv(TAG_AMOUNT, &amount)?,
            tlv(TAG_COUNTRY, COUNTRY_BR)?,
            tlv(TAG_MERCHANT_NAME, &name)?,
            tlv(TAG_MERCHANT_CITY, &city)?,
            tlv(TAG_ADDITIONAL_DATA, &additional_data)?,
        ]
        .concat();

        // CRC covers the "6304" prefix of its own field
        payload.push_str(TAG_CRC);
        payload.push_str("04");
        let crc = crc16_ccitt(payload.as_bytes());
        payload.push_str(&format!("{:04X}", crc));

        Ok(payload)
    }
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, MSB first, no final XOR
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn tlv(tag: &str, value: &str) -> ChargeResult<String> {
    let len = value.chars().count();
    if len > 99 {
        return Err(ChargeError::Encoding(format!(
            "field {} is {} characters long (max 99)",
            tag, len
        )));
    }
    Ok(format!("{}{:02}{}", tag, len, value))
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    }
}

/// Printable ASCII only, accents folded, trimmed and truncated
fn sanitize_text(s: &str, max: usize) -> String {
    let folded: String = s
        .chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect();
    folded.trim().chars().take(max).collect::<String>().trim_end().to_string()
}

/// Transaction reference: ASCII alphanumerics, `***` when empty
fn sanitize_reference(s: &str) -> String {
    let reference: String = s
        .chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_REFERENCE_LEN)
        .collect();
    if reference.is_empty() {
        NO_REFERENCE.to_string()
    } else {
        reference
    }
}

/// One parsed TLV field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvField {
    pub tag: String,
    pub value: String,
}

/// Split a TLV string into its fields (one level)
pub fn parse_tlv(input: &str) -> ChargeResult<Vec<TlvField>> {
    if !input.is_ascii() {
        return Err(ChargeError::Encoding("payload is not ASCII".to_string()));
    }

    let mut fields = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(ChargeError::Encoding(format!(
                "truncated field header: {:?}",
                rest
            )));
        }
        let tag = &rest[..2];
        let len: usize = rest[2..4].parse().map_err(|_| {
            ChargeError::Encoding(format!("invalid length for tag {}: {:?}", tag, &rest[2..4]))
        })?;
        if rest.len() < 4 + len {
            return Err(ChargeError::Encoding(format!(
                "field {} declares {} characters but only {} remain",
                tag,
                len,
                rest.len() - 4
            )));
        }
        fields.push(TlvField {
            tag: tag.to_string(),
            value: rest[4..4 + len].to_string(),
        });
        rest = &rest[4 + len..];
    }
    Ok(fields)
}

/// True when the trailing four hex digits match the CRC of everything before
pub fn verify_checksum(payload: &str) -> bool {
    if payload.len() < 8 || !payload.is_ascii() {
        return false;
    }
    let (body, checksum) = payload.split_at(payload.len() - 4);
    if !body.ends_with("6304") {
        return false;
    }
    let expected = format!("{:04X}", crc16_ccitt(body.as_bytes()));
    checksum.eq_ignore_ascii_case(&expected)
}

/// Fields of a decoded PIX payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCode {
    pub payload_format: String,
    pub initiation_method: Option<String>,
    pub merchant_gui: Option<String>,
    /// Present on static codes; dynamic codes carry a location URL instead
    pub merchant_key: Option<String>,
    pub location_url: Option<String>,
    pub category_code: Option<String>,
    pub currency: Option<String>,
    pub amount: Option<String>,
    pub country: Option<String>,
    pub merchant_name: Option<String>,
    pub merchant_city: Option<String>,
    pub reference: Option<String>,
    pub checksum: String,
}

/// Parse a payload, checking structure and checksum
pub fn decode(payload: &str) -> ChargeResult<DecodedCode> {
    if !verify_checksum(payload) {
        return Err(ChargeError::Encoding("checksum mismatch".to_string()));
    }

    let fields = parse_tlv(payload)?;
    let mut decoded = DecodedCode::default();

    match fields.first() {
        Some(f) if f.tag == TAG_FORMAT => decoded.payload_format = f.value.clone(),
        _ => {
            return Err(ChargeError::Encoding(
                "payload must start with the format indicator".to_string(),
            ))
        }
    }

    for field in &fields[1..] {
        match field.tag.as_str() {
            TAG_INITIATION => decoded.initiation_method = Some(field.value.clone()),
            TAG_MERCHANT_ACCOUNT => {
                for sub in parse_tlv(&field.value)? {
                    match sub.tag.as_str() {
                        SUB_GUI => decoded.merchant_gui = Some(sub.value),
                        SUB_KEY => decoded.merchant_key = Some(sub.value),
                        "25" => decoded.location_url = Some(sub.value),
                        _ => {}
                    }
                }
            }
            TAG_CATEGORY => decoded.category_code = Some(field.value.clone()),
            TAG_CURRENCY => decoded.currency = Some(field.value.clone()),
            TAG_AMOUNT => decoded.amount = Some(field.value.clone()),
            TAG_COUNTRY => decoded.country = Some(field.value.clone()),
            TAG_MERCHANT_NAME => decoded.merchant_name = Some(field.value.clone()),
            TAG_MERCHANT_CITY => decoded.merchant_city = Some(field.value.clone()),
            TAG_ADDITIONAL_DATA => {
                for sub in parse_tlv(&field.value)? {
                    if sub.tag == SUB_REFERENCE {
                        decoded.reference = Some(sub.value);
                    }
                }
            }
            TAG_CRC => decoded.checksum = field.value.clone(),
            _ => {}
        }
    }

    if decoded.merchant_gui.as_deref().map(|g| g.eq_ignore_ascii_case(PIX_GUI)) != Some(true) {
        return Err(ChargeError::Encoding(
            "merchant account is not a PIX arrangement".to_string(),
        ));
    }

    Ok(decoded)
}
