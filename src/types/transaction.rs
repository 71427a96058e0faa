//! Transaction records and boundary validation for inbound events.
//!
//! Inbound events are loosely shaped JSON. They are converted once, here,
//! into a strongly typed [`Transaction`]. Anything malformed is replaced
//! with a safe default and reported as an [`InputIssue`] so callers can log
//! and audit the coercion instead of failing the decision.

use crate::error::PipelineError;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder used when an event carries no transaction id.
pub const UNKNOWN_TRANSACTION_ID: &str = "tx-unknown";

/// Account key used when an event names no account or user.
pub const UNKNOWN_ACCOUNT_ID: &str = "account-unknown";

/// Epoch values at or above this are read as milliseconds.
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

/// A financial transaction event, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub id: String,

    /// Owning account (or user) identifier
    pub account_id: String,

    /// Receiving account, for transfers
    #[serde(default)]
    pub counterparty_id: Option<String>,

    /// Device fingerprint
    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub ip_address: Option<String>,

    #[serde(default)]
    pub merchant_id: Option<String>,

    /// Non-negative amount
    pub amount: f64,

    /// ISO-4217 code, `XXX` when absent
    pub currency: String,

    /// Payment channel (online, pos, atm, ...)
    pub channel: String,

    /// Country or coarse location of the transaction
    #[serde(default)]
    pub location: Option<String>,

    /// Event time
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction with the required fields; optional links start empty.
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            counterparty_id: None,
            device_id: None,
            ip_address: None,
            merchant_id: None,
            amount,
            currency: "XXX".to_string(),
            channel: "unknown".to_string(),
            location: None,
            timestamp,
        }
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_counterparty(mut self, counterparty_id: impl Into<String>) -> Self {
        self.counterparty_id = Some(counterparty_id.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Hour of day (UTC) at which the transaction happened.
    pub fn hour_of_day(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Parse a raw inbound payload.
    ///
    /// Only a payload that is not JSON at all is rejected; every field-level
    /// problem is coerced and reported.
    pub fn from_json_slice(payload: &[u8]) -> Result<ParsedTransaction, serde_json::Error> {
        let value: Value = serde_json::from_slice(payload)?;
        Ok(Self::from_value(&value, Utc::now()))
    }

    /// Build a transaction from a loosely typed JSON value.
    ///
    /// `received_at` stands in for a missing or unreadable timestamp.
    pub fn from_value(value: &Value, received_at: DateTime<Utc>) -> ParsedTransaction {
        let mut issues = Vec::new();

        let id = text_field(value, &["id", "transaction_id", "tx_id"]).unwrap_or_else(|| {
            issues.push(InputIssue::new("id", "missing transaction id"));
            UNKNOWN_TRANSACTION_ID.to_string()
        });

        let account_id = text_field(value, &["account_id", "user_id"]).unwrap_or_else(|| {
            issues.push(InputIssue::new("account_id", "missing account_id and user_id"));
            UNKNOWN_ACCOUNT_ID.to_string()
        });

        let amount = match coerce_f64(value.get("amount")) {
            Ok(amount) if amount < 0.0 => {
                issues.push(InputIssue::new("amount", format!("negative amount {amount}")));
                0.0
            }
            Ok(amount) => amount,
            Err(detail) => {
                issues.push(InputIssue::new("amount", detail));
                0.0
            }
        };

        let timestamp = match value.get("timestamp") {
            None | Some(Value::Null) => {
                issues.push(InputIssue::new("timestamp", "missing timestamp"));
                received_at
            }
            Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
                issues.push(InputIssue::new("timestamp", format!("unreadable timestamp {raw}")));
                received_at
            }),
        };

        let location = text_field(value, &["location", "country"]).or_else(|| {
            value
                .get("location")
                .and_then(|loc| text_field(loc, &["country"]))
        });

        let transaction = Transaction {
            id,
            account_id,
            counterparty_id: text_field(value, &["counterparty_id"]),
            device_id: text_field(value, &["device_id", "device_fingerprint"]),
            ip_address: text_field(value, &["ip_address", "ip"]),
            merchant_id: text_field(value, &["merchant_id", "merchant"]),
            amount,
            currency: text_field(value, &["currency"]).unwrap_or_else(|| "XXX".to_string()),
            channel: text_field(value, &["channel"]).unwrap_or_else(|| "unknown".to_string()),
            location,
            timestamp,
        };

        ParsedTransaction { transaction, issues }
    }
}

/// A transaction together with the coercions applied while reading it.
#[derive(Debug, Clone)]
pub struct ParsedTransaction {
    pub transaction: Transaction,
    pub issues: Vec<InputIssue>,
}

/// A field that was malformed at the boundary and replaced with a default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputIssue {
    pub field: &'static str,
    pub detail: String,
}

impl InputIssue {
    pub fn new(field: &'static str, detail: impl Into<String>) -> Self {
        Self {
            field,
            detail: detail.into(),
        }
    }
}

impl From<InputIssue> for PipelineError {
    fn from(issue: InputIssue) -> Self {
        PipelineError::InputValidation {
            field: issue.field,
            detail: issue.detail,
        }
    }
}

/// Read a number that may arrive as a JSON number or a numeric string.
///
/// Returns a description of the problem for missing, non-numeric or
/// non-finite input.
pub fn coerce_f64(value: Option<&Value>) -> Result<f64, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Err("missing value".to_string()),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => return Err(format!("expected a number, got {other}")),
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(format!("non-finite number {v}")),
        None => Err(format!("not a number: {}", value.map(Value::to_string).unwrap_or_default())),
    }
}

/// Parse an ISO-8601 string or epoch seconds/millis (number or string).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            s.parse::<f64>().ok().and_then(from_epoch)
        }
        _ => None,
    }
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw >= EPOCH_MILLIS_CUTOFF { raw } else { raw * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64)
}

/// First non-empty string (or number rendered as a string) among `keys`.
fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
