//! NATS message consumer for incoming transactions

use crate::types::transaction::{InputIssue, ParsedTransaction, Transaction};
use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

/// Consumer for receiving transactions from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a message payload into a transaction.
///
/// Never fails: a payload that is not JSON yields a placeholder transaction
/// with the parse error recorded as an input issue.
pub fn decode_transaction(payload: &[u8]) -> ParsedTransaction {
    match Transaction::from_json_slice(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            let mut parsed = Transaction::from_value(&Value::Null, Utc::now());
            parsed
                .issues
                .insert(0, InputIssue::new("payload", format!("invalid JSON: {e}")));
            parsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transaction::{UNKNOWN_ACCOUNT_ID, UNKNOWN_TRANSACTION_ID};

    #[test]
    fn test_decode_valid_payload() {
        let parsed = decode_transaction(
            br#"{"id":"tx_1","account_id":"alice","amount":12.5,"timestamp":"2024-03-01T12:00:00Z"}"#,
        );
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.transaction.id, "tx_1");
        assert_eq!(parsed.transaction.amount, 12.5);
    }

    #[test]
    fn test_decode_garbage_payload() {
        let parsed = decode_transaction(b"\xff not json");
        assert_eq!(parsed.issues[0].field, "payload");
        assert_eq!(parsed.transaction.id, UNKNOWN_TRANSACTION_ID);
        assert_eq!(parsed.transaction.account_id, UNKNOWN_ACCOUNT_ID);
        assert_eq!(parsed.transaction.amount, 0.0);
    }
}
