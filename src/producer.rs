//! NATS producers for decisions and fraud alerts

use crate::types::alert::FraudAlert;
use crate::types::decision::Decision;
use anyhow::Result;
use async_nats::Client;
use serde::Serialize;
use tracing::debug;

async fn publish_json<T: Serialize>(client: &Client, subject: &str, record: &T) -> Result<()> {
    let payload = serde_json::to_vec(record)?;
    client.publish(subject.to_string(), payload.into()).await?;
    Ok(())
}

/// Producer for publishing fraud alerts to NATS
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    subject: String,
}

impl AlertProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, alert: &FraudAlert) -> Result<()> {
        publish_json(&self.client, &self.subject, alert).await?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            risk_score = alert.risk_score,
            priority = ?alert.priority,
            "Published fraud alert"
        );
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Producer for publishing every decision to NATS
#[derive(Clone)]
pub struct DecisionProducer {
    client: Client,
    subject: String,
}

impl DecisionProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, decision: &Decision) -> Result<()> {
        publish_json(&self.client, &self.subject, decision).await?;

        debug!(
            transaction_id = %decision.transaction_id,
            decision = %decision.decision,
            risk_score = decision.risk_score,
            "Published decision"
        );
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
