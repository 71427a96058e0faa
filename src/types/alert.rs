//! Fraud alert data structures

use crate::models::combiner::RiskFactors;
use crate::types::decision::{Decision, DecisionOutcome, RiskCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scores above this are raised as high-priority alerts.
const HIGH_PRIORITY_SCORE: f64 = 0.9;

/// Alert priority for downstream routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Medium,
    High,
}

impl AlertPriority {
    pub fn from_score(score: f64) -> Self {
        if score > HIGH_PRIORITY_SCORE {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        }
    }
}

/// Fraud alert emitted for declined or high-scoring transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Account that initiated the transaction
    pub account_id: String,

    /// Composite risk score (0.0 - 1.0)
    pub risk_score: f64,

    pub risk_category: RiskCategory,

    pub decision: DecisionOutcome,

    pub priority: AlertPriority,

    /// Factor values that produced the score
    pub risk_factors: RiskFactors,

    /// Names of the factors that contributed most to the alert
    pub triggered_factors: Vec<String>,

    /// Fraud ring the account belongs to, when one has been detected
    pub ring_id: Option<String>,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl FraudAlert {
    /// Create an alert for a decision
    pub fn new(decision: &Decision, account_id: &str, risk_factors: RiskFactors) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: decision.transaction_id.clone(),
            account_id: account_id.to_string(),
            risk_score: decision.risk_score,
            risk_category: decision.risk_category,
            decision: decision.decision,
            priority: AlertPriority::from_score(decision.risk_score),
            risk_factors,
            triggered_factors: Vec::new(),
            ring_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Add triggered factor names to the alert
    pub fn with_triggered_factors(mut self, factors: Vec<String>) -> Self {
        self.triggered_factors = factors;
        self
    }

    /// Attach a fraud ring annotation
    pub fn with_ring(mut self, ring_id: Option<String>) -> Self {
        self.ring_id = ring_id;
        self
    }
}
