//! Decision records returned to callers and written to the audit trail

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk band of a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final verdict for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionOutcome {
    Approve,
    Review,
    Decline,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approve => "APPROVE",
            DecisionOutcome::Review => "REVIEW",
            DecisionOutcome::Decline => "DECLINE",
        }
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-actionable directive attached to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    BlockTransaction,
    RouteToManualReview,
    Allow,
}

/// Immutable outcome of evaluating one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub transaction_id: String,
    pub user_id: Option<String>,
    pub amount: f64,
    /// Composite score in [0, 1]
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub decision: DecisionOutcome,
    /// Human-readable reasons, score-derived first
    pub reasons: Vec<String>,
    pub actions: Vec<Action>,
}

impl Decision {
    pub fn is_decline(&self) -> bool {
        self.decision == DecisionOutcome::Decline
    }
}
