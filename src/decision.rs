//! Rule-based APPROVE / REVIEW / DECLINE classification.
//!
//! The engine is a pure function of `(score, amount)` plus a threshold
//! table. It never fails: malformed inputs are coerced and the coercions are
//! reported next to the decision.

use crate::types::decision::{Action, Decision, DecisionOutcome, RiskCategory};
use crate::types::transaction::{coerce_f64, InputIssue, UNKNOWN_TRANSACTION_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Score and amount cut-offs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Scores at or above this are declined
    pub high_risk: f64,
    /// Scores at or above this are reviewed
    pub medium_risk: f64,
    /// Amounts at or above this are always at least reviewed
    pub high_amount: f64,
    /// Amounts at or above this are reviewed
    pub moderate_amount: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            high_risk: 0.85,
            medium_risk: 0.6,
            high_amount: 1000.0,
            moderate_amount: 500.0,
        }
    }
}

impl DecisionThresholds {
    pub fn is_valid(&self) -> bool {
        let finite = [
            self.high_risk,
            self.medium_risk,
            self.high_amount,
            self.moderate_amount,
        ]
        .iter()
        .all(|v| v.is_finite());

        finite
            && 0.0 <= self.medium_risk
            && self.medium_risk <= self.high_risk
            && self.moderate_amount <= self.high_amount
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    thresholds: DecisionThresholds,
}

impl DecisionEngine {
    pub fn new(thresholds: DecisionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DecisionThresholds {
        &self.thresholds
    }

    /// Map a score to its risk band.
    pub fn categorise_risk(&self, score: f64) -> RiskCategory {
        if score >= self.thresholds.high_risk {
            RiskCategory::High
        } else if score >= self.thresholds.medium_risk {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    /// Classify a transaction.
    ///
    /// Non-finite or negative amounts count as 0 and scores are clamped to
    /// [0, 1]. A missing or empty id becomes `tx-unknown`.
    pub fn evaluate(
        &self,
        transaction_id: Option<&str>,
        user_id: Option<&str>,
        amount: f64,
        score: f64,
    ) -> Decision {
        let t = &self.thresholds;
        let amount = sanitize_amount(amount);
        let score = sanitize_score(score);

        let mut reasons = Vec::new();
        let (decision, action) = if score >= t.high_risk {
            reasons.push(format!(
                "Decline: model risk score {score:.2} is in the high-risk band (>= {:.2}), \
                 indicating a high probability of fraud.",
                t.high_risk
            ));
            if amount >= t.high_amount {
                reasons.push(format!(
                    "The amount {amount:.2} is also high (>= {:.2}), which strengthens the \
                     decision to block this transaction.",
                    t.high_amount
                ));
            }
            (DecisionOutcome::Decline, Action::BlockTransaction)
        } else if score >= t.medium_risk || amount >= t.moderate_amount.min(t.high_amount) {
            if score >= t.medium_risk {
                reasons.push(format!(
                    "Review: model risk score {score:.2} falls in the medium-risk band \
                     [{:.2}, {:.2}), so it is not clearly safe.",
                    t.medium_risk, t.high_risk
                ));
            }
            if amount >= t.high_amount {
                reasons.push(format!(
                    "The transaction amount {amount:.2} is high (>= {:.2}); even with a non-high \
                     risk score, this warrants a manual check instead of automatic approval.",
                    t.high_amount
                ));
            } else if amount >= t.moderate_amount {
                reasons.push(format!(
                    "The transaction amount {amount:.2} is moderate (between {:.2} and {:.2}), \
                     so combined with the risk score we flag it for review rather than \
                     auto-approve or block.",
                    t.moderate_amount, t.high_amount
                ));
            }
            (DecisionOutcome::Review, Action::RouteToManualReview)
        } else {
            reasons.push(format!(
                "Approve: model risk score {score:.2} is below the review threshold {:.2} \
                 and amount {amount:.2} is below {:.2}, so the transaction is treated as low risk.",
                t.medium_risk, t.moderate_amount
            ));
            (DecisionOutcome::Approve, Action::Allow)
        };

        let transaction_id = match transaction_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => UNKNOWN_TRANSACTION_ID.to_string(),
        };

        Decision {
            transaction_id,
            user_id: user_id.map(str::to_string),
            amount,
            risk_score: score,
            risk_category: self.categorise_risk(score),
            decision,
            reasons,
            actions: vec![action],
        }
    }

    /// Classify a loosely typed record with `id`, `user_id`, `amount` and
    /// `risk_score` keys. Numbers may arrive as strings.
    ///
    /// Returns the decision and every coercion that was applied.
    pub fn evaluate_value(&self, record: &Value) -> (Decision, Vec<InputIssue>) {
        let mut issues = Vec::new();

        let transaction_id = match record.get("id").or_else(|| record.get("transaction_id")) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => {
                issues.push(InputIssue::new("id", "missing transaction id"));
                None
            }
        };
        let user_id = match record.get("user_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        let mut amount = coerce_or_report(record.get("amount"), "amount", &mut issues);
        if amount < 0.0 {
            issues.push(InputIssue::new("amount", format!("negative amount {amount}")));
            amount = 0.0;
        }
        let score = coerce_or_report(record.get("risk_score"), "risk_score", &mut issues);
        if !(0.0..=1.0).contains(&score) {
            issues.push(InputIssue::new("risk_score", format!("{score} clamped to [0, 1]")));
        }

        let decision = self.evaluate(transaction_id.as_deref(), user_id.as_deref(), amount, score);
        (decision, issues)
    }
}

fn coerce_or_report(value: Option<&Value>, field: &'static str, issues: &mut Vec<InputIssue>) -> f64 {
    match coerce_f64(value) {
        Ok(v) => v,
        Err(detail) => {
            issues.push(InputIssue::new(field, format!("{detail}; using 0")));
            0.0
        }
    }
}

fn sanitize_amount(amount: f64) -> f64 {
    if amount.is_finite() {
        amount.max(0.0)
    } else {
        0.0
    }
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
