//! Type definitions for the decisioning pipeline

pub mod alert;
pub mod decision;
pub mod transaction;

pub use alert::{AlertPriority, FraudAlert};
pub use decision::{Action, Decision, DecisionOutcome, RiskCategory};
pub use transaction::{InputIssue, ParsedTransaction, Transaction};
