//! Fraud Decision Engine Library
//!
//! Real-time transaction decisioning: rolling per-account behavior, a
//! time-decayed interaction graph, an external model score with a deadline,
//! and rule-based APPROVE / REVIEW / DECLINE classification.

pub mod audit;
pub mod behavior;
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod decision;
pub mod error;
pub mod feature_extractor;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod types;

pub use behavior::WindowedBehaviorTracker;
pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use decision::DecisionEngine;
pub use error::{PipelineError, PipelineResult};
pub use feature_extractor::FeatureExtractor;
pub use graph::TemporalGraph;
pub use models::combiner::RiskFactorCombiner;
pub use pipeline::{DecisionPipeline, PipelineBuilder};
pub use producer::{AlertProducer, DecisionProducer};
pub use types::{alert::FraudAlert, decision::Decision, transaction::Transaction};
