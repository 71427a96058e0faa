//! Configuration management for the decisioning pipeline

use crate::decision::DecisionThresholds;
use crate::error::PipelineError;
use crate::models::combiner::CombinerWeights;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Upper bound for any window or TTL, in seconds (10 years)
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Which graph measure feeds the combiner's graph factor
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GraphSignal {
    /// Decayed degree centrality normalized by `n - 1` (cheap, default)
    #[default]
    Degree,
    /// Time-decayed PageRank normalized by the snapshot maximum
    Pagerank,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub behavior: BehaviorConfig,
    pub graph: GraphConfig,
    pub scoring: ScoringConfig,
    pub weights: CombinerWeights,
    pub decision: DecisionThresholds,
    pub alerting: AlertingConfig,
    pub audit: AuditConfig,
    pub checkpoint: CheckpointConfig,
    pub rings: RingConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject for outgoing decisions
    pub decision_subject: String,
    /// Subject for outgoing fraud alerts
    pub alert_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            transaction_subject: "transactions".to_string(),
            decision_subject: "fraud.decisions".to_string(),
            alert_subject: "fraud.alerts".to_string(),
        }
    }
}

/// Rolling behavior window
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Trailing window length in seconds
    pub window_secs: u64,
    /// Accounts idle for longer than this are evicted
    pub idle_ttl_secs: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            window_secs: 24 * 60 * 60,
            idle_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Temporal graph configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Edges older than this are invisible and pruned
    pub window_secs: u64,
    /// Decay half-life in seconds
    pub half_life_secs: f64,
    pub signal: GraphSignal,
    pub pagerank_alpha: f64,
    pub pagerank_max_iterations: usize,
    pub pagerank_tolerance: f64,
    /// Capacity of the graph owner's command queue
    pub channel_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            half_life_secs: 3600.0,
            signal: GraphSignal::Degree,
            pagerank_alpha: 0.85,
            pagerank_max_iterations: 100,
            pagerank_tolerance: 1e-6,
            channel_capacity: 1024,
        }
    }
}

/// External ML scorer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// ONNX model file; the built-in heuristic scorer is used when unset
    pub model_path: Option<String>,
    /// Deadline for one scorer call
    pub timeout_ms: u64,
    /// Number of threads for ONNX inference
    pub onnx_threads: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            timeout_ms: 2000,
            onnx_threads: 1,
        }
    }
}

/// Alert emission
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Scores strictly above this raise an alert even without a decline
    pub threshold: f64,
    pub channel_capacity: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            channel_capacity: 1024,
        }
    }
}

/// Append-only audit ledger
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: String,
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "audit/decision_ledger.jsonl".to_string(),
            channel_capacity: 4096,
        }
    }
}

/// State checkpointing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub path: String,
    pub interval_secs: u64,
    /// Start empty when no usable checkpoint exists instead of failing
    pub allow_cold_start: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "state/checkpoint.json".to_string(),
            interval_secs: 10,
            allow_cold_start: false,
        }
    }
}

/// Off-path fraud ring detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Communities smaller than this are not reported
    pub min_size: usize,
    pub max_iterations: usize,
    /// Limit betweenness to this many source nodes
    pub betweenness_sample: Option<usize>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            min_size: 5,
            max_iterations: 20,
            betweenness_sample: Some(256),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of account partitions (worker tasks)
    pub partitions: usize,
    /// Capacity of each partition queue
    pub channel_capacity: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: 10,
            channel_capacity: 1024,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, with `FRAUD__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FRAUD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        let windows = [
            self.behavior.window_secs,
            self.behavior.idle_ttl_secs,
            self.graph.window_secs,
        ];
        if windows.iter().any(|&secs| secs == 0 || secs > MAX_WINDOW_SECS) {
            return fail("behavior.window_secs, behavior.idle_ttl_secs and graph.window_secs must be between 1 second and 10 years");
        }

        if self.pipeline.partitions == 0 {
            return fail("pipeline.partitions must be at least 1");
        }
        if self.pipeline.channel_capacity == 0 || self.graph.channel_capacity == 0 {
            return fail("channel capacities must be at least 1");
        }
        if self.graph.half_life_secs <= 0.0 || !self.graph.half_life_secs.is_finite() {
            return fail("graph.half_life_secs must be positive");
        }
        if !(0.0..1.0).contains(&self.graph.pagerank_alpha) {
            return fail("graph.pagerank_alpha must be in [0, 1)");
        }
        if !self.weights.is_valid() {
            return fail("weights must be finite and non-negative");
        }
        if !self.decision.is_valid() {
            return fail("decision thresholds must satisfy 0 <= medium <= high and moderate <= high amount");
        }
        if self.scoring.timeout_ms == 0 {
            return fail("scoring.timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.behavior.window_secs, 86_400);
        assert_eq!(config.graph.window_secs, 3600);
        assert_eq!(config.graph.half_life_secs, 3600.0);
        assert_eq!(config.graph.signal, GraphSignal::Degree);
        assert_eq!(config.scoring.timeout_ms, 2000);
        assert_eq!(config.decision.high_risk, 0.85);
        assert_eq!(config.weights.amount_anomaly, 0.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[graph]\nsignal = \"pagerank\"\n\n[decision]\nhigh_risk = 0.9\n\n[pipeline]\npartitions = 2"
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.graph.signal, GraphSignal::Pagerank);
        assert_eq!(config.graph.window_secs, 3600);
        assert_eq!(config.decision.high_risk, 0.9);
        assert_eq!(config.decision.medium_risk, 0.6);
        assert_eq!(config.pipeline.partitions, 2);
    }

    #[test]
    fn test_validation_rejects_zero_partitions() {
        let mut config = AppConfig::default();
        config.pipeline.partitions = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_negative_weight() {
        let mut config = AppConfig::default();
        config.weights.velocity = -0.1;
        assert!(config.validate().is_err());
    }

    fn shipped_config_with(from: &str, to: &str) -> tempfile::NamedTempFile {
        let shipped = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/config.toml"
        ))
        .unwrap();
        assert!(shipped.contains(from));
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", shipped.replace(from, to)).unwrap();
        file
    }

    #[test]
    fn test_shipped_config_weights_are_applied() {
        let file = shipped_config_with("velocity = 0.25", "velocity = 0.9");
        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.weights.velocity, 0.9);
        assert_eq!(config.weights.amount_anomaly, 0.3);
        assert_eq!(config.weights.ml, 0.05);
    }

    #[test]
    fn test_weight_factor_names_accepted() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[weights]\nvelocity_risk = 0.9\nml_score = 0.7").unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.weights.velocity, 0.9);
        assert_eq!(config.weights.ml, 0.7);
    }

    #[test]
    fn test_unknown_weight_rejected() {
        let file = shipped_config_with("ml = 0.05", "ml_weight = 0.05");
        assert!(AppConfig::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_validation_bounds_windows() {
        let mut config = AppConfig::default();
        config.behavior.window_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.graph.window_secs = MAX_WINDOW_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.behavior.idle_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.behavior.idle_ttl_secs = MAX_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }
}
