//! External risk scorer capability with a deadline and fallback.

use crate::error::PipelineError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Weights of the lightweight streaming model over the first four features
const HEURISTIC_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

/// A model producing a fraud probability from a feature vector.
///
/// Implementations may block; they are always called off the async runtime.
pub trait RiskScorer: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, features: &[f32]) -> Result<f64>;
}

/// Linear streaming model over `[amount/1000, locations, count, hour/24]`.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl RiskScorer for HeuristicScorer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn predict(&self, features: &[f32]) -> Result<f64> {
        let score: f64 = features
            .iter()
            .zip(HEURISTIC_WEIGHTS.iter())
            .map(|(&f, &w)| f as f64 * w)
            .sum();
        Ok(score.clamp(0.0, 1.0))
    }
}

/// Where a resolved score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: f64,
    pub source: ScoreSource,
}

/// Deterministic substitute score: mean of the features clamped to [0, 1],
/// or 0.5 with no features.
pub fn fallback_score(features: &[f32]) -> f64 {
    let finite: Vec<f64> = features
        .iter()
        .map(|&f| f as f64)
        .filter(|f| f.is_finite())
        .collect();
    if finite.is_empty() {
        return 0.5;
    }
    (finite.iter().sum::<f64>() / finite.len() as f64).clamp(0.0, 1.0)
}

/// Runs a scorer on the blocking pool under a deadline.
///
/// Timeouts, errors, panics and non-finite outputs all resolve to
/// [`fallback_score`]. A timed-out call is abandoned, not interrupted.
#[derive(Clone)]
pub struct ResilientScorer {
    inner: Arc<dyn RiskScorer>,
    timeout: Duration,
}

impl ResilientScorer {
    pub fn new(inner: Arc<dyn RiskScorer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn score(&self, features: &[f32]) -> ScoreOutcome {
        let scorer = Arc::clone(&self.inner);
        let input = features.to_vec();
        let call = tokio::task::spawn_blocking(move || scorer.predict(&input));

        let failure = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(score))) if score.is_finite() => {
                return ScoreOutcome {
                    score: score.clamp(0.0, 1.0),
                    source: ScoreSource::Model,
                };
            }
            Ok(Ok(Ok(score))) => PipelineError::Scorer(format!("non-finite score {score}")),
            Ok(Ok(Err(e))) => PipelineError::Scorer(e.to_string()),
            Ok(Err(join)) => PipelineError::Scorer(format!("scorer task failed: {join}")),
            Err(_) => PipelineError::ScoringTimeout(self.timeout),
        };

        let score = fallback_score(features);
        warn!(
            scorer = %self.inner.name(),
            error = %failure,
            fallback = score,
            "Using fallback risk score"
        );
        ScoreOutcome {
            score,
            source: ScoreSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowScorer(Duration);

    impl RiskScorer for SlowScorer {
        fn name(&self) -> &str {
            "slow"
        }

        fn predict(&self, _features: &[f32]) -> Result<f64> {
            std::thread::sleep(self.0);
            Ok(0.99)
        }
    }

    struct FailingScorer;

    impl RiskScorer for FailingScorer {
        fn name(&self) -> &str {
            "failing"
        }

        fn predict(&self, _features: &[f32]) -> Result<f64> {
            anyhow::bail!("model unavailable")
        }
    }

    struct NanScorer;

    impl RiskScorer for NanScorer {
        fn name(&self) -> &str {
            "nan"
        }

        fn predict(&self, _features: &[f32]) -> Result<f64> {
            Ok(f64::NAN)
        }
    }

    #[test]
    fn test_heuristic_weights() {
        let scorer = HeuristicScorer;
        // 0.5*0.4 + 1*0.3 + 0*0.2 + 0.5*0.1
        let score = scorer.predict(&[0.5, 1.0, 0.0, 0.5, 9.0]).unwrap();
        assert!((score - 0.55).abs() < 1e-6);
        assert_eq!(scorer.predict(&[10.0, 4.0, 20.0, 0.9]).unwrap(), 1.0);
        assert_eq!(scorer.predict(&[]).unwrap(), 0.0);
    }

    #[test]
    fn test_fallback_score() {
        assert_eq!(fallback_score(&[]), 0.5);
        assert!((fallback_score(&[0.2, 0.4]) - 0.3).abs() < 1e-6);
        assert_eq!(fallback_score(&[5.0, 3.0]), 1.0);
        assert_eq!(fallback_score(&[f32::NAN]), 0.5);
    }

    #[tokio::test]
    async fn test_model_score_passes_through() {
        let scorer = ResilientScorer::new(Arc::new(HeuristicScorer), Duration::from_secs(2));
        let outcome = scorer.score(&[0.5, 1.0, 0.0, 0.5]).await;
        assert_eq!(outcome.source, ScoreSource::Model);
        assert!((outcome.score - 0.55).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_timeout_uses_fallback() {
        let scorer = ResilientScorer::new(
            Arc::new(SlowScorer(Duration::from_millis(300))),
            Duration::from_millis(20),
        );
        let outcome = scorer.score(&[0.2, 0.4]).await;
        assert_eq!(outcome.source, ScoreSource::Fallback);
        assert!((outcome.score - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_error_uses_fallback() {
        let scorer = ResilientScorer::new(Arc::new(FailingScorer), Duration::from_secs(1));
        let outcome = scorer.score(&[]).await;
        assert_eq!(
            outcome,
            ScoreOutcome {
                score: 0.5,
                source: ScoreSource::Fallback
            }
        );
    }

    #[tokio::test]
    async fn test_non_finite_score_uses_fallback() {
        let scorer = ResilientScorer::new(Arc::new(NanScorer), Duration::from_secs(1));
        let outcome = scorer.score(&[0.8]).await;
        assert_eq!(outcome.source, ScoreSource::Fallback);
        assert!((outcome.score - 0.8).abs() < 1e-6);
    }
}
