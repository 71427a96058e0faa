//! Risk factor derivation and weighted combination

use crate::behavior::AccountSnapshot;
use crate::graph::GraphFeatures;
use crate::types::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Cap on the amount-to-average ratio
const MAX_AMOUNT_ANOMALY: f64 = 5.0;
/// Cap on the velocity factor (30+ transactions in the window)
const MAX_VELOCITY_RISK: f64 = 3.0;
/// Night hours (UTC) that carry time risk
const NIGHT_HOURS: std::ops::Range<u32> = 0..6;

/// Per-transaction risk factors.
///
/// Recomputed for every evaluation and never updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskFactors {
    /// `amount / max(avg_amount, 1)`, at most 5
    pub amount_anomaly: f64,
    /// `count / 10`, at most 3
    pub velocity_risk: f64,
    /// `distinct_locations / 5`
    pub location_risk: f64,
    /// 1 during night hours, else 0
    pub time_risk: f64,
    /// Graph signal in [0, 1]
    pub graph_centrality: f64,
    /// Resolved external model score in [0, 1]
    pub ml_score: f64,
}

impl RiskFactors {
    /// Names of factors strong enough to be worth surfacing in an alert.
    pub fn triggered(&self) -> Vec<String> {
        let checks = [
            ("amount_anomaly", self.amount_anomaly >= 3.0),
            ("velocity_risk", self.velocity_risk >= 1.0),
            ("location_risk", self.location_risk >= 0.6),
            ("time_risk", self.time_risk > 0.0),
            ("graph_centrality", self.graph_centrality >= 0.5),
            ("ml_score", self.ml_score >= 0.7),
        ];
        checks
            .iter()
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Weight table for the composite score.
///
/// Weights are used as given; a table summing above 1 simply saturates the
/// composite at 1. Each weight also accepts the name of the factor it
/// scales, and unknown keys are rejected so a misspelt weight cannot fall
/// back to its default unnoticed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombinerWeights {
    pub amount_anomaly: f64,
    #[serde(alias = "velocity_risk")]
    pub velocity: f64,
    #[serde(alias = "location_risk")]
    pub location: f64,
    #[serde(alias = "time_risk")]
    pub time: f64,
    #[serde(alias = "graph_centrality")]
    pub graph: f64,
    #[serde(alias = "ml_score")]
    pub ml: f64,
}

impl Default for CombinerWeights {
    fn default() -> Self {
        Self {
            amount_anomaly: 0.3,
            velocity: 0.25,
            location: 0.25,
            time: 0.1,
            graph: 0.05,
            ml: 0.05,
        }
    }
}

impl CombinerWeights {
    pub fn is_valid(&self) -> bool {
        [
            self.amount_anomaly,
            self.velocity,
            self.location,
            self.time,
            self.graph,
            self.ml,
        ]
        .iter()
        .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Merges behavioral, graph and model signals into one bounded score.
#[derive(Debug, Clone, Default)]
pub struct RiskFactorCombiner {
    weights: CombinerWeights,
}

impl RiskFactorCombiner {
    pub fn new(weights: CombinerWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &CombinerWeights {
        &self.weights
    }

    /// Derive the factors for one transaction.
    pub fn factors(
        &self,
        behavior: &AccountSnapshot,
        graph: &GraphFeatures,
        tx: &Transaction,
        ml_score: f64,
    ) -> RiskFactors {
        let amount = finite_or_zero(tx.amount).max(0.0);
        let avg_amount = finite_or_zero(behavior.avg_amount);

        RiskFactors {
            amount_anomaly: (amount / avg_amount.max(1.0)).min(MAX_AMOUNT_ANOMALY),
            velocity_risk: (behavior.count as f64 / 10.0).min(MAX_VELOCITY_RISK),
            location_risk: behavior.distinct_location_count as f64 / 5.0,
            time_risk: if NIGHT_HOURS.contains(&tx.hour_of_day()) {
                1.0
            } else {
                0.0
            },
            graph_centrality: finite_or_zero(graph.graph_risk).clamp(0.0, 1.0),
            ml_score: finite_or_zero(ml_score).clamp(0.0, 1.0),
        }
    }

    /// Weighted sum of the factors, clipped to [0, 1].
    pub fn combine(&self, factors: &RiskFactors) -> f64 {
        let w = &self.weights;
        let score = factors.amount_anomaly * w.amount_anomaly
            + factors.velocity_risk * w.velocity
            + factors.location_risk * w.location
            + factors.time_risk * w.time
            + factors.graph_centrality * w.graph
            + factors.ml_score * w.ml;

        finite_or_zero(score).clamp(0.0, 1.0)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tx(amount: f64, hour: u32) -> Transaction {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
        Transaction::new("t1", "acct", amount, at)
    }

    fn behavior(avg_amount: f64, count: usize, locations: usize) -> AccountSnapshot {
        AccountSnapshot {
            avg_amount,
            total_amount: avg_amount * count as f64,
            count,
            distinct_location_count: locations,
        }
    }

    #[test]
    fn test_factor_formulas() {
        let combiner = RiskFactorCombiner::default();
        let graph = GraphFeatures {
            graph_risk: 0.4,
            ..GraphFeatures::default()
        };
        let factors = combiner.factors(&behavior(100.0, 5, 2), &graph, &tx(250.0, 14), 0.3);

        assert!((factors.amount_anomaly - 2.5).abs() < 1e-12);
        assert!((factors.velocity_risk - 0.5).abs() < 1e-12);
        assert!((factors.location_risk - 0.4).abs() < 1e-12);
        assert_eq!(factors.time_risk, 0.0);
        assert_eq!(factors.graph_centrality, 0.4);
        assert_eq!(factors.ml_score, 0.3);
    }

    #[test]
    fn test_factor_caps() {
        let combiner = RiskFactorCombiner::default();
        let factors = combiner.factors(
            &behavior(0.2, 50, 1),
            &GraphFeatures::default(),
            &tx(10_000.0, 3),
            1.7,
        );

        // Average below 1 is floored to 1 before dividing
        assert_eq!(factors.amount_anomaly, 5.0);
        assert_eq!(factors.velocity_risk, 3.0);
        assert_eq!(factors.time_risk, 1.0);
        assert_eq!(factors.ml_score, 1.0);
    }

    #[test]
    fn test_night_boundary() {
        let combiner = RiskFactorCombiner::default();
        let b = behavior(10.0, 1, 0);
        let g = GraphFeatures::default();
        assert_eq!(combiner.factors(&b, &g, &tx(1.0, 5), 0.0).time_risk, 1.0);
        assert_eq!(combiner.factors(&b, &g, &tx(1.0, 6), 0.0).time_risk, 0.0);
    }

    #[test]
    fn test_combine_with_default_weights() {
        let combiner = RiskFactorCombiner::default();
        let factors = RiskFactors {
            amount_anomaly: 1.0,
            velocity_risk: 0.2,
            location_risk: 0.2,
            time_risk: 0.0,
            graph_centrality: 0.4,
            ml_score: 0.6,
        };
        // 0.3 + 0.05 + 0.05 + 0 + 0.02 + 0.03
        assert!((combiner.combine(&factors) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_combine_saturates_without_renormalizing() {
        let combiner = RiskFactorCombiner::new(CombinerWeights {
            amount_anomaly: 1.0,
            velocity: 1.0,
            location: 1.0,
            time: 1.0,
            graph: 1.0,
            ml: 1.0,
        });
        let factors = RiskFactors {
            amount_anomaly: 0.1,
            ..RiskFactors::default()
        };
        assert!((combiner.combine(&factors) - 0.1).abs() < 1e-12);

        let heavy = RiskFactors {
            amount_anomaly: 5.0,
            ..RiskFactors::default()
        };
        assert_eq!(combiner.combine(&heavy), 1.0);
    }

    #[test]
    fn test_non_finite_inputs_are_neutralized() {
        let combiner = RiskFactorCombiner::default();
        let factors = combiner.factors(
            &behavior(f64::NAN, 0, 0),
            &GraphFeatures {
                graph_risk: f64::INFINITY,
                ..GraphFeatures::default()
            },
            &tx(f64::NAN, 12),
            f64::NAN,
        );
        assert_eq!(factors.amount_anomaly, 0.0);
        assert_eq!(factors.graph_centrality, 0.0);
        assert_eq!(factors.ml_score, 0.0);
        assert_eq!(combiner.combine(&factors), 0.0);
    }

    #[test]
    fn test_triggered_factor_names() {
        let factors = RiskFactors {
            amount_anomaly: 4.0,
            time_risk: 1.0,
            ml_score: 0.2,
            ..RiskFactors::default()
        };
        assert_eq!(factors.triggered(), vec!["amount_anomaly", "time_risk"]);
    }

    #[test]
    fn test_weight_validation() {
        assert!(CombinerWeights::default().is_valid());
        let bad = CombinerWeights {
            ml: f64::NAN,
            ..CombinerWeights::default()
        };
        assert!(!bad.is_valid());
    }
}
