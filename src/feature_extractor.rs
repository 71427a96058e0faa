//! Feature vectors handed to the external risk scorer.
//!
//! The first four positions are the lightweight streaming features
//! (amount, locations, velocity, hour). Graph features follow. Models
//! exported for this pipeline must be trained on the same order.

use crate::behavior::AccountSnapshot;
use crate::graph::GraphFeatures;
use crate::types::transaction::Transaction;

const FEATURE_NAMES: [&str; 12] = [
    "amount_thousands",
    "distinct_locations",
    "window_count",
    "hour_fraction",
    "avg_amount_thousands",
    "amount_ratio",
    "normalized_degree",
    "clustering_coefficient",
    "neighborhood_entropy",
    "interaction_intensity",
    "graph_risk",
    "in_ring",
];

/// Builds fixed-order feature vectors from one evaluation's inputs.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract features for one transaction. Non-finite inputs become 0.
    pub fn extract(
        &self,
        tx: &Transaction,
        behavior: &AccountSnapshot,
        graph: &GraphFeatures,
    ) -> Vec<f32> {
        let amount = finite(tx.amount).max(0.0);
        let avg_amount = finite(behavior.avg_amount).max(0.0);

        let features = [
            amount / 1000.0,
            behavior.distinct_location_count as f64,
            behavior.count as f64,
            tx.hour_of_day() as f64 / 24.0,
            avg_amount / 1000.0,
            amount / avg_amount.max(1.0),
            finite(graph.normalized_degree),
            finite(graph.clustering_coefficient),
            finite(graph.neighborhood_entropy),
            finite(graph.interaction_intensity),
            finite(graph.graph_risk),
            if graph.ring.is_some() { 1.0 } else { 0.0 },
        ];

        features.iter().map(|&v| v as f32).collect()
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_NAMES.len()
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        FEATURE_NAMES.to_vec()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RingAnnotation;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        let tx = Transaction::new("tx_1", "acct", 1500.0, at);
        let behavior = AccountSnapshot {
            avg_amount: 500.0,
            total_amount: 1500.0,
            count: 3,
            distinct_location_count: 2,
        };
        let graph = GraphFeatures {
            normalized_degree: 0.25,
            graph_risk: 0.25,
            ring: Some(RingAnnotation {
                ring_id: "ring:acct:a".to_string(),
                size: 6,
                hub: "device:d".to_string(),
            }),
            ..GraphFeatures::default()
        };

        let features = extractor.extract(&tx, &behavior, &graph);

        assert_eq!(features.len(), extractor.feature_count());
        assert_eq!(features[0], 1.5);
        assert_eq!(features[1], 2.0);
        assert_eq!(features[2], 3.0);
        assert_eq!(features[3], 0.75);
        assert_eq!(features[5], 3.0);
        assert_eq!(features[10], 0.25);
        assert_eq!(features[11], 1.0);
    }

    #[test]
    fn test_non_finite_values_become_zero() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let tx = Transaction::new("tx_1", "acct", f64::NAN, at);
        let graph = GraphFeatures {
            neighborhood_entropy: f64::NAN,
            ..GraphFeatures::default()
        };
        let features = FeatureExtractor::new().extract(&tx, &AccountSnapshot::default(), &graph);
        assert!(features.iter().all(|v| v.is_finite()));
        assert_eq!(features[0], 0.0);
    }

    #[test]
    fn test_feature_count() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.feature_count(), 12);
        assert_eq!(extractor.feature_names().len(), 12);
        assert_eq!(extractor.feature_names()[0], "amount_thousands");
    }
}
