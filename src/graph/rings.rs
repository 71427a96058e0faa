//! Fraud ring detection over graph snapshots.
//!
//! Detection runs off the decision path on its own schedule. Results are
//! written back to the graph as node annotations and picked up by the next
//! feature computation for those nodes.

use crate::config::RingConfig;
use crate::graph::snapshot::GraphSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A densely connected group of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    pub ring_id: String,
    /// Member node ids, sorted
    pub members: Vec<String>,
    /// Member with the highest betweenness centrality
    pub hub: String,
}

impl Ring {
    pub fn annotation(&self) -> RingAnnotation {
        RingAnnotation {
            ring_id: self.ring_id.clone(),
            size: self.members.len(),
            hub: self.hub.clone(),
        }
    }
}

/// Per-node annotation attached by ring detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingAnnotation {
    pub ring_id: String,
    pub size: usize,
    pub hub: String,
}

/// Pluggable community detection capability.
pub trait RingDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Find rings in a snapshot. Must not fail; an empty result is valid.
    fn detect(&self, snapshot: &GraphSnapshot) -> Vec<Ring>;
}

/// Deterministic label propagation over the undirected snapshot.
///
/// Nodes are visited in sorted order and ties go to the current label, then
/// to the smallest label, so the same snapshot always yields the same rings.
#[derive(Debug, Clone)]
pub struct LabelPropagationDetector {
    min_size: usize,
    max_iterations: usize,
    betweenness_sample: Option<usize>,
}

impl LabelPropagationDetector {
    pub fn new(min_size: usize, max_iterations: usize) -> Self {
        Self {
            min_size,
            max_iterations,
            betweenness_sample: None,
        }
    }

    pub fn from_config(config: &RingConfig) -> Self {
        Self {
            min_size: config.min_size,
            max_iterations: config.max_iterations,
            betweenness_sample: config.betweenness_sample,
        }
    }

    fn propagate(&self, snapshot: &GraphSnapshot) -> Vec<usize> {
        let n = snapshot.node_count();
        let mut labels: Vec<usize> = (0..n).collect();

        for _ in 0..self.max_iterations {
            let mut changed = false;
            for node in 0..n {
                let neighbors = snapshot.neighbors(node);
                if neighbors.is_empty() {
                    continue;
                }
                let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
                for &nb in neighbors {
                    *counts.entry(labels[nb]).or_insert(0) += 1;
                }
                let best = counts.values().copied().max().unwrap_or(0);
                let current = labels[node];
                let chosen = if counts.get(&current) == Some(&best) {
                    current
                } else {
                    counts
                        .iter()
                        .find(|(_, &c)| c == best)
                        .map(|(&label, _)| label)
                        .unwrap_or(current)
                };
                if chosen != current {
                    labels[node] = chosen;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        labels
    }
}

impl Default for LabelPropagationDetector {
    fn default() -> Self {
        Self::from_config(&RingConfig::default())
    }
}

impl RingDetector for LabelPropagationDetector {
    fn name(&self) -> &str {
        "label_propagation"
    }

    fn detect(&self, snapshot: &GraphSnapshot) -> Vec<Ring> {
        if snapshot.is_empty() {
            return Vec::new();
        }
        let labels = self.propagate(snapshot);

        let mut communities: HashMap<usize, Vec<usize>> = HashMap::new();
        for (node, &label) in labels.iter().enumerate() {
            communities.entry(label).or_default().push(node);
        }

        let large: Vec<Vec<usize>> = communities
            .into_values()
            .filter(|members| members.len() >= self.min_size.max(1))
            .collect();
        if large.is_empty() {
            return Vec::new();
        }

        let betweenness = snapshot.betweenness_centrality(self.betweenness_sample);
        let mut rings: Vec<Ring> = large
            .into_iter()
            .map(|mut members| {
                // Node indices follow sorted node ids.
                members.sort_unstable();
                let mut hub = members[0];
                for &m in &members[1..] {
                    if betweenness[m] > betweenness[hub] {
                        hub = m;
                    }
                }
                let names: Vec<String> = members
                    .iter()
                    .map(|&m| snapshot.node_name(m).to_string())
                    .collect();
                Ring {
                    ring_id: format!("ring:{}", names[0]),
                    hub: snapshot.node_name(hub).to_string(),
                    members: names,
                }
            })
            .collect();
        rings.sort_by(|a, b| a.ring_id.cmp(&b.ring_id));
        rings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(edges: &[(&str, &str)]) -> GraphSnapshot {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        GraphSnapshot::build(
            now,
            edges
                .iter()
                .map(|(u, v)| (u.to_string(), v.to_string(), 1.0, 1.0)),
        )
    }

    fn shared_device_ring() -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for i in 1..=5 {
            edges.push((format!("acct:{i}"), "device:d".to_string()));
            edges.push((format!("acct:{i}"), "ip:i".to_string()));
        }
        edges.push(("acct:x".to_string(), "merchant:m".to_string()));
        edges
    }

    #[test]
    fn test_detects_shared_device_ring() {
        let edges = shared_device_ring();
        let borrowed: Vec<(&str, &str)> =
            edges.iter().map(|(u, v)| (u.as_str(), v.as_str())).collect();
        let s = snapshot(&borrowed);

        let rings = LabelPropagationDetector::new(5, 20).detect(&s);
        assert_eq!(rings.len(), 1);

        let ring = &rings[0];
        assert_eq!(ring.ring_id, "ring:acct:1");
        assert_eq!(ring.members.len(), 7);
        assert!(!ring.members.contains(&"acct:x".to_string()));
        assert_eq!(ring.hub, "device:d");
        assert_eq!(ring.annotation().size, 7);
    }

    #[test]
    fn test_small_groups_are_ignored() {
        let s = snapshot(&[("a", "b"), ("b", "c")]);
        assert!(LabelPropagationDetector::new(5, 20).detect(&s).is_empty());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let edges = shared_device_ring();
        let borrowed: Vec<(&str, &str)> =
            edges.iter().map(|(u, v)| (u.as_str(), v.as_str())).collect();
        let detector = LabelPropagationDetector::new(3, 20);
        assert_eq!(detector.detect(&snapshot(&borrowed)), detector.detect(&snapshot(&borrowed)));
    }

    #[test]
    fn test_empty_snapshot_has_no_rings() {
        assert!(LabelPropagationDetector::default().detect(&snapshot(&[])).is_empty());
    }
}
