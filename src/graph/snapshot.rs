//! Read-only graph snapshot and the relational measures computed on it.
//!
//! A snapshot owns its data, so queries never race with pruning. Nodes are
//! indexed in sorted order and edges are folded in sorted order, which keeps
//! every floating-point result reproducible for the same input. Snapshots are
//! only built for whole-graph measures (PageRank, betweenness, rings); the
//! per-event features are computed on the live graph.

use chrono::{DateTime, Utc};
use petgraph::algo::connected_components;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

const ENTROPY_EPSILON: f64 = 1e-9;

/// Power-iteration settings for PageRank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankParams {
    /// Damping factor
    pub alpha: f64,
    /// Hard iteration cap
    pub max_iterations: usize,
    /// Stop once the L1 change between iterations drops below this
    pub tolerance: f64,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Edge weights frozen at the snapshot instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotEdge {
    /// Decay weight
    pub weight: f64,
    /// Accumulated interaction weight with decay applied
    pub intensity: f64,
}

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    now: DateTime<Utc>,
    /// Node `i` is the `i`-th node id in sorted order
    graph: DiGraph<String, SnapshotEdge>,
    index: HashMap<String, NodeIndex>,
    /// Undirected neighbor sets, sorted
    neighbors: Vec<Vec<usize>>,
}

impl GraphSnapshot {
    /// Build from `(source, target, decay_weight, decayed_accumulated_weight)`.
    pub fn build<I>(now: DateTime<Utc>, edges: I) -> Self
    where
        I: IntoIterator<Item = (String, String, f64, f64)>,
    {
        let mut edges: Vec<(String, String, f64, f64)> = edges.into_iter().collect();
        edges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let names: BTreeSet<&String> = edges.iter().flat_map(|(u, v, _, _)| [u, v]).collect();
        let mut graph = DiGraph::with_capacity(names.len(), edges.len());
        let mut index = HashMap::with_capacity(names.len());
        for name in names {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }

        for (u, v, weight, intensity) in &edges {
            if let (Some(&ui), Some(&vi)) = (index.get(u), index.get(v)) {
                graph.add_edge(
                    ui,
                    vi,
                    SnapshotEdge {
                        weight: *weight,
                        intensity: *intensity,
                    },
                );
            }
        }

        let neighbors = graph
            .node_indices()
            .map(|node| {
                let mut list: Vec<usize> =
                    graph.neighbors_undirected(node).map(|n| n.index()).collect();
                list.sort_unstable();
                list.dedup();
                list
            })
            .collect();

        Self {
            now,
            graph,
            index,
            neighbors,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Weakly connected components.
    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    pub fn index_of(&self, node: &str) -> Option<usize> {
        self.index.get(node).map(|idx| idx.index())
    }

    pub fn node_name(&self, idx: usize) -> &str {
        &self.graph[NodeIndex::new(idx)]
    }

    pub fn neighbors(&self, idx: usize) -> &[usize] {
        &self.neighbors[idx]
    }

    fn incident(&self, idx: usize) -> impl Iterator<Item = &SnapshotEdge> {
        let node = NodeIndex::new(idx);
        self.graph
            .edges_directed(node, Outgoing)
            .chain(self.graph.edges_directed(node, Incoming))
            .map(|edge| edge.weight())
    }

    /// Decay-weighted degree of a node.
    pub fn degree(&self, idx: usize) -> f64 {
        self.incident(idx).map(|edge| edge.weight).sum()
    }

    /// Degree divided by `n - 1`, capped at 1.
    pub fn normalized_degree(&self, idx: usize) -> f64 {
        let n = self.node_count();
        if n <= 1 {
            return 0.0;
        }
        (self.degree(idx) / (n - 1) as f64).clamp(0.0, 1.0)
    }

    pub fn interaction_intensity(&self, idx: usize) -> f64 {
        self.incident(idx).map(|edge| edge.intensity).sum()
    }

    /// Decay-weighted degree centrality for every node.
    pub fn degree_centrality(&self) -> BTreeMap<String, f64> {
        self.graph
            .node_indices()
            .map(|node| (self.graph[node].clone(), self.degree(node.index())))
            .collect()
    }

    /// Time-decayed PageRank over the directed edge set, indexed like `nodes()`.
    ///
    /// Dangling nodes spread their rank uniformly. Iteration stops at the
    /// tolerance or the iteration cap, whichever comes first.
    pub fn pagerank(&self, params: &PageRankParams) -> Vec<f64> {
        let n = self.node_count();
        if n == 0 {
            return Vec::new();
        }
        let uniform = 1.0 / n as f64;
        let out_weight: Vec<f64> = self
            .graph
            .node_indices()
            .map(|node| {
                self.graph
                    .edges_directed(node, Outgoing)
                    .map(|edge| edge.weight().weight)
                    .sum()
            })
            .collect();

        let mut rank = vec![uniform; n];
        for _ in 0..params.max_iterations {
            let dangling: f64 = (0..n)
                .filter(|&i| out_weight[i] <= 0.0)
                .map(|i| rank[i])
                .sum();
            let base = (1.0 - params.alpha) * uniform + params.alpha * dangling * uniform;
            let mut next = vec![base; n];

            for edge in self.graph.edge_references() {
                let i = edge.source().index();
                if out_weight[i] <= 0.0 {
                    continue;
                }
                let share = params.alpha * rank[i] / out_weight[i];
                next[edge.target().index()] += share * edge.weight().weight;
            }

            let delta: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if delta < params.tolerance {
                break;
            }
        }
        rank
    }

    pub fn pagerank_map(&self, params: &PageRankParams) -> BTreeMap<String, f64> {
        self.graph
            .node_indices()
            .map(|node| self.graph[node].clone())
            .zip(self.pagerank(params))
            .collect()
    }

    /// Unweighted local clustering coefficient over undirected neighbors.
    pub fn clustering_coefficient(&self, idx: usize) -> f64 {
        let nbrs = &self.neighbors[idx];
        let k = nbrs.len();
        if k < 2 {
            return 0.0;
        }
        let mut links = 0usize;
        for (pos, &a) in nbrs.iter().enumerate() {
            for &b in &nbrs[pos + 1..] {
                if self.neighbors[a].binary_search(&b).is_ok() {
                    links += 1;
                }
            }
        }
        2.0 * links as f64 / (k * (k - 1)) as f64
    }

    /// `-Σ p_i ln(p_i + ε)` over the degree distribution of a node's neighbors.
    pub fn neighborhood_entropy(&self, idx: usize) -> f64 {
        let degrees: Vec<f64> = self.neighbors[idx]
            .iter()
            .map(|&j| self.neighbors[j].len() as f64)
            .collect();
        let total: f64 = degrees.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        -degrees
            .iter()
            .map(|d| {
                let p = d / total;
                p * (p + ENTROPY_EPSILON).ln()
            })
            .sum::<f64>()
    }

    /// Normalized betweenness centrality (Brandes) on the undirected graph.
    ///
    /// With `sample = Some(k)` only the first `k` nodes in sorted order act
    /// as sources and the result is rescaled by `n / k`.
    pub fn betweenness_centrality(&self, sample: Option<usize>) -> Vec<f64> {
        let n = self.node_count();
        let mut centrality = vec![0.0; n];
        if n <= 2 {
            return centrality;
        }
        let sources = match sample {
            Some(k) if k > 0 && k < n => k,
            _ => n,
        };

        for s in 0..sources {
            let mut stack = Vec::with_capacity(n);
            let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut sigma = vec![0.0_f64; n];
            let mut distance = vec![usize::MAX; n];
            sigma[s] = 1.0;
            distance[s] = 0;

            let mut queue = VecDeque::from([s]);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for &w in &self.neighbors[v] {
                    if distance[w] == usize::MAX {
                        distance[w] = distance[v] + 1;
                        queue.push_back(w);
                    }
                    if distance[w] == distance[v] + 1 {
                        sigma[w] += sigma[v];
                        predecessors[w].push(v);
                    }
                }
            }

            let mut delta = vec![0.0_f64; n];
            while let Some(w) = stack.pop() {
                for &v in &predecessors[w] {
                    delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
                }
                if w != s {
                    centrality[w] += delta[w];
                }
            }
        }

        let scale = 1.0 / ((n - 1) * (n - 2)) as f64 * (n as f64 / sources as f64);
        for value in &mut centrality {
            *value *= scale;
        }
        centrality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(edges: &[(&str, &str)]) -> GraphSnapshot {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        GraphSnapshot::build(
            now,
            edges
                .iter()
                .map(|(u, v)| (u.to_string(), v.to_string(), 1.0, 1.0)),
        )
    }

    fn idx(s: &GraphSnapshot, node: &str) -> usize {
        s.index_of(node).unwrap()
    }

    #[test]
    fn test_degree_sums_incident_weights() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let s = GraphSnapshot::build(
            now,
            vec![
                ("a".to_string(), "b".to_string(), 0.5, 2.0),
                ("c".to_string(), "a".to_string(), 0.25, 1.0),
            ],
        );
        assert!((s.degree(idx(&s, "a")) - 0.75).abs() < 1e-12);
        assert!((s.interaction_intensity(idx(&s, "a")) - 3.0).abs() < 1e-12);
        assert!((s.normalized_degree(idx(&s, "a")) - 0.375).abs() < 1e-12);
        assert_eq!(s.degree_centrality().len(), 3);
    }

    #[test]
    fn test_pagerank_cycle_is_uniform() {
        let s = snapshot(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let ranks = s.pagerank(&PageRankParams::default());
        for r in &ranks {
            assert!((r - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pagerank_with_dangling_node() {
        let s = snapshot(&[("a", "b")]);
        let ranks = s.pagerank_map(&PageRankParams::default());
        let total: f64 = ranks.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((ranks["a"] - 0.350_877).abs() < 1e-4);
        assert!((ranks["b"] - 0.649_123).abs() < 1e-4);
    }

    #[test]
    fn test_pagerank_is_deterministic() {
        let edges = [("x", "y"), ("y", "z"), ("z", "x"), ("w", "x"), ("w", "z")];
        let first = snapshot(&edges).pagerank(&PageRankParams::default());
        let mut reversed = edges;
        reversed.reverse();
        let second = snapshot(&reversed).pagerank(&PageRankParams::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_pagerank_respects_iteration_cap() {
        let s = snapshot(&[("a", "b"), ("b", "c")]);
        let params = PageRankParams {
            max_iterations: 0,
            ..PageRankParams::default()
        };
        assert_eq!(s.pagerank(&params), vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn test_clustering_coefficient() {
        // a sits in one closed triangle (a,b,c) and has an extra neighbor d.
        let s = snapshot(&[("a", "b"), ("a", "c"), ("b", "c"), ("a", "d")]);
        assert!((s.clustering_coefficient(idx(&s, "a")) - 1.0 / 3.0).abs() < 1e-12);
        assert!((s.clustering_coefficient(idx(&s, "b")) - 1.0).abs() < 1e-12);
        assert_eq!(s.clustering_coefficient(idx(&s, "d")), 0.0);
    }

    #[test]
    fn test_clustering_ignores_edge_direction_duplicates() {
        let s = snapshot(&[("a", "b"), ("b", "a"), ("a", "c"), ("c", "b")]);
        assert_eq!(s.neighbors(idx(&s, "a")).len(), 2);
        assert!((s.clustering_coefficient(idx(&s, "a")) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_neighborhood_entropy() {
        // Star: center's neighbors all have degree 1 -> ln(4) for four leaves.
        let s = snapshot(&[("c", "l1"), ("c", "l2"), ("c", "l3"), ("c", "l4")]);
        let e = s.neighborhood_entropy(idx(&s, "c"));
        assert!((e - 4.0_f64.ln()).abs() < 1e-6);

        // A leaf has one neighbor: p = 1, entropy ~ 0.
        assert!(s.neighborhood_entropy(idx(&s, "l1")).abs() < 1e-6);
    }

    #[test]
    fn test_betweenness_path_and_star() {
        let path = snapshot(&[("a", "b"), ("b", "c")]);
        let bc = path.betweenness_centrality(None);
        assert!((bc[idx(&path, "b")] - 1.0).abs() < 1e-12);
        assert_eq!(bc[idx(&path, "a")], 0.0);

        let star = snapshot(&[("c", "l1"), ("c", "l2"), ("c", "l3"), ("c", "l4")]);
        let bc = star.betweenness_centrality(None);
        assert!((bc[idx(&star, "c")] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_component_count() {
        let s = snapshot(&[("a", "b"), ("b", "c"), ("x", "y")]);
        assert_eq!(s.component_count(), 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let s = snapshot(&[]);
        assert!(s.is_empty());
        assert!(s.pagerank(&PageRankParams::default()).is_empty());
        assert!(s.betweenness_centrality(None).is_empty());
    }
}
