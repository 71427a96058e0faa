//! Time-decayed interaction graph with a rolling edge window.
//!
//! The live graph is a petgraph `StableDiGraph` keyed by namespaced node ids.
//! Expiry is driven by a min-heap of edge last-seen times, so pruning only
//! touches edges that actually fell out of the window, and per-event
//! features are read from the account's own neighborhood.

use crate::config::{GraphConfig, GraphSignal, MAX_WINDOW_SECS};
use crate::graph::rings::{Ring, RingAnnotation};
use crate::graph::snapshot::{GraphSnapshot, PageRankParams};
use crate::types::transaction::{Transaction, UNKNOWN_TRANSACTION_ID};
use chrono::{DateTime, Duration, Utc};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

const ENTROPY_EPSILON: f64 = 1e-9;

/// `0.5^(Δt / half_life)`; negative elapsed time counts as zero.
pub fn decay_weight(elapsed_secs: f64, half_life_secs: f64) -> f64 {
    0.5_f64.powf(elapsed_secs.max(0.0) / half_life_secs)
}

/// Seconds between two instants, with millisecond resolution.
pub(crate) fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Namespaced node id, so accounts and merchants with equal ids stay apart.
pub fn node_id(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

pub fn account_node(account_id: &str) -> String {
    node_id("acct", account_id)
}

#[derive(Debug, Clone)]
struct NodeState {
    id: String,
    /// Distinct nodes linked in either direction
    neighbors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EdgeState {
    last_seen: DateTime<Utc>,
    /// Refresh count with older refreshes decayed away
    accumulated_weight: f64,
}

/// Serializable edge for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub last_seen: DateTime<Utc>,
    pub accumulated_weight: f64,
}

/// Serializable graph contents for checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub clock: Option<DateTime<Utc>>,
    pub edges: Vec<EdgeRecord>,
    pub annotations: Vec<(String, RingAnnotation)>,
    /// Transaction ids already linked inside the window
    #[serde(default)]
    pub transactions: Vec<(String, DateTime<Utc>)>,
}

/// Relational signal for one account at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphFeatures {
    pub node_count: usize,
    pub edge_count: usize,
    /// Sum of decay weights of incident edges
    pub degree_centrality: f64,
    /// Degree centrality divided by `n - 1`, capped at 1
    pub normalized_degree: f64,
    /// PageRank normalized by the snapshot maximum, when computed
    pub pagerank: Option<f64>,
    pub clustering_coefficient: f64,
    pub neighborhood_entropy: f64,
    /// Decayed accumulated interaction weight over incident edges
    pub interaction_intensity: f64,
    pub ring: Option<RingAnnotation>,
    /// Graph factor handed to the combiner, in [0, 1]
    pub graph_risk: f64,
}

/// Directed, decaying interaction graph.
///
/// Not synchronized: a single owner (see [`crate::graph::GraphHandle`])
/// serializes every mutation and query.
#[derive(Debug)]
pub struct TemporalGraph {
    window: Duration,
    half_life_secs: f64,
    signal: GraphSignal,
    pagerank: PageRankParams,
    graph: StableDiGraph<NodeState, EdgeState>,
    node_map: HashMap<String, NodeIndex>,
    /// Expiry candidates, oldest first. An entry whose edge was refreshed
    /// since is skipped when popped; the refresh pushed a later entry.
    expiry: BinaryHeap<Reverse<(DateTime<Utc>, NodeIndex, NodeIndex)>>,
    /// Linked transaction ids and their event times
    seen: HashMap<String, DateTime<Utc>>,
    seen_expiry: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
    annotations: HashMap<String, RingAnnotation>,
    /// Latest event time observed
    clock: Option<DateTime<Utc>>,
}

impl TemporalGraph {
    pub fn new(window: Duration, half_life_secs: f64) -> Self {
        Self {
            window,
            half_life_secs,
            signal: GraphSignal::Degree,
            pagerank: PageRankParams::default(),
            graph: StableDiGraph::new(),
            node_map: HashMap::new(),
            expiry: BinaryHeap::new(),
            seen: HashMap::new(),
            seen_expiry: BinaryHeap::new(),
            annotations: HashMap::new(),
            clock: None,
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        let mut graph = Self::new(
            Duration::seconds(config.window_secs.min(MAX_WINDOW_SECS) as i64),
            config.half_life_secs,
        );
        graph.signal = config.signal;
        graph.pagerank = PageRankParams {
            alpha: config.pagerank_alpha,
            max_iterations: config.pagerank_max_iterations,
            tolerance: config.pagerank_tolerance,
        };
        graph
    }

    pub fn with_signal(mut self, signal: GraphSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Decay weight for an edge of the given age.
    pub fn weight(&self, elapsed_secs: f64) -> f64 {
        decay_weight(elapsed_secs, self.half_life_secs)
    }

    fn get_or_add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(NodeState {
            id: id.to_string(),
            neighbors: 0,
        });
        self.node_map.insert(id.to_string(), idx);
        idx
    }

    fn visible(&self, edge: &EdgeState, now: DateTime<Utc>) -> bool {
        now - edge.last_seen <= self.window
    }

    /// Insert an edge or refresh its last-seen time. Self-loops are ignored.
    pub fn add_edge(&mut self, u: &str, v: &str, timestamp: DateTime<Utc>) {
        if u == v {
            return;
        }
        self.advance_clock(timestamp);
        let ui = self.get_or_add_node(u);
        let vi = self.get_or_add_node(v);

        match self.graph.find_edge(ui, vi) {
            Some(e) => {
                let half_life = self.half_life_secs;
                let edge = &mut self.graph[e];
                let elapsed = elapsed_secs(edge.last_seen, timestamp);
                edge.accumulated_weight =
                    edge.accumulated_weight * decay_weight(elapsed, half_life) + 1.0;
                if timestamp > edge.last_seen {
                    edge.last_seen = timestamp;
                    self.expiry.push(Reverse((timestamp, ui, vi)));
                }
            }
            None => {
                if self.graph.find_edge(vi, ui).is_none() {
                    self.graph[ui].neighbors += 1;
                    self.graph[vi].neighbors += 1;
                }
                self.graph.add_edge(
                    ui,
                    vi,
                    EdgeState {
                        last_seen: timestamp,
                        accumulated_weight: 1.0,
                    },
                );
                self.expiry.push(Reverse((timestamp, ui, vi)));
            }
        }
    }

    /// Remove edges older than the window and nodes left without edges.
    ///
    /// Returns the number of edges removed; calling again with the same
    /// `now` removes nothing.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(&Reverse((seen_at, u, v))) = self.expiry.peek() {
            if now - seen_at <= self.window {
                break;
            }
            self.expiry.pop();
            let Some(e) = self.graph.find_edge(u, v) else {
                continue;
            };
            if self.visible(&self.graph[e], now) {
                continue;
            }
            self.remove_edge(e, u, v);
            removed += 1;
        }

        while let Some(Reverse((seen_at, _))) = self.seen_expiry.peek() {
            if now - *seen_at <= self.window {
                break;
            }
            if let Some(Reverse((seen_at, id))) = self.seen_expiry.pop() {
                if self.seen.get(&id) == Some(&seen_at) {
                    self.seen.remove(&id);
                }
            }
        }

        if removed > 0 {
            debug!(removed, remaining = self.graph.edge_count(), "Pruned graph edges");
        }
        removed
    }

    fn remove_edge(&mut self, e: EdgeIndex, u: NodeIndex, v: NodeIndex) {
        self.graph.remove_edge(e);
        if self.graph.find_edge(v, u).is_some() {
            return;
        }
        for node in [u, v] {
            self.graph[node].neighbors -= 1;
            if self.graph[node].neighbors == 0 {
                if let Some(state) = self.graph.remove_node(node) {
                    self.node_map.remove(&state.id);
                    self.annotations.remove(&state.id);
                }
            }
        }
    }

    fn advance_clock(&mut self, timestamp: DateTime<Utc>) {
        self.clock = Some(self.clock.map_or(timestamp, |c| c.max(timestamp)));
    }

    fn remember(&mut self, transaction_id: &str, at: DateTime<Utc>) {
        self.seen.insert(transaction_id.to_string(), at);
        self.seen_expiry.push(Reverse((at, transaction_id.to_string())));
    }

    /// Whether a transaction's edges are already in the graph.
    pub fn has_seen(&self, transaction_id: &str) -> bool {
        transaction_id != UNKNOWN_TRANSACTION_ID && self.seen.contains_key(transaction_id)
    }

    /// Owned copy of every edge visible at `now`, with decay applied.
    pub fn snapshot(&self, now: DateTime<Utc>) -> GraphSnapshot {
        let edges = self.graph.edge_indices().filter_map(|e| {
            let (u, v) = self.graph.edge_endpoints(e)?;
            let state = &self.graph[e];
            if !self.visible(state, now) {
                return None;
            }
            let weight = self.weight(elapsed_secs(state.last_seen, now));
            Some((
                self.graph[u].id.clone(),
                self.graph[v].id.clone(),
                weight,
                state.accumulated_weight * weight,
            ))
        });
        GraphSnapshot::build(now, edges)
    }

    /// Snapshot at the latest observed event time.
    pub fn current_snapshot(&self) -> GraphSnapshot {
        self.snapshot(self.clock.unwrap_or_else(Utc::now))
    }

    /// Link a transaction's entities, prune, and compute the account's features.
    ///
    /// A transaction id already linked inside the window is not linked again.
    pub fn observe(&mut self, tx: &Transaction) -> GraphFeatures {
        let account = account_node(&tx.account_id);
        self.advance_clock(tx.timestamp);

        if self.has_seen(&tx.id) {
            debug!(transaction_id = %tx.id, "Transaction already linked, skipping replay");
        } else {
            let links = [
                tx.merchant_id.as_deref().map(|id| node_id("merchant", id)),
                tx.device_id.as_deref().map(|id| node_id("device", id)),
                tx.ip_address.as_deref().map(|id| node_id("ip", id)),
                tx.counterparty_id.as_deref().map(account_node),
            ];
            for target in links.iter().flatten() {
                self.add_edge(&account, target, tx.timestamp);
            }
            if tx.id != UNKNOWN_TRANSACTION_ID {
                self.remember(&tx.id, tx.timestamp);
            }
        }

        let now = self.clock.unwrap_or(tx.timestamp);
        self.prune(now);
        self.features_for(&account, now)
    }

    /// Compute graph features for a node as of `now`.
    ///
    /// Reads only the node's incident edges and the edges among its
    /// neighbors; a full snapshot is built only for the PageRank signal.
    pub fn features_for(&self, node: &str, now: DateTime<Utc>) -> GraphFeatures {
        let node_count = self.graph.node_count();
        let edge_count = self.graph.edge_count();
        let Some(&idx) = self.node_map.get(node) else {
            return GraphFeatures {
                node_count,
                edge_count,
                ..GraphFeatures::default()
            };
        };

        let mut degree = 0.0;
        let mut intensity = 0.0;
        let mut neighbors: Vec<NodeIndex> = Vec::new();
        for edge in self
            .graph
            .edges_directed(idx, Outgoing)
            .chain(self.graph.edges_directed(idx, Incoming))
        {
            let state = edge.weight();
            if !self.visible(state, now) {
                continue;
            }
            let weight = self.weight(elapsed_secs(state.last_seen, now));
            degree += weight;
            intensity += state.accumulated_weight * weight;
            neighbors.push(if edge.source() == idx {
                edge.target()
            } else {
                edge.source()
            });
        }
        neighbors.sort_unstable();
        neighbors.dedup();

        let normalized_degree = if node_count <= 1 {
            0.0
        } else {
            (degree / (node_count - 1) as f64).clamp(0.0, 1.0)
        };
        let pagerank = match self.signal {
            GraphSignal::Pagerank => {
                let snapshot = self.snapshot(now);
                let ranks = snapshot.pagerank(&self.pagerank);
                let max = ranks.iter().copied().fold(0.0_f64, f64::max);
                let rank = snapshot.index_of(node).map_or(0.0, |i| ranks[i]);
                Some(if max > 0.0 { rank / max } else { 0.0 })
            }
            GraphSignal::Degree => None,
        };
        let graph_risk = pagerank.unwrap_or(normalized_degree).clamp(0.0, 1.0);

        GraphFeatures {
            node_count,
            edge_count,
            degree_centrality: degree,
            normalized_degree,
            pagerank,
            clustering_coefficient: self.local_clustering(&neighbors, now),
            neighborhood_entropy: self.local_entropy(&neighbors),
            interaction_intensity: intensity,
            ring: self.annotations.get(node).cloned(),
            graph_risk,
        }
    }

    fn linked(&self, a: NodeIndex, b: NodeIndex, now: DateTime<Utc>) -> bool {
        [self.graph.find_edge(a, b), self.graph.find_edge(b, a)]
            .into_iter()
            .flatten()
            .any(|e| self.visible(&self.graph[e], now))
    }

    /// Unweighted clustering over a node's distinct undirected neighbors.
    fn local_clustering(&self, neighbors: &[NodeIndex], now: DateTime<Utc>) -> f64 {
        let k = neighbors.len();
        if k < 2 {
            return 0.0;
        }
        let mut links = 0usize;
        for (pos, &a) in neighbors.iter().enumerate() {
            for &b in &neighbors[pos + 1..] {
                if self.linked(a, b, now) {
                    links += 1;
                }
            }
        }
        2.0 * links as f64 / (k * (k - 1)) as f64
    }

    /// `-Σ p_i ln(p_i + ε)` over the neighbor counts of a node's neighbors.
    fn local_entropy(&self, neighbors: &[NodeIndex]) -> f64 {
        let total: f64 = neighbors
            .iter()
            .map(|&n| self.graph[n].neighbors as f64)
            .sum();
        if total <= 0.0 {
            return 0.0;
        }
        -neighbors
            .iter()
            .map(|&n| {
                let p = self.graph[n].neighbors as f64 / total;
                p * (p + ENTROPY_EPSILON).ln()
            })
            .sum::<f64>()
    }

    /// Replace ring annotations; members no longer in the graph are skipped.
    pub fn annotate(&mut self, rings: &[Ring]) -> usize {
        self.annotations.clear();
        for ring in rings {
            let annotation = ring.annotation();
            for member in &ring.members {
                if self.node_map.contains_key(member) {
                    self.annotations.insert(member.clone(), annotation.clone());
                }
            }
        }
        self.annotations.len()
    }

    pub fn annotation(&self, node: &str) -> Option<&RingAnnotation> {
        self.annotations.get(node)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_edge(&self, u: &str, v: &str) -> bool {
        match (self.node_map.get(u), self.node_map.get(v)) {
            (Some(&ui), Some(&vi)) => self.graph.find_edge(ui, vi).is_some(),
            _ => false,
        }
    }

    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Export for a checkpoint, sorted for stable output.
    pub fn export(&self) -> GraphState {
        let mut edges: Vec<EdgeRecord> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (u, v) = self.graph.edge_endpoints(e)?;
                Some(EdgeRecord {
                    source: self.graph[u].id.clone(),
                    target: self.graph[v].id.clone(),
                    last_seen: self.graph[e].last_seen,
                    accumulated_weight: self.graph[e].accumulated_weight,
                })
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        let mut annotations: Vec<(String, RingAnnotation)> = self
            .annotations
            .iter()
            .map(|(node, ann)| (node.clone(), ann.clone()))
            .collect();
        annotations.sort_by(|a, b| a.0.cmp(&b.0));

        let mut transactions: Vec<(String, DateTime<Utc>)> = self
            .seen
            .iter()
            .map(|(id, at)| (id.clone(), *at))
            .collect();
        transactions.sort();

        GraphState {
            clock: self.clock,
            edges,
            annotations,
            transactions,
        }
    }

    /// Replace contents with checkpointed state.
    pub fn restore(&mut self, state: GraphState) {
        self.graph.clear();
        self.node_map.clear();
        self.expiry.clear();
        self.seen.clear();
        self.seen_expiry.clear();
        self.annotations.clear();
        self.clock = state.clock;

        for edge in state.edges {
            if edge.source == edge.target || self.contains_edge(&edge.source, &edge.target) {
                continue;
            }
            let ui = self.get_or_add_node(&edge.source);
            let vi = self.get_or_add_node(&edge.target);
            if self.graph.find_edge(vi, ui).is_none() {
                self.graph[ui].neighbors += 1;
                self.graph[vi].neighbors += 1;
            }
            self.graph.add_edge(
                ui,
                vi,
                EdgeState {
                    last_seen: edge.last_seen,
                    accumulated_weight: edge.accumulated_weight,
                },
            );
            self.expiry.push(Reverse((edge.last_seen, ui, vi)));
        }
        for (id, at) in state.transactions {
            self.remember(&id, at);
        }
        for (node, annotation) in state.annotations {
            if self.node_map.contains_key(&node) {
                self.annotations.insert(node, annotation);
            }
        }
        if let Some(now) = self.clock {
            self.prune(now);
        }
    }
}

impl Default for TemporalGraph {
    fn default() -> Self {
        Self::from_config(&GraphConfig::default())
    }
}
