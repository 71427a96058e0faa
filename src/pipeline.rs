//! Partitioned decisioning pipeline.
//!
//! Accounts are routed by hash to a fixed set of partition workers. Each
//! worker owns the behavior windows of its accounts and handles its queue
//! in order, so events for one account are applied strictly in arrival
//! order. The shared graph lives behind its own owner task.

use crate::audit::AuditLedger;
use crate::behavior::{AccountRecord, AccountSnapshot, WindowedBehaviorTracker};
use crate::checkpoint::{Checkpoint, CheckpointStore, PartitionState};
use crate::config::AppConfig;
use crate::decision::DecisionEngine;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_extractor::FeatureExtractor;
use crate::graph::{GraphFeatures, GraphHandle, RingDetector, TemporalGraph};
use crate::metrics::PipelineMetrics;
use crate::models::combiner::{RiskFactorCombiner, RiskFactors};
use crate::models::scorer::{HeuristicScorer, ResilientScorer, RiskScorer};
use crate::types::alert::FraudAlert;
use crate::types::decision::Decision;
use crate::types::transaction::{ParsedTransaction, Transaction, UNKNOWN_ACCOUNT_ID};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Partition index for an account.
pub fn partition_for(account_id: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    account_id.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

enum PartitionCommand {
    Evaluate {
        parsed: ParsedTransaction,
        reply: oneshot::Sender<Decision>,
    },
    /// Export state, then hold the partition until `resume` fires or is dropped.
    Capture {
        reply: oneshot::Sender<PartitionState>,
        resume: oneshot::Receiver<()>,
    },
    Inspect {
        account_id: String,
        reply: oneshot::Sender<Option<AccountSnapshot>>,
    },
}

/// Everything a partition worker needs besides its own tracker.
struct Stages {
    graph: GraphHandle,
    scorer: ResilientScorer,
    extractor: FeatureExtractor,
    combiner: RiskFactorCombiner,
    engine: DecisionEngine,
    audit: AuditLedger,
    alerts: mpsc::Sender<FraudAlert>,
    alert_threshold: f64,
    metrics: Arc<PipelineMetrics>,
}

/// Assembles a [`DecisionPipeline`].
pub struct PipelineBuilder {
    config: AppConfig,
    scorer: Arc<dyn RiskScorer>,
    audit: AuditLedger,
    metrics: Arc<PipelineMetrics>,
    checkpoint: Option<Checkpoint>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            scorer: Arc::new(HeuristicScorer),
            audit: AuditLedger::disabled(),
            metrics: Arc::new(PipelineMetrics::new()),
            checkpoint: None,
        }
    }

    pub fn scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn audit(mut self, audit: AuditLedger) -> Self {
        self.audit = audit;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Seed trackers and graph from a checkpoint.
    pub fn restore(mut self, checkpoint: Option<Checkpoint>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Spawn the graph owner and partition workers.
    ///
    /// Returns the pipeline and the receiving end of the alert stream.
    pub fn start(self) -> (DecisionPipeline, mpsc::Receiver<FraudAlert>) {
        let config = self.config;
        let partitions = config.pipeline.partitions.max(1);

        let mut graph = TemporalGraph::from_config(&config.graph);
        let mut trackers: Vec<WindowedBehaviorTracker> = (0..partitions)
            .map(|_| WindowedBehaviorTracker::from_config(&config.behavior))
            .collect();

        if let Some(checkpoint) = self.checkpoint {
            let taken_at = checkpoint.body.taken_at;
            let (accounts, graph_state) = checkpoint.into_accounts();
            let restored = accounts.len();

            let mut routed: Vec<Vec<AccountRecord>> = vec![Vec::new(); partitions];
            for record in accounts {
                routed[partition_for(&record.account_id, partitions)].push(record);
            }
            for (tracker, records) in trackers.iter_mut().zip(routed) {
                tracker.restore(records);
            }
            graph.restore(graph_state);

            info!(
                accounts = restored,
                edges = graph.edge_count(),
                taken_at = %taken_at,
                "Restored state from checkpoint"
            );
        }

        let (graph_handle, graph_task) = GraphHandle::spawn(graph, config.graph.channel_capacity);
        let (alert_tx, alert_rx) = mpsc::channel(config.alerting.channel_capacity.max(1));

        let stages = Arc::new(Stages {
            graph: graph_handle.clone(),
            scorer: ResilientScorer::new(
                self.scorer,
                Duration::from_millis(config.scoring.timeout_ms),
            ),
            extractor: FeatureExtractor::new(),
            combiner: RiskFactorCombiner::new(config.weights),
            engine: DecisionEngine::new(config.decision),
            audit: self.audit,
            alerts: alert_tx,
            alert_threshold: config.alerting.threshold,
            metrics: Arc::clone(&self.metrics),
        });

        let mut senders = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);
        for (index, tracker) in trackers.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(config.pipeline.channel_capacity.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_partition(
                index,
                tracker,
                rx,
                Arc::clone(&stages),
            )));
        }

        info!(
            partitions,
            scorer = %stages.scorer.name(),
            scorer_timeout_ms = config.scoring.timeout_ms,
            "Decision pipeline started"
        );

        (
            DecisionPipeline {
                partitions: senders,
                graph: graph_handle,
                graph_task,
                workers,
                metrics: self.metrics,
            },
            alert_rx,
        )
    }
}

/// Running pipeline: routes transactions and coordinates checkpoints.
pub struct DecisionPipeline {
    partitions: Vec<mpsc::Sender<PartitionCommand>>,
    graph: GraphHandle,
    graph_task: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<PipelineMetrics>,
}

impl DecisionPipeline {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn graph(&self) -> &GraphHandle {
        &self.graph
    }

    fn sender_for(&self, account_id: &str) -> &mpsc::Sender<PartitionCommand> {
        &self.partitions[partition_for(account_id, self.partitions.len())]
    }

    /// Enqueue a transaction on its account's partition.
    ///
    /// Waits only for queue space; the decision arrives on the returned
    /// receiver once the partition has processed the event.
    pub async fn submit(&self, parsed: ParsedTransaction) -> PipelineResult<oneshot::Receiver<Decision>> {
        let (reply, receiver) = oneshot::channel();
        self.sender_for(&parsed.transaction.account_id)
            .send(PartitionCommand::Evaluate { parsed, reply })
            .await
            .map_err(|_| PipelineError::Shutdown)?;
        Ok(receiver)
    }

    /// Submit and wait for the decision.
    pub async fn evaluate(&self, parsed: ParsedTransaction) -> PipelineResult<Decision> {
        self.submit(parsed)
            .await?
            .await
            .map_err(|_| PipelineError::Shutdown)
    }

    /// Current window aggregates for an account.
    pub async fn account_snapshot(&self, account_id: &str) -> PipelineResult<Option<AccountSnapshot>> {
        let (reply, receiver) = oneshot::channel();
        self.sender_for(account_id)
            .send(PartitionCommand::Inspect {
                account_id: account_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| PipelineError::Shutdown)?;
        receiver.await.map_err(|_| PipelineError::Shutdown)
    }

    /// Capture a consistent checkpoint.
    ///
    /// Each partition evicts idle accounts and exports its state when the
    /// capture request reaches the front of its queue, then holds until the
    /// graph has been exported. Partitions only touch the graph while
    /// deciding, so the graph export contains exactly the events the
    /// partition exports contain.
    pub async fn checkpoint(&self) -> PipelineResult<Checkpoint> {
        let mut pending = Vec::with_capacity(self.partitions.len());
        let mut holds = Vec::with_capacity(self.partitions.len());
        for sender in &self.partitions {
            let (reply, receiver) = oneshot::channel();
            let (hold, resume) = oneshot::channel();
            sender
                .send(PartitionCommand::Capture { reply, resume })
                .await
                .map_err(|_| PipelineError::Shutdown)?;
            pending.push(receiver);
            holds.push(hold);
        }

        let mut states = Vec::with_capacity(pending.len());
        for receiver in pending {
            states.push(receiver.await.map_err(|_| PipelineError::Shutdown)?);
        }
        let graph = self.graph.export().await;
        for hold in holds {
            let _ = hold.send(());
        }
        Checkpoint::new(states, graph?)
    }

    /// Capture and persist a checkpoint.
    pub async fn checkpoint_to(&self, store: &CheckpointStore) -> PipelineResult<()> {
        let checkpoint = self.checkpoint().await?;
        store.save(&checkpoint).await
    }

    /// Run ring detection on a graph snapshot and publish annotations.
    ///
    /// Detection runs on the blocking pool; the graph owner keeps serving
    /// partitions meanwhile.
    pub async fn detect_rings(&self, detector: Arc<dyn RingDetector>) -> PipelineResult<usize> {
        let snapshot = self.graph.snapshot().await?;
        let nodes = snapshot.node_count();
        let components = snapshot.component_count();
        let started = Instant::now();

        let rings = tokio::task::spawn_blocking(move || detector.detect(&snapshot))
            .await
            .map_err(|e| PipelineError::Scorer(format!("ring detection task failed: {e}")))?;

        let count = rings.len();
        for ring in &rings {
            debug!(ring_id = %ring.ring_id, size = ring.members.len(), hub = %ring.hub, "Ring detected");
        }
        let annotated = self.graph.annotate(rings).await?;
        self.metrics.record_rings(count);

        info!(
            rings = count,
            annotated_nodes = annotated,
            nodes,
            components,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ring detection pass complete"
        );
        Ok(count)
    }

    /// Stop accepting work and wait for queued events to finish.
    pub async fn shutdown(self) {
        let DecisionPipeline {
            partitions,
            graph,
            graph_task,
            workers,
            ..
        } = self;
        drop(partitions);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Partition worker ended abnormally");
            }
        }
        drop(graph);
        if let Err(e) = graph_task.await {
            error!(error = %e, "Graph owner ended abnormally");
        }
        info!("Decision pipeline stopped");
    }
}

async fn run_partition(
    index: usize,
    mut tracker: WindowedBehaviorTracker,
    mut commands: mpsc::Receiver<PartitionCommand>,
    stages: Arc<Stages>,
) {
    debug!(partition = index, accounts = tracker.len(), "Partition worker started");
    // Latest event time seen by this partition; drives idle eviction.
    let mut clock: Option<DateTime<Utc>> = None;

    while let Some(command) = commands.recv().await {
        match command {
            PartitionCommand::Evaluate { parsed, reply } => {
                let at = parsed.transaction.timestamp;
                clock = Some(clock.map_or(at, |c| c.max(at)));

                let decision = decide(&stages, &mut tracker, parsed).await;
                // The submitter may not wait for the reply.
                let _ = reply.send(decision);
            }
            PartitionCommand::Capture { reply, resume } => {
                if let Some(now) = clock {
                    let evicted = tracker.evict_idle(now);
                    if evicted > 0 {
                        stages.metrics.record_evictions(evicted);
                        debug!(partition = index, evicted, "Evicted idle accounts");
                    }
                }
                let _ = reply.send(PartitionState {
                    partition: index,
                    accounts: tracker.export(),
                });
                // Released early if the checkpoint is abandoned.
                let _ = resume.await;
            }
            PartitionCommand::Inspect { account_id, reply } => {
                let _ = reply.send(tracker.snapshot(&account_id));
            }
        }
    }

    debug!(partition = index, "Partition worker stopped");
}

/// Run one transaction through every stage. Never fails.
async fn decide(
    stages: &Stages,
    tracker: &mut WindowedBehaviorTracker,
    parsed: ParsedTransaction,
) -> Decision {
    let started = Instant::now();
    let ParsedTransaction { transaction, issues } = parsed;
    let tx = Arc::new(transaction);

    if !issues.is_empty() {
        stages.metrics.record_input_issues(issues.len());
        for issue in &issues {
            let err: PipelineError = issue.clone().into();
            warn!(transaction_id = %tx.id, error = %err, "Coerced malformed input");
        }
    }

    // The graph owner works on this event while the window is updated here.
    let graph_reply = match stages.graph.observe_request(Arc::clone(&tx)).await {
        Ok(reply) => Some(reply),
        Err(e) => {
            error!(transaction_id = %tx.id, error = %e, "Graph owner unavailable");
            None
        }
    };
    let behavior = tracker.update(&tx.account_id, &tx);
    let graph = match graph_reply {
        Some(reply) => reply.await.unwrap_or_else(|_| {
            error!(transaction_id = %tx.id, "Graph owner dropped request");
            GraphFeatures::default()
        }),
        None => GraphFeatures::default(),
    };

    let features = stages.extractor.extract(&tx, &behavior, &graph);
    let scorer_started = Instant::now();
    let outcome = stages.scorer.score(&features).await;
    stages
        .metrics
        .record_scorer_call(outcome.source, scorer_started.elapsed());

    let factors = stages.combiner.factors(&behavior, &graph, &tx, outcome.score);
    let score = stages.combiner.combine(&factors);

    let user_id = (tx.account_id != UNKNOWN_ACCOUNT_ID).then_some(tx.account_id.as_str());
    let decision = stages
        .engine
        .evaluate(Some(tx.id.as_str()), user_id, tx.amount, score);

    if decision.is_decline() || decision.risk_score > stages.alert_threshold {
        emit_alert(stages, &decision, &tx, factors, &graph);
    }

    let payload = json!({
        "decision": &decision,
        "transaction": &*tx,
        "behavior": behavior,
        "graph": {
            "graph_risk": graph.graph_risk,
            "normalized_degree": graph.normalized_degree,
            "ring_id": graph.ring.as_ref().map(|r| r.ring_id.clone()),
        },
        "risk_factors": factors,
        "ml_score": outcome.score,
        "score_source": outcome.source,
        "input_issues": issues,
    });
    if let Err(e) = stages.audit.record(payload) {
        stages.metrics.record_audit_failure();
        warn!(transaction_id = %decision.transaction_id, error = %e, "Audit entry not recorded");
    }

    let elapsed = started.elapsed();
    stages
        .metrics
        .record_decision(decision.decision, elapsed, decision.risk_score);

    debug!(
        transaction_id = %decision.transaction_id,
        account_id = %tx.account_id,
        decision = %decision.decision,
        risk_score = decision.risk_score,
        score_source = ?outcome.source,
        processing_time_us = elapsed.as_micros() as u64,
        "Transaction decided"
    );
    decision
}

fn emit_alert(
    stages: &Stages,
    decision: &Decision,
    tx: &Transaction,
    factors: RiskFactors,
    graph: &GraphFeatures,
) {
    let alert = FraudAlert::new(decision, &tx.account_id, factors)
        .with_triggered_factors(factors.triggered())
        .with_ring(graph.ring.as_ref().map(|r| r.ring_id.clone()));
    let priority = alert.priority;

    match stages.alerts.try_send(alert) {
        Ok(()) => stages.metrics.record_alert(priority),
        Err(e) => {
            stages.metrics.record_alert_dropped();
            warn!(transaction_id = %decision.transaction_id, error = %e, "Fraud alert dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LabelPropagationDetector;
    use crate::models::combiner::CombinerWeights;
    use crate::models::scorer::ScoreSource;
    use crate::types::decision::DecisionOutcome;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    /// Returns a fixed score.
    struct FixedScorer(f64);

    impl RiskScorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _features: &[f32]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    struct StuckScorer;

    impl RiskScorer for StuckScorer {
        fn name(&self) -> &str {
            "stuck"
        }

        fn predict(&self, _features: &[f32]) -> anyhow::Result<f64> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(0.0)
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.partitions = 3;
        config
    }

    /// Only the model score counts, so tests control the composite directly.
    fn model_only_config() -> AppConfig {
        let mut config = config();
        config.weights = CombinerWeights {
            amount_anomaly: 0.0,
            velocity: 0.0,
            location: 0.0,
            time: 0.0,
            graph: 0.0,
            ml: 1.0,
        };
        config
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn parsed(tx: Transaction) -> ParsedTransaction {
        ParsedTransaction {
            transaction: tx,
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_partition_routing_is_stable() {
        let p = partition_for("alice", 10);
        assert!(p < 10);
        assert_eq!(partition_for("alice", 10), p);
        assert_eq!(partition_for("anyone", 1), 0);
    }

    #[tokio::test]
    async fn test_low_risk_transaction_is_approved() {
        let (pipeline, mut alerts) = PipelineBuilder::new(config())
            .scorer(Arc::new(FixedScorer(0.0)))
            .start();

        let decision = pipeline
            .evaluate(parsed(Transaction::new("t1", "alice", 20.0, at(0)).with_merchant("cafe")))
            .await
            .unwrap();

        assert_eq!(decision.decision, DecisionOutcome::Approve);
        assert_eq!(decision.transaction_id, "t1");
        assert_eq!(decision.user_id.as_deref(), Some("alice"));
        // amount_anomaly 1.0 * 0.3 + velocity 0.1 * 0.25 + graph 1.0 * 0.05
        assert!((decision.risk_score - 0.375).abs() < 1e-9);
        assert!(alerts.try_recv().is_err());

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_high_model_score_declines_and_alerts() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (pipeline, mut alerts) = PipelineBuilder::new(model_only_config())
            .scorer(Arc::new(FixedScorer(0.95)))
            .metrics(Arc::clone(&metrics))
            .start();

        let decision = pipeline
            .evaluate(parsed(Transaction::new("t1", "mallory", 2500.0, at(0))))
            .await
            .unwrap();

        assert_eq!(decision.decision, DecisionOutcome::Decline);
        assert_eq!(decision.reasons.len(), 2);

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.transaction_id, "t1");
        assert_eq!(alert.account_id, "mallory");
        assert!(alert.triggered_factors.contains(&"ml_score".to_string()));
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 1);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_alert_threshold_below_decline() {
        let (pipeline, mut alerts) = PipelineBuilder::new(model_only_config())
            .scorer(Arc::new(FixedScorer(0.82)))
            .start();

        let decision = pipeline
            .evaluate(parsed(Transaction::new("t1", "bob", 10.0, at(0))))
            .await
            .unwrap();
        assert_eq!(decision.decision, DecisionOutcome::Review);
        assert!(alerts.recv().await.is_some());

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_score_at_alert_threshold_does_not_alert() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (pipeline, mut alerts) = PipelineBuilder::new(model_only_config())
            .scorer(Arc::new(FixedScorer(0.8)))
            .metrics(Arc::clone(&metrics))
            .start();

        let decision = pipeline
            .evaluate(parsed(Transaction::new("t1", "bob", 10.0, at(0))))
            .await
            .unwrap();
        assert_eq!(decision.risk_score, 0.8);
        assert_eq!(decision.decision, DecisionOutcome::Review);
        assert!(alerts.try_recv().is_err());
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 0);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_checkpoint_matches_graph_under_load() {
        let config = config();
        let (pipeline, _alerts) = PipelineBuilder::new(config).start();
        let pipeline = Arc::new(pipeline);

        let feeder = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let mut pending = Vec::new();
                for i in 0..200u32 {
                    let tx = Transaction::new(format!("t{i}"), format!("acct-{}", i % 7), 10.0, at(i % 50))
                        .with_merchant(format!("m{}", i % 3));
                    pending.push(pipeline.submit(parsed(tx)).await.unwrap());
                }
                for receiver in pending {
                    receiver.await.unwrap();
                }
            })
        };

        let checkpoint = pipeline.checkpoint().await.unwrap();
        feeder.await.unwrap();

        let tracked: usize = checkpoint
            .body
            .partitions
            .iter()
            .flat_map(|p| &p.accounts)
            .map(|a| a.entries.len())
            .sum();
        assert_eq!(checkpoint.body.graph.transactions.len(), tracked);

        match Arc::try_unwrap(pipeline) {
            Ok(pipeline) => pipeline.shutdown().await,
            Err(_) => panic!("pipeline still shared"),
        }
    }

    #[tokio::test]
    async fn test_window_accumulates_per_account() {
        let (pipeline, _alerts) = PipelineBuilder::new(config()).start();

        for (i, location) in ["US", "FR", "US"].iter().enumerate() {
            let tx = Transaction::new(format!("t{i}"), "alice", 100.0, at(i as u32))
                .with_location(*location);
            pipeline.evaluate(parsed(tx)).await.unwrap();
        }
        pipeline
            .evaluate(parsed(Transaction::new("other", "bob", 5.0, at(5))))
            .await
            .unwrap();

        let snapshot = pipeline.account_snapshot("alice").await.unwrap().unwrap();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.distinct_location_count, 2);
        assert_eq!(snapshot.avg_amount, 100.0);
        assert!(pipeline.account_snapshot("nobody").await.unwrap().is_none());

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_input_still_decided() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (pipeline, _alerts) = PipelineBuilder::new(config())
            .metrics(Arc::clone(&metrics))
            .start();

        let parsed = Transaction::from_json_slice(br#"{"amount": "not-a-number"}"#).unwrap();
        assert!(!parsed.issues.is_empty());

        let decision = pipeline.evaluate(parsed).await.unwrap();
        assert_eq!(decision.transaction_id, "tx-unknown");
        assert_eq!(decision.amount, 0.0);
        assert!(decision.user_id.is_none());
        assert!(metrics.input_issues.load(Ordering::Relaxed) >= 2);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_scorer_timeout_falls_back() {
        let mut config = config();
        config.scoring.timeout_ms = 20;
        let metrics = Arc::new(PipelineMetrics::new());
        let (pipeline, _alerts) = PipelineBuilder::new(config)
            .scorer(Arc::new(StuckScorer))
            .metrics(Arc::clone(&metrics))
            .start();

        let decision = pipeline
            .evaluate(parsed(Transaction::new("t1", "alice", 10.0, at(0))))
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&decision.risk_score));
        assert_eq!(metrics.scorer_fallbacks.load(Ordering::Relaxed), 1);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_checkpoint_restore_and_replay() {
        let (pipeline, _alerts) = PipelineBuilder::new(config()).start();
        let txs: Vec<Transaction> = (0..4)
            .map(|i| {
                Transaction::new(format!("t{i}"), "alice", 50.0, at(i))
                    .with_device("dev-1")
                    .with_location("US")
            })
            .collect();
        for tx in &txs {
            pipeline.evaluate(parsed(tx.clone())).await.unwrap();
        }

        let checkpoint = pipeline.checkpoint().await.unwrap();
        assert_eq!(checkpoint.account_count(), 1);
        assert_eq!(checkpoint.body.partitions.len(), 3);
        assert!(checkpoint.verify().is_ok());
        pipeline.shutdown().await;

        // Restore into a pipeline with a different partition count.
        let mut restored_config = config();
        restored_config.pipeline.partitions = 5;
        let (restored, _alerts) = PipelineBuilder::new(restored_config)
            .restore(Some(checkpoint))
            .start();

        let before = restored.account_snapshot("alice").await.unwrap().unwrap();
        assert_eq!(before.count, 4);
        let graph_before = restored.graph().export().await.unwrap();
        assert_eq!(graph_before.edges.len(), 1);
        assert_eq!(graph_before.transactions.len(), 4);

        // Events delivered again after restart are not double counted.
        restored.evaluate(parsed(txs[3].clone())).await.unwrap();
        let after = restored.account_snapshot("alice").await.unwrap().unwrap();
        assert_eq!(after, before);

        let graph_after = restored.graph().export().await.unwrap();
        assert_eq!(graph_after.edges.len(), 1);
        assert_eq!(
            graph_after.edges[0].accumulated_weight,
            graph_before.edges[0].accumulated_weight
        );

        restored.shutdown().await;
    }

    #[tokio::test]
    async fn test_checkpoint_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let (pipeline, _alerts) = PipelineBuilder::new(config()).start();
        pipeline
            .evaluate(parsed(Transaction::new("t1", "alice", 10.0, at(0))))
            .await
            .unwrap();

        pipeline.checkpoint_to(&store).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.account_count(), 1);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_ring_detection_feeds_alerts() {
        let (pipeline, mut alerts) = PipelineBuilder::new(model_only_config())
            .scorer(Arc::new(FixedScorer(0.9)))
            .start();

        for i in 0..6 {
            let tx = Transaction::new(format!("t{i}"), format!("mule-{i}"), 40.0, at(i))
                .with_device("shared-phone")
                .with_ip("10.0.0.7");
            pipeline.evaluate(parsed(tx)).await.unwrap();
        }
        while alerts.try_recv().is_ok() {}

        let detector: Arc<dyn RingDetector> = Arc::new(LabelPropagationDetector::new(5, 20));
        assert_eq!(pipeline.detect_rings(detector).await.unwrap(), 1);
        assert_eq!(pipeline.metrics().rings_detected.load(Ordering::Relaxed), 1);

        let tx = Transaction::new("t-next", "mule-0", 40.0, at(10)).with_device("shared-phone");
        pipeline.evaluate(parsed(tx)).await.unwrap();
        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.ring_id.as_deref(), Some("ring:acct:mule-0"));

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_audit_entries_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let (audit, audit_task) = AuditLedger::spawn(&path, 64);

        let (pipeline, _alerts) = PipelineBuilder::new(config()).audit(audit).start();
        pipeline
            .evaluate(parsed(Transaction::new("t1", "alice", 700.0, at(0))))
            .await
            .unwrap();
        pipeline.shutdown().await;
        audit_task.await.unwrap();

        let entries = crate::audit::read_ledger(&path).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(crate::audit::verify_entry(&entries[0]));
        assert_eq!(entries[0].payload["decision"]["decision"], "REVIEW");
        assert_eq!(entries[0].payload["score_source"], "model");
    }

    #[test]
    fn test_score_source_wire_names() {
        assert_eq!(serde_json::to_value(ScoreSource::Fallback).unwrap(), "fallback");
    }
}
