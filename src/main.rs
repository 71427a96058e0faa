//! Fraud Decision Engine - Main Entry Point
//!
//! Consumes transactions from NATS, decides APPROVE / REVIEW / DECLINE for
//! each, and publishes decisions and fraud alerts.

use anyhow::{Context, Result};
use fraud_decision_engine::{
    audit::AuditLedger,
    checkpoint::CheckpointStore,
    config::AppConfig,
    consumer::{decode_transaction, TransactionConsumer},
    graph::{LabelPropagationDetector, RingDetector},
    logging::init_logging,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{inference::OnnxScorer, scorer::HeuristicScorer, RiskScorer},
    pipeline::PipelineBuilder,
    producer::{AlertProducer, DecisionProducer},
    types::decision::Decision,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.toml".to_string());
    let config = AppConfig::load_from_path(&config_path)?;
    init_logging(&config.logging)?;

    info!("Starting Fraud Decision Engine");
    info!(
        path = %config_path,
        partitions = config.pipeline.partitions,
        high_risk = config.decision.high_risk,
        medium_risk = config.decision.medium_risk,
        graph_signal = ?config.graph.signal,
        "Configuration loaded"
    );

    // Recover state
    let store = CheckpointStore::new(&config.checkpoint.path);
    let checkpoint = if config.checkpoint.enabled {
        match store.load().await {
            Ok(Some(checkpoint)) => Some(checkpoint),
            Ok(None) => {
                info!(path = %store.path().display(), "No checkpoint found, starting empty");
                None
            }
            Err(e) if config.checkpoint.allow_cold_start => {
                warn!(error = %e, "Checkpoint unusable, cold start permitted");
                None
            }
            Err(e) => {
                return Err(e).context("Failed to recover state (set checkpoint.allow_cold_start to override)");
            }
        }
    } else {
        None
    };

    // Select the scorer
    let scorer: Arc<dyn RiskScorer> = match &config.scoring.model_path {
        Some(path) => Arc::new(OnnxScorer::load(path, config.scoring.onnx_threads)?),
        None => Arc::new(HeuristicScorer),
    };
    info!(
        scorer = scorer.name(),
        timeout_ms = config.scoring.timeout_ms,
        "Scorer initialized"
    );

    let (audit, audit_task) = if config.audit.enabled {
        let (ledger, task) = AuditLedger::spawn(&config.audit.path, config.audit.channel_capacity);
        info!(path = %config.audit.path, "Audit ledger enabled");
        (ledger, Some(task))
    } else {
        (AuditLedger::disabled(), None)
    };

    let metrics = Arc::new(PipelineMetrics::new());
    let (pipeline, mut alerts) = PipelineBuilder::new(config.clone())
        .scorer(scorer)
        .audit(audit)
        .metrics(metrics.clone())
        .restore(checkpoint)
        .start();
    let pipeline = Arc::new(pipeline);

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let alert_producer = AlertProducer::new(client.clone(), &config.nats.alert_subject);
    let decision_producer = DecisionProducer::new(client.clone(), &config.nats.decision_subject);
    info!("Publishing decisions to: {}", decision_producer.subject());
    info!("Publishing alerts to: {}", alert_producer.subject());

    let alert_task = tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            match alert_producer.publish(&alert).await {
                Ok(()) => info!(
                    transaction_id = %alert.transaction_id,
                    risk_score = alert.risk_score,
                    priority = ?alert.priority,
                    "Fraud alert published"
                ),
                Err(e) => error!(
                    transaction_id = %alert.transaction_id,
                    error = %e,
                    "Failed to publish fraud alert"
                ),
            }
        }
    });

    // Receivers are queued in arrival order so decisions go out in that order
    let (pending_tx, mut pending_rx) =
        mpsc::channel::<oneshot::Receiver<Decision>>(config.pipeline.channel_capacity);
    let decision_task = tokio::spawn(async move {
        while let Some(receiver) = pending_rx.recv().await {
            let Ok(decision) = receiver.await else {
                continue;
            };
            if let Err(e) = decision_producer.publish(&decision).await {
                error!(
                    transaction_id = %decision.transaction_id,
                    error = %e,
                    "Failed to publish decision"
                );
            }
        }
    });

    let mut tickers = Vec::new();

    if config.checkpoint.enabled {
        let pipeline = pipeline.clone();
        let store = store.clone();
        let period = Duration::from_secs(config.checkpoint.interval_secs.max(1));
        tickers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match pipeline.checkpoint_to(&store).await {
                    Ok(()) => debug!("Checkpoint written"),
                    Err(e) => error!(error = %e, "Checkpoint failed"),
                }
            }
        }));
    }

    if config.rings.enabled {
        let pipeline = pipeline.clone();
        let detector: Arc<dyn RingDetector> = Arc::new(LabelPropagationDetector::from_config(&config.rings));
        let period = Duration::from_secs(config.rings.interval_secs.max(1));
        tickers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = pipeline.detect_rings(detector.clone()).await {
                    error!(error = %e, "Ring detection failed");
                }
            }
        }));
    }

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tickers.push(tokio::spawn(reporter.start()));

    let mut subscription = consumer.subscribe().await?;
    info!(
        "Listening on subject: {} with {} partitions",
        consumer.subject(),
        pipeline.partition_count()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    warn!("Transaction subscription closed");
                    break;
                };
                let parsed = decode_transaction(&message.payload);
                match pipeline.submit(parsed).await {
                    Ok(receiver) => {
                        if pending_tx.send(receiver).await.is_err() {
                            error!("Decision publisher stopped");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Pipeline rejected transaction");
                        break;
                    }
                }
            }
        }
    }

    // Drain in order: intake, periodic tasks, final checkpoint, workers, sinks
    info!("Pipeline shutting down...");
    drop(subscription);
    for ticker in tickers {
        ticker.abort();
        let _ = ticker.await;
    }

    if config.checkpoint.enabled {
        match pipeline.checkpoint_to(&store).await {
            Ok(()) => info!(path = %store.path().display(), "Final checkpoint written"),
            Err(e) => error!(error = %e, "Final checkpoint failed"),
        }
    }

    drop(pending_tx);
    match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => pipeline.shutdown().await,
        Err(_) => warn!("Pipeline still shared at shutdown, skipping drain"),
    }

    if let Err(e) = decision_task.await {
        error!(error = %e, "Decision publisher ended abnormally");
    }
    if let Err(e) = alert_task.await {
        error!(error = %e, "Alert publisher ended abnormally");
    }
    if let Some(task) = audit_task {
        if let Err(e) = task.await {
            error!(error = %e, "Audit writer ended abnormally");
        }
    }
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush NATS client");
    }

    metrics.print_summary();
    Ok(())
}
