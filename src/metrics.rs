//! Performance metrics and statistics tracking for the decisioning pipeline.

use crate::models::scorer::ScoreSource;
use crate::types::alert::AlertPriority;
use crate::types::decision::DecisionOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Total transactions decided
    pub transactions_processed: AtomicU64,
    /// Total alerts emitted
    pub alerts_generated: AtomicU64,
    /// Alerts lost because the alert queue was full
    pub alerts_dropped: AtomicU64,
    /// Scores substituted after a scorer timeout or failure
    pub scorer_fallbacks: AtomicU64,
    /// Coerced input fields
    pub input_issues: AtomicU64,
    /// Audit entries that could not be queued
    pub audit_failures: AtomicU64,
    /// Accounts evicted for inactivity
    pub accounts_evicted: AtomicU64,
    /// Rings found by the latest detection pass
    pub rings_detected: AtomicU64,
    decisions_by_outcome: RwLock<HashMap<DecisionOutcome, u64>>,
    alerts_by_priority: RwLock<HashMap<AlertPriority, u64>>,
    /// End-to-end decision latency (microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Scorer call latency (microseconds)
    scorer_times: RwLock<Vec<u64>>,
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_processed: AtomicU64::new(0),
            alerts_generated: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            scorer_fallbacks: AtomicU64::new(0),
            input_issues: AtomicU64::new(0),
            audit_failures: AtomicU64::new(0),
            accounts_evicted: AtomicU64::new(0),
            rings_detected: AtomicU64::new(0),
            decisions_by_outcome: RwLock::new(HashMap::new()),
            alerts_by_priority: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            scorer_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a decided transaction
    pub fn record_decision(&self, outcome: DecisionOutcome, processing_time: Duration, risk_score: f64) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_outcome) = self.decisions_by_outcome.write() {
            *by_outcome.entry(outcome).or_insert(0) += 1;
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (risk_score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_alert(&self, priority: AlertPriority) {
        self.alerts_generated.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_priority) = self.alerts_by_priority.write() {
            *by_priority.entry(priority).or_insert(0) += 1;
        }
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scorer_call(&self, source: ScoreSource, duration: Duration) {
        if source == ScoreSource::Fallback {
            self.scorer_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.scorer_times.write() {
            times.push(duration.as_micros() as u64);
            if times.len() > 1000 {
                times.drain(0..500);
            }
        }
    }

    pub fn record_input_issues(&self, count: usize) {
        self.input_issues.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.accounts_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rings(&self, count: usize) {
        self.rings_detected.store(count as u64, Ordering::Relaxed);
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.processing_times
            .read()
            .map(|times| ProcessingStats::from_samples(&times))
            .unwrap_or_default()
    }

    pub fn get_scorer_stats(&self) -> ProcessingStats {
        self.scorer_times
            .read()
            .map(|times| ProcessingStats::from_samples(&times))
            .unwrap_or_default()
    }

    /// Current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn get_decisions_by_outcome(&self) -> HashMap<DecisionOutcome, u64> {
        self.decisions_by_outcome
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_alerts_by_priority(&self) -> HashMap<AlertPriority, u64> {
        self.alerts_by_priority
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let tx_count = self.transactions_processed.load(Ordering::Relaxed);
        let alert_count = self.alerts_generated.load(Ordering::Relaxed);
        let alert_rate = if tx_count > 0 {
            (alert_count as f64 / tx_count as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let scorer = self.get_scorer_stats();
        let throughput = self.get_throughput();
        let by_outcome = self.get_decisions_by_outcome();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          FRAUD DECISION ENGINE - METRICS SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Decided:   {:>8}  │  Throughput: {:>6.1} tx/s ║",
            tx_count, throughput
        );
        info!(
            "║ Alerts Generated:       {:>8}  │  Alert Rate: {:>6.1}%     ║",
            alert_count, alert_rate
        );
        info!(
            "║ Scorer Fallbacks: {:>6}  Input Issues: {:>6}  Audit Drops: {:>4} ║",
            self.scorer_fallbacks.load(Ordering::Relaxed),
            self.input_issues.load(Ordering::Relaxed),
            self.audit_failures.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Decision Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Scorer Time (μs):   mean={:>5} p50={:>5} p99={:>5}            ║",
            scorer.mean_us, scorer.p50_us, scorer.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Decisions:                                                   ║");
        for outcome in [DecisionOutcome::Approve, DecisionOutcome::Review, DecisionOutcome::Decline] {
            let count = by_outcome.get(&outcome).copied().unwrap_or(0);
            let pct = if tx_count > 0 {
                (count as f64 / tx_count as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", outcome.as_str(), count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics over recent samples
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl ProcessingStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_decision(DecisionOutcome::Approve, Duration::from_micros(100), 0.1);
        metrics.record_decision(DecisionOutcome::Decline, Duration::from_micros(300), 0.95);
        metrics.record_decision(DecisionOutcome::Decline, Duration::from_micros(200), 1.0);
        metrics.record_alert(AlertPriority::High);

        assert_eq!(metrics.transactions_processed.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_decisions_by_outcome()[&DecisionOutcome::Decline], 2);
        assert_eq!(metrics.get_alerts_by_priority()[&AlertPriority::High], 1);

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[1], 1);
        assert_eq!(dist[9], 2);
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        for us in [100, 200, 300, 400] {
            metrics.record_decision(DecisionOutcome::Review, Duration::from_micros(us), 0.5);
        }
        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.max_us, 400);
    }

    #[test]
    fn test_fallbacks_counted() {
        let metrics = PipelineMetrics::new();
        metrics.record_scorer_call(ScoreSource::Model, Duration::from_micros(50));
        metrics.record_scorer_call(ScoreSource::Fallback, Duration::from_millis(2000));
        assert_eq!(metrics.scorer_fallbacks.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_scorer_stats().count, 2);
    }
}
