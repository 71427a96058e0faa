//! Test Transaction Producer
//!
//! Generates and publishes test transactions to NATS for pipeline testing.
//! Mixes ordinary customers, suspicious bursts and a small mule ring that
//! shares one device and pays into a single collector account.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Transaction event in the shape the decision engine consumes
#[derive(Debug, Clone, Serialize)]
struct Transaction {
    id: String,
    account_id: String,
    counterparty_id: Option<String>,
    device_id: Option<String>,
    ip_address: Option<String>,
    merchant_id: Option<String>,
    amount: f64,
    currency: String,
    channel: String,
    location: Option<String>,
    timestamp: DateTime<Utc>,
}

const RING_SIZE: usize = 6;
const RING_DEVICE: &str = "dev_shared_ring";
const RING_IP: &str = "185.220.101.7";
const RING_COLLECTOR: &str = "acct_collector";

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    fn random_ip(&mut self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.rng.gen_range(1..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(1..255)
        )
    }

    /// Ordinary customer: modest amount, home city, own device
    fn generate_legitimate(&mut self) -> Transaction {
        let customer = self.rng.gen_range(1..500);
        Transaction {
            id: self.next_id(),
            account_id: format!("acct_{customer:05}"),
            counterparty_id: None,
            device_id: Some(format!("dev_{customer:05}")),
            ip_address: Some(self.random_ip()),
            merchant_id: Some(format!("merchant_{}", self.rng.gen_range(1..1000))),
            amount: (self.rng.gen_range(10.0..300.0_f64) * 100.0).round() / 100.0,
            currency: self.random_choice(&["USD", "EUR", "GBP", "CAD"]).to_string(),
            channel: self.random_choice(&["pos", "online", "mobile"]).to_string(),
            location: Some(["NYC", "LDN", "TOR", "BER"][customer % 4].to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Large amount at night from a location the account does not use
    fn generate_suspicious(&mut self) -> Transaction {
        let customer = self.rng.gen_range(1..500);
        let now = Utc::now();
        let night = now
            .with_hour(self.rng.gen_range(0..6))
            .unwrap_or(now);
        Transaction {
            id: self.next_id(),
            account_id: format!("acct_{customer:05}"),
            counterparty_id: None,
            device_id: Some(format!("dev_{:016x}", self.rng.gen::<u64>())),
            ip_address: Some(self.random_ip()),
            merchant_id: Some(format!("merchant_{}", self.rng.gen_range(1..50))),
            amount: (self.rng.gen_range(1500.0..10000.0_f64) * 100.0).round() / 100.0,
            currency: "USD".to_string(),
            channel: "online".to_string(),
            location: Some(self.random_choice(&["LAG", "MOW", "PEK", "CCS"]).to_string()),
            timestamp: night,
        }
    }

    /// Mule transfer: shared device and IP, money moves to the collector
    fn generate_ring(&mut self) -> Transaction {
        let mule = self.rng.gen_range(0..RING_SIZE);
        Transaction {
            id: self.next_id(),
            account_id: format!("acct_mule_{mule}"),
            counterparty_id: Some(RING_COLLECTOR.to_string()),
            device_id: Some(RING_DEVICE.to_string()),
            ip_address: Some(RING_IP.to_string()),
            merchant_id: None,
            amount: (self.rng.gen_range(400.0..950.0_f64) * 100.0).round() / 100.0,
            currency: "USD".to_string(),
            channel: "p2p".to_string(),
            location: Some("AMS".to_string()),
            timestamp: Utc::now() - ChronoDuration::seconds(self.rng.gen_range(0..60)),
        }
    }

    fn generate(&mut self, fraud_rate: f64) -> (Transaction, Kind) {
        if self.rng.gen_bool(fraud_rate) {
            if self.rng.gen_bool(0.5) {
                (self.generate_ring(), Kind::Ring)
            } else {
                (self.generate_suspicious(), Kind::Suspicious)
            }
        } else {
            (self.generate_legitimate(), Kind::Legitimate)
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Legitimate,
    Suspicious,
    Ring,
}

#[derive(Debug, Default)]
struct Tally {
    legitimate: u64,
    suspicious: u64,
    ring: u64,
}

impl Tally {
    fn add(&mut self, kind: Kind) {
        match kind {
            Kind::Legitimate => self.legitimate += 1,
            Kind::Suspicious => self.suspicious += 1,
            Kind::Ring => self.ring += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = TransactionGenerator::new();
    let mut tally = Tally::default();

    info!("Starting to publish {} transactions...", count);

    for i in 0..count {
        let (transaction, kind) = generator.generate(fraud_rate);
        tally.add(kind);

        let payload = serde_json::to_vec(&transaction)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} transactions ({} legitimate, {} suspicious, {} ring)",
                i + 1,
                count,
                tally.legitimate,
                tally.suspicious,
                tally.ring
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(
        "Completed! Published {} transactions ({} legitimate, {} suspicious, {} ring)",
        count, tally.legitimate, tally.suspicious, tally.ring
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();

    for i in 0..count {
        let (transaction, kind) = generator.generate(fraud_rate);
        let json = serde_json::to_string_pretty(&transaction)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample {:?} transaction {}:\n{}", kind, i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
