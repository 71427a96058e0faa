//! Append-only, hash-stamped decision ledger.
//!
//! Each line of the ledger file is one [`AuditEntry`]. Entries are handed to
//! a writer task through a bounded queue; when the queue is full the entry
//! is dropped and reported, so auditing never slows decisioning down.

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the key-sorted JSON payload
    pub hash: String,
    pub payload: Value,
}

impl AuditEntry {
    pub fn new(payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            hash: payload_hash(&payload),
            payload,
        }
    }
}

/// Hex SHA-256 over the canonical JSON form of `payload`.
///
/// Object keys are emitted in sorted order, so two payloads with the same
/// content hash identically whatever order they were built in.
pub fn payload_hash(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether an entry's hash still matches its payload.
pub fn verify_entry(entry: &AuditEntry) -> bool {
    payload_hash(&entry.payload) == entry.hash
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Handle used by the pipeline to submit audit payloads.
#[derive(Clone)]
pub struct AuditLedger {
    sender: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditLedger {
    /// Start a writer appending to `path`, creating parent directories.
    pub fn spawn<P: AsRef<Path>>(path: P, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let path = path.as_ref().to_path_buf();
        let task = tokio::spawn(run_writer(path, receiver));
        (
            Self {
                sender: Some(sender),
            },
            task,
        )
    }

    /// A ledger that accepts and discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Stamp and enqueue a payload without waiting.
    pub fn record(&self, payload: Value) -> PipelineResult<()> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        sender
            .try_send(AuditEntry::new(payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    PipelineError::AuditSink("audit queue full, entry dropped".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    PipelineError::AuditSink("audit writer stopped".to_string())
                }
            })
    }
}

async fn run_writer(path: PathBuf, mut receiver: mpsc::Receiver<AuditEntry>) {
    let file = match open_ledger(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Audit ledger unavailable, entries will be discarded");
            while receiver.recv().await.is_some() {}
            return;
        }
    };
    info!(path = %path.display(), "Audit ledger opened");

    let mut writer = BufWriter::new(file);
    let mut written: u64 = 0;

    while let Some(entry) = receiver.recv().await {
        if let Err(e) = write_entry(&mut writer, &entry).await {
            warn!(error = %e, hash = %entry.hash, "Failed to write audit entry");
            continue;
        }
        written += 1;

        // Flush once the queue is drained rather than per entry.
        if receiver.is_empty() {
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "Failed to flush audit ledger");
            }
        }
    }

    if let Err(e) = writer.flush().await {
        warn!(error = %e, "Failed to flush audit ledger on shutdown");
    }
    info!(entries = written, "Audit writer stopped");
}

async fn open_ledger(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_entry(
    writer: &mut BufWriter<tokio::fs::File>,
    entry: &AuditEntry,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    writer.write_all(&line).await
}

/// Read every entry of a ledger file.
pub async fn read_ledger<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<AuditEntry>> {
    let content = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| PipelineError::AuditSink(e.to_string()))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| PipelineError::AuditSink(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a = json!({"decision": "APPROVE", "score": 0.1, "nested": {"x": 1, "y": 2}});
        let b: Value =
            serde_json::from_str(r#"{"nested":{"y":2,"x":1},"score":0.1,"decision":"APPROVE"}"#)
                .unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
        assert_eq!(payload_hash(&a).len(), 64);
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut entry = AuditEntry::new(json!({"decision": "DECLINE", "risk_score": 0.91}));
        assert!(verify_entry(&entry));

        entry.payload["decision"] = json!("APPROVE");
        assert!(!verify_entry(&entry));
    }

    #[test]
    fn test_disabled_ledger_accepts_everything() {
        let ledger = AuditLedger::disabled();
        assert!(!ledger.is_enabled());
        assert!(ledger.record(json!({"a": 1})).is_ok());
    }

    #[tokio::test]
    async fn test_writer_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.jsonl");

        let (ledger, task) = AuditLedger::spawn(&path, 16);
        ledger.record(json!({"transaction_id": "t1"})).unwrap();
        ledger.record(json!({"transaction_id": "t2"})).unwrap();
        drop(ledger);
        task.await.unwrap();

        let entries = read_ledger(&path).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].payload["transaction_id"], "t2");
        assert!(entries.iter().all(verify_entry));
    }

    #[tokio::test]
    async fn test_full_queue_reports_audit_failure() {
        let (sender, _receiver) = mpsc::channel(1);
        let ledger = AuditLedger {
            sender: Some(sender),
        };
        ledger.record(json!({"n": 1})).unwrap();
        let err = ledger.record(json!({"n": 2})).unwrap_err();
        assert!(matches!(err, PipelineError::AuditSink(_)));
        assert!(!err.is_fatal());
    }
}
