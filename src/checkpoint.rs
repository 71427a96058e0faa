//! Durable snapshots of tracker and graph state.
//!
//! A checkpoint is written to a temporary file and renamed into place, and
//! the previous checkpoint is kept next to it as `<file>.prev`. Loading
//! verifies the checksum and falls back to the previous file when the
//! current one is unusable.

use crate::audit::payload_hash;
use crate::behavior::AccountRecord;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::GraphState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Accounts owned by one partition at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    pub partition: usize,
    pub accounts: Vec<AccountRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBody {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub partitions: Vec<PartitionState>,
    pub graph: GraphState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(flatten)]
    pub body: CheckpointBody,
    /// Hex SHA-256 over the body
    pub checksum: String,
}

impl Checkpoint {
    pub fn new(partitions: Vec<PartitionState>, graph: GraphState) -> PipelineResult<Self> {
        let body = CheckpointBody {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            partitions,
            graph,
        };
        let checksum = body_checksum(&body)?;
        Ok(Self { body, checksum })
    }

    pub fn verify(&self) -> PipelineResult<()> {
        if self.body.version != CHECKPOINT_VERSION {
            return Err(PipelineError::StateRecovery(format!(
                "unsupported checkpoint version {}",
                self.body.version
            )));
        }
        let expected = body_checksum(&self.body)?;
        if expected != self.checksum {
            return Err(PipelineError::StateRecovery("checksum mismatch".to_string()));
        }
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.body.partitions.iter().map(|p| p.accounts.len()).sum()
    }

    /// All account records regardless of the partition that captured them.
    pub fn into_accounts(self) -> (Vec<AccountRecord>, GraphState) {
        let accounts = self
            .body
            .partitions
            .into_iter()
            .flat_map(|p| p.accounts)
            .collect();
        (accounts, self.body.graph)
    }
}

fn body_checksum(body: &CheckpointBody) -> PipelineResult<String> {
    let value = serde_json::to_value(body)
        .map_err(|e| PipelineError::StateRecovery(format!("cannot encode checkpoint: {e}")))?;
    Ok(payload_hash(&value))
}

/// Filesystem location of the current and previous checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn previous_path(&self) -> PathBuf {
        with_suffix(&self.path, "prev")
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, "tmp")
    }

    /// Atomically replace the current checkpoint, keeping the old one.
    pub async fn save(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        let io_err = |e: std::io::Error| PipelineError::StateRecovery(format!("checkpoint write failed: {e}"));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| PipelineError::StateRecovery(format!("cannot encode checkpoint: {e}")))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await.map_err(io_err)?;

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::rename(&self.path, self.previous_path())
                .await
                .map_err(io_err)?;
        }
        tokio::fs::rename(&temp, &self.path).await.map_err(io_err)?;

        info!(
            path = %self.path.display(),
            accounts = checkpoint.account_count(),
            edges = checkpoint.body.graph.edges.len(),
            bytes = bytes.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load the newest usable checkpoint.
    ///
    /// `Ok(None)` means no checkpoint has ever been written. A checkpoint
    /// that exists but cannot be used, with no usable previous one, is a
    /// [`PipelineError::StateRecovery`].
    pub async fn load(&self) -> PipelineResult<Option<Checkpoint>> {
        let previous = self.previous_path();
        let current_exists = tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        let previous_exists = tokio::fs::try_exists(&previous).await.unwrap_or(false);

        if !current_exists && !previous_exists {
            return Ok(None);
        }

        let current_err = if current_exists {
            match read_checkpoint(&self.path).await {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Current checkpoint unusable");
                    e
                }
            }
        } else {
            PipelineError::StateRecovery("current checkpoint missing".to_string())
        };

        if previous_exists {
            match read_checkpoint(&previous).await {
                Ok(checkpoint) => {
                    warn!(path = %previous.display(), "Recovered from previous checkpoint");
                    return Ok(Some(checkpoint));
                }
                Err(e) => {
                    warn!(path = %previous.display(), error = %e, "Previous checkpoint unusable");
                }
            }
        }

        Err(current_err)
    }
}

async fn read_checkpoint(path: &Path) -> PipelineResult<Checkpoint> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::StateRecovery(format!("cannot read {}: {e}", path.display())))?;
    let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::StateRecovery(format!("cannot parse {}: {e}", path.display())))?;
    checkpoint.verify()?;
    Ok(checkpoint)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
