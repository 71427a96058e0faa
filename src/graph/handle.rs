//! Single serializing owner for the shared temporal graph.
//!
//! Partition workers own disjoint sets of accounts, but one transaction can
//! link accounts that live in different partitions. Every graph mutation and
//! query is therefore sent to one task that owns the [`TemporalGraph`].

use crate::error::{PipelineError, PipelineResult};
use crate::graph::rings::Ring;
use crate::graph::snapshot::GraphSnapshot;
use crate::graph::temporal::{GraphFeatures, GraphState, TemporalGraph};
use crate::types::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum GraphCommand {
    Observe {
        transaction: Arc<Transaction>,
        reply: oneshot::Sender<GraphFeatures>,
    },
    Snapshot {
        reply: oneshot::Sender<GraphSnapshot>,
    },
    Annotate {
        rings: Vec<Ring>,
        reply: oneshot::Sender<usize>,
    },
    Export {
        reply: oneshot::Sender<GraphState>,
    },
}

/// Cloneable handle to the graph owner task.
#[derive(Clone)]
pub struct GraphHandle {
    commands: mpsc::Sender<GraphCommand>,
}

impl GraphHandle {
    /// Start the owner task. It stops once every handle is dropped.
    pub fn spawn(graph: TemporalGraph, capacity: usize) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_graph_owner(graph, receiver));
        (Self { commands }, task)
    }

    /// Queue an observation and return the pending reply.
    ///
    /// Callers can do other work (the behavior update) before awaiting it.
    pub async fn observe_request(
        &self,
        transaction: Arc<Transaction>,
    ) -> PipelineResult<oneshot::Receiver<GraphFeatures>> {
        let (reply, receiver) = oneshot::channel();
        self.send(GraphCommand::Observe { transaction, reply }).await?;
        Ok(receiver)
    }

    pub async fn observe(&self, transaction: Arc<Transaction>) -> PipelineResult<GraphFeatures> {
        self.observe_request(transaction)
            .await?
            .await
            .map_err(|_| PipelineError::Shutdown)
    }

    /// Owned snapshot at the graph's current clock.
    pub async fn snapshot(&self) -> PipelineResult<GraphSnapshot> {
        let (reply, receiver) = oneshot::channel();
        self.send(GraphCommand::Snapshot { reply }).await?;
        receiver.await.map_err(|_| PipelineError::Shutdown)
    }

    /// Replace ring annotations; returns the number of annotated nodes.
    pub async fn annotate(&self, rings: Vec<Ring>) -> PipelineResult<usize> {
        let (reply, receiver) = oneshot::channel();
        self.send(GraphCommand::Annotate { rings, reply }).await?;
        receiver.await.map_err(|_| PipelineError::Shutdown)
    }

    pub async fn export(&self) -> PipelineResult<GraphState> {
        let (reply, receiver) = oneshot::channel();
        self.send(GraphCommand::Export { reply }).await?;
        receiver.await.map_err(|_| PipelineError::Shutdown)
    }

    async fn send(&self, command: GraphCommand) -> PipelineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::Shutdown)
    }
}

async fn run_graph_owner(mut graph: TemporalGraph, mut receiver: mpsc::Receiver<GraphCommand>) {
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Graph owner started"
    );

    while let Some(command) = receiver.recv().await {
        match command {
            GraphCommand::Observe { transaction, reply } => {
                let features = graph.observe(&transaction);
                // The requester may have given up; nothing to do then.
                let _ = reply.send(features);
            }
            GraphCommand::Snapshot { reply } => {
                let _ = reply.send(graph.current_snapshot());
            }
            GraphCommand::Annotate { rings, reply } => {
                let annotated = graph.annotate(&rings);
                debug!(rings = rings.len(), annotated, "Applied ring annotations");
                let _ = reply.send(annotated);
            }
            GraphCommand::Export { reply } => {
                let _ = reply.send(graph.export());
            }
        }
    }

    info!("Graph owner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tx(id: &str, account: &str) -> Arc<Transaction> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        Arc::new(Transaction::new(id, account, 10.0, at).with_device("shared"))
    }

    #[tokio::test]
    async fn test_observe_through_owner() {
        let (handle, _task) = GraphHandle::spawn(TemporalGraph::default(), 8);

        handle.observe(tx("t1", "a")).await.unwrap();
        let features = handle.observe(tx("t2", "b")).await.unwrap();
        assert_eq!(features.node_count, 3);
        assert_eq!(features.edge_count, 2);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_annotations_flow_into_features() {
        let (handle, _task) = GraphHandle::spawn(TemporalGraph::default(), 8);
        handle.observe(tx("t1", "a")).await.unwrap();

        let annotated = handle
            .annotate(vec![Ring {
                ring_id: "ring:acct:a".to_string(),
                members: vec!["acct:a".to_string(), "device:shared".to_string()],
                hub: "device:shared".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(annotated, 2);

        let features = handle.observe(tx("t2", "a")).await.unwrap();
        assert_eq!(features.ring.map(|r| r.ring_id), Some("ring:acct:a".to_string()));

        let state = handle.export().await.unwrap();
        assert_eq!(state.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_owner_stops_when_handles_drop() {
        let (handle, task) = GraphHandle::spawn(TemporalGraph::default(), 8);
        drop(handle);
        task.await.unwrap();
    }
}
