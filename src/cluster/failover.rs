//! Automatic Failover - Detect node failures and promote replicas
//!
//! Implements automatic failover when master nodes fail:
//! - Node failure detection (timeout-based)
//! - Replica promotion to master
//! - Slot reassignment
//! - Cluster state recovery

use super::types::{ClusterError, ClusterNode, ClusterResult, ClusterState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Failover manager
pub struct ClusterFailover {
    /// Node timeout (milliseconds)
    node_timeout: Duration,

    /// Active failovers
    failovers: Arc<RwLock<HashMap<String, FailoverInfo>>>,

    /// Channel for failover commands
    failover_tx: mpsc::UnboundedSender<FailoverCommand>,
}

/// Failover information
#[derive(Debug, Clone)]
struct FailoverInfo {
    /// Failed node ID
    #[allow(dead_code)]
    failed_node_id: String,
    /// Promoting replica ID
    #[allow(dead_code)]
    promoting_replica_id: String,
    /// Started timestamp
    #[allow(dead_code)]
    started_at: u64,
    /// Completed timestamp
    completed_at: Option<u64>,
}

enum FailoverCommand {
    DetectFailure {
        node_id: String,
    },
    PromoteReplica {
        failed_node_id: String,
        replica_id: String,
    },
    CompleteFailover {
        failed_node_id: String,
    },
}

impl ClusterFailover {
    /// Create new failover manager
    pub fn new(node_timeout: Duration) -> Self {
        let (failover_tx, failover_rx) = mpsc::unbounded_channel();

        let failovers = Arc::new(RwLock::new(HashMap::new()));
        let failovers_clone = Arc::clone(&failovers);

        // Spawn failover worker
        tokio::spawn(Self::failover_worker(
            failovers_clone,
            failover_rx,
            node_timeout,
        ));

        Self {
            node_timeout,
            failovers,
            failover_tx,
        }
    }

    /// Detect node failure
    pub fn detect_failure(&self, node_id: &str) -> ClusterResult<()> {
        info!("Detecting failure for node: {}", node_id);

        let _ = self.failover_tx.send(FailoverCommand::DetectFailure {
            node_id: node_id.to_string(),
        });

        Ok(())
    }

    /// Promote replica to master
    pub fn promote_replica(&self, failed_node_id: &str, replica_id: &str) -> ClusterResult<()> {
        info!(
            "Promoting replica {} to replace failed node {}",
            replica_id, failed_node_id
        );

        let mut failovers = self.failovers.write();
        let failover_info = FailoverInfo {
            failed_node_id: failed_node_id.to_string(),
            promoting_replica_id: replica_id.to_string(),
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            completed_at: None,
        };

        failovers.insert(failed_node_id.to_string(), failover_info);

        let _ = self.failover_tx.send(FailoverCommand::PromoteReplica {
            failed_node_id: failed_node_id.to_string(),
            replica_id: replica_id.to_string(),
        });

        Ok(())
    }

    /// Complete failover
    pub fn complete_failover(&self, failed_node_id: &str) -> ClusterResult<()> {
        let mut failovers = self.failovers.write();

        if let Some(failover) = failovers.get_mut(failed_node_id) {
            failover.completed_at = Some(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap()
                    .as_secs(),
            );

            info!("Completed failover for node: {}", failed_node_id);

            let _ = self.failover_tx.send(FailoverCommand::CompleteFailover {
                failed_node_id: failed_node_id.to_string(),
            });

            Ok(())
        } else {
            Err(ClusterError::NodeNotFound(failed_node_id.to_string()))
        }
    }

    /// Check if node is in failover
    pub fn is_failing_over(&self, node_id: &str) -> bool {
        let failovers = self.failovers.read();
        failovers.contains_key(node_id)
    }

    /// Failover worker (background task)
    async fn failover_worker(
        _failovers: Arc<RwLock<HashMap<String, FailoverInfo>>>,
        mut failover_rx: mpsc::UnboundedReceiver<FailoverCommand>,
        _node_timeout: Duration,
    ) {
        while let Some(cmd) = failover_rx.recv().await {
            match cmd {
                FailoverCommand::DetectFailure { node_id } => {
                    warn!("Node failure detected: {}", node_id);
                    // TODO: Implement failure detection logic
                    // 1. Check if node is really down
                    // 2. Find replicas for this node
                    // 3. Initiate failover
                }
                FailoverCommand::PromoteReplica {
                    failed_node_id,
                    replica_id,
                } => {
                    info!(
                        "Promoting replica {} to replace {}",
                        replica_id, failed_node_id
                    );
                    // TODO: Implement replica promotion
                    // 1. Update node state to master
                    // 2. Reassign slots from failed node
                    // 3. Notify cluster of changes
                    // 4. Update cluster topology
                }
                FailoverCommand::CompleteFailover { failed_node_id } => {
                    info!("Completing failover for node: {}", failed_node_id);
                    // Failover already marked as complete
                }
            }
        }
    }

    /// Check nodes for failures (periodic check)
    pub async fn check_nodes(&self, nodes: &HashMap<String, ClusterNode>) -> Vec<String> {
        let mut failed_nodes = Vec::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        for (node_id, node) in nodes {
            // Check if node hasn't pinged recently
            if now.saturating_sub(node.last_ping) > self.node_timeout.as_secs()
                && node.state != ClusterState::Offline
            {
                warn!(
                    "Node {} appears to be down (last ping: {}s ago)",
                    node_id,
                    now - node.last_ping
                );
                failed_nodes.push(node_id.clone());
            }
        }

        failed_nodes
    }
}
