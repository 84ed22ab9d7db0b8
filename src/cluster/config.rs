use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Enable cluster mode
    pub enabled: bool,

    /// This node's ID (auto-generated if not set)
    pub node_id: Option<String>,

    /// This node's address
    pub node_address: SocketAddr,

    /// Cluster seed nodes (for discovery)
    pub seed_nodes: Vec<SocketAddr>,

    /// Cluster communication port
    pub cluster_port: u16,

    /// Port the `SYNCSLOTS` listener binds, separate from the gossip/cluster
    /// bus port so a migration session never competes with gossip traffic.
    pub sync_channel_port: u16,

    /// Node timeout (milliseconds)
    pub node_timeout_ms: u64,

    /// Cluster require full coverage
    /// If true, cluster will not accept writes if < 16384 slots are covered
    pub require_full_coverage: bool,

    /// Migration batch size (keys per batch)
    pub migration_batch_size: usize,

    /// Migration timeout (seconds)
    pub migration_timeout_secs: u64,

    /// Raft election timeout (milliseconds)
    pub raft_election_timeout_ms: u64,

    /// Raft heartbeat interval (milliseconds)
    pub raft_heartbeat_interval_ms: u64,

    /// Bounded terminal-job log capacity per role (`cluster-slot-migration-log-max-len`).
    /// Zero empties the log at the next maintenance tick.
    pub slot_migration_log_max_len: usize,

    /// Liveness threshold for the sync channel, in seconds (`repl-timeout`).
    pub repl_timeout_secs: u64,

    /// Export-side client output-buffer limit in bytes, for replica-class
    /// connections (`client-output-buffer-limit replica ...`).
    pub client_output_buffer_limit_bytes: u64,

    /// Deadline for the cluster-wide write pause during ownership takeover
    /// (`cluster-manual-failover-timeout`).
    pub manual_failover_timeout_ms: u64,

    /// Target keyspace memory ceiling; excludes staged sync-channel bytes.
    pub maxmemory_bytes: u64,

    /// Eviction policy name, forwarded as-is to the storage engine.
    pub maxmemory_policy: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            node_address: "127.0.0.1:15502".parse().unwrap(),
            seed_nodes: Vec::new(),
            cluster_port: 15502,
            sync_channel_port: 15503,
            node_timeout_ms: 5000,
            require_full_coverage: true,
            migration_batch_size: 100,
            migration_timeout_secs: 60,
            raft_election_timeout_ms: 1000,
            raft_heartbeat_interval_ms: 100,
            slot_migration_log_max_len: 25,
            repl_timeout_secs: 60,
            client_output_buffer_limit_bytes: 256 * 1024 * 1024,
            manual_failover_timeout_ms: 5000,
            maxmemory_bytes: 0,
            maxmemory_policy: "noeviction".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Create cluster config from environment/config file
    pub fn from_env() -> Self {
        // TODO: Load from environment variables or config file
        Self::default()
    }

    /// Get node timeout as Duration
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Get migration timeout as Duration
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }

    /// Get raft election timeout as Duration
    pub fn raft_election_timeout(&self) -> Duration {
        Duration::from_millis(self.raft_election_timeout_ms)
    }

    /// Get raft heartbeat interval as Duration
    pub fn raft_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.raft_heartbeat_interval_ms)
    }

    /// Get sync channel liveness threshold as Duration
    pub fn repl_timeout(&self) -> Duration {
        Duration::from_secs(self.repl_timeout_secs)
    }

    /// Get the manual failover (write-pause) deadline as Duration
    pub fn manual_failover_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_failover_timeout_ms)
    }
}
