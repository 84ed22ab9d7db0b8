use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Total number of hash slots (Redis-compatible)
pub const TOTAL_SLOTS: u16 = 16384;

/// 40-byte opaque identifier of a cluster member, unchanging across the system's lifetime.
pub type NodeId = String;

/// Monotonically nondecreasing configuration epoch. Only monotonic comparison matters.
pub type Epoch = u64;

/// Globally unique identifier for a migration job, chosen by the source at creation.
pub type JobName = String;

/// Cluster node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Node is starting up
    Starting,
    /// Node is joining cluster
    Joining,
    /// Node is part of cluster
    Connected,
    /// Node is failing over
    Failover,
    /// Node is migrating slots
    Migrating,
    /// Node is importing slots
    Importing,
    /// Node is offline
    Offline,
}

/// Cluster node information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node ID (unique identifier)
    pub id: String,
    /// Node address (IP:port)
    pub address: SocketAddr,
    /// Node state
    pub state: ClusterState,
    /// Slots assigned to this node (start, end)
    pub slots: Vec<SlotRange>,
    /// Master node ID (if this is a replica)
    pub master_id: Option<String>,
    /// Replica node IDs
    pub replica_ids: Vec<String>,
    /// Last ping timestamp
    pub last_ping: u64,
    /// Node flags (master, replica, etc.)
    pub flags: NodeFlags,
}

/// Node flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeFlags {
    pub is_master: bool,
    pub is_replica: bool,
    pub is_myself: bool,
    pub is_fail: bool,
    pub is_handshake: bool,
    pub is_noaddr: bool,
}

/// Slot range (inclusive start, inclusive end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end && end < TOTAL_SLOTS);
        Self { start, end }
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }
}

/// Slot assignment (which node owns which slots)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotAssignment {
    /// Node ID that owns the slot
    pub node_id: String,
    /// Slot number
    pub slot: u16,
    /// Migration state (if migrating)
    pub migrating_to: Option<String>,
    /// Import state (if importing)
    pub importing_from: Option<String>,
}

/// Cluster command (for inter-node communication)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterCommand {
    /// Ping - health check
    Ping { node_id: String, timestamp: u64 },
    /// Pong - ping response
    Pong { node_id: String, timestamp: u64 },
    /// Meet - request to join cluster
    Meet {
        node_id: String,
        address: SocketAddr,
    },
    /// Fail - node failure notification
    Fail { node_id: String, timestamp: u64 },
    /// Update slots - notify slot assignment changes
    UpdateSlots {
        node_id: String,
        slots: Vec<SlotRange>,
    },
    /// Migrate slot - request slot migration
    MigrateSlot {
        slot: u16,
        from_node: String,
        to_node: String,
    },
    /// Slot migrated - confirm slot migration complete
    SlotMigrated {
        slot: u16,
        from_node: String,
        to_node: String,
    },
    /// Ask redirect - redirect client to correct node
    AskRedirect { slot: u16, node_id: String },
    /// Moved redirect - permanent redirect
    MovedRedirect { slot: u16, node_id: String },
}

/// Cluster error types
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Slot not assigned: {0}")]
    SlotNotAssigned(u16),
    #[error("Slot migration in progress: {0}")]
    SlotMigrating(u16),
    #[error("Cluster not initialized")]
    ClusterNotInitialized,
    #[error("Node already exists: {0}")]
    NodeExists(String),
    #[error("Invalid slot range: {0}-{1}")]
    InvalidSlotRange(u16, u16),
    #[error("Raft consensus error: {0}")]
    RaftError(String),
    #[error("Migration error: {0}")]
    MigrationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Cluster result type
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Error taxonomy for the atomic slot migration subsystem (C1-C10).
///
/// Every variant's `Display` string is the literal human-readable reason
/// surfaced through `GETSLOTMIGRATIONS`'s `message` field or synchronously
/// rejected at the operator command. These strings are load-bearing: tests
/// and operators both match on them, so they must not be reworded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotMigrationError {
    // --- C1 SlotSet parsing (§4.1) ---
    #[error("syntax error")]
    SyntaxError,
    #[error("Invalid or out of range slot")]
    SlotOutOfRange,
    #[error("No end slot for final slot range")]
    MissingEndSlot,
    #[error("Start slot number {start} is greater than end slot number {end}")]
    InvertedRange { start: u16, end: u16 },
    #[error("Slot ranges in migrations overlap")]
    OverlappingRanges,

    // --- C2 MigrationRegistry (§4.2) ---
    #[error("I am already migrating slot {0}")]
    AlreadyMigratingSlot(u16),
    #[error("Slot is already being imported on the target by a different migration")]
    SlotAlreadyImporting,

    // --- C4 SyncChannel / ESTABLISH validation (§4.4) ---
    #[error("Target node does not agree about current slot ownership")]
    OwnershipMismatch,
    #[error("Slot migration can only be used on primary nodes")]
    NotPrimary,
    #[error("Target node does not know the source node")]
    UnknownSourceNode,
    #[error("should only be used by slot migration clients")]
    NotAMigrationSession,
    #[error("Timed out after too long with no interaction")]
    LivenessTimeout,
    #[error("Connection lost to source")]
    ConnectionLostToSource,
    #[error("Connection lost to target")]
    ConnectionLostToTarget,
    #[error("Failed to AUTH to target node")]
    AuthFailed,
    #[error("Unable to connect to target node: {0}")]
    ConnectFailed(String),

    // --- C7 ImportJob terminal reasons (§4.7) ---
    #[error("Data was flushed")]
    DataFlushed,
    #[error("A failover occurred during slot import")]
    FailoverDuringImport,
    #[error("OOM")]
    Oom,
    #[error("Slots are no longer owned by source node")]
    SourceLostOwnership,

    // --- C8 ExportJob terminal reasons (§4.8) ---
    #[error("Unpaused before migration completed")]
    PauseDeadlineExceeded,
    #[error("I was demoted to a replica")]
    DemotedToReplica,
    #[error("Slots are no longer owned by myself")]
    LostOwnership,

    // --- Operator-level validation, CLUSTER MIGRATESLOTS (§6) ---
    #[error("Requested slots span multiple shards")]
    SpansMultipleShards,
    #[error("Slot {0} has no node served")]
    SlotUnserved(u16),
    #[error("Target node can not be this node")]
    TargetIsSelf,
    #[error("Slots are not served by this node")]
    SlotsNotServedByThisNode,
    #[error("Slots are being manually migrated")]
    ManuallyMigrating,
    #[error("Slots are being manually imported")]
    ManuallyImporting,
    #[error("No migrations ongoing")]
    NoMigrationsOngoing,

    #[error("{0}")]
    Other(String),
}

pub type SlotMigrationResult<T> = Result<T, SlotMigrationError>;
