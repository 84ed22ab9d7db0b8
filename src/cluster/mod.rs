//! Cluster Mode - Distributed sharding with hash slots
//!
//! Implements Redis-style cluster mode with:
//! - Hash slot algorithm (CRC16 mod 16384)
//! - Cluster topology management
//! - Slot migration with zero downtime
//! - Raft consensus for coordination
//! - Automatic failover

pub mod capabilities;
pub mod config;
pub mod discovery;
pub mod export_job;
pub mod failover;
pub mod failure_handler;
pub mod hash_slot;
pub mod import_job;
pub mod incremental;
pub mod keyspace_view;
pub mod migration_driver;
pub mod ownership_transfer;
pub mod raft;
pub mod registry;
pub mod slot_set;
pub mod snapshot;
pub mod sync_channel;
pub mod topology;
pub mod types;

pub use config::ClusterConfig;
pub use discovery::{ClusterDiscovery, start_discovery_server};
pub use export_job::{ExportJob, ExportState};
pub use failover::ClusterFailover;
pub use failure_handler::{FailureEvent, FailureHandler};
pub use hash_slot::{HashSlot, hash_slot};
pub use import_job::{ImportJob, ImportState};
pub use migration_driver::{MigrationContext, run_import_listener, spawn_export_driver};
pub use raft::RaftNode;
pub use registry::{JobMeta, JobOutcome, JobRole, MigrationRegistry};
pub use slot_set::SlotSet;
pub use topology::{ClusterTopology, NodeInfo};
pub use types::{
    ClusterCommand, ClusterError, ClusterNode, ClusterResult, ClusterState, Epoch, JobName,
    NodeId, SlotAssignment, SlotMigrationError, SlotMigrationResult, SlotRange,
};
