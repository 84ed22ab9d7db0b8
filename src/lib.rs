pub mod cluster;
pub mod config;
pub mod core;
pub mod persistence;
pub mod replication;
pub mod server;

// Re-export commonly used types
pub use cluster::{ClusterTopology, MigrationRegistry};
pub use config::ServerConfig;
pub use core::{EvictionPolicy, HashStore, KVConfig, KVStore, SynapError};
pub use replication::{
    MasterNode, NodeRole, ReplicaNode, ReplicationConfig, ReplicationLog, ReplicationStats,
};
pub use server::{AppState, create_router};
