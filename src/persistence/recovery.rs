use super::types::{Operation, PersistenceConfig, Result};
use super::{SnapshotManager, WriteAheadLog};
use crate::cluster::keyspace_view::SlotMask;
use crate::cluster::registry::{JobRole, MigrationRegistry};
use crate::cluster::import_job::ImportJob;
use crate::cluster::topology::ClusterTopology;
use crate::core::hash::HashStore;
use crate::core::kv_store::KVStore;
use crate::core::types::KVConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Recover system state from persistence. `cluster` carries this node's
/// topology/slot-mask so the reconstructed store comes back cluster-aware
/// after a restart instead of needing to be rebuilt with it afterward.
pub async fn recover(
    config: &PersistenceConfig,
    kv_config: KVConfig,
    registry: &MigrationRegistry,
    cluster: Option<(Arc<ClusterTopology>, Arc<SlotMask>)>,
) -> Result<(KVStore, HashStore, u64)> {
    let build_store = |cfg: KVConfig| -> KVStore {
        match &cluster {
            Some((topology, slot_mask)) => {
                KVStore::new_with_cluster(cfg, None, Arc::clone(topology), Arc::clone(slot_mask))
            }
            None => KVStore::new(cfg),
        }
    };

    if !config.enabled {
        info!("Persistence disabled, starting with fresh state");
        return Ok((build_store(kv_config), HashStore::new(), 0));
    }

    info!("Starting recovery process...");

    let snapshot_mgr = SnapshotManager::new(config.snapshot.clone());
    let wal = WriteAheadLog::open(config.wal.clone()).await?;

    // Step 1: Load latest snapshot (if exists)
    let (kv_store, hash_store, last_offset) =
        if let Some((snapshot, path)) = snapshot_mgr.load_latest().await? {
            info!(
                "Loaded snapshot from {:?} at offset {}",
                path, snapshot.wal_offset
            );

            let kv = build_store(kv_config);
            for (key, value) in snapshot.kv_data {
                kv.set(&key, value, None).await?;
            }

            let hashes = HashStore::new();
            hashes.restore(snapshot.hash_data);

            (kv, hashes, snapshot.wal_offset)
        } else {
            info!("No snapshot found, starting fresh");
            (build_store(kv_config), HashStore::new(), 0)
        };

    // Step 2: Replay WAL from snapshot offset
    info!("Replaying WAL from offset {}...", last_offset);
    let entries = wal.replay(last_offset).await?;
    let mut replayed = 0;

    for entry in entries {
        match entry.operation {
            Operation::KVSet { key, value, ttl } => {
                kv_store.set(&key, value, ttl).await?;
                replayed += 1;
            }
            Operation::KVDel { keys } => {
                for key in keys {
                    kv_store.delete(&key).await?;
                }
                replayed += 1;
            }
            Operation::HashSet { key, field, value } => {
                hash_store.hset(&key, &field, value)?;
                replayed += 1;
            }
            Operation::HashDel { key, fields } => {
                hash_store.hdel(&key, &fields)?;
                replayed += 1;
            }
            Operation::HashIncrBy {
                key,
                field,
                increment,
            } => {
                hash_store.hincrby(&key, &field, increment)?;
                replayed += 1;
            }
            Operation::HashIncrByFloat {
                key,
                field,
                increment,
            } => {
                hash_store.hincrbyfloat(&key, &field, increment)?;
                replayed += 1;
            }
            Operation::MigrationJobUpserted { role, meta } => {
                match role {
                    JobRole::Import => {
                        // A non-terminal import found mid-WAL is occurring on
                        // what is now this (restarted) primary; it cannot
                        // resume its in-flight snapshot transfer, so it is
                        // reconstructed straight into a state that reports
                        // itself honestly rather than silently vanishing.
                        if let Ok(handle) = registry.register_import(meta) {
                            let _job = ImportJob::reconstruct_on_replica(handle);
                            warn!("reconstructed in-flight import job from WAL, marked occurring-on-primary");
                        }
                    }
                    JobRole::Export => {
                        let _ = registry.register_export(meta);
                    }
                }
                replayed += 1;
            }
            Operation::MigrationJobTerminal {
                role,
                outcome,
                meta,
            } => {
                match role {
                    JobRole::Import => registry.finish_import(&meta.name, outcome, meta.message.clone()),
                    JobRole::Export => registry.finish_export(&meta.name, outcome, meta.message.clone()),
                }
                replayed += 1;
            }
        }
    }

    info!("Recovery complete. Replayed {} operations", replayed);

    let final_offset = last_offset + replayed;

    Ok((kv_store, hash_store, final_offset))
}

/// Test recovery without actually loading data (validation only)
pub async fn validate_recovery(config: &PersistenceConfig) -> Result<RecoveryInfo> {
    let snapshot_mgr = SnapshotManager::new(config.snapshot.clone());
    let wal = WriteAheadLog::open(config.wal.clone()).await?;

    let snapshot_info = if let Some((snapshot, path)) = snapshot_mgr.load_latest().await? {
        Some(SnapshotInfo {
            path,
            offset: snapshot.wal_offset,
            timestamp: snapshot.timestamp,
            kv_count: snapshot.kv_data.len(),
            hash_count: snapshot.hash_data.len(),
        })
    } else {
        None
    };

    let wal_offset = wal.current_offset();
    let wal_entries = if let Some(ref si) = snapshot_info {
        wal.replay(si.offset).await?.len()
    } else {
        wal.replay(0).await?.len()
    };

    Ok(RecoveryInfo {
        snapshot: snapshot_info,
        wal_offset,
        wal_entries_to_replay: wal_entries,
    })
}

/// Information about recovery state
#[derive(Debug)]
pub struct RecoveryInfo {
    pub snapshot: Option<SnapshotInfo>,
    pub wal_offset: u64,
    pub wal_entries_to_replay: usize,
}

/// Information about a snapshot
#[derive(Debug)]
pub struct SnapshotInfo {
    pub path: std::path::PathBuf,
    pub offset: u64,
    pub timestamp: u64,
    pub kv_count: usize,
    pub hash_count: usize,
}
