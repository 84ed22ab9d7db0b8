//! Capability-set traits the migration subsystem depends on.
//!
//! `cluster::` is deliberately decoupled from the concrete storage engine and
//! gossip layer: it only requires whatever implements these four traits.
//! `core::kv_store::KVStore` implements `SnapshotSource` and `WriteApplier`;
//! `cluster::topology::ClusterTopology` (paired with `cluster::discovery`)
//! implements `KeyspaceView` and `GossipPublisher`. Keeping the seam here
//! means `import_job`/`export_job`/`snapshot`/`incremental` can be unit
//! tested against small in-memory fakes instead of a real store.

use super::keyspace_view::StagedValue;
use super::slot_set::SlotSet;
use super::types::{Epoch, NodeId, SlotMigrationResult};

/// One key/value (or key/hash) pair read off the source keyspace for
/// transfer during the snapshot phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotItem {
    pub key: String,
    pub value: StagedValue,
}

/// Read side of the storage engine: enumerate the keys belonging to a set
/// of slots in bounded batches, so the snapshot producer can yield between
/// batches instead of holding a lock across the whole keyspace.
pub trait SnapshotSource: Send + Sync {
    /// Total number of keys currently in `slots`, used for progress
    /// reporting and empty-migration short-circuiting.
    fn slot_key_count(&self, slots: &SlotSet) -> usize;

    /// Produce the next batch of at most `max_items` keys in `slots`
    /// starting at `cursor` (opaque, 0 to begin), advancing `cursor` in
    /// place. An empty return with `cursor` unchanged means exhausted.
    fn next_snapshot_batch(
        &self,
        slots: &SlotSet,
        cursor: &mut u64,
        max_items: usize,
    ) -> Vec<SnapshotItem>;
}

/// Write side of the storage engine: apply writes the job has decided are
/// now safe to make visible (snapshot + incremental commit), and answer
/// whether a given slot set is still owned locally (needed by C7/C8's
/// ownership-loss terminal checks).
pub trait WriteApplier: Send + Sync {
    fn apply_write(&self, key: &str, value: &StagedValue);
    fn apply_delete(&self, key: &str);
    /// True if every slot in `slots` is currently owned by this node.
    fn owns_slots(&self, slots: &SlotSet) -> bool;
    /// Remove every key in `slots` from the local keyspace, once ownership
    /// has moved elsewhere (the export job's final step).
    fn purge_slots(&self, slots: &SlotSet);
}

/// Keyspace masking side, consulted by `core::kv_store` on the read path
/// and by the import job when it marks/clears slots as importing.
pub trait KeyspaceView: Send + Sync {
    fn mark_slots_importing(&self, slots: &SlotSet);
    fn clear_slots_importing(&self, slots: &SlotSet);
    fn is_slot_importing(&self, slot: u16) -> bool;
}

/// Cluster-wide ownership and epoch propagation, backing C9's atomic
/// ownership flip. Implemented on top of whatever consensus-adjacent
/// mechanism the cluster already has (gossip + raft here).
pub trait GossipPublisher: Send + Sync {
    /// Current configuration epoch known to this node.
    fn current_epoch(&self) -> Epoch;

    /// Atomically bump the epoch and announce that `slots` are now owned
    /// by `new_owner`. Fails if another, higher epoch update has already
    /// been seen (lost the takeover race).
    fn publish_ownership(
        &self,
        slots: &SlotSet,
        new_owner: &NodeId,
        new_epoch: Epoch,
    ) -> SlotMigrationResult<()>;
}

#[cfg(test)]
pub(crate) mod test_fakes {
    use super::*;
    use parking_lot::RwLock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Minimal in-memory keyspace used across `cluster::` unit tests so
    /// each component can be exercised without a real `KVStore`.
    #[derive(Default)]
    pub struct FakeKeyspace {
        pub data: RwLock<HashMap<String, StagedValue>>,
        pub owned_slots: RwLock<std::collections::HashSet<u16>>,
        pub importing_slots: RwLock<std::collections::HashSet<u16>>,
        pub epoch: AtomicU64,
    }

    impl FakeKeyspace {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, key: &str, value: StagedValue) {
            self.data.write().insert(key.to_string(), value);
        }

        pub fn own(&self, slots: &SlotSet) {
            self.owned_slots.write().extend(slots.iter_slots());
        }

        pub fn disown(&self, slots: &SlotSet) {
            let mut owned = self.owned_slots.write();
            for s in slots.iter_slots() {
                owned.remove(&s);
            }
        }
    }

    impl SnapshotSource for FakeKeyspace {
        fn slot_key_count(&self, slots: &SlotSet) -> usize {
            let data = self.data.read();
            data.keys()
                .filter(|k| slots.contains_slot(super::super::hash_slot::hash_slot(k)))
                .count()
        }

        fn next_snapshot_batch(
            &self,
            slots: &SlotSet,
            cursor: &mut u64,
            max_items: usize,
        ) -> Vec<SnapshotItem> {
            let data = self.data.read();
            let mut matching: Vec<(&String, &StagedValue)> = data
                .iter()
                .filter(|(k, _)| slots.contains_slot(super::super::hash_slot::hash_slot(k)))
                .collect();
            matching.sort_by_key(|(k, _)| (*k).clone());

            let start = *cursor as usize;
            let batch: Vec<SnapshotItem> = matching
                .into_iter()
                .skip(start)
                .take(max_items)
                .map(|(k, v)| SnapshotItem {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect();
            *cursor += batch.len() as u64;
            batch
        }
    }

    impl WriteApplier for FakeKeyspace {
        fn apply_write(&self, key: &str, value: &StagedValue) {
            self.data.write().insert(key.to_string(), value.clone());
        }

        fn apply_delete(&self, key: &str) {
            self.data.write().remove(key);
        }

        fn owns_slots(&self, slots: &SlotSet) -> bool {
            let owned = self.owned_slots.read();
            slots.iter_slots().all(|s| owned.contains(&s))
        }

        fn purge_slots(&self, slots: &SlotSet) {
            let mut data = self.data.write();
            data.retain(|k, _| !slots.contains_slot(super::super::hash_slot::hash_slot(k)));
        }
    }

    impl KeyspaceView for FakeKeyspace {
        fn mark_slots_importing(&self, slots: &SlotSet) {
            self.importing_slots.write().extend(slots.iter_slots());
        }

        fn clear_slots_importing(&self, slots: &SlotSet) {
            let mut importing = self.importing_slots.write();
            for s in slots.iter_slots() {
                importing.remove(&s);
            }
        }

        fn is_slot_importing(&self, slot: u16) -> bool {
            self.importing_slots.read().contains(&slot)
        }
    }

    impl GossipPublisher for FakeKeyspace {
        fn current_epoch(&self) -> Epoch {
            self.epoch.load(Ordering::SeqCst)
        }

        fn publish_ownership(
            &self,
            slots: &SlotSet,
            _new_owner: &NodeId,
            new_epoch: Epoch,
        ) -> SlotMigrationResult<()> {
            if new_epoch <= self.epoch.load(Ordering::SeqCst) {
                return Err(super::super::types::SlotMigrationError::Other(
                    "stale epoch".to_string(),
                ));
            }
            self.epoch.store(new_epoch, Ordering::SeqCst);
            self.own(slots);
            Ok(())
        }
    }
}
