//! Importing-key containment (C3).
//!
//! While an import job is running, keys it has received are staged in an
//! `ImportBuffer` invisible to ordinary client-facing reads: `DBSIZE`,
//! `KEYS`, `SCAN`, `RANDOMKEY`, active expiration and eviction must all
//! behave as if the importing slots still hold whatever the keyspace had
//! before the migration started. `SlotMask` is the shared, cheap-to-check
//! flag `KVStore`/`HashStore` consult on every such operation; `ImportBuffer`
//! is the actual staged data, committed into the real keyspace atomically
//! once the import job reaches `success`.

use super::hash_slot::hash_slot;
use super::slot_set::SlotSet;
use super::types::TOTAL_SLOTS;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A value staged by an in-flight import, not yet visible to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedValue {
    String {
        value: String,
        expires_at: Option<u64>,
    },
    Hash {
        fields: HashMap<String, String>,
        expires_at: Option<u64>,
    },
}

/// A staged mutation: either a write or a tombstone recording that the key
/// was deleted on the source after the snapshot was taken.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedEntry {
    Write(StagedValue),
    Delete,
}

/// Per-job staging area for keys belonging to slots currently being
/// imported. Keys land here via snapshot transfer and incremental replay;
/// none of it is visible through the normal keyspace API until the job
/// commits.
#[derive(Default)]
pub struct ImportBuffer {
    entries: RwLock<HashMap<String, StagedEntry>>,
}

impl ImportBuffer {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn stage_write(&self, key: String, value: StagedValue) {
        self.entries.write().insert(key, StagedEntry::Write(value));
    }

    pub fn stage_delete(&self, key: String) {
        self.entries.write().insert(key, StagedEntry::Delete);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<StagedEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drain all staged entries for commit into the real keyspace. Leaves
    /// the buffer empty.
    pub fn drain_into_vec(&self) -> Vec<(String, StagedEntry)> {
        self.entries.write().drain().collect()
    }

    /// Discard every staged entry without committing (job failed/cancelled).
    pub fn discard(&self) {
        self.entries.write().clear();
    }
}

/// Tracks, per slot, whether an import is currently in flight for it.
///
/// This is consulted on the hot path of `DBSIZE`/`KEYS`/`SCAN`/`RANDOMKEY`
/// and the active-expiration/eviction sweeps, so it is a flat bit vector
/// rather than a hash set.
pub struct SlotMask {
    importing: RwLock<Vec<bool>>,
}

impl Default for SlotMask {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotMask {
    pub fn new() -> Self {
        Self {
            importing: RwLock::new(vec![false; TOTAL_SLOTS as usize]),
        }
    }

    pub fn mark_importing(&self, slots: &SlotSet) {
        let mut mask = self.importing.write();
        for slot in slots.iter_slots() {
            mask[slot as usize] = true;
        }
    }

    pub fn clear_importing(&self, slots: &SlotSet) {
        let mut mask = self.importing.write();
        for slot in slots.iter_slots() {
            mask[slot as usize] = false;
        }
    }

    pub fn is_slot_importing(&self, slot: u16) -> bool {
        self.importing.read()[slot as usize]
    }

    pub fn is_key_importing(&self, key: &str) -> bool {
        self.is_slot_importing(hash_slot(key))
    }

    pub fn any_importing(&self) -> bool {
        self.importing.read().iter().any(|&b| b)
    }
}
