//! Incremental replication (C6).
//!
//! Once the snapshot phase finishes, the source keeps forwarding writes
//! that land on the migrating slots, in the exact order they happened, so
//! the target's staged view converges with the source's live one before
//! the ownership flip. The offset/circular-buffer design mirrors
//! `replication::replication_log::ReplicationLog`, sized independently per
//! migration job instead of per replica.

use super::keyspace_view::{ImportBuffer, StagedValue};
use super::sync_channel::{IncrementalOp, SyncChannel, SyncVerb};
use super::types::{SlotMigrationError, SlotMigrationResult};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Default number of ops buffered on the source before a slow target causes
/// back-pressure.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 10_000;

/// One write or delete observed on the source, queued for replay to the
/// target.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    Write { key: String, value: StagedValue },
    Delete { key: String },
}

impl From<PendingOp> for IncrementalOp {
    fn from(op: PendingOp) -> Self {
        match op {
            PendingOp::Write { key, value } => IncrementalOp::Write { key, value },
            PendingOp::Delete { key } => IncrementalOp::Delete { key },
        }
    }
}

/// Source-side bounded queue of writes waiting to be streamed to the
/// target. Backed by a fixed-capacity ring so a stalled target applies
/// back-pressure (the source stops accepting new writes on the migrating
/// slots, per §5's resource model) instead of growing without bound.
pub struct IncrementalBacklog {
    ops: RwLock<VecDeque<PendingOp>>,
    capacity: usize,
    enqueued: AtomicU64,
}

impl IncrementalBacklog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ops: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            enqueued: AtomicU64::new(0),
        }
    }

    /// Push a new op, failing if the backlog is at capacity. Callers should
    /// treat `Err` as back-pressure: pause accepting further writes to the
    /// migrating slots until the backlog drains.
    pub fn push(&self, op: PendingOp) -> Result<(), PendingOp> {
        let mut ops = self.ops.write();
        if ops.len() >= self.capacity {
            return Err(op);
        }
        ops.push_back(op);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn drain_batch(&self, max_items: usize) -> Vec<PendingOp> {
        let mut ops = self.ops.write();
        let n = max_items.min(ops.len());
        ops.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.read().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ops.read().len() >= self.capacity
    }

    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

/// Drives the source side of incremental replay: drains `backlog` and
/// forwards batches until told to stop.
pub struct IncrementalReplicator<'a> {
    backlog: &'a IncrementalBacklog,
    batch_size: usize,
}

impl<'a> IncrementalReplicator<'a> {
    pub fn new(backlog: &'a IncrementalBacklog) -> Self {
        Self {
            backlog,
            batch_size: 256,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Forward one batch (if any) to `channel`. Returns the number of ops
    /// sent; `0` means the backlog was empty this tick.
    pub async fn forward_once(&self, channel: &mut SyncChannel) -> SlotMigrationResult<usize> {
        let batch = self.backlog.drain_batch(self.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        let n = batch.len();
        let ops: Vec<IncrementalOp> = batch.into_iter().map(Into::into).collect();
        channel.send(&SyncVerb::IncrementalBatch { ops }).await?;
        debug!(n, "incremental: forwarded batch");
        Ok(n)
    }

    /// Keep forwarding until the backlog drains to empty. Used once the
    /// export job is ready to request the pause/takeover handshake.
    pub async fn drain_until_caught_up(
        &self,
        channel: &mut SyncChannel,
    ) -> SlotMigrationResult<u64> {
        let mut total = 0u64;
        loop {
            let sent = self.forward_once(channel).await?;
            total += sent as u64;
            if sent == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        info!(total, "incremental: caught up with backlog");
        Ok(total)
    }
}

/// Target-side application of incoming incremental batches into the
/// staging buffer.
pub struct IncrementalConsumer<'a> {
    buffer: &'a ImportBuffer,
}

impl<'a> IncrementalConsumer<'a> {
    pub fn new(buffer: &'a ImportBuffer) -> Self {
        Self { buffer }
    }

    /// Apply one received batch in order, so later ops for the same key
    /// in the same batch win.
    pub fn apply_batch(&self, ops: Vec<IncrementalOp>) {
        for op in ops {
            match op {
                IncrementalOp::Write { key, value } => self.buffer.stage_write(key, value),
                IncrementalOp::Delete { key } => self.buffer.stage_delete(key),
            }
        }
    }

    /// Receive and apply one frame. Returns `Ok(None)` on `SnapshotEof`
    /// arriving out of band (shouldn't happen post-snapshot, treated as a
    /// protocol warning, not fatal) and `Ok(Some(n))` with the applied op
    /// count otherwise.
    pub async fn receive_once(&self, channel: &mut SyncChannel) -> SlotMigrationResult<Option<usize>> {
        match channel.recv().await? {
            SyncVerb::IncrementalBatch { ops } => {
                let n = ops.len();
                self.apply_batch(ops);
                Ok(Some(n))
            }
            SyncVerb::SnapshotEof => {
                warn!("incremental: duplicate SnapshotEof received, ignoring");
                Ok(None)
            }
            other => Err(SlotMigrationError::Other(format!(
                "unexpected verb during incremental phase: {other:?}"
            ))),
        }
    }
}
