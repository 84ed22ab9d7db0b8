//! Target-side migration state machine (C7).

use super::capabilities::{KeyspaceView, WriteApplier};
use super::keyspace_view::{ImportBuffer, StagedEntry};
use super::registry::JobMetaHandle;
use super::types::{Epoch, SlotMigrationError, SlotMigrationResult};
use parking_lot::RwLock;
use tracing::{info, warn};

/// States of `ImportJob`, in the order a successful migration passes
/// through them. `OccurringOnPrimary` is reachable only via
/// [`ImportJob::reconstruct_on_replica`]. A primary actually driving the
/// import never enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    WaitingForEstablish,
    ReceivingSnapshot,
    WaitingForPaused,
    ReceivingIncremental,
    /// Informational, replica-only: a non-terminal import replayed from the
    /// primary's AOF. The replica observes this job but does not drive it.
    OccurringOnPrimary,
    Success,
    Failed,
    Cancelled,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// The textual form used by `GETSLOTMIGRATIONS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForEstablish => "waiting-for-establish",
            Self::ReceivingSnapshot => "receiving-snapshot",
            Self::WaitingForPaused => "waiting-for-paused",
            Self::ReceivingIncremental => "receiving-incremental",
            Self::OccurringOnPrimary => "occurring-on-primary",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The target side of one migration.
pub struct ImportJob {
    pub meta: JobMetaHandle,
    state: RwLock<ImportState>,
    pub buffer: ImportBuffer,
}

impl ImportJob {
    pub fn new(meta: JobMetaHandle) -> Self {
        Self {
            meta,
            state: RwLock::new(ImportState::WaitingForEstablish),
            buffer: ImportBuffer::new(),
        }
    }

    /// Rebuild a non-terminal import after loading the AOF on a replica:
    /// observable, but this node is not driving it (§6 Persistence).
    pub fn reconstruct_on_replica(meta: JobMetaHandle) -> Self {
        Self {
            meta,
            state: RwLock::new(ImportState::OccurringOnPrimary),
            buffer: ImportBuffer::new(),
        }
    }

    pub fn state(&self) -> ImportState {
        *self.state.read()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn set_state(&self, new: ImportState) {
        let mut state = self.state.write();
        info!(job = %self.meta.read().name, from = ?*state, to = ?new, "import job transition");
        *state = new;
        drop(state);
        self.meta.write().touch_state_change();
    }

    fn require(&self, expected: ImportState) -> SlotMigrationResult<()> {
        if self.state() != expected {
            return Err(SlotMigrationError::Other(format!(
                "invalid import transition from {:?}, expected {:?}",
                self.state(),
                expected
            )));
        }
        Ok(())
    }

    pub fn on_establish_accepted(&self) -> SlotMigrationResult<()> {
        self.require(ImportState::WaitingForEstablish)?;
        self.set_state(ImportState::ReceivingSnapshot);
        Ok(())
    }

    pub fn on_snapshot_eof(&self) -> SlotMigrationResult<()> {
        self.require(ImportState::ReceivingSnapshot)?;
        self.meta.write().snapshot_done = true;
        self.set_state(ImportState::ReceivingIncremental);
        Ok(())
    }

    /// Source has issued `REQUEST-PAUSE`; drain whatever incremental bytes
    /// were already in flight under the pre-pause commit order before
    /// replying `PAUSED`.
    pub fn on_request_pause(&self) -> SlotMigrationResult<()> {
        self.require(ImportState::ReceivingIncremental)?;
        self.set_state(ImportState::WaitingForPaused);
        Ok(())
    }

    /// Drain complete; the job returns to `receiving-incremental` to await
    /// `FAILOVER-GRANTED`, per §4.7's literal transition description.
    pub fn on_drained(&self) -> SlotMigrationResult<()> {
        self.require(ImportState::WaitingForPaused)?;
        self.set_state(ImportState::ReceivingIncremental);
        Ok(())
    }

    /// Attempt the final commit once this node's own epoch for the
    /// migrated slots has caught up to `new_epoch`. Returns `Ok(false)`
    /// (no-op) if the epoch hasn't arrived yet; commits and transitions to
    /// `success` otherwise.
    pub fn try_commit_on_epoch<W, K>(
        &self,
        applier: &W,
        view: &K,
        observed_epoch: Epoch,
        new_epoch: Epoch,
    ) -> SlotMigrationResult<bool>
    where
        W: WriteApplier,
        K: KeyspaceView,
    {
        self.require(ImportState::ReceivingIncremental)?;
        if observed_epoch < new_epoch {
            return Ok(false);
        }

        for (key, entry) in self.buffer.drain_into_vec() {
            match entry {
                StagedEntry::Write(value) => applier.apply_write(&key, &value),
                StagedEntry::Delete => applier.apply_delete(&key),
            }
        }
        let slots = self.meta.read().slots.clone();
        view.clear_slots_importing(&slots);

        self.set_state(ImportState::Success);
        Ok(true)
    }

    fn fail(&self, reason: SlotMigrationError) {
        warn!(job = %self.meta.read().name, reason = %reason, "import job failed");
        self.meta.write().message = reason.to_string();
        self.buffer.discard();
        self.set_state(ImportState::Failed);
    }

    pub fn fail_flushed(&self) {
        self.fail(SlotMigrationError::DataFlushed);
    }

    pub fn fail_failover_during_import(&self) {
        self.fail(SlotMigrationError::FailoverDuringImport);
    }

    pub fn fail_oom(&self) {
        self.fail(SlotMigrationError::Oom);
    }

    pub fn fail_source_lost_ownership(&self) {
        self.fail(SlotMigrationError::SourceLostOwnership);
    }

    pub fn fail_connection_lost(&self) {
        self.fail(SlotMigrationError::ConnectionLostToSource);
    }

    /// This node noticed the silence itself (as opposed to the peer
    /// closing the connection, which is `fail_connection_lost`).
    pub fn fail_timeout(&self) {
        self.fail(SlotMigrationError::LivenessTimeout);
    }

    /// Terminal states are append-only; cancelling after success/failure is
    /// a documented no-op (RT2).
    pub fn cancel(&self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        self.meta.write().message = reason.to_string();
        self.buffer.discard();
        self.set_state(ImportState::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::capabilities::test_fakes::FakeKeyspace;
    use crate::cluster::keyspace_view::StagedValue;
    use crate::cluster::registry::JobMeta;
    use crate::cluster::slot_set::SlotSet;
    use std::sync::Arc;

    fn new_job() -> ImportJob {
        let slots = SlotSet::parse(&["16383", "16383"]).unwrap();
        let meta = JobMeta::new(
            "job-1".to_string(),
            slots,
            "source".to_string(),
            "target".to_string(),
            0,
        );
        ImportJob::new(Arc::new(RwLock::new(meta)))
    }

    #[test]
    fn test_happy_path_to_success() {
        let job = new_job();
        job.on_establish_accepted().unwrap();
        assert_eq!(job.state(), ImportState::ReceivingSnapshot);
        job.on_snapshot_eof().unwrap();
        assert_eq!(job.state(), ImportState::ReceivingIncremental);

        job.buffer.stage_write(
            "{6ZJ}:a".to_string(),
            StagedValue::String {
                value: "1".to_string(),
                expires_at: None,
            },
        );

        job.on_request_pause().unwrap();
        assert_eq!(job.state(), ImportState::WaitingForPaused);
        job.on_drained().unwrap();
        assert_eq!(job.state(), ImportState::ReceivingIncremental);

        let keyspace = FakeKeyspace::new();
        let committed = job
            .try_commit_on_epoch(&keyspace, &keyspace, 5, 5)
            .unwrap();
        assert!(committed);
        assert_eq!(job.state(), ImportState::Success);
        assert!(keyspace.data.read().contains_key("{6ZJ}:a"));
    }

    #[test]
    fn test_commit_waits_for_epoch() {
        let job = new_job();
        job.on_establish_accepted().unwrap();
        job.on_snapshot_eof().unwrap();

        let keyspace = FakeKeyspace::new();
        let committed = job
            .try_commit_on_epoch(&keyspace, &keyspace, 4, 5)
            .unwrap();
        assert!(!committed);
        assert_eq!(job.state(), ImportState::ReceivingIncremental);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let job = new_job();
        let err = job.on_snapshot_eof().unwrap_err();
        assert!(matches!(err, SlotMigrationError::Other(_)));
    }

    #[test]
    fn test_fail_flushed_sets_message_and_discards_buffer() {
        let job = new_job();
        job.on_establish_accepted().unwrap();
        job.buffer.stage_write(
            "k".to_string(),
            StagedValue::String {
                value: "v".to_string(),
                expires_at: None,
            },
        );
        job.fail_flushed();
        assert_eq!(job.state(), ImportState::Failed);
        assert_eq!(job.meta.read().message, "Data was flushed");
        assert!(job.buffer.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent_after_terminal() {
        let job = new_job();
        job.fail_oom();
        job.cancel("should be a no-op");
        assert_eq!(job.state(), ImportState::Failed);
        assert_eq!(job.meta.read().message, "OOM");
    }

    #[test]
    fn test_reconstruct_on_replica_is_occurring_on_primary() {
        let slots = SlotSet::parse(&["1", "2"]).unwrap();
        let meta = JobMeta::new(
            "job-r".to_string(),
            slots,
            "source".to_string(),
            "target".to_string(),
            0,
        );
        let job = ImportJob::reconstruct_on_replica(Arc::new(RwLock::new(meta)));
        assert_eq!(job.state(), ImportState::OccurringOnPrimary);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_state_as_str_matches_wire_wording() {
        assert_eq!(ImportState::WaitingForEstablish.as_str(), "waiting-for-establish");
        assert_eq!(ImportState::ReceivingSnapshot.as_str(), "receiving-snapshot");
        assert_eq!(ImportState::WaitingForPaused.as_str(), "waiting-for-paused");
        assert_eq!(ImportState::ReceivingIncremental.as_str(), "receiving-incremental");
        assert_eq!(ImportState::OccurringOnPrimary.as_str(), "occurring-on-primary");
    }
}
