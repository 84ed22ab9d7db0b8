//! Source-side migration state machine (C8).
//!
//! Coordinates with [`super::ownership_transfer`] to flip ownership
//! atomically once snapshot and incremental transfer have caught the
//! target up. The FSM here only covers the pause/takeover dance; the
//! snapshot and incremental phases that precede it are driven by
//! [`super::snapshot`] and [`super::incremental`] against the same
//! [`JobMetaHandle`].

use super::capabilities::WriteApplier;
use super::registry::JobMetaHandle;
use super::types::{Epoch, SlotMigrationError, SlotMigrationResult};
use parking_lot::RwLock;
use tracing::{info, warn};

/// States of `ExportJob`. `Flowing` precedes the named states of §4.8 and
/// covers the period while the snapshot and incremental phases are still
/// catching the target up; it is this crate's bookkeeping, not part of the
/// migration's externally observable vocabulary, so it is never reported
/// terminal and is not one of the eight canonical `as_str` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Flowing,
    WaitingToPause,
    WaitingForPaused,
    FailoverGranted,
    WritingEpoch,
    Success,
    Failed,
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flowing => "flowing",
            Self::WaitingToPause => "waiting-to-pause",
            Self::WaitingForPaused => "waiting-for-paused",
            Self::FailoverGranted => "failover-granted",
            Self::WritingEpoch => "writing-epoch",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The source side of one migration.
pub struct ExportJob {
    pub meta: JobMetaHandle,
    state: RwLock<ExportState>,
}

impl ExportJob {
    pub fn new(meta: JobMetaHandle) -> Self {
        Self {
            meta,
            state: RwLock::new(ExportState::Flowing),
        }
    }

    pub fn state(&self) -> ExportState {
        *self.state.read()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn set_state(&self, new: ExportState) {
        let mut state = self.state.write();
        info!(job = %self.meta.read().name, from = ?*state, to = ?new, "export job transition");
        *state = new;
        drop(state);
        self.meta.write().touch_state_change();
    }

    fn require(&self, expected: ExportState) -> SlotMigrationResult<()> {
        if self.state() != expected {
            return Err(SlotMigrationError::Other(format!(
                "invalid export transition from {:?}, expected {:?}",
                self.state(),
                expected
            )));
        }
        Ok(())
    }

    /// Snapshot + incremental have caught the target up: enter
    /// `waiting-to-pause`. A debug hook may hold a job here for testing
    /// before the caller ever calls `begin_pause`.
    pub fn mark_caught_up(&self) -> SlotMigrationResult<()> {
        self.require(ExportState::Flowing)?;
        self.set_state(ExportState::WaitingToPause);
        Ok(())
    }

    /// No pending client writes to the migrating slots remain: send
    /// `REQUEST-PAUSE`, acquire the cluster write-pause, and enter
    /// `waiting-for-paused`.
    pub fn begin_pause(&self) -> SlotMigrationResult<()> {
        self.require(ExportState::WaitingToPause)?;
        self.meta.write().owns_pause = true;
        self.set_state(ExportState::WaitingForPaused);
        Ok(())
    }

    /// Target replied `PAUSED`; `REQUEST-FAILOVER` has been sent. Waits in
    /// the same `WaitingForPaused` state until `FAILOVER-GRANTED` arrives.
    pub fn on_paused(&self) -> SlotMigrationResult<()> {
        self.require(ExportState::WaitingForPaused)?;
        Ok(())
    }

    pub fn on_failover_granted(&self) -> SlotMigrationResult<()> {
        self.require(ExportState::WaitingForPaused)?;
        self.set_state(ExportState::FailoverGranted);
        Ok(())
    }

    /// Ownership has been published at a bumped epoch (C9).
    pub fn on_ownership_published(&self) -> SlotMigrationResult<()> {
        self.require(ExportState::FailoverGranted)?;
        self.meta.write().owns_pause = false;
        self.set_state(ExportState::WritingEpoch);
        Ok(())
    }

    /// The new epoch has been observed in this node's own topology view;
    /// purge the migrated keys from the local keyspace and succeed.
    pub fn on_epoch_observed<W: WriteApplier>(&self, applier: &W) -> SlotMigrationResult<()> {
        self.require(ExportState::WritingEpoch)?;
        let slots = self.meta.read().slots.clone();
        applier.purge_slots(&slots);
        self.set_state(ExportState::Success);
        Ok(())
    }

    fn fail(&self, reason: SlotMigrationError) {
        warn!(job = %self.meta.read().name, reason = %reason, "export job failed");
        let mut meta = self.meta.write();
        meta.message = reason.to_string();
        meta.owns_pause = false;
        drop(meta);
        self.set_state(ExportState::Failed);
    }

    pub fn fail_pause_deadline_exceeded(&self) {
        self.fail(SlotMigrationError::PauseDeadlineExceeded);
    }

    pub fn fail_flushed(&self) {
        self.fail(SlotMigrationError::DataFlushed);
    }

    pub fn fail_demoted_to_replica(&self) {
        self.fail(SlotMigrationError::DemotedToReplica);
    }

    pub fn fail_lost_ownership(&self) {
        self.fail(SlotMigrationError::LostOwnership);
    }

    pub fn fail_connection_lost(&self) {
        self.fail(SlotMigrationError::ConnectionLostToTarget);
    }

    pub fn fail_timeout(&self) {
        self.fail(SlotMigrationError::LivenessTimeout);
    }

    /// Cancelling while the cluster write-pause is held releases it
    /// immediately, rather than stalling every client in the cluster.
    pub fn cancel(&self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        let mut meta = self.meta.write();
        meta.message = reason.to_string();
        meta.owns_pause = false;
        drop(meta);
        self.set_state(ExportState::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::capabilities::test_fakes::FakeKeyspace;
    use crate::cluster::registry::JobMeta;
    use crate::cluster::slot_set::SlotSet;
    use std::sync::Arc;

    fn new_job() -> ExportJob {
        let slots = SlotSet::parse(&["16383", "16383"]).unwrap();
        let meta = JobMeta::new(
            "job-1".to_string(),
            slots,
            "source".to_string(),
            "target".to_string(),
            0,
        );
        ExportJob::new(Arc::new(RwLock::new(meta)))
    }

    #[test]
    fn test_happy_path_to_success() {
        let job = new_job();
        job.mark_caught_up().unwrap();
        assert_eq!(job.state(), ExportState::WaitingToPause);
        job.begin_pause().unwrap();
        assert_eq!(job.state(), ExportState::WaitingForPaused);
        assert!(job.meta.read().owns_pause);

        job.on_paused().unwrap();
        assert_eq!(job.state(), ExportState::WaitingForPaused);

        job.on_failover_granted().unwrap();
        assert_eq!(job.state(), ExportState::FailoverGranted);

        job.on_ownership_published().unwrap();
        assert_eq!(job.state(), ExportState::WritingEpoch);

        let keyspace = FakeKeyspace::new();
        job.on_epoch_observed(&keyspace).unwrap();
        assert_eq!(job.state(), ExportState::Success);
    }

    #[test]
    fn test_pause_deadline_exceeded_fails_with_exact_message() {
        let job = new_job();
        job.mark_caught_up().unwrap();
        job.begin_pause().unwrap();
        job.fail_pause_deadline_exceeded();
        assert_eq!(job.state(), ExportState::Failed);
        assert_eq!(job.meta.read().message, "Unpaused before migration completed");
    }

    #[test]
    fn test_cancel_while_paused_releases_pause_flag() {
        let job = new_job();
        job.mark_caught_up().unwrap();
        job.begin_pause().unwrap();
        job.cancel("operator cancel");
        assert_eq!(job.state(), ExportState::Cancelled);
        assert!(!job.meta.read().owns_pause);
    }

    #[test]
    fn test_demoted_to_replica_message() {
        let job = new_job();
        job.fail_demoted_to_replica();
        assert_eq!(job.meta.read().message, "I was demoted to a replica");
    }

    #[test]
    fn test_lost_ownership_message() {
        let job = new_job();
        job.fail_lost_ownership();
        assert_eq!(job.meta.read().message, "Slots are no longer owned by myself");
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let job = new_job();
        let err = job.on_failover_granted().unwrap_err();
        assert!(matches!(err, SlotMigrationError::Other(_)));
    }
}
