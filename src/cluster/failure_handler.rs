//! Failure and cancellation routing (C10).
//!
//! Routes externally observed events (connection loss, liveness silence,
//! a local flush, a failover, a topology change, buffer overflow, an
//! operator cancel) to the matching terminal transition on an import or
//! export job. Every failure is terminal; nothing here retries.

use super::export_job::ExportJob;
use super::import_job::ImportJob;
use tracing::warn;

/// One externally observed condition that should terminate a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureEvent {
    /// The peer closed the connection (or a read/write against it failed).
    ConnectionLost,
    /// This node noticed `last_ack_at` has gone stale.
    LivenessTimeout,
    /// A local `FLUSHDB`/`FLUSHALL` ran while the job was in flight.
    DataFlushed,
    /// The target's primary failed over mid-import.
    TargetFailoverDuringImport,
    /// The target exceeded `maxmemory` applying incremental writes.
    Oom,
    /// A topology update showed the source no longer owns the slots.
    SourceLostOwnership,
    /// The cluster write-pause outlived its deadline.
    PauseDeadlineExceeded,
    /// The source primary was demoted to a replica mid-export.
    SourceDemotedToReplica,
    /// Ownership of the slots changed mid-flight, to neither side.
    LostOwnershipMidFlight,
    /// The export-side client output buffer limit was exceeded.
    ClientBufferOverflow,
    /// Operator-issued `CANCELSLOTMIGRATIONS`.
    UserCancel,
}

/// Stateless router from `FailureEvent` to the matching job transition.
/// Exists mainly so the mapping lives in one place instead of scattered
/// call sites.
pub struct FailureHandler;

impl FailureHandler {
    pub fn handle_import(event: &FailureEvent, job: &ImportJob, reason: Option<&str>) {
        if job.is_terminal() {
            return;
        }
        warn!(event = ?event, job = %job.meta.read().name, "failure_handler: routing import event");
        match event {
            FailureEvent::ConnectionLost => job.fail_connection_lost(),
            FailureEvent::LivenessTimeout => job.fail_timeout(),
            FailureEvent::DataFlushed => job.fail_flushed(),
            FailureEvent::TargetFailoverDuringImport => job.fail_failover_during_import(),
            FailureEvent::Oom => job.fail_oom(),
            FailureEvent::SourceLostOwnership => job.fail_source_lost_ownership(),
            FailureEvent::UserCancel => job.cancel(reason.unwrap_or("Cancelled by operator")),
            // The remaining variants only ever apply to the export side.
            FailureEvent::PauseDeadlineExceeded
            | FailureEvent::SourceDemotedToReplica
            | FailureEvent::LostOwnershipMidFlight
            | FailureEvent::ClientBufferOverflow => {
                job.fail_connection_lost();
            }
        }
    }

    pub fn handle_export(event: &FailureEvent, job: &ExportJob, reason: Option<&str>) {
        if job.is_terminal() {
            return;
        }
        warn!(event = ?event, job = %job.meta.read().name, "failure_handler: routing export event");
        match event {
            FailureEvent::ConnectionLost => job.fail_connection_lost(),
            FailureEvent::LivenessTimeout => job.fail_timeout(),
            FailureEvent::DataFlushed => job.fail_flushed(),
            FailureEvent::PauseDeadlineExceeded => job.fail_pause_deadline_exceeded(),
            FailureEvent::SourceDemotedToReplica => job.fail_demoted_to_replica(),
            FailureEvent::LostOwnershipMidFlight => job.fail_lost_ownership(),
            // Flow-control closes the channel; the export observes it the
            // same way as any other dropped connection.
            FailureEvent::ClientBufferOverflow => job.fail_connection_lost(),
            FailureEvent::UserCancel => job.cancel(reason.unwrap_or("Cancelled by operator")),
            // The remaining variants only ever apply to the import side.
            FailureEvent::TargetFailoverDuringImport | FailureEvent::SourceLostOwnership => {
                job.fail_connection_lost();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::JobMeta;
    use crate::cluster::slot_set::SlotSet;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn import_job() -> ImportJob {
        let slots = SlotSet::parse(&["1", "2"]).unwrap();
        let meta = JobMeta::new("j".to_string(), slots, "s".to_string(), "t".to_string(), 0);
        ImportJob::new(Arc::new(RwLock::new(meta)))
    }

    fn export_job() -> ExportJob {
        let slots = SlotSet::parse(&["1", "2"]).unwrap();
        let meta = JobMeta::new("j".to_string(), slots, "s".to_string(), "t".to_string(), 0);
        ExportJob::new(Arc::new(RwLock::new(meta)))
    }

    #[test]
    fn test_import_data_flushed_routes_to_exact_message() {
        let job = import_job();
        FailureHandler::handle_import(&FailureEvent::DataFlushed, &job, None);
        assert_eq!(job.meta.read().message, "Data was flushed");
    }

    #[test]
    fn test_import_oom_routes_to_exact_message() {
        let job = import_job();
        FailureHandler::handle_import(&FailureEvent::Oom, &job, None);
        assert_eq!(job.meta.read().message, "OOM");
    }

    #[test]
    fn test_import_failover_routes_to_exact_message() {
        let job = import_job();
        FailureHandler::handle_import(&FailureEvent::TargetFailoverDuringImport, &job, None);
        assert_eq!(job.meta.read().message, "A failover occurred during slot import");
    }

    #[test]
    fn test_export_pause_deadline_routes_to_exact_message() {
        let job = export_job();
        FailureHandler::handle_export(&FailureEvent::PauseDeadlineExceeded, &job, None);
        assert_eq!(job.meta.read().message, "Unpaused before migration completed");
    }

    #[test]
    fn test_handler_is_noop_on_already_terminal_job() {
        let job = import_job();
        FailureHandler::handle_import(&FailureEvent::Oom, &job, None);
        FailureHandler::handle_import(&FailureEvent::DataFlushed, &job, None);
        // First event wins; terminal states are append-only.
        assert_eq!(job.meta.read().message, "OOM");
    }

    #[test]
    fn test_user_cancel_uses_provided_reason() {
        let job = export_job();
        FailureHandler::handle_export(&FailureEvent::UserCancel, &job, Some("operator request"));
        assert_eq!(job.meta.read().message, "operator request");
        assert_eq!(job.state().as_str(), "cancelled");
    }
}
