//! Live session wiring for slot migration (C4 session lifecycle).
//!
//! Assembles [`super::sync_channel`], [`super::snapshot`], [`super::incremental`],
//! [`super::ownership_transfer`] and the two job FSMs into the network-facing
//! tasks the rest of the subsystem only describes in isolation: the
//! target-side `SYNCSLOTS` listener that accepts `ESTABLISH` and drives an
//! [`ImportJob`] to completion, and the source-side task that dials out and
//! drives an [`ExportJob`].
//!
//! There is no gossip/raft transport wired up yet, so ownership propagation
//! is simulated by calling `publish_ownership` directly against each side's
//! own `ClusterTopology` instance instead of through a network round trip.
//! `ownership_transfer`'s own module doc already calls consensus out of
//! scope here; this just picks the simplest thing that satisfies the
//! `GossipPublisher` contract in a single process. See DESIGN.md.
//!
//! Likewise, nothing currently intercepts live writes into an
//! `IncrementalBacklog`, so every session runs the incremental phase
//! against a fresh, empty backlog: the real wire messages and FSM
//! transitions all run, they just have nothing queued to forward yet.

use super::capabilities::GossipPublisher;
use super::export_job::{ExportJob, ExportState};
use super::failure_handler::{FailureEvent, FailureHandler};
use super::import_job::{ImportJob, ImportState};
use super::incremental::{DEFAULT_BACKLOG_CAPACITY, IncrementalBacklog, IncrementalConsumer, IncrementalReplicator};
use super::keyspace_view::SlotMask;
use super::ownership_transfer::{OwnershipTransfer, TakeoverMode};
use super::registry::{JobMeta, JobMetaHandle, JobOutcome, MigrationRegistry};
use super::slot_set::SlotSet;
use super::snapshot::{SnapshotConsumer, SnapshotProducer};
use super::sync_channel::{PeerRole, SyncChannel, SyncVerb};
use super::topology::ClusterTopology;
use super::types::{Epoch, SlotMigrationError, SlotMigrationResult};
use crate::core::KVStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Everything a migration session needs, bundled so the listener and the
/// export driver don't each take a half-dozen parameters.
#[derive(Clone)]
pub struct MigrationContext {
    pub store: Arc<KVStore>,
    pub topology: Arc<ClusterTopology>,
    pub slot_mask: Arc<SlotMask>,
    pub registry: Arc<MigrationRegistry>,
    pub is_replica: bool,
    pub liveness_timeout: Duration,
    pub pause_deadline: Duration,
}

fn classify_import_failure(err: &SlotMigrationError) -> FailureEvent {
    match err {
        SlotMigrationError::ConnectionLostToSource | SlotMigrationError::ConnectionLostToTarget => {
            FailureEvent::ConnectionLost
        }
        SlotMigrationError::LivenessTimeout => FailureEvent::LivenessTimeout,
        SlotMigrationError::DataFlushed => FailureEvent::DataFlushed,
        SlotMigrationError::FailoverDuringImport => FailureEvent::TargetFailoverDuringImport,
        SlotMigrationError::Oom => FailureEvent::Oom,
        SlotMigrationError::SourceLostOwnership => FailureEvent::SourceLostOwnership,
        _ => FailureEvent::ConnectionLost,
    }
}

fn classify_export_failure(err: &SlotMigrationError) -> FailureEvent {
    match err {
        SlotMigrationError::ConnectionLostToSource | SlotMigrationError::ConnectionLostToTarget => {
            FailureEvent::ConnectionLost
        }
        SlotMigrationError::LivenessTimeout => FailureEvent::LivenessTimeout,
        SlotMigrationError::DataFlushed => FailureEvent::DataFlushed,
        SlotMigrationError::PauseDeadlineExceeded => FailureEvent::PauseDeadlineExceeded,
        SlotMigrationError::DemotedToReplica => FailureEvent::SourceDemotedToReplica,
        SlotMigrationError::LostOwnership => FailureEvent::LostOwnershipMidFlight,
        _ => FailureEvent::ConnectionLost,
    }
}

/// Bind the `SYNCSLOTS` listener and spawn a per-connection import session
/// for every inbound source. Mirrors `discovery::start_discovery_server`'s
/// bind/loop-accept/spawn shape.
pub async fn run_import_listener(
    listen_addr: SocketAddr,
    ctx: MigrationContext,
) -> SlotMigrationResult<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|e| SlotMigrationError::Other(format!("bind {listen_addr} failed: {e}")))?;
    info!(%listen_addr, "migration_driver: SYNCSLOTS listener started");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let session_ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_import_session(stream, &session_ctx).await {
                            warn!(%peer_addr, error = %e, "migration_driver: import session ended in error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "migration_driver: accept failed on SYNCSLOTS listener");
                }
            }
        }
    });
    Ok(handle)
}

fn validate_establish(ctx: &MigrationContext, source_node: &str, known_epoch: Epoch) -> SlotMigrationResult<()> {
    if ctx.is_replica {
        return Err(SlotMigrationError::NotPrimary);
    }
    ctx.topology
        .get_node(source_node)
        .map_err(|_| SlotMigrationError::UnknownSourceNode)?;
    if known_epoch != ctx.topology.current_epoch() {
        return Err(SlotMigrationError::OwnershipMismatch);
    }
    Ok(())
}

async fn handle_import_session(stream: TcpStream, ctx: &MigrationContext) -> SlotMigrationResult<()> {
    let mut channel = SyncChannel::new(stream, PeerRole::Source, ctx.liveness_timeout);

    let (job_name, source_node, target_node, slots, known_epoch) = match channel.recv().await? {
        SyncVerb::Establish {
            job_name,
            source_node,
            target_node,
            slots,
            known_epoch,
        } => (job_name, source_node, target_node, slots, known_epoch),
        _ => return Err(SlotMigrationError::NotAMigrationSession),
    };

    if let Err(e) = validate_establish(ctx, &source_node, known_epoch) {
        let _ = channel
            .send(&SyncVerb::EstablishErr { reason: e.to_string() })
            .await;
        return Err(e);
    }

    let meta = JobMeta::new(job_name.clone(), slots.clone(), source_node.clone(), target_node.clone(), 0);
    let handle = match ctx.registry.register_import(meta) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = channel
                .send(&SyncVerb::EstablishErr { reason: e.to_string() })
                .await;
            return Err(e);
        }
    };

    channel.send(&SyncVerb::EstablishOk).await?;
    info!(job = %job_name, %source_node, "migration_driver: import session established");

    let job = ImportJob::new(handle);
    job.on_establish_accepted()?;
    ctx.topology.mark_slots_importing(&slots);
    ctx.slot_mask.mark_importing(&slots);

    let result = drive_import_session(&mut channel, &job, ctx, &slots).await;

    ctx.topology.clear_slots_importing(&slots);
    ctx.slot_mask.clear_importing(&slots);

    if let Err(ref e) = result {
        FailureHandler::handle_import(&classify_import_failure(e), &job, Some(&e.to_string()));
    }

    let outcome = match job.state() {
        ImportState::Success => JobOutcome::Success,
        ImportState::Cancelled => JobOutcome::Cancelled,
        _ => JobOutcome::Failed,
    };
    let message = job.meta.read().message.clone();
    ctx.registry.finish_import(&job_name, outcome, message);

    result
}

async fn drive_import_session(
    channel: &mut SyncChannel,
    job: &ImportJob,
    ctx: &MigrationContext,
    slots: &SlotSet,
) -> SlotMigrationResult<()> {
    let consumer = SnapshotConsumer::new(&job.buffer);
    consumer.run(channel).await?;
    job.on_snapshot_eof()?;

    let incremental_consumer = IncrementalConsumer::new(&job.buffer);
    loop {
        match channel.recv().await? {
            SyncVerb::IncrementalBatch { ops } => {
                incremental_consumer.apply_batch(ops);
            }
            SyncVerb::RequestPause => {
                job.on_request_pause()?;
                job.on_drained()?;
                channel.send(&SyncVerb::Paused).await?;
                channel.send(&SyncVerb::RequestFailover).await?;
            }
            SyncVerb::FailoverGranted { new_epoch } => {
                let my_node_id = ctx.topology.my_node_id().to_string();
                ctx.topology
                    .publish_ownership(slots, &my_node_id, new_epoch)
                    .map_err(|_| SlotMigrationError::OwnershipMismatch)?;
                let committed =
                    job.try_commit_on_epoch(ctx.store.as_ref(), ctx.topology.as_ref(), new_epoch, new_epoch)?;
                if committed {
                    return Ok(());
                }
            }
            SyncVerb::Ack => {}
            other => {
                return Err(SlotMigrationError::Other(format!(
                    "unexpected verb during incremental phase: {other:?}"
                )));
            }
        }
    }
}

/// Spawn the source-side driver for a just-registered export job. Dials
/// `target_addr` (the target's `SYNCSLOTS` port, not its client port),
/// runs the job to a terminal state, and records the outcome in the
/// registry.
pub fn spawn_export_driver(
    meta: JobMetaHandle,
    ctx: MigrationContext,
    target_addr: SocketAddr,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_export_driver(meta, ctx, target_addr))
}

async fn run_export_driver(meta: JobMetaHandle, ctx: MigrationContext, target_addr: SocketAddr) {
    let (job_name, slots, source_node, target_node) = {
        let meta = meta.read();
        (
            meta.name.clone(),
            meta.slots.clone(),
            meta.source_node.clone(),
            meta.target_node.clone(),
        )
    };
    let job = ExportJob::new(meta);

    let result = drive_export_session(&job, &ctx, target_addr, &job_name, &slots, &source_node, &target_node).await;

    if let Err(ref e) = result {
        FailureHandler::handle_export(&classify_export_failure(e), &job, Some(&e.to_string()));
    }

    let outcome = match job.state() {
        ExportState::Success => JobOutcome::Success,
        ExportState::Cancelled => JobOutcome::Cancelled,
        _ => JobOutcome::Failed,
    };
    let message = job.meta.read().message.clone();
    ctx.registry.finish_export(&job_name, outcome, message);
}

async fn drive_export_session(
    job: &ExportJob,
    ctx: &MigrationContext,
    target_addr: SocketAddr,
    job_name: &str,
    slots: &SlotSet,
    source_node: &str,
    target_node: &str,
) -> SlotMigrationResult<()> {
    let stream = TcpStream::connect(target_addr)
        .await
        .map_err(|e| SlotMigrationError::ConnectFailed(e.to_string()))?;
    let mut channel = SyncChannel::new(stream, PeerRole::Target, ctx.liveness_timeout);

    let known_epoch = ctx.topology.current_epoch();
    channel
        .send(&SyncVerb::Establish {
            job_name: job_name.to_string(),
            source_node: source_node.to_string(),
            target_node: target_node.to_string(),
            slots: slots.clone(),
            known_epoch,
        })
        .await?;

    match channel.recv().await? {
        SyncVerb::EstablishOk => {}
        SyncVerb::EstablishErr { reason } => return Err(SlotMigrationError::Other(reason)),
        other => {
            return Err(SlotMigrationError::Other(format!(
                "unexpected reply to ESTABLISH: {other:?}"
            )));
        }
    }
    info!(job = job_name, %target_addr, "migration_driver: export session established");

    let producer = SnapshotProducer::new(ctx.store.as_ref(), slots.clone());
    producer.run(&mut channel).await?;

    let backlog = IncrementalBacklog::new(DEFAULT_BACKLOG_CAPACITY);
    let replicator = IncrementalReplicator::new(&backlog);
    replicator.drain_until_caught_up(&mut channel).await?;

    job.mark_caught_up()?;

    let gossip: Arc<dyn GossipPublisher> = ctx.topology.clone();
    let ownership = OwnershipTransfer::new(gossip);
    ownership.pause_writes("slot_migration_in_progress", ctx.pause_deadline);
    job.begin_pause()?;
    channel.send(&SyncVerb::RequestPause).await?;

    loop {
        match channel.recv().await? {
            SyncVerb::Paused => {
                job.on_paused()?;
            }
            SyncVerb::RequestFailover => {
                job.on_failover_granted()?;
                let new_epoch = ownership.request_takeover(slots, TakeoverMode::Quorum)?;
                ownership.publish_ownership(slots, &target_node.to_string(), new_epoch)?;
                job.on_ownership_published()?;
                job.on_epoch_observed(ctx.store.as_ref())?;
                channel.send(&SyncVerb::FailoverGranted { new_epoch }).await?;
                ownership.resume_writes();
                return Ok(());
            }
            other => {
                return Err(SlotMigrationError::Other(format!(
                    "unexpected verb during pause handshake: {other:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_import_failure_maps_known_variants() {
        assert_eq!(
            classify_import_failure(&SlotMigrationError::ConnectionLostToSource),
            FailureEvent::ConnectionLost
        );
        assert_eq!(
            classify_import_failure(&SlotMigrationError::ConnectionLostToTarget),
            FailureEvent::ConnectionLost
        );
        assert_eq!(
            classify_import_failure(&SlotMigrationError::LivenessTimeout),
            FailureEvent::LivenessTimeout
        );
        assert_eq!(
            classify_import_failure(&SlotMigrationError::DataFlushed),
            FailureEvent::DataFlushed
        );
        assert_eq!(
            classify_import_failure(&SlotMigrationError::FailoverDuringImport),
            FailureEvent::TargetFailoverDuringImport
        );
        assert_eq!(classify_import_failure(&SlotMigrationError::Oom), FailureEvent::Oom);
        assert_eq!(
            classify_import_failure(&SlotMigrationError::SourceLostOwnership),
            FailureEvent::SourceLostOwnership
        );
    }

    #[test]
    fn test_classify_export_failure_maps_known_variants() {
        assert_eq!(
            classify_export_failure(&SlotMigrationError::ConnectionLostToTarget),
            FailureEvent::ConnectionLost
        );
        assert_eq!(
            classify_export_failure(&SlotMigrationError::LivenessTimeout),
            FailureEvent::LivenessTimeout
        );
        assert_eq!(
            classify_export_failure(&SlotMigrationError::DataFlushed),
            FailureEvent::DataFlushed
        );
        assert_eq!(
            classify_export_failure(&SlotMigrationError::PauseDeadlineExceeded),
            FailureEvent::PauseDeadlineExceeded
        );
        assert_eq!(
            classify_export_failure(&SlotMigrationError::DemotedToReplica),
            FailureEvent::SourceDemotedToReplica
        );
        assert_eq!(
            classify_export_failure(&SlotMigrationError::LostOwnership),
            FailureEvent::LostOwnershipMidFlight
        );
    }
}
