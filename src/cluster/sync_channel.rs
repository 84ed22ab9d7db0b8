//! SYNCSLOTS wire sub-protocol (C4).
//!
//! A framed, ordered, bidirectional channel between the source and target
//! primaries of one migration: `ESTABLISH`, snapshot transfer, incremental
//! replay, the pause/takeover handshake, and liveness `ACK`s, all carried
//! as length-prefixed `bincode` frames over a single TCP connection. Same
//! wire shape `replication::master` uses for its replica channel, with an
//! explicit length prefix so frame boundaries don't depend on a single
//! `read` call lining up with a single `write_all` call.

use super::keyspace_view::StagedValue;
use super::slot_set::SlotSet;
use super::types::{Epoch, JobName, NodeId, SlotMigrationError, SlotMigrationResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{trace, warn};

const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

/// One item transferred during the snapshot phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotWireItem {
    pub key: String,
    pub value: StagedValue,
}

/// One write observed on the source after the snapshot was taken, replayed
/// to the target in the same order it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IncrementalOp {
    Write { key: String, value: StagedValue },
    Delete { key: String },
}

/// Every message exchanged over a `SyncChannel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncVerb {
    /// Sent by the source, dialing out to the target, to open the session.
    Establish {
        job_name: JobName,
        source_node: NodeId,
        target_node: NodeId,
        slots: SlotSet,
        known_epoch: Epoch,
    },
    EstablishOk,
    EstablishErr { reason: String },

    SnapshotChunk {
        items: Vec<SnapshotWireItem>,
        /// CRC32 of the bincode-encoded `items`, verified by the consumer
        /// before staging, matching the checksum discipline
        /// `replication::sync`'s snapshot format already uses.
        checksum: u32,
    },
    SnapshotEof,

    IncrementalBatch { ops: Vec<IncrementalOp> },

    /// Source asks the cluster (via the target, as part of the takeover
    /// handshake) to pause writes to the migrating slots.
    RequestPause,
    Paused,

    /// Target requests the final ownership handoff once replay has caught
    /// up and the pause is in effect.
    RequestFailover,
    FailoverGranted { new_epoch: Epoch },

    /// Bidirectional liveness heartbeat; either side may send it at any
    /// time and must reset its "no interaction" timer on receipt.
    Ack,
}

/// Which peer this channel's io errors should be blamed on, for the exact
/// `Connection lost to source`/`Connection lost to target` wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// The remote end of this channel is the migration's source node.
    Source,
    /// The remote end of this channel is the migration's target node.
    Target,
}

impl PeerRole {
    fn connection_lost_error(self) -> SlotMigrationError {
        match self {
            PeerRole::Source => SlotMigrationError::ConnectionLostToSource,
            PeerRole::Target => SlotMigrationError::ConnectionLostToTarget,
        }
    }
}

/// A length-prefixed bincode channel over a live TCP connection.
pub struct SyncChannel {
    stream: TcpStream,
    peer: PeerRole,
    liveness_timeout: Duration,
}

impl SyncChannel {
    pub fn new(stream: TcpStream, peer: PeerRole, liveness_timeout: Duration) -> Self {
        Self {
            stream,
            peer,
            liveness_timeout,
        }
    }

    /// Encode and send one frame: a 4-byte big-endian length, then the
    /// bincode payload.
    pub async fn send(&mut self, verb: &SyncVerb) -> SlotMigrationResult<()> {
        let payload = bincode::serialize(verb)
            .map_err(|e| SlotMigrationError::Other(format!("encode error: {e}")))?;
        if payload.len() as u64 > MAX_FRAME_BYTES as u64 {
            return Err(SlotMigrationError::Other("frame too large".to_string()));
        }
        let len = payload.len() as u32;

        self.stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|_| self.peer.connection_lost_error())?;
        self.stream
            .write_all(&payload)
            .await
            .map_err(|_| self.peer.connection_lost_error())?;
        trace!(verb = ?verb, "sync_channel: sent frame");
        Ok(())
    }

    /// Receive one frame, bounded by the channel's liveness timeout. A
    /// timeout maps to `LivenessTimeout`; any IO failure maps to the
    /// appropriate `Connection lost to ...` variant.
    pub async fn recv(&mut self) -> SlotMigrationResult<SyncVerb> {
        timeout(self.liveness_timeout, self.recv_inner())
            .await
            .map_err(|_| SlotMigrationError::LivenessTimeout)?
    }

    async fn recv_inner(&mut self) -> SlotMigrationResult<SyncVerb> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| self.peer.connection_lost_error())?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_BYTES {
            return Err(SlotMigrationError::Other("frame too large".to_string()));
        }

        let mut payload = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|_| self.peer.connection_lost_error())?;

        let verb: SyncVerb = bincode::deserialize(&payload)
            .map_err(|e| SlotMigrationError::Other(format!("decode error: {e}")))?;
        trace!(verb = ?verb, "sync_channel: received frame");
        Ok(verb)
    }

    /// Send an `Ack`, logging but ignoring send failures. Heartbeats are
    /// best-effort; the next liveness check catches a truly dead peer.
    pub async fn send_ack_best_effort(&mut self) {
        if let Err(e) = self.send(&SyncVerb::Ack).await {
            warn!(error = %e, "sync_channel: failed to send ack");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_establish_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut chan = SyncChannel::new(stream, PeerRole::Target, Duration::from_secs(5));
            let verb = chan.recv().await.unwrap();
            assert!(matches!(verb, SyncVerb::Establish { .. }));
            chan.send(&SyncVerb::EstablishOk).await.unwrap();
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client_chan = SyncChannel::new(client_stream, PeerRole::Source, Duration::from_secs(5));
        let slots = SlotSet::parse(&["100", "200"]).unwrap();
        client_chan
            .send(&SyncVerb::Establish {
                job_name: "job-1".to_string(),
                source_node: "node-a".to_string(),
                target_node: "node-b".to_string(),
                slots,
                known_epoch: 1,
            })
            .await
            .unwrap();
        let reply = client_chan.recv().await.unwrap();
        assert_eq!(reply, SyncVerb::EstablishOk);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_after_peer_drop_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client_chan = SyncChannel::new(client_stream, PeerRole::Target, Duration::from_secs(5));
        server_task.await.unwrap();

        let err = client_chan.recv().await.unwrap_err();
        assert_eq!(err, SlotMigrationError::ConnectionLostToTarget);
    }

    #[tokio::test]
    async fn test_recv_times_out_with_no_interaction() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the connection open but never send anything.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client_chan =
            SyncChannel::new(client_stream, PeerRole::Source, Duration::from_millis(50));
        let err = client_chan.recv().await.unwrap_err();
        assert_eq!(err, SlotMigrationError::LivenessTimeout);
    }
}
