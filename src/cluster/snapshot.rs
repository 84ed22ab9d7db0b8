//! Snapshot transfer (C5).
//!
//! The first phase of every import: the source streams every key currently
//! in the migrating slots to the target in bounded chunks, each checksummed
//! the way `replication::sync::create_snapshot` checksums its own full-sync
//! payload. The target stages everything it receives into an `ImportBuffer`,
//! invisible to clients until the job commits.

use super::capabilities::SnapshotSource;
use super::keyspace_view::ImportBuffer;
use super::slot_set::SlotSet;
use super::sync_channel::{SnapshotWireItem, SyncChannel, SyncVerb};
use super::types::{SlotMigrationError, SlotMigrationResult};
use tracing::{debug, info};

/// Default number of keys per `SnapshotChunk` frame.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Drives the producer (source) side of the snapshot phase.
pub struct SnapshotProducer<'a, S: SnapshotSource> {
    source: &'a S,
    slots: SlotSet,
    chunk_size: usize,
}

impl<'a, S: SnapshotSource> SnapshotProducer<'a, S> {
    pub fn new(source: &'a S, slots: SlotSet) -> Self {
        Self {
            source,
            slots,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stream every matching key to `channel`, yielding between chunks so a
    /// large snapshot never monopolizes the job's task. Returns the total
    /// number of keys sent.
    pub async fn run(&self, channel: &mut SyncChannel) -> SlotMigrationResult<usize> {
        let total = self.source.slot_key_count(&self.slots);
        info!(slots = %self.slots.to_text(), total, "snapshot: starting transfer");

        let mut cursor: u64 = 0;
        let mut sent = 0usize;
        loop {
            let batch = self
                .source
                .next_snapshot_batch(&self.slots, &mut cursor, self.chunk_size);
            if batch.is_empty() {
                break;
            }

            let items: Vec<SnapshotWireItem> = batch
                .into_iter()
                .map(|item| SnapshotWireItem {
                    key: item.key,
                    value: item.value,
                })
                .collect();
            let checksum = checksum_items(&items)?;
            sent += items.len();

            channel.send(&SyncVerb::SnapshotChunk { items, checksum }).await?;
            tokio::task::yield_now().await;
        }

        channel.send(&SyncVerb::SnapshotEof).await?;
        info!(sent, "snapshot: transfer complete");
        Ok(sent)
    }
}

/// Drives the consumer (target) side of the snapshot phase, staging
/// everything received into `buffer`.
pub struct SnapshotConsumer<'a> {
    buffer: &'a ImportBuffer,
}

impl<'a> SnapshotConsumer<'a> {
    pub fn new(buffer: &'a ImportBuffer) -> Self {
        Self { buffer }
    }

    /// Receive chunks until `SnapshotEof`. Returns the number of keys
    /// staged.
    pub async fn run(&self, channel: &mut SyncChannel) -> SlotMigrationResult<usize> {
        let mut received = 0usize;
        loop {
            match channel.recv().await? {
                SyncVerb::SnapshotChunk { items, checksum } => {
                    let expected = checksum_items(&items)?;
                    if expected != checksum {
                        return Err(SlotMigrationError::Other(
                            "snapshot chunk checksum mismatch".to_string(),
                        ));
                    }
                    for item in items {
                        self.buffer.stage_write(item.key, item.value);
                        received += 1;
                    }
                    debug!(received, "snapshot: staged chunk");
                    tokio::task::yield_now().await;
                }
                SyncVerb::SnapshotEof => break,
                other => {
                    return Err(SlotMigrationError::Other(format!(
                        "unexpected verb during snapshot phase: {other:?}"
                    )));
                }
            }
        }
        info!(received, "snapshot: transfer received");
        Ok(received)
    }
}

fn checksum_items(items: &[SnapshotWireItem]) -> SlotMigrationResult<u32> {
    let bytes = bincode::serialize(items)
        .map_err(|e| SlotMigrationError::Other(format!("encode error: {e}")))?;
    Ok(crc32fast::hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::capabilities::test_fakes::FakeKeyspace;
    use super::super::keyspace_view::StagedValue;
    use super::super::sync_channel::PeerRole;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_full_snapshot_round_trip() {
        let source = FakeKeyspace::new();
        for i in 0..10 {
            source.insert(
                &format!("key-{i}"),
                StagedValue::String {
                    value: format!("val-{i}"),
                    expires_at: None,
                },
            );
        }
        let slots = SlotSet::parse(&["0", "16383"]).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel = SyncChannel::new(stream, PeerRole::Target, Duration::from_secs(5));
            let producer = SnapshotProducer::new(&source, slots).with_chunk_size(3);
            producer.run(&mut channel).await.unwrap()
        });

        let buffer = ImportBuffer::new();
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client_channel = SyncChannel::new(client_stream, PeerRole::Source, Duration::from_secs(5));
        let consumer = SnapshotConsumer::new(&buffer);
        let received = consumer.run(&mut client_channel).await.unwrap();

        let sent = producer_task.await.unwrap();
        assert_eq!(sent, 10);
        assert_eq!(received, 10);
        assert_eq!(buffer.len(), 10);
        assert!(buffer.contains("key-5"));
    }

    #[tokio::test]
    async fn test_empty_slot_range_yields_immediate_eof() {
        let source = FakeKeyspace::new();
        let slots = SlotSet::parse(&["0", "16383"]).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel = SyncChannel::new(stream, PeerRole::Target, Duration::from_secs(5));
            let producer = SnapshotProducer::new(&source, slots);
            producer.run(&mut channel).await.unwrap()
        });

        let buffer = ImportBuffer::new();
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client_channel = SyncChannel::new(client_stream, PeerRole::Source, Duration::from_secs(5));
        let consumer = SnapshotConsumer::new(&buffer);
        let received = consumer.run(&mut client_channel).await.unwrap();

        assert_eq!(producer_task.await.unwrap(), 0);
        assert_eq!(received, 0);
    }
}
