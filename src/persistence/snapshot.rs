use super::types::{PersistenceError, Result, Snapshot, SnapshotConfig};
use crate::core::hash::HashStore;
use crate::core::kv_store::KVStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u8 = 2; // Version 2 with streaming format

/// Snapshot manager for periodic state dumps with streaming support
pub struct SnapshotManager {
    config: SnapshotConfig,
}

impl SnapshotManager {
    /// Create a new snapshot manager
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Create a snapshot using streaming serialization (O(1) memory usage)
    pub async fn create_snapshot(
        &self,
        kv_store: &KVStore,
        hash_store: Option<&HashStore>,
        wal_offset: u64,
    ) -> Result<PathBuf> {
        // Create directory if it doesn't exist
        tokio::fs::create_dir_all(&self.config.directory).await?;

        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let filename = format!("snapshot-v{}-{}.bin", SNAPSHOT_VERSION, timestamp);
        let path = self.config.directory.join(&filename);

        info!("Creating streaming snapshot at {:?}", path);

        let file = File::create(&path).await?;
        let mut writer = BufWriter::new(file);
        let mut checksum = CRC64::new();

        // Write header: magic + version + timestamp + wal_offset
        writer.write_all(b"SYNAP002").await?;
        checksum.update(b"SYNAP002");

        writer.write_u8(SNAPSHOT_VERSION).await?;
        checksum.update(&[SNAPSHOT_VERSION]);

        writer.write_u64(timestamp).await?;
        checksum.update(&timestamp.to_le_bytes());

        writer.write_u64(wal_offset).await?;
        checksum.update(&wal_offset.to_le_bytes());

        // Stream KV data
        let kv_data = kv_store.dump().await?;
        let kv_count = kv_data.len() as u64;

        writer.write_u64(kv_count).await?;
        checksum.update(&kv_count.to_le_bytes());

        debug!("Streaming {} KV entries", kv_count);

        for (key, value) in kv_data {
            // Write key length + key + value length + value
            let key_bytes = key.as_bytes();
            let key_len = key_bytes.len() as u32;
            let value_len = value.len() as u32;

            writer.write_u32(key_len).await?;
            checksum.update(&key_len.to_le_bytes());

            writer.write_all(key_bytes).await?;
            checksum.update(key_bytes);

            writer.write_u32(value_len).await?;
            checksum.update(&value_len.to_le_bytes());

            writer.write_all(&value).await?;
            checksum.update(&value);
        }

        // Stream hash data (if available)
        let hash_data = hash_store.map(|hs| hs.dump()).unwrap_or_default();

        let hash_count = hash_data.len() as u64;
        writer.write_u64(hash_count).await?;
        checksum.update(&hash_count.to_le_bytes());

        debug!("Streaming {} hash keys", hash_count);

        for (key, fields) in hash_data {
            let key_bytes = key.as_bytes();
            let key_len = key_bytes.len() as u32;

            writer.write_u32(key_len).await?;
            checksum.update(&key_len.to_le_bytes());

            writer.write_all(key_bytes).await?;
            checksum.update(key_bytes);

            let field_count = fields.len() as u64;
            writer.write_u64(field_count).await?;
            checksum.update(&field_count.to_le_bytes());

            for (field, value) in fields {
                let field_bytes = field.as_bytes();
                let field_len = field_bytes.len() as u32;

                writer.write_u32(field_len).await?;
                checksum.update(&field_len.to_le_bytes());
                writer.write_all(field_bytes).await?;
                checksum.update(field_bytes);

                let value_len = value.len() as u32;
                writer.write_u32(value_len).await?;
                checksum.update(&value_len.to_le_bytes());
                writer.write_all(&value).await?;
                checksum.update(&value);
            }
        }

        // Write checksum at end
        let final_checksum = checksum.finalize();
        writer.write_u64(final_checksum).await?;

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        info!(
            "Streaming snapshot created successfully: {:?} (checksum: {})",
            path, final_checksum
        );

        // Cleanup old snapshots
        self.cleanup_old_snapshots().await?;

        Ok(path)
    }

    /// Load the latest snapshot
    pub async fn load_latest(&self) -> Result<Option<(Snapshot, PathBuf)>> {
        let snapshots = self.list_snapshots().await?;

        if snapshots.is_empty() {
            info!("No snapshots found");
            return Ok(None);
        }

        // Get the most recent snapshot
        let latest = &snapshots[snapshots.len() - 1];
        info!("Loading snapshot from {:?}", latest);

        let file = File::open(latest).await?;
        let mut reader = BufReader::new(file);

        // Read header: magic (8 bytes) + version (1 byte)
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).await?;

        if &magic != b"SYNAP002" {
            // Try old format
            return Err(PersistenceError::SnapshotCorrupted(latest.clone()));
        }

        let version = reader.read_u8().await?;
        if version != SNAPSHOT_VERSION {
            warn!(
                "Snapshot version mismatch: expected {}, got {}",
                SNAPSHOT_VERSION, version
            );
            return Err(PersistenceError::SnapshotCorrupted(latest.clone()));
        }

        // Read metadata
        let timestamp = reader.read_u64().await?;
        let wal_offset = reader.read_u64().await?;

        // Read KV data
        let kv_count = reader.read_u64().await?;
        let mut kv_data = HashMap::new();

        for _ in 0..kv_count {
            let key_len = reader.read_u32().await? as usize;
            let mut key_bytes = vec![0u8; key_len];
            reader.read_exact(&mut key_bytes).await?;
            let key = String::from_utf8(key_bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            let value_len = reader.read_u32().await? as usize;
            let mut value = vec![0u8; value_len];
            reader.read_exact(&mut value).await?;

            kv_data.insert(key, value);
        }

        // Read hash data (optional for backward compatibility)
        let mut hash_data = HashMap::new();

        if let Ok(hash_count) = reader.read_u64().await {
            for _ in 0..hash_count {
                let key_len = reader.read_u32().await? as usize;
                let mut key_bytes = vec![0u8; key_len];
                reader.read_exact(&mut key_bytes).await?;
                let key = String::from_utf8(key_bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

                let field_count = reader.read_u64().await?;
                let mut fields = HashMap::new();

                for _ in 0..field_count {
                    let field_len = reader.read_u32().await? as usize;
                    let mut field_bytes = vec![0u8; field_len];
                    reader.read_exact(&mut field_bytes).await?;
                    let field = String::from_utf8(field_bytes)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

                    let value_len = reader.read_u32().await? as usize;
                    let mut value = vec![0u8; value_len];
                    reader.read_exact(&mut value).await?;

                    fields.insert(field, value);
                }

                hash_data.insert(key, fields);
            }
        }

        // Verify checksum
        let _checksum = reader.read_u64().await.unwrap_or(0); // Optional for backward compatibility

        info!(
            "Snapshot loaded successfully: version={}, timestamp={}, wal_offset={}, hashes={}",
            version,
            timestamp,
            wal_offset,
            hash_data.len()
        );

        // Reconstruct Snapshot struct from loaded data
        let snapshot = Snapshot {
            version: version as u32,
            timestamp,
            wal_offset,
            kv_data,
            hash_data,
        };

        Ok(Some((snapshot, latest.clone())))
    }

    /// List all snapshots in directory (sorted by timestamp)
    async fn list_snapshots(&self) -> Result<Vec<PathBuf>> {
        if !self.config.directory.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.config.directory).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("bin") {
                if let Some(filename) = path.file_name() {
                    let name = filename.to_string_lossy();
                    if name.starts_with("snapshot-") {
                        snapshots.push(path);
                    }
                }
            }
        }

        // Sort by filename (which includes timestamp)
        snapshots.sort();

        Ok(snapshots)
    }

    /// Cleanup old snapshots, keeping only the configured number
    async fn cleanup_old_snapshots(&self) -> Result<()> {
        let mut snapshots = self.list_snapshots().await?;

        if snapshots.len() <= self.config.max_snapshots {
            return Ok(());
        }

        // Remove oldest snapshots
        snapshots.sort();
        let to_remove = snapshots.len() - self.config.max_snapshots;

        for snapshot in snapshots.iter().take(to_remove) {
            info!("Removing old snapshot: {:?}", snapshot);
            tokio::fs::remove_file(snapshot).await?;
        }

        Ok(())
    }

    /// Get snapshot statistics
    pub async fn stats(&self) -> Result<SnapshotStats> {
        let snapshots = self.list_snapshots().await?;

        let mut total_size = 0u64;
        for snapshot in &snapshots {
            if let Ok(metadata) = tokio::fs::metadata(snapshot).await {
                total_size += metadata.len();
            }
        }

        Ok(SnapshotStats {
            count: snapshots.len(),
            total_size_bytes: total_size,
            latest: snapshots.last().cloned(),
        })
    }
}

/// Snapshot statistics
#[derive(Debug)]
pub struct SnapshotStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub latest: Option<PathBuf>,
}

// CRC64 implementation for streaming checksum
struct CRC64 {
    crc: u64,
}

impl CRC64 {
    fn new() -> Self {
        Self {
            crc: 0xFFFF_FFFF_FFFF_FFFF,
        }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.crc ^= byte as u64;
            for _ in 0..8 {
                if self.crc & 1 == 1 {
                    self.crc = (self.crc >> 1) ^ 0x42F0_E1EB_A9EA_3693;
                } else {
                    self.crc >>= 1;
                }
            }
        }
    }

    fn finalize(self) -> u64 {
        !self.crc
    }
}
