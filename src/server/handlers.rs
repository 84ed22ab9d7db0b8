use crate::cluster::keyspace_view::SlotMask;
use crate::cluster::migration_driver::{MigrationContext, spawn_export_driver};
use crate::cluster::registry::{JobMeta, JobOutcome, JobRole};
use crate::cluster::slot_set::SlotSet;
use crate::cluster::topology::ClusterTopology;
use crate::cluster::types::SlotMigrationError;
use crate::cluster::MigrationRegistry;
use crate::core::{HashStore, KVStore, SynapError};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub kv_store: Arc<KVStore>,
    pub hash_store: Arc<HashStore>,
    pub persistence: Option<Arc<crate::persistence::PersistenceLayer>>,
    pub topology: Arc<ClusterTopology>,
    pub registry: Arc<MigrationRegistry>,
    /// Per-slot importing flags shared with `kv_store`'s own copy, so a
    /// migration driver task can mark/clear slots without going through
    /// the store.
    pub slot_mask: Arc<SlotMask>,
    /// This node's replication role, so slot-migration handlers can reject
    /// a request on a replica with `NotPrimary`.
    pub is_replica: bool,
    pub cluster_config: crate::cluster::config::ClusterConfig,
}

// Request/Response types for REST API
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SetResponse {
    pub success: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GetResponse {
    String(String),
    Bytes(Vec<u8>),
    NotFound(serde_json::Value),
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_keys: usize,
    pub total_memory_bytes: usize,
    pub operations: OperationStats,
    pub hit_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct OperationStats {
    pub gets: u64,
    pub sets: u64,
    pub dels: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "synap",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// SET endpoint - store a key-value pair
pub async fn kv_set(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, SynapError> {
    debug!("REST SET key={}", req.key);

    let value_bytes = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::SerializationError(e.to_string()))?;

    state
        .kv_store
        .set(&req.key, value_bytes.clone(), req.ttl)
        .await?;

    if let Some(ref persistence) = state.persistence {
        if let Err(e) = persistence
            .log_kv_set(req.key.clone(), value_bytes, req.ttl)
            .await
        {
            error!("Failed to log KV SET to WAL: {}", e);
        }
    }

    Ok(Json(SetResponse {
        success: true,
        key: req.key,
    }))
}

/// GET endpoint - retrieve a value by key
pub async fn kv_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Result<Json<GetResponse>, SynapError> {
    let return_type = params.get("type").map(|s| s.as_str()).unwrap_or("string");
    debug!("REST GET key={}, type={}", key, return_type);

    let value_bytes = state.kv_store.get(&key).await?;

    if let Some(bytes) = value_bytes {
        match return_type {
            "bytes" => Ok(Json(GetResponse::Bytes(bytes))),
            _ => {
                let value_str = String::from_utf8(bytes)
                    .unwrap_or_else(|e| format!("<binary data: {} bytes>", e.as_bytes().len()));
                Ok(Json(GetResponse::String(value_str)))
            }
        }
    } else {
        Ok(Json(GetResponse::NotFound(
            serde_json::json!({"error": "Key not found"}),
        )))
    }
}

/// DELETE endpoint - delete a key
pub async fn kv_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, SynapError> {
    debug!("REST DELETE key={}", key);

    let deleted = state.kv_store.delete(&key).await?;

    if deleted {
        if let Some(ref persistence) = state.persistence {
            if let Err(e) = persistence.log_kv_del(vec![key.clone()]).await {
                error!("Failed to log KV DELETE to WAL: {}", e);
            }
        }
    }

    Ok(Json(DeleteResponse { deleted, key }))
}

/// SNAPSHOT endpoint - manually trigger a snapshot
pub async fn trigger_snapshot(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!("REST SNAPSHOT TRIGGER");

    if let Some(ref persistence) = state.persistence {
        persistence
            .maybe_snapshot(&state.kv_store, Some(&state.hash_store))
            .await
            .map_err(|e| SynapError::InternalError(format!("Snapshot failed: {}", e)))?;

        Ok(Json(serde_json::json!({
            "success": true,
            "message": "Snapshot triggered successfully"
        })))
    } else {
        Err(SynapError::InvalidRequest(
            "Persistence is disabled".to_string(),
        ))
    }
}

/// STATS endpoint - get store statistics
pub async fn kv_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, SynapError> {
    debug!("REST STATS");

    let stats = state.kv_store.stats().await;

    Ok(Json(StatsResponse {
        total_keys: stats.total_keys,
        total_memory_bytes: stats.total_memory_bytes,
        operations: OperationStats {
            gets: stats.gets,
            sets: stats.sets,
            dels: stats.dels,
            hits: stats.hits,
            misses: stats.misses,
        },
        hit_rate: stats.hit_rate(),
    }))
}

// ==================== String Extension REST Endpoints ====================

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AppendResponse {
    pub length: usize,
}

#[derive(Debug, Deserialize)]
pub struct SetRangeRequest {
    pub offset: usize,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SetRangeResponse {
    pub length: usize,
}

#[derive(Debug, Serialize)]
pub struct StrlenResponse {
    pub length: usize,
}

#[derive(Debug, Deserialize)]
pub struct GetSetRequest {
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GetSetResponse {
    Value(String),
    Null,
}

#[derive(Debug, Deserialize)]
pub struct MSetNxRequest {
    pub pairs: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Serialize)]
pub struct MSetNxResponse {
    pub success: bool,
}

/// APPEND endpoint - append bytes to existing value or create new key
pub async fn kv_append(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<AppendResponse>, SynapError> {
    debug!("REST APPEND key={}", key);

    let value_bytes = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::SerializationError(e.to_string()))?;

    let length = state.kv_store.append(&key, value_bytes).await?;

    if let Some(ref persistence) = state.persistence {
        if let Err(e) = persistence.log_kv_set(key.clone(), vec![], None).await {
            error!("Failed to log KV APPEND to WAL: {}", e);
        }
    }

    Ok(Json(AppendResponse { length }))
}

/// GETRANGE endpoint - get substring by range with negative indices
pub async fn kv_getrange(
    State(state): State<AppState>,
    Path(key): Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Result<Json<GetResponse>, SynapError> {
    let start = params
        .get("start")
        .and_then(|s| s.parse::<isize>().ok())
        .ok_or_else(|| SynapError::InvalidRequest("start parameter required".to_string()))?;
    let end = params
        .get("end")
        .and_then(|s| s.parse::<isize>().ok())
        .ok_or_else(|| SynapError::InvalidRequest("end parameter required".to_string()))?;

    debug!("REST GETRANGE key={}, start={}, end={}", key, start, end);

    let range_bytes = state.kv_store.getrange(&key, start, end).await?;

    if range_bytes.is_empty() {
        Ok(Json(GetResponse::NotFound(
            serde_json::json!({"error": "Key not found or range empty"}),
        )))
    } else {
        let value_str = String::from_utf8(range_bytes.clone())
            .unwrap_or_else(|_| format!("<binary data: {} bytes>", range_bytes.len()));
        Ok(Json(GetResponse::String(value_str)))
    }
}

/// SETRANGE endpoint - overwrite substring at offset
pub async fn kv_setrange(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetRangeRequest>,
) -> Result<Json<SetRangeResponse>, SynapError> {
    debug!("REST SETRANGE key={}, offset={}", key, req.offset);

    let value_bytes = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::SerializationError(e.to_string()))?;

    let length = state
        .kv_store
        .setrange(&key, req.offset, value_bytes)
        .await?;

    if let Some(ref persistence) = state.persistence {
        if let Err(e) = persistence.log_kv_set(key.clone(), vec![], None).await {
            error!("Failed to log KV SETRANGE to WAL: {}", e);
        }
    }

    Ok(Json(SetRangeResponse { length }))
}

/// STRLEN endpoint - get length of string value in bytes
pub async fn kv_strlen(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<StrlenResponse>, SynapError> {
    debug!("REST STRLEN key={}", key);

    let length = state.kv_store.strlen(&key).await?;

    Ok(Json(StrlenResponse { length }))
}

/// GETSET endpoint - atomically get current value and set new one
pub async fn kv_getset(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<GetSetRequest>,
) -> Result<Json<GetSetResponse>, SynapError> {
    debug!("REST GETSET key={}", key);

    let value_bytes = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::SerializationError(e.to_string()))?;

    let old_value = state.kv_store.getset(&key, value_bytes.clone()).await?;

    if let Some(ref persistence) = state.persistence {
        if let Err(e) = persistence.log_kv_set(key.clone(), value_bytes, None).await {
            error!("Failed to log KV GETSET to WAL: {}", e);
        }
    }

    if let Some(old_bytes) = old_value {
        let old_str = String::from_utf8(old_bytes.clone())
            .unwrap_or_else(|_| format!("<binary data: {} bytes>", old_bytes.len()));
        Ok(Json(GetSetResponse::Value(old_str)))
    } else {
        Ok(Json(GetSetResponse::Null))
    }
}

/// MSETNX endpoint - multi-set only if ALL keys don't exist (atomic)
pub async fn kv_msetnx(
    State(state): State<AppState>,
    Json(req): Json<MSetNxRequest>,
) -> Result<Json<MSetNxResponse>, SynapError> {
    debug!("REST MSETNX count={}", req.pairs.len());

    let pairs: Vec<(String, Vec<u8>)> = req
        .pairs
        .into_iter()
        .map(|(key, value)| {
            let value_bytes = serde_json::to_vec(&value)
                .map_err(|e| SynapError::SerializationError(e.to_string()))?;
            Ok((key, value_bytes))
        })
        .collect::<Result<Vec<_>, SynapError>>()?;

    let success = state.kv_store.msetnx(pairs.clone()).await?;

    if success {
        if let Some(ref persistence) = state.persistence {
            for (key, value_bytes) in pairs {
                if let Err(e) = persistence.log_kv_set(key, value_bytes, None).await {
                    error!("Failed to log KV MSETNX to WAL: {}", e);
                }
            }
        }
    }

    Ok(Json(MSetNxResponse { success }))
}

// ==================== Hash REST Endpoints ====================

#[derive(Debug, Deserialize)]
pub struct HashSetRequest {
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct HashMSetRequest {
    pub fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct HashMGetRequest {
    pub fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HashDelRequest {
    pub fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HashIncrByRequest {
    pub field: String,
    pub increment: i64,
}

#[derive(Debug, Deserialize)]
pub struct HashIncrByFloatRequest {
    pub field: String,
    pub increment: f64,
}

#[derive(Debug, Serialize)]
pub struct HashSetResponse {
    pub created: bool,
    pub key: String,
    pub field: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HashGetResponse {
    Found(serde_json::Value),
    NotFound { found: bool },
}

#[derive(Debug, Serialize)]
pub struct HashDelResponse {
    pub deleted: usize,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct HashStatsResponse {
    pub total_hashes: usize,
    pub total_fields: usize,
    pub operations: HashOperationStats,
}

#[derive(Debug, Serialize)]
pub struct HashOperationStats {
    pub hset_count: u64,
    pub hget_count: u64,
    pub hdel_count: u64,
}

/// POST /hash/:key/set - Set a field in hash
pub async fn hash_set(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashSetRequest>,
) -> Result<Json<HashSetResponse>, SynapError> {
    debug!("REST HSET key={} field={}", key, req.field);

    let value = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::InvalidValue(format!("Failed to serialize value: {}", e)))?;

    let created = state.hash_store.hset(&key, &req.field, value)?;

    Ok(Json(HashSetResponse {
        created,
        key,
        field: req.field,
    }))
}

/// GET /hash/:key/:field - Get a field from hash
pub async fn hash_get(
    State(state): State<AppState>,
    Path((key, field)): Path<(String, String)>,
) -> Result<Json<HashGetResponse>, SynapError> {
    debug!("REST HGET key={} field={}", key, field);

    match state.hash_store.hget(&key, &field)? {
        Some(value) => {
            let json_value: serde_json::Value =
                serde_json::from_slice(&value).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&value).to_string())
                });
            Ok(Json(HashGetResponse::Found(json_value)))
        }
        None => Ok(Json(HashGetResponse::NotFound { found: false })),
    }
}

/// GET /hash/:key/getall - Get all fields from hash
pub async fn hash_getall(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HashMap<String, serde_json::Value>>, SynapError> {
    debug!("REST HGETALL key={}", key);

    let all = state.hash_store.hgetall(&key)?;

    let result: HashMap<String, serde_json::Value> = all
        .into_iter()
        .map(|(k, v)| {
            let json_value: serde_json::Value = serde_json::from_slice(&v).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&v).to_string())
            });
            (k, json_value)
        })
        .collect();

    Ok(Json(result))
}

/// GET /hash/:key/keys - Get all field names from hash
pub async fn hash_keys(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<String>>, SynapError> {
    debug!("REST HKEYS key={}", key);
    let keys = state.hash_store.hkeys(&key)?;
    Ok(Json(keys))
}

/// GET /hash/:key/vals - Get all values from hash
pub async fn hash_vals(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<serde_json::Value>>, SynapError> {
    debug!("REST HVALS key={}", key);

    let values = state.hash_store.hvals(&key)?;
    let result: Vec<serde_json::Value> = values
        .into_iter()
        .map(|v| {
            serde_json::from_slice(&v).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&v).to_string())
            })
        })
        .collect();

    Ok(Json(result))
}

/// GET /hash/:key/len - Get number of fields in hash
pub async fn hash_len(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!("REST HLEN key={}", key);
    let len = state.hash_store.hlen(&key)?;
    Ok(Json(json!({ "length": len })))
}

/// POST /hash/:key/mset - Set multiple fields
pub async fn hash_mset(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashMSetRequest>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!("REST HMSET key={} fields={}", key, req.fields.len());

    let fields: HashMap<String, Vec<u8>> = req
        .fields
        .into_iter()
        .map(|(k, v)| {
            let bytes = serde_json::to_vec(&v).map_err(|e| {
                SynapError::InvalidValue(format!("Failed to serialize field {}: {}", k, e))
            })?;
            Ok((k, bytes))
        })
        .collect::<Result<HashMap<_, _>, SynapError>>()?;

    state.hash_store.hmset(&key, fields)?;

    Ok(Json(json!({ "success": true, "key": key })))
}

/// POST /hash/:key/mget - Get multiple fields
pub async fn hash_mget(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashMGetRequest>,
) -> Result<Json<Vec<Option<serde_json::Value>>>, SynapError> {
    debug!("REST HMGET key={} fields={:?}", key, req.fields);

    let values = state.hash_store.hmget(&key, &req.fields)?;

    let result: Vec<Option<serde_json::Value>> = values
        .into_iter()
        .map(|opt_v| {
            opt_v.map(|v| {
                serde_json::from_slice(&v).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&v).to_string())
                })
            })
        })
        .collect();

    Ok(Json(result))
}

/// DELETE /hash/:key - Delete fields from hash
pub async fn hash_del(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashDelRequest>,
) -> Result<Json<HashDelResponse>, SynapError> {
    debug!("REST HDEL key={} fields={:?}", key, req.fields);

    let deleted = state.hash_store.hdel(&key, &req.fields)?;

    Ok(Json(HashDelResponse { deleted, key }))
}

/// GET /hash/:key/:field/exists - Check if field exists
pub async fn hash_exists(
    State(state): State<AppState>,
    Path((key, field)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!("REST HEXISTS key={} field={}", key, field);

    let exists = state.hash_store.hexists(&key, &field)?;

    Ok(Json(json!({ "exists": exists })))
}

/// POST /hash/:key/incrby - Increment field by integer
pub async fn hash_incrby(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashIncrByRequest>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!(
        "REST HINCRBY key={} field={} increment={}",
        key, req.field, req.increment
    );

    let new_value = state.hash_store.hincrby(&key, &req.field, req.increment)?;

    Ok(Json(json!({ "value": new_value })))
}

/// POST /hash/:key/incrbyfloat - Increment field by float
pub async fn hash_incrbyfloat(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashIncrByFloatRequest>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!(
        "REST HINCRBYFLOAT key={} field={} increment={}",
        key, req.field, req.increment
    );

    let new_value = state
        .hash_store
        .hincrbyfloat(&key, &req.field, req.increment)?;

    Ok(Json(json!({ "value": new_value })))
}

/// POST /hash/:key/setnx - Set field only if it doesn't exist
pub async fn hash_setnx(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<HashSetRequest>,
) -> Result<Json<serde_json::Value>, SynapError> {
    debug!("REST HSETNX key={} field={}", key, req.field);

    let value = serde_json::to_vec(&req.value)
        .map_err(|e| SynapError::InvalidValue(format!("Failed to serialize value: {}", e)))?;

    let created = state.hash_store.hsetnx(&key, &req.field, value)?;

    Ok(Json(
        json!({ "created": created, "key": key, "field": req.field }),
    ))
}

/// GET /hash/stats - Get hash statistics
pub async fn hash_stats(
    State(state): State<AppState>,
) -> Result<Json<HashStatsResponse>, SynapError> {
    debug!("REST HASH STATS");

    let stats = state.hash_store.stats();

    Ok(Json(HashStatsResponse {
        total_hashes: stats.total_hashes,
        total_fields: stats.total_fields,
        operations: HashOperationStats {
            hset_count: stats.hset_count,
            hget_count: stats.hget_count,
            hdel_count: stats.hdel_count,
        },
    }))
}

// ==================== Cluster Slot Migration REST Endpoints ====================

#[derive(Debug, Deserialize)]
pub struct MigrateSlotsRequest {
    /// Slot range tokens, e.g. ["0-100", "500"], same grammar as `CLUSTER MIGRATESLOTS`.
    pub slots: Vec<String>,
    pub target_node: String,
    #[serde(default)]
    pub db_index: u32,
}

#[derive(Debug, Serialize)]
pub struct MigrateSlotsResponse {
    pub job_name: String,
    pub slots: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelSlotMigrationsRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelSlotMigrationsResponse {
    pub cancelled: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotMigrationReport {
    pub name: String,
    pub role: &'static str,
    pub slots: String,
    pub source_node: String,
    pub target_node: String,
    pub state: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SlotMigrationsResponse {
    pub active: Vec<SlotMigrationReport>,
    pub terminal: Vec<SlotMigrationReport>,
}

fn parse_slots(tokens: &[String]) -> Result<SlotSet, SynapError> {
    let refs: Vec<&str> = tokens.iter().map(|s| s.as_str()).collect();
    SlotSet::parse(&refs).map_err(SynapError::from)
}

/// POST /cluster/migrate-slots - start exporting a set of slots to another node.
///
/// Registers the export-side job and persists it to the AOF so a restart
/// mid-migration can reconstruct its outcome; the actual snapshot and
/// incremental transfer run as a background task driven off the registry.
pub async fn cluster_migrate_slots(
    State(state): State<AppState>,
    Json(req): Json<MigrateSlotsRequest>,
) -> Result<Json<MigrateSlotsResponse>, SynapError> {
    debug!(
        "REST CLUSTER MIGRATESLOTS slots={:?} target={}",
        req.slots, req.target_node
    );

    if state.is_replica {
        return Err(SynapError::SlotMigration(SlotMigrationError::NotPrimary));
    }

    if req.target_node == state.topology.my_node_id() {
        return Err(SynapError::SlotMigration(SlotMigrationError::TargetIsSelf));
    }

    let slot_set = parse_slots(&req.slots)?;

    if slot_set.spans_multiple_owners(|slot| state.topology.get_slot_owner(slot).ok()) {
        return Err(SynapError::SlotMigration(
            SlotMigrationError::SpansMultipleShards,
        ));
    }

    for slot in slot_set.iter_slots() {
        let owner = state
            .topology
            .get_slot_owner(slot)
            .map_err(|_| SynapError::SlotMigration(SlotMigrationError::SlotUnserved(slot)))?;
        if owner != state.topology.my_node_id() {
            return Err(SynapError::SlotMigration(
                SlotMigrationError::SlotsNotServedByThisNode,
            ));
        }
    }

    let job_name = format!("export-{}", uuid::Uuid::new_v4());
    let meta = JobMeta::new(
        job_name.clone(),
        slot_set.clone(),
        state.topology.my_node_id().to_string(),
        req.target_node.clone(),
        req.db_index,
    );

    let handle = state
        .registry
        .register_export(meta.clone())
        .map_err(SynapError::from)?;

    if let Some(ref persistence) = state.persistence {
        if let Err(e) = persistence
            .log_migration_upserted(JobRole::Export, meta.clone())
            .await
        {
            error!("Failed to log migration job registration to WAL: {}", e);
        }
    }

    let target = state.topology.get_node(&req.target_node).map_err(|_| {
        SynapError::SlotMigration(SlotMigrationError::Other(format!(
            "unknown target node: {}",
            req.target_node
        )))
    })?;
    let target_sync_addr =
        std::net::SocketAddr::new(target.address.ip(), state.cluster_config.sync_channel_port);

    let ctx = MigrationContext {
        store: state.kv_store.clone(),
        topology: state.topology.clone(),
        slot_mask: state.slot_mask.clone(),
        registry: state.registry.clone(),
        is_replica: state.is_replica,
        liveness_timeout: state.cluster_config.repl_timeout(),
        pause_deadline: state.cluster_config.manual_failover_timeout(),
    };
    spawn_export_driver(handle, ctx, target_sync_addr);

    Ok(Json(MigrateSlotsResponse {
        job_name,
        slots: slot_set.to_text(),
    }))
}

/// POST /cluster/cancel-slot-migrations - cancel every job this node is driving.
pub async fn cluster_cancel_slot_migrations(
    State(state): State<AppState>,
    Json(req): Json<CancelSlotMigrationsRequest>,
) -> Result<Json<CancelSlotMigrationsResponse>, SynapError> {
    let reason = req.reason.unwrap_or_else(|| "cancelled by operator".to_string());
    debug!("REST CLUSTER CANCELSLOTMIGRATIONS reason={}", reason);

    if !state.registry.has_active_jobs() {
        return Err(SynapError::SlotMigration(
            SlotMigrationError::NoMigrationsOngoing,
        ));
    }

    let cancelled = state.registry.cancel_all(&reason);

    // cancel_all already moved each job into the terminal log; pull the
    // freshly written records back out so the WAL reflects the same outcome.
    if let Some(ref persistence) = state.persistence {
        for record in state.registry.terminal_log() {
            if cancelled.contains(&record.meta.name) {
                if let Err(e) = persistence
                    .log_migration_terminal(record.role, record.outcome, record.meta)
                    .await
                {
                    error!("Failed to log migration cancellation to WAL: {}", e);
                }
            }
        }
    }

    Ok(Json(CancelSlotMigrationsResponse { cancelled }))
}

/// GET /cluster/slot-migrations - report active and recently finished jobs.
pub async fn cluster_slot_migrations(
    State(state): State<AppState>,
) -> Result<Json<SlotMigrationsResponse>, SynapError> {
    debug!("REST CLUSTER GETSLOTMIGRATIONS");

    let mut active = Vec::new();

    for meta in state.registry.list_exports() {
        active.push(SlotMigrationReport {
            name: meta.name.clone(),
            role: "export",
            slots: meta.slots.to_text(),
            source_node: meta.source_node.clone(),
            target_node: meta.target_node.clone(),
            state: "in-progress",
            message: meta.message.clone(),
        });
    }

    for meta in state.registry.list_imports() {
        active.push(SlotMigrationReport {
            name: meta.name.clone(),
            role: "import",
            slots: meta.slots.to_text(),
            source_node: meta.source_node.clone(),
            target_node: meta.target_node.clone(),
            state: "in-progress",
            message: meta.message.clone(),
        });
    }

    let terminal = state
        .registry
        .terminal_log()
        .into_iter()
        .map(|record| SlotMigrationReport {
            name: record.meta.name.clone(),
            role: match record.role {
                JobRole::Export => "export",
                JobRole::Import => "import",
            },
            slots: record.meta.slots.to_text(),
            source_node: record.meta.source_node.clone(),
            target_node: record.meta.target_node.clone(),
            state: match record.outcome {
                JobOutcome::Success => "success",
                JobOutcome::Failed => "failed",
                JobOutcome::Cancelled => "cancelled",
            },
            message: record.meta.message.clone(),
        })
        .collect();

    Ok(Json(SlotMigrationsResponse { active, terminal }))
}
