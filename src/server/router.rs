use super::handlers::{self, AppState};
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // KV endpoints
        .route("/kv/set", post(handlers::kv_set))
        .route("/kv/get/{key}", get(handlers::kv_get))
        .route("/kv/del/{key}", delete(handlers::kv_delete))
        .route("/kv/stats", get(handlers::kv_stats))
        // String extension endpoints
        .route("/kv/{key}/append", post(handlers::kv_append))
        .route("/kv/{key}/getrange", get(handlers::kv_getrange))
        .route("/kv/{key}/setrange", post(handlers::kv_setrange))
        .route("/kv/{key}/strlen", get(handlers::kv_strlen))
        .route("/kv/{key}/getset", post(handlers::kv_getset))
        .route("/kv/msetnx", post(handlers::kv_msetnx))
        // Hash endpoints
        .route("/hash/{key}/set", post(handlers::hash_set))
        .route("/hash/{key}/getall", get(handlers::hash_getall))
        .route("/hash/{key}/{field}", get(handlers::hash_get))
        .route("/hash/{key}/keys", get(handlers::hash_keys))
        .route("/hash/{key}/vals", get(handlers::hash_vals))
        .route("/hash/{key}/len", get(handlers::hash_len))
        .route("/hash/{key}/mset", post(handlers::hash_mset))
        .route("/hash/{key}/mget", post(handlers::hash_mget))
        .route("/hash/{key}/del", delete(handlers::hash_del))
        .route("/hash/{key}/{field}/exists", get(handlers::hash_exists))
        .route("/hash/{key}/incrby", post(handlers::hash_incrby))
        .route("/hash/{key}/incrbyfloat", post(handlers::hash_incrbyfloat))
        .route("/hash/{key}/setnx", post(handlers::hash_setnx))
        .route("/hash/stats", get(handlers::hash_stats))
        // Persistence endpoints
        .route("/snapshot", post(handlers::trigger_snapshot))
        // Cluster slot migration endpoints
        .route(
            "/cluster/migrate-slots",
            post(handlers::cluster_migrate_slots),
        )
        .route(
            "/cluster/cancel-slot-migrations",
            post(handlers::cluster_cancel_slot_migrations),
        )
        .route(
            "/cluster/slot-migrations",
            get(handlers::cluster_slot_migrations),
        )
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
