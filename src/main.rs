use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use synap_server::cluster::keyspace_view::SlotMask;
use synap_server::cluster::migration_driver::MigrationContext;
use synap_server::cluster::{self, ClusterTopology, MigrationRegistry};
use synap_server::core::HashStore;
use synap_server::persistence::{PersistenceLayer, recover};
use synap_server::replication::NodeRole;
use synap_server::{AppState, KVStore, ServerConfig, create_router};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "synap-server")]
#[command(about = "Synap - High-Performance In-Memory Key-Value Store", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Replication role: master, replica, or standalone
    #[arg(long, value_parser = ["master", "replica", "standalone"])]
    role: Option<String>,

    /// Master address for replica nodes (e.g., "127.0.0.1:5500")
    #[arg(long)]
    master_address: Option<String>,

    /// Listen address for replica connections (master only)
    #[arg(long)]
    replica_listen: Option<String>,

    /// Enable auto-reconnect on replica disconnect
    #[arg(long, default_value_t = true)]
    auto_reconnect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        info!("Config file not found, using defaults");
        ServerConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Configure replication from CLI args
    if let Some(role_str) = &args.role {
        config.replication.enabled = role_str != "standalone";
        config.replication.role = match role_str.as_str() {
            "master" => NodeRole::Master,
            "replica" => NodeRole::Replica,
            _ => NodeRole::Standalone,
        };

        if let Some(master_addr) = &args.master_address {
            config.replication.master_address = master_addr.parse().ok();
        }

        if let Some(replica_listen) = &args.replica_listen {
            config.replication.replica_listen_address = replica_listen.parse().ok();
        }

        config.replication.auto_reconnect = args.auto_reconnect;
    }

    // Initialize tracing based on config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());

    match config.logging.format.as_str() {
        "json" => {
            // JSON format for production (structured logging)
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            // Pretty format for development (human-readable)
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
    }

    info!("Starting Synap Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);
    info!(
        "Log format: {}, level: {}",
        config.logging.format, config.logging.level
    );

    // Migration registry must exist before recovery, since WAL replay
    // reconstructs in-flight import/export jobs into it.
    let registry = MigrationRegistry::new(config.cluster.slot_migration_log_max_len);

    // Cluster topology (this node's view of slot ownership) is built before
    // recovery so a restarted node comes back with a cluster-aware store
    // instead of needing one bolted on afterward.
    let node_id = config
        .cluster
        .node_id
        .clone()
        .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
    let topology = Arc::new(ClusterTopology::new(node_id));
    let slot_mask = Arc::new(SlotMask::new());
    let is_replica = config.replication.role == NodeRole::Replica;

    let kv_config = config.to_kv_config();
    let cluster_for_recovery = config
        .cluster
        .enabled
        .then(|| (topology.clone(), slot_mask.clone()));
    let (kv_store, hash_store, wal_offset) = match recover(
        &config.persistence,
        kv_config.clone(),
        &registry,
        cluster_for_recovery,
    )
    .await
    {
        Ok((kv, hashes, offset)) => {
            info!("Recovery successful, WAL offset: {}", offset);
            (Arc::new(kv), Arc::new(hashes), offset)
        }
        Err(e) => {
            warn!("Recovery failed: {}, starting fresh", e);
            (
                Arc::new(KVStore::new(kv_config.clone())),
                Arc::new(HashStore::new()),
                0,
            )
        }
    };
    let _ = wal_offset;

    // Start TTL cleanup task
    kv_store.start_ttl_cleanup();

    // Create persistence layer if enabled
    let persistence = if config.persistence.enabled {
        match PersistenceLayer::new(config.persistence.clone()).await {
            Ok(layer) => {
                let layer = Arc::new(layer);
                layer
                    .clone()
                    .start_snapshot_task(kv_store.clone(), Some(hash_store.clone()));
                info!("Persistence layer initialized (WAL + Snapshots)");
                Some(layer)
            }
            Err(e) => {
                warn!("Failed to initialize persistence: {}", e);
                None
            }
        }
    } else {
        None
    };

    let registry = Arc::new(registry);

    if config.cluster.enabled {
        let listen_addr = SocketAddr::new(config.cluster.node_address.ip(), config.cluster.sync_channel_port);
        let migration_ctx = MigrationContext {
            store: kv_store.clone(),
            topology: topology.clone(),
            slot_mask: slot_mask.clone(),
            registry: registry.clone(),
            is_replica,
            liveness_timeout: config.cluster.repl_timeout(),
            pause_deadline: config.cluster.manual_failover_timeout(),
        };
        match cluster::run_import_listener(listen_addr, migration_ctx).await {
            Ok(_) => info!(%listen_addr, "SYNCSLOTS listener started"),
            Err(e) => error!(%listen_addr, error = %e, "failed to start SYNCSLOTS listener"),
        }
    }

    let app_state = AppState {
        kv_store,
        hash_store,
        persistence,
        topology,
        registry,
        slot_mask,
        is_replica,
        cluster_config: config.cluster.clone(),
    };

    let app = create_router(app_state);

    // Bind server
    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
