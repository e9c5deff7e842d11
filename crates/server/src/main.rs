use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedwarden_core::{
    create_activity_system, load_config, validate_config, ActivityHandle, ActivityStore,
    AutomationEngine, Config, EngineSettings, LocalFileStat, ProcessProgramRunner,
    QBittorrentClient, RuleSet, SqliteActivityStore,
};
use seedwarden_server::api::create_router;
use seedwarden_server::state::AppState;

/// Version every instance's initial rule set starts at
const INITIAL_RULES_VERSION: u64 = 1;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("SEEDWARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!(
        instances = config.instances.len(),
        database = ?config.database.path,
        "Configuration loaded successfully"
    );

    let config_hash = config_hash(&config);

    // Activity log
    let activity_store: Arc<dyn ActivityStore> = Arc::new(
        SqliteActivityStore::new(&config.database.path)
            .context("Failed to create activity store")?,
    );
    let (activity, activity_writer) =
        create_activity_system(Arc::clone(&activity_store), config.engine.activity_buffer);
    let writer_handle = tokio::spawn(activity_writer.run());
    info!("Activity store initialized");

    let engines = build_engines(&config, &activity)?;
    for engine in &engines {
        engine.start();
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        config_hash,
        engines.iter().cloned(),
        activity_store,
    ));
    let app = create_router(Arc::clone(&state));

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down engines");
    for engine in &engines {
        engine.stop().await;
    }

    // The writer drains once every handle is gone.
    drop(state);
    drop(engines);
    drop(activity);
    if let Err(e) = writer_handle.await {
        warn!("Activity writer task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Short SHA-256 of the serialized config, reported by the health endpoint.
fn config_hash(config: &Config) -> String {
    let config_json = serde_json::to_string(config).unwrap_or_default();
    let digest = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    digest[..16].to_string()
}

/// One engine per configured instance.
fn build_engines(config: &Config, activity: &ActivityHandle) -> Result<Vec<Arc<AutomationEngine>>> {
    let program_ids = config.program_ids();
    let mut engines = Vec::with_capacity(config.instances.len());

    for instance in &config.instances {
        info!(
            instance = %instance.name,
            url = %instance.qbittorrent.url,
            rules = instance.rules.len(),
            "Initializing instance"
        );

        let client = Arc::new(
            QBittorrentClient::new(instance.qbittorrent.clone()).with_context(|| {
                format!("Failed to create qBittorrent client for {}", instance.name)
            })?,
        );
        let programs = Arc::new(ProcessProgramRunner::new(
            config.programs.definitions.iter().cloned(),
            config.programs.allow_list(),
            config.engine.program_timeout_secs,
            activity.clone(),
        ));
        let rules = RuleSet::compile(INITIAL_RULES_VERSION, instance.rules.clone(), &program_ids)
            .with_context(|| format!("Invalid rules for instance {}", instance.name))?;

        let mut engine = AutomationEngine::new(
            instance.name.clone(),
            client.clone(),
            client,
            programs,
            activity.clone(),
            EngineSettings::from_config(&config.engine, instance),
            rules,
        )
        .with_program_ids(program_ids.clone());

        if instance.local_filesystem_access {
            engine = engine.with_file_stat(Arc::new(LocalFileStat));
        } else {
            info!(instance = %instance.name, "No local filesystem access, hardlink checks disabled");
        }

        engines.push(Arc::new(engine));
    }

    Ok(engines)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
