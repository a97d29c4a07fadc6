//! Sarpras Daemon - Main Entry Point
//!
//! Wires the SQLite storage, the flock-guarded status files, the drive
//! relay and the JSON-RPC server, then ticks the automatic backup schedule
//! until Ctrl+C.

mod config;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use config::{DaemonConfig, LogFormat};
use sarpras_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use sarpras_core::application::worker::constants::UPLOAD_ATTEMPT_TIMEOUT;
use sarpras_core::application::{
    shutdown_channel, AutoBackupRunner, AutoBackupScheduler, QueueConfig, QueueService,
    RetryPolicy, RetryingUploader, StallRecovery, TaskBackupLauncher,
};
use sarpras_core::port::id_provider::UuidProvider;
use sarpras_core::port::time_provider::SystemTimeProvider;
use sarpras_core::port::{
    FileUploader, InventoryRepository, SettingsRepository, StatusStore, TimeProvider,
};
use sarpras_infra_sqlite::{
    create_pool, run_migrations, SqliteInventoryRepository, SqliteSettingsRepository,
};
use sarpras_infra_system::{DriveRelayTransport, FileStatusStore, ZipArchiver};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env()?;

    // 1. Logging (JSON in production, pretty for development)
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("sarpras=info"))?;
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };
    let otel_layer = telemetry::otel_layer()?;
    let otel_active = otel_layer.is_some();
    tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!("Sarpras daemon v{} starting...", VERSION);
    if otel_active {
        info!("OpenTelemetry export enabled");
    } else if telemetry::endpoint().is_some() {
        warn!("OTEL_EXPORTER_OTLP_ENDPOINT set but feature 'telemetry' not enabled");
    }
    if config.relay_url.is_empty() {
        warn!("SARPRAS_RELAY_URL not set: every upload will fail");
    }

    // 2. Database
    info!(db_path = %config.db_path, "Initializing database...");
    let pool = create_pool(&config.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store: Arc<dyn StatusStore> = Arc::new(FileStatusStore::new(&config.temp_dir)?);
    let inventory: Arc<dyn InventoryRepository> =
        Arc::new(SqliteInventoryRepository::new(pool.clone()));
    let settings: Arc<dyn SettingsRepository> =
        Arc::new(SqliteSettingsRepository::new(pool.clone()));
    let transport = Arc::new(DriveRelayTransport::new(
        config.relay_url.clone(),
        config.relay_secret.clone(),
        UPLOAD_ATTEMPT_TIMEOUT,
    )?);
    let uploader: Arc<dyn FileUploader> =
        Arc::new(RetryingUploader::new(transport, RetryPolicy::default()));
    let queue_config = Arc::new(
        QueueConfig::new(config.drive_folder_id.clone(), &config.upload_dir)
            .with_stall_threshold(config.stall_threshold),
    );

    // 4. Crash recovery
    info!("Running stall recovery...");
    let recovery = StallRecovery::new(
        store.clone(),
        settings.clone(),
        time_provider.clone(),
        Some(config.stall_threshold),
    );
    match recovery.recover().await {
        Ok(report) => info!(
            jobs_reset = report.jobs_reset,
            backup_interrupted = report.backup_interrupted,
            "Stall recovery completed"
        ),
        Err(e) => error!(error = %e, "Stall recovery failed"),
    }

    // 5. Services
    let queue = Arc::new(QueueService::new(
        store.clone(),
        inventory.clone(),
        uploader.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
        queue_config.clone(),
    ));
    let runner = Arc::new(AutoBackupRunner::new(
        store,
        inventory,
        settings.clone(),
        uploader,
        Arc::new(ZipArchiver::new()),
        time_provider.clone(),
        queue_config,
    ));
    let scheduler = Arc::new(AutoBackupScheduler::new(
        settings.clone(),
        Arc::new(TaskBackupLauncher::new(runner)),
        time_provider,
        config.utc_offset,
    ));

    // 6. JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            port: config.rpc_port,
            ..Default::default()
        },
        RpcHandler::new(queue, scheduler.clone(), settings),
    );
    let (rpc_handle, rpc_addr) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 7. Backup ticker
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let ticker = tokio::spawn({
        let scheduler = scheduler.clone();
        let period = config.backup_tick;
        async move { scheduler.run(period, shutdown_rx).await }
    });

    info!(addr = %rpc_addr, "System ready. Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), ticker).await;

    info!("Shutdown complete.");
    Ok(())
}
