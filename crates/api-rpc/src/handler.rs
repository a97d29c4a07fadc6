//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC params to the queue service and the backup
//! scheduler.

use crate::error::to_rpc_error;
use crate::types::{ClearResponse, KindRequest, SettingsRequest, StartRequest, TickResponse};
use jsonrpsee::types::ErrorObjectOwned;
use sarpras_core::application::{AutoBackupScheduler, QueueService};
use sarpras_core::domain::{BackupSettings, StatusDocument};
use sarpras_core::port::SettingsRepository;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    queue: Arc<QueueService>,
    scheduler: Arc<AutoBackupScheduler>,
    settings: Arc<dyn SettingsRepository>,
}

impl RpcHandler {
    pub fn new(
        queue: Arc<QueueService>,
        scheduler: Arc<AutoBackupScheduler>,
        settings: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self {
            queue,
            scheduler,
            settings,
        }
    }

    /// queue.start.v1
    pub async fn start(&self, params: StartRequest) -> Result<StatusDocument, ErrorObjectOwned> {
        let kind = params.kind();
        let doc = self.queue.initialize(params).await.map_err(to_rpc_error)?;
        info!(kind = %kind, total = doc.total, "Queue started");
        Ok(doc)
    }

    /// queue.step.v1
    pub async fn step(&self, params: KindRequest) -> Result<StatusDocument, ErrorObjectOwned> {
        self.queue.step_once(params.kind).await.map_err(to_rpc_error)
    }

    /// queue.status.v1 - the document verbatim, or `{"status":"idle"}`
    pub async fn status(&self, params: KindRequest) -> Result<Value, ErrorObjectOwned> {
        let doc = self.queue.peek(params.kind).await.map_err(to_rpc_error)?;
        match doc {
            Some(doc) => serde_json::to_value(doc).map_err(|e| to_rpc_error(e.into())),
            None => Ok(json!({ "status": "idle" })),
        }
    }

    /// queue.clear.v1
    pub async fn clear(&self, params: KindRequest) -> Result<ClearResponse, ErrorObjectOwned> {
        self.queue.clear(params.kind).await.map_err(to_rpc_error)
    }

    /// autobackup.tick.v1
    pub async fn tick(&self) -> Result<TickResponse, ErrorObjectOwned> {
        let outcome = self.scheduler.tick().await.map_err(to_rpc_error)?;
        Ok(TickResponse { outcome })
    }

    /// autobackup.settings.v1 - update the schedule fields given, return the settings.
    /// Run state (`last_run`, `state`, `last_error`) is owned by the scheduler.
    pub async fn settings(
        &self,
        params: SettingsRequest,
    ) -> Result<BackupSettings, ErrorObjectOwned> {
        let mut settings = self
            .settings
            .load_backup_settings()
            .await
            .map_err(to_rpc_error)?;
        if params.is_empty() {
            return Ok(settings);
        }

        if let Some(enabled) = params.enabled {
            settings.enabled = enabled;
        }
        if let Some(frequency) = params.frequency {
            settings.frequency = frequency;
        }
        if let Some(day) = params.day {
            settings.day = day;
        }
        if let Some(time) = params.time {
            settings.time = time;
        }
        settings.validate().map_err(|e| to_rpc_error(e.into()))?;
        self.settings
            .save_backup_schedule(&settings)
            .await
            .map_err(to_rpc_error)?;
        // Run state may have moved under a tick while this request ran
        let settings = self
            .settings
            .load_backup_settings()
            .await
            .map_err(to_rpc_error)?;

        info!(
            enabled = settings.enabled,
            frequency = %settings.frequency,
            day = settings.day,
            time = %settings.time,
            "Backup schedule updated"
        );
        Ok(settings)
    }
}
