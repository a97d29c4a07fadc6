// Queue Service - entry point for the RPC layer

use crate::application::config::QueueConfig;
use crate::application::initializer::{QueueInitializer, StartRequest};
use crate::application::worker::QueueWorker;
use crate::domain::{QueueKind, StatusDocument};
use crate::error::{AppError, Result};
use crate::port::{FileUploader, IdProvider, InventoryRepository, StatusStore, TimeProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub kind: QueueKind,
    pub removed_document: bool,
    pub removed_artifacts: usize,
}

pub struct QueueService {
    store: Arc<dyn StatusStore>,
    initializer: QueueInitializer,
    worker: QueueWorker,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn StatusStore>,
        inventory: Arc<dyn InventoryRepository>,
        uploader: Arc<dyn FileUploader>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: Arc<QueueConfig>,
    ) -> Self {
        let initializer = QueueInitializer::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            id_provider,
            Arc::clone(&time_provider),
            Arc::clone(&config),
        );
        let worker = QueueWorker::new(Arc::clone(&store), inventory, uploader, time_provider, config);
        Self {
            store,
            initializer,
            worker,
        }
    }

    pub async fn initialize(&self, request: StartRequest) -> Result<StatusDocument> {
        self.initializer.start(request).await
    }

    pub async fn step_once(&self, kind: QueueKind) -> Result<StatusDocument> {
        self.worker.step(kind).await
    }

    /// Latest document, without waiting on a worker holding the lock
    pub async fn peek(&self, kind: QueueKind) -> Result<Option<StatusDocument>> {
        self.store.read(kind).await
    }

    /// Drop a finished (or never started) queue and its temp artifacts.
    /// Refused while the queue is running or finalizing.
    pub async fn clear(&self, kind: QueueKind) -> Result<ClearReport> {
        let (doc, lock) = self.store.lock_and_read(kind).await?;

        if let Some(doc) = &doc {
            if doc.status.is_active() {
                let status = doc.status;
                lock.release().await?;
                return Err(AppError::Conflict(format!(
                    "{} queue is {}, refusing to clear",
                    kind, status
                )));
            }
        }

        lock.discard().await?;
        let removed_artifacts = self.store.remove_artifacts(kind).await?;

        info!(
            kind = %kind,
            removed_document = doc.is_some(),
            removed_artifacts = removed_artifacts,
            "Queue cleared"
        );
        Ok(ClearReport {
            kind,
            removed_document: doc.is_some(),
            removed_artifacts,
        })
    }
}
