// Worker - one queue step per invocation
//
// Each call takes the queue's exclusive lock, performs exactly one unit of
// work (one job, or finalization), writes the document and unlocks. There
// is no in-process queue state: the lock is the only coordination.
//
// The unit runs in its own task. A caller that goes away mid-step (client
// disconnect, timeout) does not abandon a claimed job: the task still
// settles it and commits.

pub mod constants;
mod finalize;
mod job;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::config::QueueConfig;
use crate::domain::{JobOutcome, LogLevel, QueueKind, QueueStatus, StatusDocument};
use crate::error::{AppError, Result};
use crate::port::{FileUploader, InventoryRepository, StatusLock, StatusStore, TimeProvider};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Collects progress messages emitted while a unit of work runs
#[derive(Clone, Default)]
pub(crate) struct ProgressLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ProgressLog {
    pub(crate) fn push(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }

    pub(crate) fn drain_into(&self, doc: &mut StatusDocument, now: chrono::DateTime<chrono::Utc>) {
        let drained = match self.messages.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(_) => Vec::new(),
        };
        for message in drained {
            doc.log(LogLevel::Info, message, now);
        }
    }
}

#[derive(Clone)]
pub struct QueueWorker {
    store: Arc<dyn StatusStore>,
    inventory: Arc<dyn InventoryRepository>,
    uploader: Arc<dyn FileUploader>,
    time_provider: Arc<dyn TimeProvider>,
    config: Arc<QueueConfig>,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        inventory: Arc<dyn InventoryRepository>,
        uploader: Arc<dyn FileUploader>,
        time_provider: Arc<dyn TimeProvider>,
        config: Arc<QueueConfig>,
    ) -> Self {
        Self {
            store,
            inventory,
            uploader,
            time_provider,
            config,
        }
    }

    /// Advance the queue of `kind` by one unit of work and return the
    /// updated document.
    ///
    /// Errors: `Busy` when another worker holds the lock, `NotFound` when
    /// the queue is idle. Per-job failures are recorded on the job;
    /// finalization failures move the document to `error`.
    pub async fn step(&self, kind: QueueKind) -> Result<StatusDocument> {
        if !kind.is_steppable() {
            return Err(AppError::Validation(format!(
                "{} runs as a background task and cannot be stepped",
                kind
            )));
        }

        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run_step(kind).await });
        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(kind = %kind, error = %join_error, "Step task aborted");
                Err(AppError::Internal(format!(
                    "{} step aborted: {}",
                    kind, join_error
                )))
            }
        }
    }

    async fn run_step(&self, kind: QueueKind) -> Result<StatusDocument> {
        let (doc, mut lock) = self.store.lock_and_read(kind).await?;
        let mut doc = match doc {
            Some(doc) => doc,
            None => {
                lock.release().await?;
                return Err(AppError::NotFound(format!("No {} run in progress", kind)));
            }
        };
        if doc.is_terminal() {
            lock.release().await?;
            return Ok(doc);
        }

        // 1. Stall recovery
        let now = self.time_provider.now();
        let reset = doc.recover_stalled(now, self.config.stall_threshold)?;
        if reset > 0 {
            warn!(kind = %kind, reset = reset, "Reset stalled jobs");
        }

        // 2. A fresh processing job belongs to someone else
        if doc.processing_count() > 0 {
            info!(kind = %kind, "Job in flight elsewhere, nothing to do");
            return self.finish(lock, doc, reset > 0).await;
        }

        // 3. Claim the first pending job
        if let Some(index) = doc.next_pending() {
            doc.claim(index, now)?;
            lock.persist(&doc).await?;

            let progress = ProgressLog::default();
            let outcome = self.run_job(&doc, index, &progress).await;

            let now = self.time_provider.now();
            progress.drain_into(&mut doc, now);
            match &outcome {
                JobOutcome::Failed { message } => {
                    warn!(kind = %kind, job = index, error = %message, "Job failed")
                }
                _ => info!(kind = %kind, job = index, "Job succeeded"),
            }
            doc.settle(index, outcome, now)?;
            return self.finish(lock, doc, true).await;
        }

        // 4. Finalization
        match doc.status {
            QueueStatus::Running => {
                doc.begin_finalizing(now)?;
                lock.persist(&doc).await?;
            }
            QueueStatus::Finalizing => {
                doc.log(LogLevel::Warning, "Resuming interrupted finalization", now);
            }
            _ => {}
        }

        let progress = ProgressLog::default();
        let result = self.finalize(&doc, &progress).await;
        let now = self.time_provider.now();
        progress.drain_into(&mut doc, now);
        match result {
            Ok(url) => {
                info!(kind = %kind, url = ?url, "Queue complete");
                doc.complete(url, now)?;
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "Finalization failed");
                doc.fail(format!("Finalization failed: {}", e), now)?;
            }
        }
        self.finish(lock, doc, true).await
    }

    async fn finish(
        &self,
        lock: Box<dyn StatusLock>,
        doc: StatusDocument,
        changed: bool,
    ) -> Result<StatusDocument> {
        if changed {
            lock.commit(&doc).await?;
        } else {
            lock.release().await?;
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests;
