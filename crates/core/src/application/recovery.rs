// Crash recovery on daemon startup
use crate::domain::{BackupState, QueueKind};
use crate::error::Result;
use crate::port::{SettingsRepository, StatusStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::worker::constants::STALL_THRESHOLD;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stalled jobs returned to pending, across all kinds
    pub jobs_reset: usize,
    /// Kinds skipped because another process held their lock
    pub busy_kinds: Vec<QueueKind>,
    /// An automatic backup was marked running when the process died
    pub backup_interrupted: bool,
}

/// Stall recovery service
///
/// On daemon startup, returns abandoned processing jobs to pending and
/// clears a backup flag left `running` by a dead process.
pub struct StallRecovery {
    store: Arc<dyn StatusStore>,
    settings: Arc<dyn SettingsRepository>,
    time_provider: Arc<dyn TimeProvider>,
    threshold: Duration,
}

impl StallRecovery {
    pub fn new(
        store: Arc<dyn StatusStore>,
        settings: Arc<dyn SettingsRepository>,
        time_provider: Arc<dyn TimeProvider>,
        threshold: Option<Duration>,
    ) -> Self {
        Self {
            store,
            settings,
            time_provider,
            threshold: threshold.unwrap_or(STALL_THRESHOLD),
        }
    }

    pub async fn recover(&self) -> Result<RecoveryReport> {
        let now = self.time_provider.now();
        let mut report = RecoveryReport::default();

        info!(
            threshold_secs = self.threshold.as_secs(),
            "Starting stall recovery"
        );

        for kind in QueueKind::ALL {
            let (doc, lock) = match self.store.lock_and_read(kind).await {
                Ok(held) => held,
                Err(e) if e.is_busy() => {
                    warn!(kind = %kind, "Queue locked by another process, skipping recovery");
                    report.busy_kinds.push(kind);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut doc = match doc {
                Some(doc) if !doc.is_terminal() => doc,
                _ => {
                    lock.release().await?;
                    continue;
                }
            };

            // The automatic backup task lives in-process; a running one died with us
            if kind == QueueKind::AutoBackup {
                doc.fail("Interrupted by daemon restart", now)?;
                lock.commit(&doc).await?;
                continue;
            }

            let reset = doc.recover_stalled(now, self.threshold)?;
            if reset > 0 {
                info!(kind = %kind, reset = reset, "Recovered stalled jobs");
                report.jobs_reset += reset;
                lock.commit(&doc).await?;
            } else {
                lock.release().await?;
            }
        }

        let settings = self.settings.load_backup_settings().await?;
        if settings.state == BackupState::Running {
            warn!("Automatic backup was running at shutdown, marking as failed");
            self.settings
                .record_backup_outcome(
                    BackupState::Error,
                    Some("Interrupted by daemon restart".to_string()),
                )
                .await?;
            report.backup_interrupted = true;
        }

        info!(
            jobs_reset = report.jobs_reset,
            backup_interrupted = report.backup_interrupted,
            "Stall recovery finished"
        );
        Ok(report)
    }
}
