// Settings Repository Port

use crate::domain::{BackupSettings, BackupState};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Stored settings, or the defaults when nothing was saved yet
    async fn load_backup_settings(&self) -> Result<BackupSettings>;

    /// Overwrite the whole row, schedule and run state alike
    async fn save_backup_settings(&self, settings: &BackupSettings) -> Result<()>;

    /// Write only `enabled`, `frequency`, `day` and `time`
    async fn save_backup_schedule(&self, settings: &BackupSettings) -> Result<()>;

    /// Atomically move the flag to running for the slot observed as
    /// `last_run`. Returns false when the flag is already running or
    /// `last_run` changed since it was read.
    async fn try_mark_backup_running(
        &self,
        observed_last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Write only `state` and `last_error`
    async fn record_backup_outcome(
        &self,
        state: BackupState,
        last_error: Option<String>,
    ) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory SettingsRepository for testing
    #[derive(Clone, Default)]
    pub struct InMemorySettings {
        settings: Arc<Mutex<BackupSettings>>,
    }

    impl InMemorySettings {
        pub fn new(settings: BackupSettings) -> Self {
            Self {
                settings: Arc::new(Mutex::new(settings)),
            }
        }

        pub fn current(&self) -> BackupSettings {
            self.settings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SettingsRepository for InMemorySettings {
        async fn load_backup_settings(&self) -> Result<BackupSettings> {
            Ok(self.current())
        }

        async fn save_backup_settings(&self, settings: &BackupSettings) -> Result<()> {
            *self.settings.lock().unwrap() = settings.clone();
            Ok(())
        }

        async fn save_backup_schedule(&self, settings: &BackupSettings) -> Result<()> {
            let mut current = self.settings.lock().unwrap();
            current.enabled = settings.enabled;
            current.frequency = settings.frequency;
            current.day = settings.day;
            current.time = settings.time;
            Ok(())
        }

        async fn try_mark_backup_running(
            &self,
            observed_last_run: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
        ) -> Result<bool> {
            let mut current = self.settings.lock().unwrap();
            if current.state == BackupState::Running || current.last_run != observed_last_run {
                return Ok(false);
            }
            current.state = BackupState::Running;
            current.last_run = Some(now);
            current.last_error = None;
            Ok(true)
        }

        async fn record_backup_outcome(
            &self,
            state: BackupState,
            last_error: Option<String>,
        ) -> Result<()> {
            let mut current = self.settings.lock().unwrap();
            current.state = state;
            current.last_error = last_error;
            Ok(())
        }
    }
}
