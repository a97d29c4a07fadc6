//! Automatic backup scheduler.
//!
//! A tick reads the persisted settings, decides whether a backup is due in
//! the school's local time, marks it running and launches the detached
//! backup task. The daemon calls `run` to tick on an interval; the RPC
//! layer exposes a single tick for external cron triggers.

use crate::application::worker::ShutdownToken;
use crate::domain::BackupState;
use crate::error::Result;
use crate::port::{BackupLauncher, SettingsRepository, TimeProvider};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Disabled,
    NotDue,
    AlreadyRunning,
    Launched,
}

pub struct AutoBackupScheduler {
    settings: Arc<dyn SettingsRepository>,
    launcher: Arc<dyn BackupLauncher>,
    time_provider: Arc<dyn TimeProvider>,
    utc_offset: FixedOffset,
}

impl AutoBackupScheduler {
    pub fn new(
        settings: Arc<dyn SettingsRepository>,
        launcher: Arc<dyn BackupLauncher>,
        time_provider: Arc<dyn TimeProvider>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            settings,
            launcher,
            time_provider,
            utc_offset,
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let settings = self.settings.load_backup_settings().await?;
        if !settings.enabled {
            return Ok(TickOutcome::Disabled);
        }
        if settings.state == BackupState::Running {
            return Ok(TickOutcome::AlreadyRunning);
        }

        let now = self.time_provider.now();
        if !settings.is_due(now.with_timezone(&self.utc_offset)) {
            return Ok(TickOutcome::NotDue);
        }

        // Mark before launching so an overlapping tick sees AlreadyRunning;
        // the mark only lands if nobody claimed this slot since the load
        if !self
            .settings
            .try_mark_backup_running(settings.last_run, now)
            .await?
        {
            info!("Backup slot already claimed by another tick");
            return Ok(TickOutcome::AlreadyRunning);
        }

        if let Err(e) = self.launcher.launch() {
            error!(error = %e, "Failed to launch automatic backup");
            self.settings
                .record_backup_outcome(BackupState::Error, Some(e.to_string()))
                .await?;
            return Err(e);
        }

        info!(
            frequency = %settings.frequency,
            "Automatic backup launched"
        );
        Ok(TickOutcome::Launched)
    }

    /// Tick every `period` until shutdown (background task)
    pub async fn run(&self, period: Duration, mut shutdown: ShutdownToken) {
        info!(period_secs = period.as_secs(), "Backup scheduler started");
        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Backup scheduler tick failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Backup scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackupFrequency, BackupSettings};
    use crate::port::launcher::mocks::CountingLauncher;
    use crate::port::settings_repository::mocks::InMemorySettings;
    use crate::port::time_provider::mocks::ManualClock;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    /// 2024-05-10 03:00 local (WIB)
    fn clock() -> ManualClock {
        let local = NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        ManualClock::at(wib().from_local_datetime(&local).unwrap().with_timezone(&Utc))
    }

    fn daily_at_two() -> BackupSettings {
        BackupSettings {
            enabled: true,
            frequency: BackupFrequency::Daily,
            time: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            ..BackupSettings::default()
        }
    }

    fn scheduler(settings: &InMemorySettings, launcher: &CountingLauncher) -> AutoBackupScheduler {
        AutoBackupScheduler::new(
            Arc::new(settings.clone()),
            Arc::new(launcher.clone()),
            Arc::new(clock()),
            wib(),
        )
    }

    #[tokio::test]
    async fn test_due_backup_is_marked_and_launched_once() {
        let settings = InMemorySettings::new(daily_at_two());
        let launcher = CountingLauncher::new();
        let scheduler = scheduler(&settings, &launcher);

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Launched);
        let stored = settings.current();
        assert_eq!(stored.state, BackupState::Running);
        assert!(stored.last_run.is_some());

        // A second tick while the task runs does nothing
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::AlreadyRunning);
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_launch_once() {
        let settings = InMemorySettings::new(daily_at_two());
        let launcher = CountingLauncher::new();
        let first = scheduler(&settings, &launcher);
        let second = scheduler(&settings, &launcher);

        let (a, b) = tokio::join!(first.tick(), second.tick());
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|outcome| *outcome == TickOutcome::Launched);

        assert_eq!(
            outcomes,
            vec![TickOutcome::AlreadyRunning, TickOutcome::Launched]
        );
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_tick_with_stale_read_loses_slot() {
        let settings = InMemorySettings::new(daily_at_two());
        let launcher = CountingLauncher::new();
        let stale = settings.current();

        // Another tick ran and finished the backup after this one loaded
        let now = clock().now();
        assert!(settings.try_mark_backup_running(stale.last_run, now).await.unwrap());
        settings
            .record_backup_outcome(BackupState::Idle, None)
            .await
            .unwrap();

        assert!(!settings
            .try_mark_backup_running(stale.last_run, now)
            .await
            .unwrap());
        assert_eq!(
            scheduler(&settings, &launcher).tick().await.unwrap(),
            TickOutcome::NotDue
        );
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_not_due_after_todays_run() {
        let mut current = daily_at_two();
        current.last_run = Some(clock().now());
        let settings = InMemorySettings::new(current);
        let launcher = CountingLauncher::new();

        let outcome = scheduler(&settings, &launcher).tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::NotDue);
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_disabled_schedule() {
        let settings = InMemorySettings::default();
        let launcher = CountingLauncher::new();
        let outcome = scheduler(&settings, &launcher).tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_previous_error_does_not_block_next_slot() {
        let mut current = daily_at_two();
        current.state = BackupState::Error;
        current.last_error = Some("relay down".into());
        let settings = InMemorySettings::new(current);
        let launcher = CountingLauncher::new();

        let outcome = scheduler(&settings, &launcher).tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::Launched);
        assert_eq!(settings.current().last_error, None);
    }

    #[tokio::test]
    async fn test_run_ticks_until_shutdown() {
        use crate::application::worker::shutdown_channel;

        let settings = InMemorySettings::new(daily_at_two());
        let launcher = CountingLauncher::new();
        let scheduler = Arc::new(scheduler(&settings, &launcher));
        let (sender, token) = shutdown_channel();

        let task = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run(Duration::from_millis(10), token).await }
        });
        for _ in 0..100 {
            if launcher.launches() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sender.shutdown();
        task.await.unwrap();

        // Later ticks found the backup still running
        assert_eq!(launcher.launches(), 1);
    }
}
