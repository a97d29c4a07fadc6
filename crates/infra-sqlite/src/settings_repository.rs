// SQLite SettingsRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sarpras_core::domain::{BackupSettings, BackupState};
use sarpras_core::error::Result;
use sarpras_core::port::SettingsRepository;
use sqlx::SqlitePool;

pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load_backup_settings(&self) -> Result<BackupSettings> {
        let row: Option<SettingsRow> = sqlx::query_as(
            r#"
            SELECT enabled, frequency, day, time, last_run, state, last_error
            FROM backup_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_settings(),
            None => Ok(BackupSettings::default()),
        }
    }

    async fn save_backup_settings(&self, settings: &BackupSettings) -> Result<()> {
        settings.validate()?;

        sqlx::query(
            r#"
            INSERT INTO backup_settings (id, enabled, frequency, day, time, last_run, state, last_error)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                frequency = excluded.frequency,
                day = excluded.day,
                time = excluded.time,
                last_run = excluded.last_run,
                state = excluded.state,
                last_error = excluded.last_error
            "#,
        )
        .bind(settings.enabled)
        .bind(settings.frequency.as_str())
        .bind(settings.day as i64)
        .bind(settings.time)
        .bind(settings.last_run)
        .bind(settings.state.as_str())
        .bind(&settings.last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn save_backup_schedule(&self, settings: &BackupSettings) -> Result<()> {
        settings.validate()?;

        sqlx::query(
            r#"
            INSERT INTO backup_settings (id, enabled, frequency, day, time)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                frequency = excluded.frequency,
                day = excluded.day,
                time = excluded.time
            "#,
        )
        .bind(settings.enabled)
        .bind(settings.frequency.as_str())
        .bind(settings.day as i64)
        .bind(settings.time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn try_mark_backup_running(
        &self,
        observed_last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query("INSERT OR IGNORE INTO backup_settings (id) VALUES (1)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        // Single statement, so the check and the write cannot interleave
        let result = sqlx::query(
            r#"
            UPDATE backup_settings
            SET state = ?, last_run = ?, last_error = NULL
            WHERE id = 1 AND state != ? AND last_run IS ?
            "#,
        )
        .bind(BackupState::Running.as_str())
        .bind(now)
        .bind(BackupState::Running.as_str())
        .bind(observed_last_run)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_backup_outcome(
        &self,
        state: BackupState,
        last_error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_settings (id, state, last_error)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                last_error = excluded.last_error
            "#,
        )
        .bind(state.as_str())
        .bind(&last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    enabled: bool,
    frequency: String,
    day: i64,
    time: NaiveTime,
    last_run: Option<DateTime<Utc>>,
    state: String,
    last_error: Option<String>,
}

impl SettingsRow {
    fn into_settings(self) -> Result<BackupSettings> {
        Ok(BackupSettings {
            enabled: self.enabled,
            frequency: self.frequency.parse()?,
            day: u32::try_from(self.day).unwrap_or(1),
            time: self.time,
            last_run: self.last_run,
            state: self.state.parse()?,
            last_error: self.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::migrated_pool;
    use sarpras_core::domain::{BackupFrequency, BackupState};
    use sarpras_core::error::AppError;

    #[tokio::test]
    async fn test_defaults_when_never_saved() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);

        let settings = repo.load_backup_settings().await.unwrap();
        assert_eq!(settings, BackupSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);
        let last_run = DateTime::parse_from_rfc3339("2024-05-09T19:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let settings = BackupSettings {
            enabled: true,
            frequency: BackupFrequency::Weekly,
            day: 5,
            time: NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
            last_run: Some(last_run),
            state: BackupState::Error,
            last_error: Some("relay down".to_string()),
        };

        repo.save_backup_settings(&settings).await.unwrap();
        repo.save_backup_settings(&settings).await.unwrap();

        assert_eq!(repo.load_backup_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_schedule_save_keeps_run_state() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);
        let running = BackupSettings {
            enabled: true,
            state: BackupState::Running,
            last_run: Some(Utc::now()),
            ..BackupSettings::default()
        };
        repo.save_backup_settings(&running).await.unwrap();

        let schedule = BackupSettings {
            enabled: false,
            frequency: BackupFrequency::Monthly,
            day: 15,
            ..BackupSettings::default()
        };
        repo.save_backup_schedule(&schedule).await.unwrap();

        let stored = repo.load_backup_settings().await.unwrap();
        assert!(!stored.enabled);
        assert_eq!((stored.frequency, stored.day), (BackupFrequency::Monthly, 15));
        assert_eq!(stored.state, BackupState::Running);
        assert_eq!(stored.last_run, running.last_run);
    }

    #[tokio::test]
    async fn test_mark_running_succeeds_once_per_slot() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);
        let now = DateTime::parse_from_rfc3339("2024-05-09T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // No row yet: the defaults row is created and claimed
        assert!(repo.try_mark_backup_running(None, now).await.unwrap());
        assert!(!repo.try_mark_backup_running(None, now).await.unwrap());

        let stored = repo.load_backup_settings().await.unwrap();
        assert_eq!(stored.state, BackupState::Running);
        assert_eq!(stored.last_run, Some(now));

        // Finished, but a tick that read the old slot still loses
        repo.record_backup_outcome(BackupState::Idle, None)
            .await
            .unwrap();
        assert!(!repo.try_mark_backup_running(None, now).await.unwrap());
        assert!(repo.try_mark_backup_running(Some(now), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_marks_have_one_winner() {
        let (pool, _dir) = migrated_pool().await;
        let repo = std::sync::Arc::new(SqliteSettingsRepository::new(pool));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.try_mark_backup_running(None, now).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_outcome_keeps_schedule() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);
        let schedule = BackupSettings {
            enabled: true,
            frequency: BackupFrequency::Weekly,
            day: 3,
            ..BackupSettings::default()
        };
        repo.save_backup_settings(&schedule).await.unwrap();

        repo.record_backup_outcome(BackupState::Error, Some("relay down".to_string()))
            .await
            .unwrap();

        let stored = repo.load_backup_settings().await.unwrap();
        assert!(stored.enabled);
        assert_eq!((stored.frequency, stored.day), (BackupFrequency::Weekly, 3));
        assert_eq!(stored.state, BackupState::Error);
        assert_eq!(stored.last_error.as_deref(), Some("relay down"));
    }

    #[tokio::test]
    async fn test_invalid_day_rejected() {
        let (pool, _dir) = migrated_pool().await;
        let repo = SqliteSettingsRepository::new(pool);
        let settings = BackupSettings {
            frequency: BackupFrequency::Weekly,
            day: 9,
            ..BackupSettings::default()
        };

        let err = repo.save_backup_settings(&settings).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(_) | AppError::Validation(_)));
    }
}
