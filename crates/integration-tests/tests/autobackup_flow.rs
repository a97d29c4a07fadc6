//! Automatic backup: scheduler tick, detached runner, real zip archive and
//! the settings flag in SQLite

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone};
use sarpras_core::application::{
    AutoBackupRunner, AutoBackupScheduler, QueueConfig, RetryPolicy, RetryingUploader,
    TaskBackupLauncher, TickOutcome,
};
use sarpras_core::domain::{BackupSettings, BackupState, QueueKind, QueueStatus};
use sarpras_core::port::launcher::mocks::CountingLauncher;
use sarpras_core::port::time_provider::mocks::ManualClock;
use sarpras_core::port::uploader::mocks::MockUploader;
use sarpras_core::port::{
    AttemptError, FileUploader, SettingsRepository, StatusStore, TimeProvider, UploadRequest,
    UploadTransport,
};
use sarpras_infra_sqlite::{
    create_pool, run_migrations, SqliteInventoryRepository, SqliteSettingsRepository,
};
use sarpras_infra_system::{FileStatusStore, ZipArchiver};
use sqlx::SqlitePool;
use tempfile::TempDir;

fn wib() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

/// 03:00 local, one hour past the default 02:00 slot
fn clock() -> ManualClock {
    ManualClock::at(
        wib()
            .with_ymd_and_hms(2024, 3, 1, 3, 0, 0)
            .unwrap()
            .with_timezone(&chrono::Utc),
    )
}

struct Env {
    root: TempDir,
    store: Arc<FileStatusStore>,
    settings: Arc<SqliteSettingsRepository>,
    pool: SqlitePool,
}

impl Env {
    async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let db = root.path().join("sarpras.db");
        let pool = create_pool(db.to_str().unwrap()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let items = root.path().join("uploads").join("items");
        std::fs::create_dir_all(&items).unwrap();
        std::fs::write(items.join("bola.jpg"), b"jpeg").unwrap();
        sqlx::query(
            "INSERT INTO items (name, kind, quantity, image) VALUES \
             ('Bola', 'Olahraga', 4, 'bola.jpg'), ('Meja', 'Mebel', 2, 'hilang.jpg')",
        )
        .execute(&pool)
        .await
        .unwrap();

        Self {
            store: Arc::new(FileStatusStore::new(root.path().join("tmp")).unwrap()),
            settings: Arc::new(SqliteSettingsRepository::new(pool.clone())),
            root,
            pool,
        }
    }

    fn runner(&self, uploader: Arc<dyn FileUploader>, clock: &ManualClock) -> Arc<AutoBackupRunner> {
        Arc::new(AutoBackupRunner::new(
            self.store.clone(),
            Arc::new(SqliteInventoryRepository::new(self.pool.clone())),
            self.settings.clone(),
            uploader,
            Arc::new(ZipArchiver::new()),
            Arc::new(clock.clone()),
            Arc::new(QueueConfig::new("folder-1", self.root.path().join("uploads"))),
        ))
    }

    async fn enable_daily(&self) {
        self.settings
            .save_backup_settings(&BackupSettings {
                enabled: true,
                ..BackupSettings::default()
            })
            .await
            .unwrap();
    }

    async fn wait_until_settled(&self) -> BackupSettings {
        for _ in 0..200 {
            let settings = self.settings.load_backup_settings().await.unwrap();
            if settings.state != BackupState::Running {
                return settings;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("automatic backup never settled");
    }

    fn temp_files(&self) -> Vec<String> {
        std::fs::read_dir(self.store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

#[tokio::test]
async fn test_tick_launches_backup_that_uploads_an_archive() {
    let env = Env::new().await;
    env.enable_daily().await;
    let clock = clock();
    let uploader = MockUploader::new();
    let runner = env.runner(Arc::new(uploader.clone()), &clock);
    let scheduler = AutoBackupScheduler::new(
        env.settings.clone(),
        Arc::new(TaskBackupLauncher::new(runner)),
        Arc::new(clock.clone()),
        wib(),
    );

    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Launched);
    let settings = env.wait_until_settled().await;

    assert_eq!(settings.state, BackupState::Idle);
    assert!(settings.last_error.is_none());
    assert_eq!(settings.last_run, Some(clock.now()));

    // Same slot again: not due
    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::NotDue);

    let doc = env.store.read(QueueKind::AutoBackup).await.unwrap().unwrap();
    assert_eq!(doc.status, QueueStatus::Complete);
    let url = doc.csv_url.unwrap();
    assert!(url.starts_with("https://drive.test/autobackup/autobackup_"));
    assert!(doc
        .log
        .iter()
        .any(|entry| entry.message.contains("1 image(s) missing")));

    let archive_name = url.rsplit('/').next().unwrap();
    let bytes = uploader.captured(archive_name).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "accounts.csv",
            "history.csv",
            "images/items/bola.jpg",
            "stock.csv"
        ]
    );
    let mut stock = String::new();
    archive
        .by_name("stock.csv")
        .unwrap()
        .read_to_string(&mut stock)
        .unwrap();
    assert!(stock.contains("Bola,Olahraga,4,"));

    // Work dir and archive are gone
    assert_eq!(env.temp_files(), vec!["autobackup_status.json"]);
}

/// Relay that always rejects
struct RejectingTransport {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl UploadTransport for RejectingTransport {
    async fn send(
        &self,
        request: &UploadRequest,
        _contents: &[u8],
    ) -> Result<String, AttemptError> {
        self.calls.lock().unwrap().push(request.file_name.clone());
        Err(AttemptError::Rejected("storage quota exceeded".into()))
    }
}

#[tokio::test]
async fn test_rejected_upload_marks_backup_failed() {
    let env = Env::new().await;
    let transport = Arc::new(RejectingTransport {
        calls: Mutex::new(Vec::new()),
    });
    let uploader = RetryingUploader::new(
        transport.clone(),
        RetryPolicy::new(3, Duration::from_millis(10)),
    );
    let runner = env.runner(Arc::new(uploader), &clock());

    let doc = runner.run().await.unwrap();

    assert_eq!(doc.status, QueueStatus::Error);
    assert!(doc.end_time.is_some());
    assert_eq!(transport.calls.lock().unwrap().len(), 3);

    let settings = env.settings.load_backup_settings().await.unwrap();
    assert_eq!(settings.state, BackupState::Error);
    let last_error = settings.last_error.unwrap();
    assert!(last_error.starts_with("Automatic backup failed"));
    assert!(last_error.contains("storage quota exceeded"));

    assert_eq!(env.temp_files(), vec!["autobackup_status.json"]);
}

#[tokio::test]
async fn test_overlapping_ticks_on_sqlite_launch_once() {
    let env = Env::new().await;
    env.enable_daily().await;
    let launcher = CountingLauncher::new();
    let schedulers: Vec<_> = (0..4)
        .map(|_| {
            Arc::new(AutoBackupScheduler::new(
                env.settings.clone(),
                Arc::new(launcher.clone()),
                Arc::new(clock()),
                wib(),
            ))
        })
        .collect();

    let handles: Vec<_> = schedulers
        .into_iter()
        .map(|scheduler| tokio::spawn(async move { scheduler.tick().await.unwrap() }))
        .collect();
    let mut launched = 0;
    for handle in handles {
        match handle.await.unwrap() {
            TickOutcome::Launched => launched += 1,
            TickOutcome::AlreadyRunning => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(launched, 1);
    assert_eq!(launcher.launches(), 1);
    let settings = env.settings.load_backup_settings().await.unwrap();
    assert_eq!(settings.state, BackupState::Running);
    assert_eq!(settings.last_run, Some(clock().now()));
}
