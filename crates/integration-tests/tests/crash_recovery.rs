//! Restart after a crash: stale claims and an interrupted automatic backup
//! left on disk are repaired by the startup recovery pass

use std::sync::Arc;

use chrono::{Duration, Utc};
use sarpras_core::application::{QueueConfig, QueueService, StallRecovery};
use sarpras_core::domain::{
    BackupSettings, BackupState, JobRecord, JobStatus, JobTarget, QueueKind, QueueStatus,
    StatusDocument,
};
use sarpras_core::port::id_provider::UuidProvider;
use sarpras_core::port::time_provider::SystemTimeProvider;
use sarpras_core::port::uploader::mocks::MockUploader;
use sarpras_core::port::{SettingsRepository, StatusStore};
use sarpras_infra_sqlite::{
    create_pool, run_migrations, SqliteInventoryRepository, SqliteSettingsRepository,
};
use sarpras_infra_system::FileStatusStore;

fn proof_job(n: usize, dir: &std::path::Path) -> JobRecord {
    JobRecord::pending(JobTarget::ProofImage {
        transaction_id: format!("TRX-{}", n),
        local_path: dir.join(format!("bukti{}.jpg", n)).to_string_lossy().into_owned(),
    })
}

#[tokio::test]
async fn test_restart_recovers_stalled_work() {
    let root = tempfile::tempdir().unwrap();
    let temp_dir = root.path().join("tmp");
    let proofs = root.path().join("uploads").join("proofs");
    std::fs::create_dir_all(&proofs).unwrap();
    std::fs::write(proofs.join("bukti1.jpg"), b"a").unwrap();
    std::fs::write(proofs.join("bukti2.jpg"), b"b").unwrap();
    let db = root.path().join("sarpras.db");

    // Before the crash: a backup job claimed an hour ago, an automatic
    // backup in flight
    {
        let pool = create_pool(db.to_str().unwrap()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteSettingsRepository::new(pool)
            .save_backup_settings(&BackupSettings {
                enabled: true,
                state: BackupState::Running,
                ..BackupSettings::default()
            })
            .await
            .unwrap();

        let store = FileStatusStore::new(&temp_dir).unwrap();
        let crashed_at = Utc::now() - Duration::hours(1);
        let mut doc = StatusDocument::new(
            QueueKind::Backup,
            vec![proof_job(1, &proofs), proof_job(2, &proofs)],
            crashed_at,
        );
        doc.claim(0, crashed_at).unwrap();
        let (_, lock) = store.lock_and_read(QueueKind::Backup).await.unwrap();
        lock.commit(&doc).await.unwrap();

        let (_, lock) = store.lock_and_read(QueueKind::AutoBackup).await.unwrap();
        lock.commit(&StatusDocument::new(QueueKind::AutoBackup, Vec::new(), crashed_at))
            .await
            .unwrap();
    }

    // After the restart
    let pool = create_pool(db.to_str().unwrap()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store: Arc<FileStatusStore> = Arc::new(FileStatusStore::new(&temp_dir).unwrap());
    let settings = Arc::new(SqliteSettingsRepository::new(pool.clone()));

    let report = StallRecovery::new(
        store.clone(),
        settings.clone(),
        Arc::new(SystemTimeProvider),
        None,
    )
    .recover()
    .await
    .unwrap();

    assert_eq!(report.jobs_reset, 1);
    assert!(report.backup_interrupted);
    assert!(report.busy_kinds.is_empty());

    let backup = store.read(QueueKind::Backup).await.unwrap().unwrap();
    assert_eq!(backup.jobs[0].status, JobStatus::Pending);
    assert_eq!(backup.status, QueueStatus::Running);

    let auto = store.read(QueueKind::AutoBackup).await.unwrap().unwrap();
    assert_eq!(auto.status, QueueStatus::Error);

    let flag = settings.load_backup_settings().await.unwrap();
    assert_eq!(flag.state, BackupState::Error);
    assert_eq!(flag.last_error.as_deref(), Some("Interrupted by daemon restart"));

    // The recovered queue runs to completion from where it stopped
    let uploader = MockUploader::new();
    let service = QueueService::new(
        store.clone(),
        Arc::new(SqliteInventoryRepository::new(pool)),
        Arc::new(uploader.clone()),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
        Arc::new(QueueConfig::new("folder-1", root.path().join("uploads"))),
    );
    let mut doc = service.step_once(QueueKind::Backup).await.unwrap();
    for _ in 0..5 {
        if doc.is_terminal() {
            break;
        }
        doc = service.step_once(QueueKind::Backup).await.unwrap();
    }

    assert_eq!(doc.status, QueueStatus::Complete);
    assert_eq!(doc.success, 2);
    assert!(doc.csv_url.unwrap().contains("/reports/backup_"));
    assert_eq!(uploader.call_count(), 3);
}
