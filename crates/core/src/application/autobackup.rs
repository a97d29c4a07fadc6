// Automatic Backup Task
//
// One full cycle: dump the three CSVs, collect item and proof photos, zip
// everything, upload the archive, clean up. Runs detached; its outcome
// lands in the settings flag and the `autobackup` status document.

use crate::application::config::QueueConfig;
use crate::application::report;
use crate::application::worker::constants::{ARTIFACT_STAMP_FORMAT, AUTOBACKUP_SUBFOLDER};
use crate::application::worker::ProgressLog;
use crate::domain::{BackupState, CsvSchema, LogLevel, QueueKind, QueueStatus, StatusDocument};
use crate::error::{AppError, Result};
use crate::port::{
    ArchiveEntry, Archiver, BackupLauncher, FileUploader, InventoryRepository, ProgressFn,
    SettingsRepository, StatusLock, StatusStore, TimeProvider, UploadRequest,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct AutoBackupRunner {
    store: Arc<dyn StatusStore>,
    inventory: Arc<dyn InventoryRepository>,
    settings: Arc<dyn SettingsRepository>,
    uploader: Arc<dyn FileUploader>,
    archiver: Arc<dyn Archiver>,
    time_provider: Arc<dyn TimeProvider>,
    config: Arc<QueueConfig>,
}

impl AutoBackupRunner {
    pub fn new(
        store: Arc<dyn StatusStore>,
        inventory: Arc<dyn InventoryRepository>,
        settings: Arc<dyn SettingsRepository>,
        uploader: Arc<dyn FileUploader>,
        archiver: Arc<dyn Archiver>,
        time_provider: Arc<dyn TimeProvider>,
        config: Arc<QueueConfig>,
    ) -> Self {
        Self {
            store,
            inventory,
            settings,
            uploader,
            archiver,
            time_provider,
            config,
        }
    }

    /// Run one backup cycle and record the outcome in the settings flag
    pub async fn run(&self) -> Result<StatusDocument> {
        let result = self.run_cycle().await;

        let (state, last_error) = match &result {
            Ok(doc) if doc.status == QueueStatus::Complete => (BackupState::Idle, None),
            Ok(doc) => (
                BackupState::Error,
                doc.log.last().map(|entry| entry.message.clone()),
            ),
            Err(e) => (BackupState::Error, Some(e.to_string())),
        };
        self.settings.record_backup_outcome(state, last_error).await?;
        result
    }

    async fn run_cycle(&self) -> Result<StatusDocument> {
        let (_, mut lock) = self.store.lock_and_read(QueueKind::AutoBackup).await?;

        let started = self.time_provider.now();
        let mut doc = StatusDocument::new(QueueKind::AutoBackup, Vec::new(), started);
        lock.persist(&doc).await?;

        let stamp = started.format(ARTIFACT_STAMP_FORMAT).to_string();
        let work_dir = self.store.temp_path(&format!("autobackup_{}", stamp))?;
        let archive = self.store.temp_path(&format!("autobackup_{}.zip", stamp))?;
        let progress = ProgressLog::default();

        let result = self
            .build_and_upload(&work_dir, &archive, &mut doc, &mut lock, &progress)
            .await;

        cleanup(&work_dir, &archive).await;

        let now = self.time_provider.now();
        progress.drain_into(&mut doc, now);
        match result {
            Ok(url) => {
                info!(url = %url, "Automatic backup uploaded");
                doc.complete(Some(url), now)?;
            }
            Err(e) => {
                error!(error = %e, "Automatic backup failed");
                doc.fail(format!("Automatic backup failed: {}", e), now)?;
            }
        }
        lock.commit(&doc).await?;
        Ok(doc)
    }

    async fn build_and_upload(
        &self,
        work_dir: &Path,
        archive: &Path,
        doc: &mut StatusDocument,
        lock: &mut Box<dyn StatusLock>,
        progress: &ProgressLog,
    ) -> Result<String> {
        tokio::fs::create_dir_all(work_dir).await?;

        let items = self.inventory.list_items().await?;
        let history = self.inventory.list_history().await?;
        let accounts = self.inventory.list_accounts().await?;

        let no_links = HashMap::new();
        let dumps = [
            ("stock.csv", CsvSchema::Stock, report::stock_rows(&items, &HashMap::new())),
            ("history.csv", CsvSchema::History, report::history_rows(&history, &no_links)),
            ("accounts.csv", CsvSchema::Accounts, report::account_rows(&accounts)),
        ];
        let mut entries = Vec::new();
        for (name, schema, rows) in dumps {
            let source = work_dir.join(name);
            report::write_csv(&source, schema, &rows)?;
            entries.push(ArchiveEntry {
                name: name.to_string(),
                source,
            });
        }
        doc.log(
            LogLevel::Info,
            format!(
                "Dumped {} items, {} history rows, {} accounts",
                items.len(),
                history.len(),
                accounts.len()
            ),
            self.time_provider.now(),
        );

        let item_images = items.iter().filter_map(|item| item.local_image());
        let proofs = history.iter().filter_map(|entry| entry.local_proof());
        let mut missing = 0;
        missing += collect_images(&mut entries, "images/items", &self.config.item_image_dir, item_images).await;
        missing += collect_images(&mut entries, "images/proofs", &self.config.proof_dir, proofs).await;
        if missing > 0 {
            warn!(missing = missing, "Images missing on disk were skipped");
            doc.log(
                LogLevel::Warning,
                format!("{} image(s) missing on disk were skipped", missing),
                self.time_provider.now(),
            );
        }

        let size = self.archiver.create(&entries, archive).await?;
        info!(entries = entries.len(), bytes = size, "Backup archive written");

        doc.begin_finalizing(self.time_provider.now())?;
        lock.persist(doc).await?;

        let request = UploadRequest::for_file(
            archive,
            &self.config.drive_folder_id,
            Some(AUTOBACKUP_SUBFOLDER),
        );
        let sink = progress.clone();
        let report_progress = move |message: &str| sink.push(message);
        let progress: &ProgressFn<'_> = &report_progress;
        self.uploader.upload(request, Some(progress)).await
    }
}

/// Add each distinct existing image under `prefix`; returns how many were missing
async fn collect_images<'a>(
    entries: &mut Vec<ArchiveEntry>,
    prefix: &str,
    dir: &Path,
    names: impl Iterator<Item = &'a str>,
) -> usize {
    let mut seen = HashSet::new();
    let mut missing = 0;
    for name in names {
        if !seen.insert(name) {
            continue;
        }
        let source: PathBuf = dir.join(name);
        if tokio::fs::metadata(&source).await.is_ok() {
            entries.push(ArchiveEntry {
                name: format!("{}/{}", prefix, name),
                source,
            });
        } else {
            missing += 1;
        }
    }
    missing
}

async fn cleanup(work_dir: &Path, archive: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %work_dir.display(), error = %e, "Failed to remove backup work dir");
        }
    }
    if let Err(e) = tokio::fs::remove_file(archive).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %archive.display(), error = %e, "Failed to remove backup archive");
        }
    }
}

/// Launches the runner as a detached tokio task
pub struct TaskBackupLauncher {
    runner: Arc<AutoBackupRunner>,
}

impl TaskBackupLauncher {
    pub fn new(runner: Arc<AutoBackupRunner>) -> Self {
        Self { runner }
    }
}

impl BackupLauncher for TaskBackupLauncher {
    fn launch(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            AppError::Internal(format!("no async runtime to launch the backup on: {}", e))
        })?;
        let runner = Arc::clone(&self.runner);
        handle.spawn(async move {
            match runner.run().await {
                Ok(doc) => info!(status = %doc.status, "Automatic backup finished"),
                Err(e) => error!(error = %e, "Automatic backup could not run"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackupSettings;
    use crate::port::archiver::mocks::ManifestArchiver;
    use crate::port::inventory_repository::mocks::InMemoryInventory;
    use crate::port::settings_repository::mocks::InMemorySettings;
    use crate::port::status_store::mocks::InMemoryStatusStore;
    use crate::port::time_provider::mocks::ManualClock;
    use crate::port::uploader::mocks::MockUploader;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        store: InMemoryStatusStore,
        settings: InMemorySettings,
        uploader: MockUploader,
        archiver: ManifestArchiver,
        runner: Arc<AutoBackupRunner>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(QueueConfig::new("folder-1", dir.path().join("uploads")));
        std::fs::create_dir_all(&config.item_image_dir).unwrap();
        std::fs::write(config.item_image_dir.join("bola.jpg"), b"jpeg").unwrap();

        let inventory = InMemoryInventory::new();
        inventory.add_item("Bola", "Olahraga", 4, Some("bola.jpg"));
        inventory.add_item("Meja", "Mebel", 2, Some("hilang.jpg"));

        let store = InMemoryStatusStore::new(dir.path());
        let settings = InMemorySettings::new(BackupSettings {
            enabled: true,
            state: BackupState::Running,
            ..BackupSettings::default()
        });
        let uploader = MockUploader::new();
        let archiver = ManifestArchiver::new();
        let runner = Arc::new(AutoBackupRunner::new(
            Arc::new(store.clone()),
            Arc::new(inventory),
            Arc::new(settings.clone()),
            Arc::new(uploader.clone()),
            Arc::new(archiver.clone()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            config,
        ));
        Fixture {
            dir,
            store,
            settings,
            uploader,
            archiver,
            runner,
        }
    }

    #[tokio::test]
    async fn test_full_cycle_uploads_archive_and_resets_flag() {
        let f = fixture();
        let doc = f.runner.run().await.unwrap();

        assert_eq!(doc.status, QueueStatus::Complete);
        assert!(doc.jobs.is_empty());
        assert!(doc.csv_url.as_deref().unwrap().contains("/autobackup/"));
        assert!(doc.log.iter().any(|e| e.level == LogLevel::Warning));

        assert_eq!(
            f.archiver.entry_names(),
            vec!["stock.csv", "history.csv", "accounts.csv", "images/items/bola.jpg"]
        );
        let settings = f.settings.current();
        assert_eq!(settings.state, BackupState::Idle);
        assert_eq!(settings.last_error, None);
        assert_eq!(f.store.document(QueueKind::AutoBackup), Some(doc));

        // Only the uploads dir is left in the temp directory
        let leftovers: Vec<_> = std::fs::read_dir(f.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("uploads")]);
    }

    #[tokio::test]
    async fn test_upload_failure_flags_error() {
        let f = fixture();
        let archive = format!(
            "autobackup_{}.zip",
            ManualClock::new(1_700_000_000_000)
                .now()
                .format(ARTIFACT_STAMP_FORMAT)
        );
        f.uploader.fail_for(archive);

        let doc = f.runner.run().await.unwrap();

        assert_eq!(doc.status, QueueStatus::Error);
        let settings = f.settings.current();
        assert_eq!(settings.state, BackupState::Error);
        assert!(settings.last_error.unwrap().contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_launcher_runs_detached() {
        let f = fixture();
        let launcher = TaskBackupLauncher::new(Arc::clone(&f.runner));
        launcher.launch().unwrap();

        for _ in 0..100 {
            if f.settings.current().state != BackupState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(f.settings.current().state, BackupState::Idle);
        assert_eq!(f.uploader.call_count(), 1);
    }
}
