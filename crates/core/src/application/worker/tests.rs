use super::*;
use crate::application::initializer::{QueueInitializer, StartRequest};
use crate::domain::{
    ExportType, ImportType, JobRecord, JobStatus, JobTarget, LogLevel, QueueStatus,
};
use crate::port::id_provider::mocks::SequentialIds;
use crate::port::inventory_repository::mocks::InMemoryInventory;
use crate::port::status_store::mocks::InMemoryStatusStore;
use crate::port::time_provider::mocks::ManualClock;
use crate::port::uploader::mocks::MockUploader;
use crate::port::{ProgressFn, UploadRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

const T0: i64 = 1_700_000_000_000;

struct Fixture {
    dir: tempfile::TempDir,
    store: InMemoryStatusStore,
    inventory: InMemoryInventory,
    uploader: MockUploader,
    clock: ManualClock,
    config: Arc<QueueConfig>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(QueueConfig::new("folder-1", dir.path().join("uploads")));
        Self {
            store: InMemoryStatusStore::new(dir.path()),
            inventory: InMemoryInventory::new(),
            uploader: MockUploader::new(),
            clock: ManualClock::new(T0),
            config,
            dir,
        }
    }

    fn worker(&self) -> QueueWorker {
        self.worker_with(Arc::new(self.uploader.clone()))
    }

    fn worker_with(&self, uploader: Arc<dyn FileUploader>) -> QueueWorker {
        QueueWorker::new(
            Arc::new(self.store.clone()),
            Arc::new(self.inventory.clone()),
            uploader,
            Arc::new(self.clock.clone()),
            Arc::clone(&self.config),
        )
    }

    fn initializer(&self) -> QueueInitializer {
        QueueInitializer::new(
            Arc::new(self.store.clone()),
            Arc::new(self.inventory.clone()),
            Arc::new(SequentialIds::default()),
            Arc::new(self.clock.clone()),
            Arc::clone(&self.config),
        )
    }

    /// Step until terminal, checking the counter invariant after every step
    async fn drive(&self, worker: &QueueWorker, kind: QueueKind) -> StatusDocument {
        for _ in 0..50 {
            self.clock.advance_secs(1);
            let doc = worker.step(kind).await.unwrap();
            doc.check_invariants().unwrap();
            if doc.is_terminal() {
                return doc;
            }
        }
        panic!("queue did not reach a terminal state");
    }
}

fn image_job(item_id: i64) -> JobRecord {
    JobRecord::pending(JobTarget::ItemImage {
        item_id,
        local_path: format!("/uploads/items/item_{}.jpg", item_id),
    })
}

#[tokio::test]
async fn test_idle_queue_is_not_found() {
    let f = Fixture::new();
    let err = f.worker().step(QueueKind::Export).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(!f.store.is_locked(QueueKind::Export));
}

#[tokio::test]
async fn test_locked_queue_is_busy() {
    let f = Fixture::new();
    f.store.insert(StatusDocument::new(
        QueueKind::Export,
        vec![image_job(1)],
        f.clock.now(),
    ));
    f.store.hold_lock(QueueKind::Export);

    let err = f.worker().step(QueueKind::Export).await.unwrap_err();
    assert!(err.is_busy());
}

#[tokio::test]
async fn test_autobackup_cannot_be_stepped() {
    let f = Fixture::new();
    let err = f.worker().step(QueueKind::AutoBackup).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_stalled_job_reset_before_claim() {
    let f = Fixture::new();
    let mut doc = StatusDocument::new(
        QueueKind::Export,
        vec![image_job(1), image_job(2)],
        f.clock.now(),
    )
    .with_export_type(ExportType::Stock);
    doc.claim(0, f.clock.now()).unwrap();
    f.store.insert(doc);

    // Within the threshold the claim belongs to someone else
    f.clock.advance_secs(100);
    let unchanged = f.worker().step(QueueKind::Export).await.unwrap();
    assert_eq!(unchanged.jobs[0].status, JobStatus::Processing);
    assert_eq!(f.store.write_count(), 0);

    // Past 180s the job is reset and, being first, claimed again
    f.clock.advance_secs(100);
    let doc = f.worker().step(QueueKind::Export).await.unwrap();

    assert_eq!(doc.jobs[0].status, JobStatus::Success);
    assert_eq!(doc.jobs[1].status, JobStatus::Pending);
    assert_eq!(doc.processed, 1);
    let warning = doc
        .log
        .iter()
        .position(|e| e.level == LogLevel::Warning)
        .unwrap();
    let success = doc
        .log
        .iter()
        .position(|e| e.level == LogLevel::Success)
        .unwrap();
    assert!(warning < success);
}

/// Uploader asserting the claim is already persisted while it runs
struct ObservingUploader {
    store: InMemoryStatusStore,
    saw_processing: AtomicBool,
}

#[async_trait]
impl FileUploader for ObservingUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        _progress: Option<&ProgressFn<'_>>,
    ) -> Result<String> {
        let persisted = self.store.document(QueueKind::Export).unwrap();
        let processing = persisted.jobs[0].status == JobStatus::Processing
            && persisted.jobs[0].timestamp.is_some();
        self.saw_processing.store(processing, Ordering::SeqCst);
        Ok(MockUploader::url_for(&request))
    }
}

#[tokio::test]
async fn test_claim_persisted_before_work_runs() {
    let f = Fixture::new();
    f.store.insert(
        StatusDocument::new(QueueKind::Export, vec![image_job(1)], f.clock.now())
            .with_export_type(ExportType::Stock),
    );
    let observer = Arc::new(ObservingUploader {
        store: f.store.clone(),
        saw_processing: AtomicBool::new(false),
    });

    f.worker_with(observer.clone())
        .step(QueueKind::Export)
        .await
        .unwrap();

    assert!(observer.saw_processing.load(Ordering::SeqCst));
}

struct PanickingUploader;

#[async_trait]
impl FileUploader for PanickingUploader {
    async fn upload(
        &self,
        _request: UploadRequest,
        _progress: Option<&ProgressFn<'_>>,
    ) -> Result<String> {
        panic!("relay client exploded");
    }
}

#[tokio::test]
async fn test_panic_becomes_job_error() {
    let f = Fixture::new();
    f.store.insert(
        StatusDocument::new(
            QueueKind::Export,
            vec![image_job(1), image_job(2)],
            f.clock.now(),
        )
        .with_export_type(ExportType::Stock),
    );

    let doc = f
        .worker_with(Arc::new(PanickingUploader))
        .step(QueueKind::Export)
        .await
        .unwrap();

    assert_eq!(doc.jobs[0].status, JobStatus::Error);
    assert!(doc.jobs[0].message.as_deref().unwrap().contains("panicked"));
    assert_eq!(doc.status, QueueStatus::Running);
    assert_eq!(doc.next_pending(), Some(1));
}

/// Uploader that takes a while, recording every call
#[derive(Clone)]
struct SlowUploader {
    inner: MockUploader,
    delay: std::time::Duration,
}

#[async_trait]
impl FileUploader for SlowUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload(request, progress).await
    }
}

#[tokio::test]
async fn test_abandoned_step_still_settles_its_job() {
    let f = Fixture::new();
    f.store.insert(
        StatusDocument::new(
            QueueKind::Export,
            vec![image_job(1), image_job(2)],
            f.clock.now(),
        )
        .with_export_type(ExportType::Stock),
    );
    let slow = SlowUploader {
        inner: MockUploader::new(),
        delay: std::time::Duration::from_millis(200),
    };
    let worker = f.worker_with(Arc::new(slow.clone()));

    // The caller gives up while the upload is in flight
    let abandoned =
        tokio::time::timeout(std::time::Duration::from_millis(50), worker.step(QueueKind::Export))
            .await;
    assert!(abandoned.is_err());

    let mut settled = None;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        let doc = f.store.document(QueueKind::Export).unwrap();
        if doc.jobs[0].status == JobStatus::Success && !f.store.is_locked(QueueKind::Export) {
            settled = Some(doc);
            break;
        }
    }
    let settled = settled.expect("abandoned step never committed");
    assert_eq!(settled.processed, 1);
    assert_eq!(settled.jobs[1].status, JobStatus::Pending);

    // Past the stall threshold nothing is left to reset, so job 0 is not redone
    f.clock.advance_secs(181);
    let doc = f.drive(&worker, QueueKind::Export).await;

    assert_eq!(doc.status, QueueStatus::Complete);
    assert_eq!(doc.success, 2);
    let first_uploads = slow
        .inner
        .calls()
        .iter()
        .filter(|call| call.file_name == "item_1.jpg")
        .count();
    assert_eq!(first_uploads, 1);
}

#[tokio::test]
async fn test_stock_export_runs_to_completion() {
    let f = Fixture::new();
    f.inventory.add_item("Bola", "Olahraga", 4, Some("bola.jpg"));
    f.inventory.add_item("Meja", "Mebel", 2, Some("meja.jpg"));
    f.inventory.add_item("Kapur", "ATK", 10, None);
    f.uploader.fail_for("meja.jpg");

    f.initializer()
        .start(StartRequest::Export {
            export_type: ExportType::Stock,
        })
        .await
        .unwrap();
    let doc = f.drive(&f.worker(), QueueKind::Export).await;

    assert_eq!(doc.status, QueueStatus::Complete);
    assert_eq!((doc.total, doc.success, doc.failed), (2, 1, 1));
    assert!(doc.end_time.is_some());

    let url = doc.csv_url.unwrap();
    assert!(url.starts_with("https://drive.test/reports/export_stock_"));
    let report_name = url.rsplit('/').next().unwrap();
    let report = String::from_utf8(f.uploader.captured(report_name).unwrap()).unwrap();
    assert!(report.contains("Bola,Olahraga,4,https://drive.test/items/bola.jpg"));
    assert!(report.contains("Meja,Mebel,2,\n"));
    assert!(report.contains("Kapur,ATK,10,"));

    // The artifact is gone from the temp directory
    assert!(!f.dir.path().join(report_name).exists());
}

#[tokio::test]
async fn test_accounts_export_finalizes_on_first_step() {
    let f = Fixture::new();
    f.inventory.add_account(crate::domain::Account {
        nis: "1001".into(),
        password: "rahasia".into(),
        name: "Sari".into(),
        class_name: "XI IPA 1".into(),
    });

    f.initializer()
        .start(StartRequest::Export {
            export_type: ExportType::Accounts,
        })
        .await
        .unwrap();
    let doc = f.worker().step(QueueKind::Export).await.unwrap();

    assert_eq!(doc.status, QueueStatus::Complete);
    assert_eq!(doc.total, 0);
    assert!(doc.csv_url.unwrap().contains("export_accounts_"));
}

#[tokio::test]
async fn test_finalization_upload_failure_is_terminal_error() {
    let f = Fixture::new();
    f.store.insert(
        StatusDocument::new(QueueKind::Export, Vec::new(), f.clock.now())
            .with_export_type(ExportType::Stock),
    );
    f.inventory.add_item("Bola", "Olahraga", 4, None);
    let stamp = f.clock.now().format(constants::ARTIFACT_STAMP_FORMAT);
    f.uploader.fail_for(format!("export_stock_{}.csv", stamp));

    let doc = f.worker().step(QueueKind::Export).await.unwrap();

    assert_eq!(doc.status, QueueStatus::Error);
    assert!(doc.end_time.is_some());
    assert!(doc.csv_url.is_none());
    assert_eq!(doc.log.last().unwrap().level, LogLevel::Error);

    // Terminal documents are returned unchanged
    let again = f.worker().step(QueueKind::Export).await.unwrap();
    assert_eq!(again, doc);
}

#[tokio::test]
async fn test_stock_import_records_row_errors_and_cleans_up() {
    let f = Fixture::new();
    f.inventory.add_item("Bola", "Olahraga", 4, None);
    let csv = "Nama Barang,Jenis Barang,Jumlah,Link Gambar\n\
               bola,olahraga,3,\n\
               Meja,Mebel,banyak,\n\
               Kursi,Mebel,5,\n";

    let started = f
        .initializer()
        .start(StartRequest::Import {
            import_type: ImportType::Stock,
            csv_content: csv.to_string(),
        })
        .await
        .unwrap();
    let staged = f
        .store
        .temp_path(started.csv_file.as_deref().unwrap())
        .unwrap();
    assert!(staged.exists());

    let doc = f.drive(&f.worker(), QueueKind::Import).await;

    assert_eq!(doc.status, QueueStatus::Complete);
    assert_eq!((doc.success, doc.failed), (2, 1));
    assert!(doc.csv_url.is_none());
    assert!(doc.jobs[1].message.as_deref().unwrap().contains("Jumlah"));
    assert!(!staged.exists());

    let items = f.inventory.items();
    assert_eq!(items[0].quantity, 7);
    assert_eq!(items[1].name, "Kursi");
}

#[tokio::test]
async fn test_history_import_groups_rows_into_transactions() {
    let f = Fixture::new();
    let csv = "\
NIS,Nama Peminjam,Kelas,Mata Pelajaran,Nama Barang,Jenis Alat,Jumlah,Tanggal Pinjam,Tanggal Kembali,Link Bukti Google Drive
1001,Sari,XI IPA 1,Fisika,Multimeter,Elektronik,1,2024-03-01 07:30:00,,
,,,,Kabel,Elektronik,2,,,
";
    f.initializer()
        .start(StartRequest::Import {
            import_type: ImportType::History,
            csv_content: csv.to_string(),
        })
        .await
        .unwrap();

    let doc = f.drive(&f.worker(), QueueKind::Import).await;
    assert_eq!(doc.success, 2);

    let history = f.inventory.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].transaction_id, "IMP-import_id-1-2");
    assert_eq!(history[1].transaction_id, history[0].transaction_id);
    assert_eq!(history[1].nis, "1001");
    assert_eq!(history[1].borrowed_at, history[0].borrowed_at);
}
