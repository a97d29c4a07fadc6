// Finalization: build the kind's artifact, upload it, clean up

use super::constants::{ARTIFACT_STAMP_FORMAT, REPORT_SUBFOLDER};
use super::{ProgressLog, QueueWorker};
use crate::application::report;
use crate::domain::{CsvSchema, ExportType, JobStatus, JobTarget, QueueKind, StatusDocument};
use crate::error::{AppError, Result};
use crate::port::{ProgressFn, UploadRequest};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

impl QueueWorker {
    /// Returns the result URL (None for imports, which upload nothing)
    pub(super) async fn finalize(
        &self,
        doc: &StatusDocument,
        progress: &ProgressLog,
    ) -> Result<Option<String>> {
        match doc.kind {
            QueueKind::Import => {
                if let Some(file) = &doc.csv_file {
                    remove_artifact(&self.store.temp_path(file)?).await;
                }
                Ok(None)
            }
            QueueKind::Export => match doc.export_type {
                Some(ExportType::Stock) => {
                    let items = self.inventory.list_items().await?;
                    let uploaded: HashMap<i64, String> = doc
                        .jobs
                        .iter()
                        .filter(|job| job.status == JobStatus::Success)
                        .filter_map(|job| match (&job.target, &job.drive_url) {
                            (JobTarget::ItemImage { item_id, .. }, Some(url)) => {
                                Some((*item_id, url.clone()))
                            }
                            _ => None,
                        })
                        .collect();
                    let rows = report::stock_rows(&items, &uploaded);
                    self.upload_report("export_stock", CsvSchema::Stock, &rows, progress)
                        .await
                        .map(Some)
                }
                Some(ExportType::Accounts) => {
                    let accounts = self.inventory.list_accounts().await?;
                    let rows = report::account_rows(&accounts);
                    self.upload_report("export_accounts", CsvSchema::Accounts, &rows, progress)
                        .await
                        .map(Some)
                }
                None => Err(AppError::InvalidState(
                    "export run has no export type".to_string(),
                )),
            },
            QueueKind::Backup => {
                let history = self.inventory.list_history().await?;
                let proof_links: HashMap<String, String> = doc
                    .jobs
                    .iter()
                    .filter(|job| job.status == JobStatus::Success)
                    .filter_map(|job| match (&job.target, &job.drive_url) {
                        (JobTarget::ProofImage { local_path, .. }, Some(url)) => {
                            let name = Path::new(local_path).file_name()?;
                            Some((name.to_string_lossy().into_owned(), url.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                let rows = report::history_rows(&history, &proof_links);
                self.upload_report("backup_history", CsvSchema::History, &rows, progress)
                    .await
                    .map(Some)
            }
            QueueKind::AutoBackup => Err(AppError::Validation(
                "autobackup is finalized by its own task".to_string(),
            )),
        }
    }

    /// Write a report into the temp directory, upload it, and delete it
    /// whatever the outcome.
    async fn upload_report(
        &self,
        prefix: &str,
        schema: CsvSchema,
        rows: &[Vec<String>],
        progress: &ProgressLog,
    ) -> Result<String> {
        let stamp = self.time_provider.now().format(ARTIFACT_STAMP_FORMAT);
        let path = self.store.temp_path(&format!("{}_{}.csv", prefix, stamp))?;

        let result = async {
            report::write_csv(&path, schema, rows)?;
            info!(path = %path.display(), rows = rows.len(), "Report written");

            let request =
                UploadRequest::for_file(&path, &self.config.drive_folder_id, Some(REPORT_SUBFOLDER));
            let sink = progress.clone();
            let report_progress = move |message: &str| sink.push(message);
            let progress: &ProgressFn<'_> = &report_progress;
            self.uploader.upload(request, Some(progress)).await
        }
        .await;

        remove_artifact(&path).await;
        result
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}
