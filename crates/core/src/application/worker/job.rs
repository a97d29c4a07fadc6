// Unit of work for a single job
//
// Runs inside a spawned task so a panic becomes a job error instead of
// taking the worker (and the held lock) down with it.

use super::constants::{ITEM_IMAGE_SUBFOLDER, PROOF_SUBFOLDER};
use super::{ProgressLog, QueueWorker};
use crate::application::config::QueueConfig;
use crate::application::report;
use crate::domain::{
    AccountImportRow, HistoryImportRow, ImportType, JobOutcome, JobTarget, StatusDocument,
    StockImportRow,
};
use crate::error::{AppError, Result};
use crate::port::{
    FileUploader, ImportEffect, InventoryRepository, ProgressFn, StatusStore, UploadRequest,
};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// Everything a job needs, owned so it can move into the spawned task
struct JobContext {
    store: Arc<dyn StatusStore>,
    inventory: Arc<dyn InventoryRepository>,
    uploader: Arc<dyn FileUploader>,
    config: Arc<QueueConfig>,
    import_type: Option<ImportType>,
    csv_file: Option<String>,
    progress: ProgressLog,
}

impl QueueWorker {
    pub(super) async fn run_job(
        &self,
        doc: &StatusDocument,
        index: usize,
        progress: &ProgressLog,
    ) -> JobOutcome {
        let target = match doc.jobs.get(index) {
            Some(job) => job.target.clone(),
            None => {
                return JobOutcome::Failed {
                    message: format!("job {} does not exist", index),
                }
            }
        };
        let ctx = JobContext {
            store: Arc::clone(&self.store),
            inventory: Arc::clone(&self.inventory),
            uploader: Arc::clone(&self.uploader),
            config: Arc::clone(&self.config),
            import_type: doc.import_type,
            csv_file: doc.csv_file.clone(),
            progress: progress.clone(),
        };

        let handle = tokio::task::spawn(async move { ctx.execute(target).await });

        match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => JobOutcome::Failed {
                message: e.to_string(),
            },
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "job panicked during execution".to_string()
                } else {
                    "job was cancelled".to_string()
                };
                error!(job = index, "{}", message);
                JobOutcome::Failed { message }
            }
        }
    }
}

impl JobContext {
    async fn execute(self, target: JobTarget) -> Result<JobOutcome> {
        match target {
            JobTarget::ItemImage { local_path, .. } => {
                self.upload(&local_path, ITEM_IMAGE_SUBFOLDER).await
            }
            JobTarget::ProofImage { local_path, .. } => {
                self.upload(&local_path, PROOF_SUBFOLDER).await
            }
            JobTarget::CsvRow { row_number, .. } => self.import_row(row_number).await,
        }
    }

    async fn upload(&self, local_path: &str, subfolder: &str) -> Result<JobOutcome> {
        let request =
            UploadRequest::for_file(local_path, &self.config.drive_folder_id, Some(subfolder));
        let sink = self.progress.clone();
        let report_progress = move |message: &str| sink.push(message);
        let progress: &ProgressFn<'_> = &report_progress;
        let url = self.uploader.upload(request, Some(progress)).await?;
        Ok(JobOutcome::Uploaded { url })
    }

    async fn import_row(&self, row_number: usize) -> Result<JobOutcome> {
        let file = self
            .csv_file
            .as_deref()
            .ok_or_else(|| AppError::InvalidState("import run has no staged CSV".to_string()))?;
        let import_type = self
            .import_type
            .ok_or_else(|| AppError::InvalidState("import run has no import type".to_string()))?;

        let parsed = report::read_csv(&self.store.temp_path(file)?).await?;
        let missing = || AppError::NotFound(format!("row {} is not in {}", row_number, file));

        let message = match import_type {
            ImportType::Stock => {
                let record = parsed
                    .records
                    .iter()
                    .find(|r| r.row_number == row_number)
                    .ok_or_else(missing)?;
                let row = StockImportRow::parse(row_number, &record.fields)?;
                match self.inventory.import_stock_row(&row).await? {
                    ImportEffect::Inserted => {
                        format!("Added {} ({}) x{}", row.name, row.kind, row.quantity)
                    }
                    ImportEffect::Merged { new_quantity } => format!(
                        "Added {} to {} ({}), stock now {}",
                        row.quantity, row.name, row.kind, new_quantity
                    ),
                }
            }
            ImportType::History => {
                let grouped =
                    report::grouped_history_row(&parsed.records, row_number).ok_or_else(missing)?;
                let stem = Path::new(file)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.to_string());
                let transaction_id = format!("IMP-{}-{}", stem, grouped.group_row);
                let row = HistoryImportRow::parse(row_number, transaction_id, &grouped.fields)?;
                self.inventory.import_history_row(&row).await?;
                format!(
                    "Recorded {} x{} for {} in {}",
                    row.item_name, row.quantity, row.nis, row.transaction_id
                )
            }
            ImportType::Accounts => {
                let record = parsed
                    .records
                    .iter()
                    .find(|r| r.row_number == row_number)
                    .ok_or_else(missing)?;
                let row = AccountImportRow::parse(row_number, &record.fields)?;
                self.inventory.import_account_row(&row).await?;
                format!("Created account {} ({})", row.nis, row.name)
            }
        };

        Ok(JobOutcome::Imported { message })
    }
}
