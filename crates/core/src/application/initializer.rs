// Queue Initializer
//
// Single-flight start of an import / export / backup run. The whole job
// list is computed up front; nothing is written when validation fails.

use crate::application::config::QueueConfig;
use crate::application::report::{self, ParsedCsv};
use crate::domain::{
    CsvSchema, ExportType, ImportType, JobRecord, JobTarget, QueueKind, StatusDocument,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, InventoryRepository, StatusStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Parameters of a queue start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StartRequest {
    Import {
        import_type: ImportType,
        /// Raw uploaded CSV; staged into the temp directory on start
        csv_content: String,
    },
    Export {
        export_type: ExportType,
    },
    Backup,
}

impl StartRequest {
    pub fn kind(&self) -> QueueKind {
        match self {
            StartRequest::Import { .. } => QueueKind::Import,
            StartRequest::Export { .. } => QueueKind::Export,
            StartRequest::Backup => QueueKind::Backup,
        }
    }
}

/// A validated document plus the staged file it depends on
struct Plan {
    document: StatusDocument,
    staged: Option<PathBuf>,
}

impl Plan {
    async fn discard_staged(&self) {
        if let Some(path) = &self.staged {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove staged import file");
            }
        }
    }
}

pub struct QueueInitializer {
    store: Arc<dyn StatusStore>,
    inventory: Arc<dyn InventoryRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: Arc<QueueConfig>,
}

impl QueueInitializer {
    pub fn new(
        store: Arc<dyn StatusStore>,
        inventory: Arc<dyn InventoryRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: Arc<QueueConfig>,
    ) -> Self {
        Self {
            store,
            inventory,
            id_provider,
            time_provider,
            config,
        }
    }

    /// Start a run. Rejects with `Conflict` while a run of the same kind is
    /// active and with `Busy` while another caller holds the queue lock.
    pub async fn start(&self, request: StartRequest) -> Result<StatusDocument> {
        let kind = request.kind();

        // Cheap pre-check so a busy queue does not pay for job planning
        if let Some(existing) = self.store.read(kind).await? {
            if existing.status.is_active() {
                return Err(already_running(kind, &existing));
            }
        }

        let plan = self.plan(request).await?;

        let (existing, lock) = match self.store.lock_and_read(kind).await {
            Ok(held) => held,
            Err(e) => {
                plan.discard_staged().await;
                return Err(e);
            }
        };
        if let Some(existing) = existing.filter(|doc| doc.status.is_active()) {
            lock.release().await?;
            plan.discard_staged().await;
            return Err(already_running(kind, &existing));
        }

        if let Err(e) = lock.commit(&plan.document).await {
            plan.discard_staged().await;
            return Err(e);
        }

        info!(
            kind = %kind,
            total = plan.document.total,
            "Queue started"
        );
        Ok(plan.document)
    }

    async fn plan(&self, request: StartRequest) -> Result<Plan> {
        let now = self.time_provider.now();
        match request {
            StartRequest::Import {
                import_type,
                csv_content,
            } => self.plan_import(import_type, csv_content).await,
            StartRequest::Export {
                export_type: ExportType::Stock,
            } => {
                let items = self.inventory.list_items().await?;
                if items.is_empty() {
                    return Err(AppError::Validation(
                        "Nothing to export: there are no items in stock".to_string(),
                    ));
                }
                let jobs = items
                    .iter()
                    .filter_map(|item| {
                        item.local_image().map(|image| {
                            JobRecord::pending(JobTarget::ItemImage {
                                item_id: item.id,
                                local_path: self
                                    .config
                                    .item_image_dir
                                    .join(image)
                                    .to_string_lossy()
                                    .into_owned(),
                            })
                        })
                    })
                    .collect();
                let document = StatusDocument::new(QueueKind::Export, jobs, now)
                    .with_export_type(ExportType::Stock);
                Ok(Plan {
                    document,
                    staged: None,
                })
            }
            StartRequest::Export {
                export_type: ExportType::Accounts,
            } => {
                let accounts = self.inventory.list_accounts().await?;
                if accounts.is_empty() {
                    return Err(AppError::Validation(
                        "Nothing to export: there are no student accounts".to_string(),
                    ));
                }
                let document = StatusDocument::new(QueueKind::Export, Vec::new(), now)
                    .with_export_type(ExportType::Accounts);
                Ok(Plan {
                    document,
                    staged: None,
                })
            }
            StartRequest::Backup => {
                let history = self.inventory.list_history().await?;
                if history.is_empty() {
                    return Err(AppError::Validation(
                        "Nothing to back up: the borrowing history is empty".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                let jobs = history
                    .iter()
                    .filter_map(|entry| entry.local_proof().map(|proof| (entry, proof)))
                    .filter(|(_, proof)| seen.insert(proof.to_string()))
                    .map(|(entry, proof)| {
                        JobRecord::pending(JobTarget::ProofImage {
                            transaction_id: entry.transaction_id.clone(),
                            local_path: self
                                .config
                                .proof_dir
                                .join(proof)
                                .to_string_lossy()
                                .into_owned(),
                        })
                    })
                    .collect();
                Ok(Plan {
                    document: StatusDocument::new(QueueKind::Backup, jobs, now),
                    staged: None,
                })
            }
        }
    }

    async fn plan_import(&self, import_type: ImportType, csv_content: String) -> Result<Plan> {
        let ParsedCsv { header, records } = report::parse_csv(csv_content.as_bytes())?;

        let expected = CsvSchema::from(import_type);
        let detected = CsvSchema::detect(&header);
        if detected != Some(expected) {
            return Err(AppError::Validation(format!(
                "CSV header mismatch: detected {} format, expected {} format",
                detected.map(|schema| schema.as_str()).unwrap_or("unknown"),
                expected
            )));
        }
        if records.is_empty() {
            return Err(AppError::Validation(
                "CSV file has no data rows".to_string(),
            ));
        }

        let jobs = records
            .iter()
            .map(|record| {
                JobRecord::pending(JobTarget::CsvRow {
                    row_number: record.row_number,
                    data_preview: report::preview(&record.fields),
                })
            })
            .collect();

        let file_name = format!("import_{}.csv", self.id_provider.generate_id());
        let path = self.store.temp_path(&file_name)?;
        tokio::fs::write(&path, csv_content.as_bytes()).await?;

        let document = StatusDocument::new(QueueKind::Import, jobs, self.time_provider.now())
            .with_import(import_type, file_name);
        Ok(Plan {
            document,
            staged: Some(path),
        })
    }
}

fn already_running(kind: QueueKind, existing: &StatusDocument) -> AppError {
    AppError::Conflict(format!(
        "A {} run is already {} ({}/{} processed)",
        kind, existing.status, existing.processed, existing.total
    ))
}
