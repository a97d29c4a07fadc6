// Domain Layer - Pure business logic and entities

pub mod document;
pub mod error;
pub mod inventory;
pub mod job;
pub mod queue;
pub mod schedule;
pub mod schema;

// Re-exports
pub use document::{LogEntry, LogLevel, QueueStatus, StatusDocument};
pub use error::DomainError;
pub use inventory::{
    Account, AccountImportRow, HistoryEntry, HistoryImportRow, Item, StockImportRow,
    PLACEHOLDER_IMAGE,
};
pub use job::{JobOutcome, JobRecord, JobStatus, JobTarget};
pub use queue::{ExportType, ImportType, QueueKind};
pub use schedule::{BackupFrequency, BackupSettings, BackupState};
pub use schema::CsvSchema;
