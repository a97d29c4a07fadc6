// Port Layer - Interfaces for external dependencies

pub mod archiver;
pub mod id_provider; // For deterministic testing
pub mod inventory_repository;
pub mod launcher;
pub mod settings_repository;
pub mod status_store;
pub mod time_provider;
pub mod uploader;

// Re-exports
pub use archiver::{ArchiveEntry, Archiver};
pub use id_provider::IdProvider;
pub use inventory_repository::{ImportEffect, InventoryRepository};
pub use launcher::BackupLauncher;
pub use settings_repository::SettingsRepository;
pub use status_store::{StatusLock, StatusStore};
pub use time_provider::TimeProvider;
pub use uploader::{AttemptError, FileUploader, ProgressFn, UploadRequest, UploadTransport};
