// Application Layer - Use Cases and Business Logic

pub mod autobackup;
pub mod config;
pub mod initializer;
pub mod queue_service;
pub mod recovery;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod upload;
pub mod worker;

// Re-exports
pub use autobackup::{AutoBackupRunner, TaskBackupLauncher};
pub use config::QueueConfig;
pub use initializer::{QueueInitializer, StartRequest};
pub use queue_service::{ClearReport, QueueService};
pub use recovery::{RecoveryReport, StallRecovery};
pub use retry::{retry_with, RetryPolicy};
pub use scheduler::{AutoBackupScheduler, TickOutcome};
pub use upload::RetryingUploader;
pub use worker::{shutdown_channel, QueueWorker, ShutdownSender, ShutdownToken};
