// Status Document Domain Model
//
// The persisted, per-kind JSON document that doubles as a durable work
// queue. Absent document = idle queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{DomainError, Result};
use super::job::{JobOutcome, JobRecord, JobStatus};
use super::queue::{ExportType, ImportType, QueueKind};

/// Queue Status
///
/// `running -> finalizing -> complete|error`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Running,
    Finalizing,
    Complete,
    Error,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Complete | QueueStatus::Error)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Running => write!(f, "running"),
            QueueStatus::Finalizing => write!(f, "finalizing"),
            QueueStatus::Complete => write!(f, "complete"),
            QueueStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub kind: QueueKind,
    pub status: QueueStatus,

    // Counters: processed == success + failed, processed <= total
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobRecord>,

    /// Append-only
    #[serde(default)]
    pub log: Vec<LogEntry>,

    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,

    #[serde(rename = "endTime", default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Result URL, set only on successful finalization
    #[serde(default)]
    pub csv_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_type: Option<ExportType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_type: Option<ImportType>,

    /// Staged upload name inside the temp directory (imports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<String>,
}

impl StatusDocument {
    /// Create a running document whose job list is fixed from now on
    pub fn new(kind: QueueKind, jobs: Vec<JobRecord>, now: DateTime<Utc>) -> Self {
        let total = jobs.len();
        let mut doc = Self {
            kind,
            status: QueueStatus::Running,
            total,
            processed: 0,
            success: 0,
            failed: 0,
            jobs,
            log: Vec::new(),
            start_time: now,
            end_time: None,
            csv_url: None,
            export_type: None,
            import_type: None,
            csv_file: None,
        };
        doc.log(
            LogLevel::Info,
            format!("Started {} with {} job(s)", kind, total),
            now,
        );
        doc
    }

    pub fn with_export_type(mut self, export_type: ExportType) -> Self {
        self.export_type = Some(export_type);
        self
    }

    pub fn with_import(mut self, import_type: ImportType, csv_file: impl Into<String>) -> Self {
        self.import_type = Some(import_type);
        self.csv_file = Some(csv_file.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the first pending job (jobs are claimed strictly in list order)
    pub fn next_pending(&self) -> Option<usize> {
        self.jobs
            .iter()
            .position(|job| job.status == JobStatus::Pending)
    }

    pub fn processing_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status == JobStatus::Processing)
            .count()
    }

    pub fn all_jobs_terminal(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, now: DateTime<Utc>) {
        self.log.push(LogEntry {
            time: now,
            message: message.into(),
            level,
        });
    }

    /// Reset every stalled processing job back to pending.
    ///
    /// Returns the number of jobs reset.
    pub fn recover_stalled(&mut self, now: DateTime<Utc>, threshold: Duration) -> Result<usize> {
        let stalled: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_stalled(now, threshold))
            .map(|(index, _)| index)
            .collect();

        for &index in &stalled {
            let job = &mut self.jobs[index];
            job.reset_stalled(format!(
                "Reset after stalling for more than {}s",
                threshold.as_secs()
            ))?;
            let label = job.target.describe();
            self.log(
                LogLevel::Warning,
                format!("Job {} stalled; returned to pending", label),
                now,
            );
        }
        Ok(stalled.len())
    }

    /// Claim the job at `index`. At most one job may be processing.
    pub fn claim(&mut self, index: usize, now: DateTime<Utc>) -> Result<()> {
        self.ensure_status(QueueStatus::Running, "claim")?;
        if self.processing_count() > 0 {
            return Err(DomainError::InvalidStateTransition {
                from: "processing job present".to_string(),
                to: "processing".to_string(),
            });
        }
        self.job_mut(index)?.claim(now)
    }

    pub fn record_success(
        &mut self,
        index: usize,
        drive_url: Option<String>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job = self.job_mut(index)?;
        job.succeed(drive_url, message.clone())?;
        let label = job.target.describe();

        self.processed += 1;
        self.success += 1;
        let entry = match message {
            Some(message) => format!("{}: {}", label, message),
            None => format!("{}: done", label),
        };
        self.log(LogLevel::Success, entry, now);
        Ok(())
    }

    pub fn record_failure(
        &mut self,
        index: usize,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let message = message.into();
        let job = self.job_mut(index)?;
        job.fail(message.clone())?;
        let label = job.target.describe();

        self.processed += 1;
        self.failed += 1;
        self.log(LogLevel::Error, format!("{}: {}", label, message), now);
        Ok(())
    }

    /// Apply a unit-of-work outcome to the claimed job
    pub fn settle(&mut self, index: usize, outcome: JobOutcome, now: DateTime<Utc>) -> Result<()> {
        match outcome {
            JobOutcome::Uploaded { url } => self.record_success(index, Some(url), None, now),
            JobOutcome::Imported { message } => {
                self.record_success(index, None, Some(message), now)
            }
            JobOutcome::Failed { message } => self.record_failure(index, message, now),
        }
    }

    /// Running -> Finalizing, only once every job is terminal
    pub fn begin_finalizing(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_status(QueueStatus::Running, "finalizing")?;
        if !self.all_jobs_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: "jobs outstanding".to_string(),
                to: QueueStatus::Finalizing.to_string(),
            });
        }
        self.status = QueueStatus::Finalizing;
        self.log(LogLevel::Info, "Finalizing", now);
        Ok(())
    }

    /// Finalizing -> Complete
    pub fn complete(&mut self, csv_url: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_status(QueueStatus::Finalizing, "complete")?;
        self.status = QueueStatus::Complete;
        self.end_time = Some(now);
        let summary = format!(
            "Completed: {} succeeded, {} failed of {}",
            self.success, self.failed, self.total
        );
        self.csv_url = csv_url;
        self.log(LogLevel::Success, summary, now);
        Ok(())
    }

    /// Any active state -> Error
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: QueueStatus::Error.to_string(),
            });
        }
        self.status = QueueStatus::Error;
        self.end_time = Some(now);
        self.log(LogLevel::Error, message, now);
        Ok(())
    }

    /// Verify the structural invariants of a document read from disk
    pub fn check_invariants(&self) -> Result<()> {
        let violation = |message: String| Err(DomainError::ValidationError(message));

        if self.processed != self.success + self.failed {
            return violation(format!(
                "processed ({}) != success ({}) + failed ({})",
                self.processed, self.success, self.failed
            ));
        }
        if self.processed > self.total {
            return violation(format!(
                "processed ({}) exceeds total ({})",
                self.processed, self.total
            ));
        }
        if self.kind.is_steppable() && self.total != self.jobs.len() {
            return violation(format!(
                "total ({}) does not match job count ({})",
                self.total,
                self.jobs.len()
            ));
        }
        if self.processing_count() > 1 {
            return violation("more than one job is processing".to_string());
        }
        let succeeded = self
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Success)
            .count();
        let failed = self
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Error)
            .count();
        if self.kind.is_steppable() && (succeeded != self.success || failed != self.failed) {
            return violation("counters disagree with job states".to_string());
        }
        if self.is_terminal() && self.end_time.is_none() {
            return violation("terminal document without endTime".to_string());
        }
        Ok(())
    }

    fn ensure_status(&self, expected: QueueStatus, action: &str) -> Result<()> {
        if self.status != expected {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: action.to_string(),
            });
        }
        Ok(())
    }

    fn job_mut(&mut self, index: usize) -> Result<&mut JobRecord> {
        self.jobs
            .get_mut(index)
            .ok_or(DomainError::JobNotFound(index))
    }
}
