// Job Record Domain Model
//
// A job is one unit of work inside a status document: one image to upload
// or one CSV row to import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{DomainError, Result};

/// Job Status
///
/// Monotonic `pending -> processing -> success|error`, except for the stall
/// reset `processing -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// What a job works on. Serialized flat into the job record with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTarget {
    /// Item photo to push to the drive (stock export)
    ItemImage { item_id: i64, local_path: String },
    /// Borrowing proof photo to push to the drive (history backup)
    ProofImage {
        transaction_id: String,
        local_path: String,
    },
    /// One data row of a staged import CSV
    CsvRow {
        row_number: usize,
        data_preview: String,
    },
}

impl JobTarget {
    pub fn local_path(&self) -> Option<&str> {
        match self {
            JobTarget::ItemImage { local_path, .. } | JobTarget::ProofImage { local_path, .. } => {
                Some(local_path.as_str())
            }
            JobTarget::CsvRow { .. } => None,
        }
    }

    /// Short human label used in log entries
    pub fn describe(&self) -> String {
        match self {
            JobTarget::ItemImage { item_id, .. } => format!("item #{} image", item_id),
            JobTarget::ProofImage { transaction_id, .. } => {
                format!("proof for {}", transaction_id)
            }
            JobTarget::CsvRow { row_number, .. } => format!("row {}", row_number),
        }
    }
}

/// Result of running one job's unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Uploaded { url: String },
    Imported { message: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,

    #[serde(flatten)]
    pub target: JobTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set on entering `processing`; drives stall detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn pending(target: JobTarget) -> Self {
        Self {
            status: JobStatus::Pending,
            target,
            drive_url: None,
            message: None,
            timestamp: None,
        }
    }

    /// Transition to Processing with explicit timestamp
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Pending, JobStatus::Processing)?;
        self.timestamp = Some(now);
        self.message = None;
        Ok(())
    }

    /// Transition to Success
    pub fn succeed(&mut self, drive_url: Option<String>, message: Option<String>) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Success)?;
        self.drive_url = drive_url;
        self.message = message;
        Ok(())
    }

    /// Transition to Error
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Error)?;
        self.message = Some(message.into());
        Ok(())
    }

    /// Stall reset: Processing -> Pending (the only backwards transition)
    pub fn reset_stalled(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Pending)?;
        self.timestamp = None;
        self.message = Some(message.into());
        Ok(())
    }

    /// A processing job is stalled once its claim is older than `threshold`.
    /// A processing job without a timestamp cannot be owned by anyone.
    pub fn is_stalled(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match self.timestamp {
            Some(claimed_at) => {
                let age = now.signed_duration_since(claimed_at);
                age.to_std().map(|age| age > threshold).unwrap_or(false)
            }
            None => true,
        }
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
