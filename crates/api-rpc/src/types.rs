//! RPC Request/Response Types
//!
//! Method parameters and results. `queue.start.v1` takes the core
//! `StartRequest` as-is and the queue methods answer with the status
//! document itself.

use chrono::NaiveTime;
use sarpras_core::application::{ClearReport, TickOutcome};
use sarpras_core::domain::{BackupFrequency, QueueKind};
use serde::{Deserialize, Serialize};

pub use sarpras_core::application::StartRequest;

/// queue.step.v1 / queue.status.v1 / queue.clear.v1
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KindRequest {
    pub kind: QueueKind,
}

/// queue.clear.v1
pub type ClearResponse = ClearReport;

/// autobackup.tick.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResponse {
    pub outcome: TickOutcome,
}

/// autobackup.settings.v1 - every field optional; no fields reads the settings
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub frequency: Option<BackupFrequency>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
}

impl SettingsRequest {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.frequency.is_none()
            && self.day.is_none()
            && self.time.is_none()
    }
}
