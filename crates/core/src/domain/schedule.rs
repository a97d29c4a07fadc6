// Automatic Backup Settings
//
// Persisted by the storage layer; the scheduler tick reads them to decide
// whether a backup is due and flips `state` while a backup runs.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl BackupFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupFrequency::Daily => "daily",
            BackupFrequency::Weekly => "weekly",
            BackupFrequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupFrequency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            "monthly" => Ok(BackupFrequency::Monthly),
            other => Err(DomainError::ValidationError(format!(
                "Unknown backup frequency: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupState {
    Idle,
    Running,
    Error,
}

impl BackupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupState::Idle => "idle",
            BackupState::Running => "running",
            BackupState::Error => "error",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(BackupState::Idle),
            "running" => Ok(BackupState::Running),
            "error" => Ok(BackupState::Error),
            other => Err(DomainError::ValidationError(format!(
                "Unknown backup state: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub enabled: bool,
    pub frequency: BackupFrequency,
    /// ISO weekday (1 = Monday .. 7 = Sunday) for weekly, day of month for monthly
    pub day: u32,
    /// Local time of day the backup becomes due
    pub time: NaiveTime,
    pub last_run: Option<DateTime<Utc>>,
    pub state: BackupState,
    pub last_error: Option<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: BackupFrequency::Daily,
            day: 1,
            time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            last_run: None,
            state: BackupState::Idle,
            last_error: None,
        }
    }
}

impl BackupSettings {
    pub fn validate(&self) -> Result<(), DomainError> {
        let valid_day = match self.frequency {
            BackupFrequency::Daily => true,
            BackupFrequency::Weekly => (1..=7).contains(&self.day),
            BackupFrequency::Monthly => (1..=31).contains(&self.day),
        };
        if !valid_day {
            return Err(DomainError::ValidationError(format!(
                "Day {} is not valid for a {} backup",
                self.day, self.frequency
            )));
        }
        Ok(())
    }

    /// Today's scheduled instant, if today is a backup day
    pub fn slot_for(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let today = now.date_naive();
        let scheduled_today = match self.frequency {
            BackupFrequency::Daily => true,
            BackupFrequency::Weekly => today.weekday().number_from_monday() == self.day,
            // Short months run on their last day
            BackupFrequency::Monthly => today.day() == self.day.min(last_day_of_month(today)),
        };
        if !scheduled_today {
            return None;
        }
        today
            .and_time(self.time)
            .and_local_timezone(*now.offset())
            .single()
    }

    /// Due once today's slot has passed and no run happened since it
    pub fn is_due(&self, now: DateTime<FixedOffset>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.slot_for(now) {
            Some(slot) if now >= slot => {
                let slot = slot.with_timezone(&Utc);
                self.last_run.map_or(true, |last| last < slot)
            }
            _ => false,
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
