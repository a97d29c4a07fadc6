// Queue Kinds
//
// Every kind is an independent queue with its own status document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Import,
    Export,
    Backup,
    #[serde(rename = "autobackup")]
    AutoBackup,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        QueueKind::Import,
        QueueKind::Export,
        QueueKind::Backup,
        QueueKind::AutoBackup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Import => "import",
            QueueKind::Export => "export",
            QueueKind::Backup => "backup",
            QueueKind::AutoBackup => "autobackup",
        }
    }

    /// File name of the status document inside the temp directory
    pub fn status_file_name(&self) -> String {
        format!("{}_status.json", self.as_str())
    }

    /// Glob (relative to the temp directory) of artifacts this kind may leave behind
    pub fn artifact_glob(&self) -> &'static str {
        match self {
            QueueKind::Import => "import_*.csv",
            QueueKind::Export => "export_*.csv",
            QueueKind::Backup => "backup_*.csv",
            QueueKind::AutoBackup => "autobackup_*",
        }
    }

    /// Whether documents of this kind carry a job list advanced by the step worker
    pub fn is_steppable(&self) -> bool {
        !matches!(self, QueueKind::AutoBackup)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "import" => Ok(QueueKind::Import),
            "export" => Ok(QueueKind::Export),
            "backup" => Ok(QueueKind::Backup),
            "autobackup" => Ok(QueueKind::AutoBackup),
            other => Err(DomainError::ValidationError(format!(
                "Unknown queue kind: {}",
                other
            ))),
        }
    }
}

/// What an export run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Stock,
    Accounts,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Stock => "stock",
            ExportType::Accounts => "accounts",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(ExportType::Stock),
            "accounts" => Ok(ExportType::Accounts),
            other => Err(DomainError::ValidationError(format!(
                "Unknown export type: {}",
                other
            ))),
        }
    }
}

/// What an import run consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Stock,
    History,
    Accounts,
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Stock => "stock",
            ImportType::History => "history",
            ImportType::Accounts => "accounts",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(ImportType::Stock),
            "history" => Ok(ImportType::History),
            "accounts" => Ok(ImportType::Accounts),
            other => Err(DomainError::ValidationError(format!(
                "Unknown import type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_file_names() {
        assert_eq!(QueueKind::Export.status_file_name(), "export_status.json");
        assert_eq!(
            QueueKind::AutoBackup.status_file_name(),
            "autobackup_status.json"
        );
    }

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!("Backup".parse::<QueueKind>().unwrap(), QueueKind::Backup);
        assert_eq!(
            " AUTOBACKUP ".parse::<QueueKind>().unwrap(),
            QueueKind::AutoBackup
        );
        assert!("restore".parse::<QueueKind>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for kind in QueueKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}
