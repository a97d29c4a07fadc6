// Daemon configuration from SARPRAS_* environment variables

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use sarpras_core::application::worker::constants::{
    BACKUP_TICK_INTERVAL, DEFAULT_UTC_OFFSET_HOURS, STALL_THRESHOLD,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.sarpras/sarpras.db";
const DEFAULT_TEMP_DIR: &str = "~/.sarpras/tmp";
const DEFAULT_UPLOAD_DIR: &str = "~/.sarpras/uploads";
const DEFAULT_RPC_PORT: u16 = 9527;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    /// Status documents and artifacts
    pub temp_dir: PathBuf,
    /// Holds `items/` and `proofs/` photos
    pub upload_dir: PathBuf,
    pub rpc_port: u16,
    pub relay_url: String,
    pub relay_secret: String,
    pub drive_folder_id: String,
    pub utc_offset: FixedOffset,
    pub backup_tick: Duration,
    /// Age after which a processing job is considered abandoned
    pub stall_threshold: Duration,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let path = |key: &str, default: &str| {
            let raw = var(key).unwrap_or_else(|| default.to_string());
            shellexpand::tilde(&raw).into_owned()
        };

        let rpc_port = match var("SARPRAS_RPC_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SARPRAS_RPC_PORT is not a port: {}", raw))?,
            None => DEFAULT_RPC_PORT,
        };

        let offset_hours: i32 = match var("SARPRAS_UTC_OFFSET_HOURS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SARPRAS_UTC_OFFSET_HOURS is not a number: {}", raw))?,
            None => DEFAULT_UTC_OFFSET_HOURS,
        };
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("SARPRAS_UTC_OFFSET_HOURS out of range: {}", offset_hours))?;

        let backup_tick = match var("SARPRAS_BACKUP_TICK_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("SARPRAS_BACKUP_TICK_SECS is not a number: {}", raw))?;
                if secs == 0 {
                    return Err(anyhow!("SARPRAS_BACKUP_TICK_SECS must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => BACKUP_TICK_INTERVAL,
        };

        let stall_threshold = match var("SARPRAS_STALL_THRESHOLD_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().with_context(|| {
                    format!("SARPRAS_STALL_THRESHOLD_SECS is not a number: {}", raw)
                })?;
                if secs == 0 {
                    return Err(anyhow!("SARPRAS_STALL_THRESHOLD_SECS must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => STALL_THRESHOLD,
        };

        let log_format = match var("SARPRAS_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            db_path: path("SARPRAS_DB_PATH", DEFAULT_DB_PATH),
            temp_dir: path("SARPRAS_TEMP_DIR", DEFAULT_TEMP_DIR).into(),
            upload_dir: path("SARPRAS_UPLOAD_DIR", DEFAULT_UPLOAD_DIR).into(),
            rpc_port,
            relay_url: var("SARPRAS_RELAY_URL").unwrap_or_default(),
            relay_secret: var("SARPRAS_RELAY_SECRET").unwrap_or_default(),
            drive_folder_id: var("SARPRAS_DRIVE_FOLDER_ID").unwrap_or_default(),
            utc_offset,
            backup_tick,
            stall_threshold,
            log_format,
        })
    }
}
