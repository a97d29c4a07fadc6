// Queue constants (No magic values)
use std::time::Duration;

/// A processing job older than this is considered abandoned (180s)
pub const STALL_THRESHOLD: Duration = Duration::from_secs(180);

/// Per-attempt timeout for one relay upload (90s)
pub const UPLOAD_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(90);

/// Upload attempts before a file is reported as failed
pub const UPLOAD_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between upload attempts (5s)
pub const UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Drive subfolders per artifact family
pub const ITEM_IMAGE_SUBFOLDER: &str = "items";
pub const PROOF_SUBFOLDER: &str = "proofs";
pub const REPORT_SUBFOLDER: &str = "reports";
pub const AUTOBACKUP_SUBFOLDER: &str = "autobackup";

/// How often the daemon evaluates the automatic backup schedule (60s)
pub const BACKUP_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Local time zone of the school (WIB, UTC+7)
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

/// Characters of a CSV row kept as the job's data preview
pub const DATA_PREVIEW_MAX_CHARS: usize = 80;

/// Timestamp format used in artifact file names
pub const ARTIFACT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
