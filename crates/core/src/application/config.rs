// Queue configuration shared by the initializer, worker and backup runner

use crate::application::worker::constants::STALL_THRESHOLD;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Drive folder every upload lands in (subfolders are created by the relay)
    pub drive_folder_id: String,
    /// Where item photos live
    pub item_image_dir: PathBuf,
    /// Where borrowing proof photos live
    pub proof_dir: PathBuf,
    pub stall_threshold: Duration,
}

impl QueueConfig {
    /// Standard layout: `<upload_dir>/items` and `<upload_dir>/proofs`
    pub fn new(drive_folder_id: impl Into<String>, upload_dir: impl AsRef<Path>) -> Self {
        let upload_dir = upload_dir.as_ref();
        Self {
            drive_folder_id: drive_folder_id.into(),
            item_image_dir: upload_dir.join("items"),
            proof_dir: upload_dir.join("proofs"),
            stall_threshold: STALL_THRESHOLD,
        }
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }
}
