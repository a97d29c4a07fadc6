// Upload Ports
//
// `UploadTransport` is one attempt against the drive relay;
// `FileUploader` is the complete, retrying upload the queue calls.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    /// Destination drive folder id
    pub folder_id: String,
    pub subfolder: Option<String>,
}

impl UploadRequest {
    /// Build a request for a local file, guessing its mime type from the extension
    pub fn for_file(
        local_path: impl Into<PathBuf>,
        folder_id: impl Into<String>,
        subfolder: Option<&str>,
    ) -> Self {
        let local_path = local_path.into();
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| local_path.to_string_lossy().into_owned());
        let mime_type = mime_guess::from_path(&local_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            local_path,
            file_name,
            mime_type,
            folder_id: folder_id.into(),
            subfolder: subfolder.map(str::to_string),
        }
    }
}

/// Why a single attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("network error: {0}")]
    Network(String),

    #[error("relay rejected the upload: {0}")]
    Rejected(String),

    #[error("malformed relay response: {0}")]
    Malformed(String),

    /// The request itself cannot be built; retrying cannot help
    #[error("invalid upload request: {0}")]
    InvalidRequest(String),
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::InvalidRequest(_))
    }
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// One attempt. Returns the drive URL of the stored file.
    async fn send(
        &self,
        request: &UploadRequest,
        contents: &[u8],
    ) -> std::result::Result<String, AttemptError>;
}

/// Progress messages emitted while an upload runs
pub type ProgressFn<'a> = dyn Fn(&str) + Send + Sync + 'a;

#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Upload a local file. `AppError::Upload` carries the final error message.
    async fn upload(&self, request: UploadRequest, progress: Option<&ProgressFn<'_>>)
        -> Result<String>;
}

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Mock FileUploader: succeeds with a deterministic URL unless the file
    /// name was marked as failing. Captures the bytes of readable files.
    #[derive(Clone, Default)]
    pub struct MockUploader {
        failing: Arc<Mutex<HashSet<String>>>,
        calls: Arc<Mutex<Vec<UploadRequest>>>,
        captured: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockUploader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_for(&self, file_name: impl Into<String>) {
            self.failing.lock().unwrap().insert(file_name.into());
        }

        pub fn calls(&self) -> Vec<UploadRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Bytes of an uploaded file, read at upload time
        pub fn captured(&self, file_name: &str) -> Option<Vec<u8>> {
            self.captured.lock().unwrap().get(file_name).cloned()
        }

        pub fn url_for(request: &UploadRequest) -> String {
            format!(
                "https://drive.test/{}/{}",
                request.subfolder.as_deref().unwrap_or("root"),
                request.file_name
            )
        }
    }

    #[async_trait]
    impl FileUploader for MockUploader {
        async fn upload(
            &self,
            request: UploadRequest,
            progress: Option<&ProgressFn<'_>>,
        ) -> Result<String> {
            if let Some(progress) = progress {
                progress(&format!("Uploading {}", request.file_name));
            }
            if let Ok(bytes) = tokio::fs::read(&request.local_path).await {
                self.captured
                    .lock()
                    .unwrap()
                    .insert(request.file_name.clone(), bytes);
            }
            self.calls.lock().unwrap().push(request.clone());

            if self.failing.lock().unwrap().contains(&request.file_name) {
                return Err(AppError::Upload(format!(
                    "simulated failure for {}",
                    request.file_name
                )));
            }
            Ok(Self::url_for(&request))
        }
    }
}
