// Retrying uploader
//
// Reads the file once, then pushes it through the transport under the
// retry policy. Every attempt failure (network, relay error status,
// malformed response) is retried; a missing file never is.

use crate::application::retry::{retry_with, RetryPolicy};
use crate::error::{AppError, Result};
use crate::port::{AttemptError, FileUploader, ProgressFn, UploadRequest, UploadTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RetryingUploader {
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
}

impl RetryingUploader {
    pub fn new(transport: Arc<dyn UploadTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }
}

#[async_trait]
impl FileUploader for RetryingUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<String> {
        let notify = |message: &str| {
            if let Some(progress) = progress {
                progress(message);
            }
        };

        // Readability is checked before the first attempt and is not an attempt
        let contents = match tokio::fs::read(&request.local_path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %request.local_path.display(), error = %e, "Upload source unreadable");
                return Err(AppError::Upload(format!(
                    "File not found or unreadable: {} ({})",
                    request.local_path.display(),
                    e
                )));
            }
        };

        let transport = self.transport.as_ref();
        let req = &request;
        let bytes = contents.as_slice();
        let max_attempts = self.policy.max_attempts;

        let result = retry_with(
            &self.policy,
            AttemptError::is_retryable,
            |attempt| {
                notify(&format!(
                    "Uploading {} (attempt {}/{})",
                    req.file_name, attempt, max_attempts
                ))
            },
            move |_| transport.send(req, bytes),
        )
        .await;

        match result {
            Ok(url) => {
                info!(file = %request.file_name, url = %url, "Upload complete");
                notify(&format!("Uploaded {}", request.file_name));
                Ok(url)
            }
            Err(failure) => Err(AppError::Upload(format!(
                "{} {}",
                request.file_name, failure
            ))),
        }
    }
}
