// Drive relay transport
//
// A web-app relay stores files in the school's drive. One POST per attempt:
// JSON body with the file base64-encoded, JSON answer with the file URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sarpras_core::error::{AppError, Result};
use sarpras_core::port::{AttemptError, UploadRequest, UploadTransport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest response body echoed into an error message
const MAX_ECHOED_BODY: usize = 200;

#[derive(Serialize)]
struct RelayRequest<'a> {
    secret: &'a str,
    file: String,
    filename: &'a str,
    mimetype: &'a str,
    #[serde(rename = "folderId")]
    folder_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subfolder: Option<&'a str>,
}

#[derive(Deserialize)]
struct RelayResponse {
    status: String,
    url: Option<String>,
    message: Option<String>,
}

pub struct DriveRelayTransport {
    client: reqwest::Client,
    endpoint: String,
    secret: String,
}

impl DriveRelayTransport {
    /// `timeout` bounds a single attempt
    pub fn new(
        endpoint: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build relay HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            secret: secret.into(),
        })
    }
}

#[async_trait]
impl UploadTransport for DriveRelayTransport {
    async fn send(
        &self,
        request: &UploadRequest,
        contents: &[u8],
    ) -> std::result::Result<String, AttemptError> {
        if self.endpoint.is_empty() {
            return Err(AttemptError::InvalidRequest(
                "relay endpoint is not configured".to_string(),
            ));
        }

        let body = RelayRequest {
            secret: &self.secret,
            file: STANDARD.encode(contents),
            filename: &request.file_name,
            mimetype: &request.mime_type,
            folder_id: &request.folder_id,
            subfolder: request.subfolder.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;
        let http_status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;
        debug!(status = %http_status, file = %request.file_name, "Relay responded");

        match serde_json::from_str::<RelayResponse>(&text) {
            Ok(RelayResponse {
                status,
                url: Some(url),
                ..
            }) if status == "success" && !url.is_empty() => Ok(url),
            Ok(RelayResponse {
                status, message, ..
            }) if status == "error" => Err(AttemptError::Rejected(
                message.unwrap_or_else(|| "no message".to_string()),
            )),
            _ => Err(AttemptError::Malformed(format!(
                "HTTP {}: {}",
                http_status,
                echo(&text)
            ))),
        }
    }
}

fn echo(body: &str) -> String {
    if body.chars().count() <= MAX_ECHOED_BODY {
        return body.to_string();
    }
    let mut short: String = body.chars().take(MAX_ECHOED_BODY).collect();
    short.push('…');
    short
}
