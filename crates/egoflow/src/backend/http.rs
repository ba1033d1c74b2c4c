//! HTTP transport for the reasoning backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};

use super::error::BackendError;
use super::frame::FrameDecoder;
use super::types::{
    FileData, ReasoningRequest, ThoughtResponse, ToolRequest, ToolResponse,
};
use super::{FrameStream, ReasoningBackend};

/// Default per-call timeout; synthesis over large files can take minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

const OCTET_STREAM: &str = "application/octet-stream";

/// Reasoning backend reached over HTTP.
///
/// Thought and synthesis calls are multipart: a `request_data` text part with
/// the JSON request and one `files` part per attached file. Tool calls are
/// plain JSON posts.
#[derive(Debug, Clone)]
pub struct HttpReasoningBackend {
    client: Client,
    base_url: String,
}

impl HttpReasoningBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn post_multipart(
        &self,
        endpoint: &str,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<reqwest::Response, BackendError> {
        let request_data =
            serde_json::to_string(request).map_err(|e| BackendError::Decode(e.to_string()))?;
        let mut form = Form::new().text("request_data", request_data);
        for file in files {
            form = form.part("files", file_part(file)?);
        }

        info!(endpoint, files = files.len(), "Calling reasoning backend");
        let response = self
            .client
            .post(self.url(endpoint))
            .multipart(form)
            .send()
            .await?;
        ensure_success(response).await
    }
}

/// Multipart part for one file. A content type that does not parse is sent
/// as `application/octet-stream` rather than failing the call.
fn file_part(file: &FileData) -> Result<Part, BackendError> {
    let part = || Part::bytes(file.bytes.to_vec()).file_name(file.name.clone());
    match part().mime_str(&file.mime_type) {
        Ok(part) => Ok(part),
        Err(e) => {
            warn!(file = %file.name, mime_type = %file.mime_type, error = %e, "Unparseable content type, sending as octet-stream");
            Ok(part().mime_str(OCTET_STREAM)?)
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Api { status, message })
}

#[async_trait]
impl ReasoningBackend for HttpReasoningBackend {
    async fn generate_thought(
        &self,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<ThoughtResponse, BackendError> {
        let response = self
            .post_multipart("/generate_thought", request, files)
            .await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            BackendError::Decode(format!("{e}: {}", String::from_utf8_lossy(&body)))
        })
    }

    async fn synthesize_stream(
        &self,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<FrameStream, BackendError> {
        let response = self
            .post_multipart("/synthesize_stream", request, files)
            .await?;
        Ok(Box::pin(FrameDecoder::new(Box::pin(response.bytes_stream()))))
    }

    async fn execute_tool(&self, tool_name: &str, query: &str) -> Result<String, BackendError> {
        let endpoint = format!("/execute_tool/{tool_name}");
        debug!(endpoint = %endpoint, query_len = query.len(), "Calling tool");
        let response = self
            .client
            .post(self.url(&endpoint))
            .json(&ToolRequest { query })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: ToolResponse = response.json().await?;
        body.result.ok_or(BackendError::MissingToolResult)
    }
}
