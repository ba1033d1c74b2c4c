//! Inbound conversation request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::ExchangeError;
use crate::backend::FileData;
use crate::store::{ExchangeId, SessionId};

/// One user turn, as received over either transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub files: Vec<FilePayload>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub is_regeneration: bool,
    #[serde(default, alias = "log_id")]
    pub request_log_id_to_regen: Option<ExchangeId>,
    /// Client correlation id echoed in `log_saved`.
    #[serde(default)]
    pub temp_id: Option<i64>,
}

/// File attached inline as base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    pub base64_data: String,
}

impl FilePayload {
    pub fn decode(&self) -> Result<FileData, base64::DecodeError> {
        let bytes = STANDARD.decode(self.base64_data.trim())?;
        Ok(FileData {
            name: self.file_name.clone(),
            mime_type: if self.mime_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                self.mime_type.clone()
            },
            bytes: Bytes::from(bytes),
        })
    }
}

impl ConversationRequest {
    /// The exchange to regenerate, if this is a regeneration.
    pub fn regeneration_target(&self) -> Result<Option<ExchangeId>, ExchangeError> {
        match (self.is_regeneration, self.request_log_id_to_regen) {
            (false, _) => Ok(None),
            (true, Some(id)) => Ok(Some(id)),
            (true, None) => Err(ExchangeError::InvalidRequest(
                "regeneration requires request_log_id_to_regen".to_string(),
            )),
        }
    }

    /// Requested mode, or `default` when empty.
    pub fn mode_or_default(&self) -> &str {
        let mode = self.mode.trim();
        if mode.is_empty() { "default" } else { mode }
    }

    /// Non-empty custom instructions.
    pub fn instructions(&self) -> Option<&str> {
        self.custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
