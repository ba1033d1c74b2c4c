//! Attachment ingestion: decode, store bytes, then write metadata.

use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::FileData;
use crate::store::{AttachmentId, BlobStore, DurableStore, NewAttachment, SessionId, UserId};

use super::request::FilePayload;

/// Files of the current turn.
#[derive(Debug, Default)]
pub struct Ingested {
    /// Every payload that decoded, in request order.
    pub files: Vec<FileData>,
    /// Attachments whose bytes and metadata were both stored.
    pub attachment_ids: Vec<AttachmentId>,
}

/// Blob key for an uploaded file: a random id plus the original extension.
pub fn blob_key(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}{}", Uuid::new_v4(), ext)
}

/// Store each payload; failures skip the file rather than abort.
///
/// When the metadata write fails the blob written just before it is deleted
/// again, so no unreferenced bytes are left behind.
pub async fn ingest_files(
    store: &dyn DurableStore,
    blobs: &dyn BlobStore,
    session_id: SessionId,
    user_id: UserId,
    payloads: &[FilePayload],
) -> Ingested {
    let mut ingested = Ingested::default();
    if payloads.is_empty() {
        return ingested;
    }
    info!(session_id, files = payloads.len(), "Ingesting attachments");

    for payload in payloads {
        let file = match payload.decode() {
            Ok(file) => file,
            Err(e) => {
                warn!(file = %payload.file_name, error = %e, "Skipping undecodable file");
                continue;
            }
        };

        let key = blob_key(&file.name);
        if let Err(e) = blobs.put(&key, &file.mime_type, file.bytes.clone()).await {
            warn!(file = %file.name, error = %e, "Failed to store file bytes");
            ingested.files.push(file);
            continue;
        }

        let metadata = NewAttachment {
            session_id,
            user_id,
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            storage_key: key.clone(),
            size_bytes: file.bytes.len() as u64,
        };
        match store.create_attachment(metadata).await {
            Ok(id) => ingested.attachment_ids.push(id),
            Err(e) => {
                warn!(file = %file.name, error = %e, "Failed to record attachment, removing blob");
                if let Err(e) = blobs.delete(std::slice::from_ref(&key)).await {
                    warn!(key = %key, error = %e, "Failed to remove orphaned blob");
                }
            }
        }
        ingested.files.push(file);
    }

    ingested
}
