//! Conversation history assembly.
//!
//! Prior exchanges of a session are rendered into a plain-text transcript,
//! and the files attached to them are re-downloaded so the backend sees every
//! document of the conversation, not only those of the current turn.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::backend::FileData;
use crate::store::{Attachment, AttachmentId, BlobStore, DurableStore, Exchange, SessionId};

use super::error::ExchangeError;

/// Transcript plus the complete file set for the backend.
#[derive(Debug, Clone, Default)]
pub struct AssembledHistory {
    pub transcript: String,
    pub files: Vec<FileData>,
}

/// Render exchanges (chronological order) as a transcript.
pub fn render_transcript(
    exchanges: &[Exchange],
    attachments: &HashMap<AttachmentId, Attachment>,
) -> String {
    let mut transcript = String::new();
    for exchange in exchanges {
        let names: Vec<&str> = exchange
            .attachment_ids
            .iter()
            .filter_map(|id| attachments.get(id))
            .map(|a| a.file_name.as_str())
            .collect();
        let attached = if names.is_empty() {
            String::new()
        } else {
            format!(" [Attached: {}]", names.join(", "))
        };
        transcript.push_str(&format!(
            "User: {}{}\nAssistant: {}\n\n",
            exchange.query, attached, exchange.final_response
        ));
    }
    transcript
}

/// Load up to `limit` prior exchanges and merge their files into `files`.
///
/// Historical attachments whose file name already appears in `files` are not
/// downloaded. Blobs that cannot be read are logged and skipped.
pub async fn assemble(
    store: &dyn DurableStore,
    blobs: &dyn BlobStore,
    session_id: SessionId,
    before: Option<chrono::DateTime<chrono::Utc>>,
    limit: usize,
    mut files: Vec<FileData>,
) -> Result<AssembledHistory, ExchangeError> {
    let mut exchanges = store
        .recent_exchanges(session_id, before, limit)
        .await
        .map_err(ExchangeError::History)?;
    exchanges.reverse();

    let ids: Vec<AttachmentId> = exchanges
        .iter()
        .flat_map(|e| e.attachment_ids.iter().copied())
        .collect();
    let attachments: HashMap<AttachmentId, Attachment> = if ids.is_empty() {
        HashMap::new()
    } else {
        store
            .get_attachments(&ids)
            .await
            .map_err(ExchangeError::History)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect()
    };

    let transcript = render_transcript(&exchanges, &attachments);

    let mut seen: HashSet<String> = files.iter().map(|f| f.name.clone()).collect();
    for id in &ids {
        let Some(attachment) = attachments.get(id) else {
            continue;
        };
        if seen.contains(&attachment.file_name) {
            continue;
        }
        match blobs.get(&attachment.storage_key).await {
            Ok(bytes) => {
                seen.insert(attachment.file_name.clone());
                files.push(FileData {
                    name: attachment.file_name.clone(),
                    mime_type: attachment.mime_type.clone(),
                    bytes,
                });
            }
            Err(e) => {
                warn!(key = %attachment.storage_key, error = %e, "Failed to load historical file");
            }
        }
    }

    debug!(
        session_id,
        exchanges = exchanges.len(),
        files = files.len(),
        "Assembled history"
    );
    Ok(AssembledHistory { transcript, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    use crate::store::{AttachmentStatus, TokenUsage};

    fn exchange(id: i64, query: &str, response: &str, attachment_ids: Vec<i64>) -> Exchange {
        Exchange {
            id,
            session_id: 1,
            user_id: 1,
            token: id.to_string(),
            query: query.to_string(),
            mode: "default".to_string(),
            thoughts: serde_json::json!([]),
            final_response: response.to_string(),
            attachment_ids,
            usage: TokenUsage::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn attachment(id: i64, name: &str) -> Attachment {
        Attachment {
            id,
            session_id: 1,
            user_id: 1,
            exchange_id: None,
            file_name: name.to_string(),
            mime_type: "text/plain".to_string(),
            storage_key: format!("{id}.txt"),
            size_bytes: 1,
            status: AttachmentStatus::Linked,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transcript_lists_attachment_names() {
        let attachments: HashMap<_, _> = [(10, attachment(10, "a.pdf")), (11, attachment(11, "b.png"))]
            .into_iter()
            .collect();
        let transcript = render_transcript(
            &[
                exchange(1, "first", "one", vec![10, 11]),
                exchange(2, "second", "two", vec![]),
            ],
            &attachments,
        );
        assert_eq!(
            transcript,
            "User: first [Attached: a.pdf, b.png]\nAssistant: one\n\nUser: second\nAssistant: two\n\n"
        );
    }

    #[test]
    fn empty_history_renders_nothing() {
        assert_eq!(render_transcript(&[], &HashMap::new()), "");
    }

    #[tokio::test]
    async fn historical_files_merged_by_name() {
        use crate::store::{
            BlobStore, MemoryBlobStore, MemoryStore, NewAttachment, NewExchange,
        };

        let store = MemoryStore::new();
        let blobs = MemoryBlobStore::new();
        let mut ids = Vec::new();
        for name in ["dup.txt", "old.txt"] {
            let key = format!("{name}.blob");
            blobs
                .put(&key, "text/plain", Bytes::from(name.to_string()))
                .await
                .unwrap();
            ids.push(
                store
                    .create_attachment(NewAttachment {
                        session_id: 1,
                        user_id: 1,
                        file_name: name.to_string(),
                        mime_type: "text/plain".to_string(),
                        storage_key: key,
                        size_bytes: 1,
                    })
                    .await
                    .unwrap(),
            );
        }
        store
            .insert_exchange(NewExchange {
                token: "t".to_string(),
                session_id: 1,
                user_id: 1,
                query: "q".to_string(),
                mode: "default".to_string(),
                thoughts: serde_json::json!([]),
                final_response: "r".to_string(),
                attachment_ids: ids,
                usage: TokenUsage::default(),
            })
            .await
            .unwrap();

        let current = vec![FileData {
            name: "dup.txt".to_string(),
            mime_type: "text/plain".to_string(),
            bytes: Bytes::from_static(b"fresh"),
        }];
        let assembled = assemble(&store, &blobs, 1, None, 10, current).await.unwrap();

        let names: Vec<_> = assembled.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["dup.txt", "old.txt"]);
        assert_eq!(assembled.files[0].bytes.as_ref(), b"fresh");
        assert!(assembled.transcript.contains("[Attached: dup.txt, old.txt]"));
    }
}
