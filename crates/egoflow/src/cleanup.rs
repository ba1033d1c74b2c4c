//! Periodic removal of expired attachments.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{BlobStore, DurableStore, StorageResult};

/// Delete attachment rows older than `retention`, then their blobs.
///
/// Returns the number of attachments removed.
pub async fn sweep_expired_attachments(
    store: &dyn DurableStore,
    blobs: &dyn BlobStore,
    retention: Duration,
) -> StorageResult<usize> {
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let keys = store.delete_attachments_before(cutoff).await?;
    if !keys.is_empty() {
        blobs.delete(&keys).await?;
    }
    Ok(keys.len())
}

/// Run [`sweep_expired_attachments`] every `interval` until `shutdown` fires.
pub fn spawn_attachment_sweeper(
    store: Arc<dyn DurableStore>,
    blobs: Arc<dyn BlobStore>,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match sweep_expired_attachments(store.as_ref(), blobs.as_ref(), retention).await {
                        Ok(0) => debug!("No expired attachments"),
                        Ok(deleted) => info!(deleted, "Removed expired attachments"),
                        Err(e) => warn!(error = %e, "Attachment sweep failed"),
                    }
                }
            }
        }
        debug!("Attachment sweeper stopped");
    })
}
