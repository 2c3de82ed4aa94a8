//! Outbound side of a history event: file upload and event notification.

use crate::error::LinkError;
use crate::model::{ContactRef, Message};

/// Receives the files and notifications that accompany a new history event.
///
/// Uploads run before the link transaction opens and `record_event` runs
/// inside it. An error from either leaves the chain unlinked.
pub trait HistoryService: Send + Sync {
    /// Stores one attachment against `entity` and returns its file id.
    fn upload_attachment(
        &self,
        content: &[u8],
        file_name: &str,
        content_type: &str,
        entity: &ContactRef,
    ) -> Result<String, LinkError>;

    /// Records that `message` was attached to `entity` with `file_ids`.
    fn record_event(
        &self,
        message: &Message,
        entity: &ContactRef,
        file_ids: &[String],
    ) -> Result<(), LinkError>;
}

/// Accepts everything and stores nothing outside the history table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistoryService;

impl HistoryService for NoopHistoryService {
    fn upload_attachment(
        &self,
        content: &[u8],
        file_name: &str,
        _content_type: &str,
        entity: &ContactRef,
    ) -> Result<String, LinkError> {
        tracing::debug!(%entity, file_name, bytes = content.len(), "Skipping attachment upload");
        Ok(format!("{}/{}", entity, file_name))
    }

    fn record_event(
        &self,
        message: &Message,
        entity: &ContactRef,
        file_ids: &[String],
    ) -> Result<(), LinkError> {
        tracing::debug!(
            message_id = message.id,
            %entity,
            files = file_ids.len(),
            "History event recorded"
        );
        Ok(())
    }
}
