//! Mail store boundary.

use crate::db::{mail_repo, Database, DatabaseError};
use crate::error::LinkError;
use crate::model::{Folder, Message, MessageOptions, ScanCursor};

/// Read access to stored mail.
///
/// Implementations must be safe to share between the scanner thread and
/// on-demand callers.
pub trait MailStore: Send + Sync {
    /// Messages past `after` in `folders` with no chain link and no history
    /// row, in `(received_at, id)` order, at most `limit`.
    fn find_candidate_messages(
        &self,
        tenant: i64,
        after: &ScanCursor,
        folders: &[Folder],
        limit: usize,
    ) -> Result<Vec<Message>, LinkError>;

    /// Header columns of one message, or `None` if it does not exist.
    fn get_message(&self, tenant: i64, message_id: i64) -> Result<Option<Message>, LinkError>;

    /// One message with body and attachments loaded per `options`.
    fn get_full_message(
        &self,
        tenant: i64,
        message_id: i64,
        options: MessageOptions,
    ) -> Result<Message, LinkError>;

    /// Every message of a chain inside one mailbox.
    fn chain_messages(
        &self,
        tenant: i64,
        mailbox_id: i64,
        chain_id: &str,
    ) -> Result<Vec<Message>, LinkError>;

    /// Tenants the scanner should visit.
    fn active_tenants(&self) -> Result<Vec<i64>, LinkError>;
}

/// [`MailStore`] backed by the `mail_mail` tables of a [`Database`].
#[derive(Clone)]
pub struct SqliteMailStore {
    db: Database,
}

impl SqliteMailStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn store_error(e: DatabaseError) -> LinkError {
    LinkError::MailStore(e.to_string())
}

impl MailStore for SqliteMailStore {
    fn find_candidate_messages(
        &self,
        tenant: i64,
        after: &ScanCursor,
        folders: &[Folder],
        limit: usize,
    ) -> Result<Vec<Message>, LinkError> {
        self.db
            .with_conn(|conn| mail_repo::find_candidates(conn, tenant, after, folders, limit))
            .map_err(store_error)
    }

    fn get_message(&self, tenant: i64, message_id: i64) -> Result<Option<Message>, LinkError> {
        self.db
            .with_conn(|conn| {
                mail_repo::find_by_id(conn, tenant, message_id, MessageOptions::default())
            })
            .map_err(store_error)
    }

    fn get_full_message(
        &self,
        tenant: i64,
        message_id: i64,
        options: MessageOptions,
    ) -> Result<Message, LinkError> {
        self.db
            .with_conn(|conn| mail_repo::find_by_id(conn, tenant, message_id, options))
            .map_err(store_error)?
            .ok_or(LinkError::MessageNotFound { tenant, message_id })
    }

    fn chain_messages(
        &self,
        tenant: i64,
        mailbox_id: i64,
        chain_id: &str,
    ) -> Result<Vec<Message>, LinkError> {
        self.db
            .with_conn(|conn| mail_repo::find_chain(conn, tenant, mailbox_id, chain_id))
            .map_err(store_error)
    }

    fn active_tenants(&self) -> Result<Vec<i64>, LinkError> {
        self.db
            .with_conn(mail_repo::find_active_tenants)
            .map_err(store_error)
    }
}
