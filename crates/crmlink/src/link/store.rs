//! Persistence of chain links, history events and no-match tombstones.
//!
//! Every write goes through here. Inserts use insert-or-ignore so a
//! concurrent linker in another process turns into a no-op instead of a
//! duplicate-key failure.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde_json::json;

use crate::crm::HistoryService;
use crate::db::history_repo::{self, NewHistoryEvent};
use crate::db::{format_timestamp, link_repo, Database};
use crate::error::LinkError;
use crate::model::{ContactRef, Message};

/// Everything needed to link one chain.
#[derive(Debug, Clone)]
pub struct ChainLink<'a> {
    pub tenant: i64,
    pub mailbox_id: i64,
    pub chain_id: &'a str,
    pub contacts: &'a BTreeSet<ContactRef>,
    /// Every message of the chain, loaded with the content to record.
    pub messages: &'a [Message],
    pub created_by: &'a str,
}

/// What one `link_chain` call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainLinkSummary {
    pub links_inserted: usize,
    pub events_created: usize,
    pub events_existing: usize,
    pub files_uploaded: usize,
}

#[derive(Clone)]
pub struct LinkStore {
    db: Database,
}

impl LinkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Entities already linked to the chain.
    pub fn linked_contacts(
        &self,
        tenant: i64,
        chain_id: &str,
        mailbox_id: i64,
    ) -> Result<BTreeSet<ContactRef>, LinkError> {
        let linked = self.db.with_conn(|conn| {
            link_repo::find_linked_entities(conn, tenant, mailbox_id, chain_id)
        })?;
        Ok(linked.into_iter().collect())
    }

    /// Adds the missing `(chain, entity)` pairs. Existing pairs are untouched.
    pub fn save_links(
        &self,
        tenant: i64,
        chain_id: &str,
        mailbox_id: i64,
        contacts: &BTreeSet<ContactRef>,
    ) -> Result<usize, LinkError> {
        self.db.with_transaction(|tx| {
            Ok(link_repo::insert_links(
                tx, tenant, mailbox_id, chain_id, contacts,
            )?)
        })
    }

    /// Writes one history event; a duplicate for the same pair is a no-op.
    pub fn create_history_event(&self, event: &NewHistoryEvent) -> Result<bool, LinkError> {
        Ok(self
            .db
            .with_conn(|conn| history_repo::insert_event(conn, event))?)
    }

    /// Marks the message as evaluated with no match. Repeating it is a no-op.
    pub fn create_no_match_tombstone(
        &self,
        tenant: i64,
        message_id: i64,
        created_by: &str,
    ) -> Result<bool, LinkError> {
        let now = Utc::now();
        Ok(self.db.with_conn(|conn| {
            history_repo::insert_tombstone(conn, tenant, message_id, created_by, &now)
        })?)
    }

    /// Links the chain and writes one history event per message and entity,
    /// all in one transaction.
    ///
    /// Attachments for pairs with no event yet are uploaded first, before the
    /// transaction takes the write lock. An upload error writes nothing. The
    /// transaction then inserts links and events and calls `record_event` for
    /// each newly inserted event; any error there rolls back every row
    /// written here. Uploads already made are not undone, so a retry after a
    /// rollback uploads the same files again.
    pub fn link_chain(
        &self,
        link: &ChainLink<'_>,
        history: &dyn HistoryService,
    ) -> Result<ChainLinkSummary, LinkError> {
        let uploads = self.upload_pending_attachments(link, history)?;

        self.db.with_transaction(|tx| {
            let mut summary = ChainLinkSummary {
                links_inserted: link_repo::insert_links(
                    tx,
                    link.tenant,
                    link.mailbox_id,
                    link.chain_id,
                    link.contacts,
                )?,
                ..Default::default()
            };

            let now = Utc::now();
            for message in link.messages {
                let content = history_content(message);
                for entity in link.contacts {
                    let event = NewHistoryEvent {
                        tenant: link.tenant,
                        message_id: message.id,
                        entity: *entity,
                        content: content.clone(),
                        created_on: now,
                        created_by: link.created_by.to_string(),
                    };
                    if !history_repo::insert_event(tx, &event)? {
                        summary.events_existing += 1;
                        continue;
                    }
                    summary.events_created += 1;

                    let file_ids = uploads
                        .get(&(message.id, *entity))
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    history.record_event(message, entity, file_ids)?;

                    if !file_ids.is_empty() {
                        summary.files_uploaded += file_ids.len();
                        history_repo::mark_has_files(tx, link.tenant, message.id, entity)?;
                    }
                }
            }

            Ok(summary)
        })
    }

    /// Uploads the regular attachments of every `(message, entity)` pair that
    /// has no history event yet. Runs without holding the connection.
    fn upload_pending_attachments(
        &self,
        link: &ChainLink<'_>,
        history: &dyn HistoryService,
    ) -> Result<HashMap<(i64, ContactRef), Vec<String>>, LinkError> {
        let mut uploads = HashMap::new();
        for message in link.messages {
            let files: Vec<_> = message
                .attachments
                .iter()
                .filter(|a| !a.is_embedded)
                .filter_map(|a| a.content.as_deref().map(|bytes| (a, bytes)))
                .collect();
            if files.is_empty() {
                continue;
            }

            let recorded = self.db.with_conn(|conn| {
                history_repo::recorded_entities(conn, link.tenant, message.id)
            })?;
            for entity in link.contacts.iter().filter(|e| !recorded.contains(*e)) {
                let mut file_ids = Vec::with_capacity(files.len());
                for (attachment, bytes) in &files {
                    file_ids.push(history.upload_attachment(
                        bytes,
                        &attachment.file_name,
                        &attachment.content_type,
                        entity,
                    )?);
                }
                uploads.insert((message.id, *entity), file_ids);
            }
        }
        Ok(uploads)
    }
}

/// The JSON summary stored as a history event's content.
pub fn history_content(message: &Message) -> String {
    json!({
        "from": message.from,
        "to": message.to,
        "subject": message.subject,
        "date": format_timestamp(&message.received_at),
        "folder": message.folder,
    })
    .to_string()
}
