//! Builders and collaborator doubles for test data.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crmlink::{
    Attachment, ContactDirectory, Database, Folder, LinkError, Message, SqliteContactDirectory,
};

/// Builder for `Message` fixtures. Defaults: tenant 1, user "user-1",
/// mailbox 9, chain "c1", inbox, received one minute ago.
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            message: Message {
                id,
                tenant: 1,
                user_id: "user-1".to_string(),
                mailbox_id: 9,
                chain_id: Some("c1".to_string()),
                folder: Folder::Inbox,
                from: String::new(),
                to: String::new(),
                cc: String::new(),
                bcc: String::new(),
                subject: format!("Message {}", id),
                received_at: Utc::now() - Duration::minutes(1),
                body: Some(format!("Body of message {}", id)),
                attachments: Vec::new(),
            },
        }
    }

    pub fn tenant(mut self, tenant: i64) -> Self {
        self.message.tenant = tenant;
        self
    }

    pub fn mailbox(mut self, mailbox_id: i64) -> Self {
        self.message.mailbox_id = mailbox_id;
        self
    }

    pub fn chain(mut self, chain_id: &str) -> Self {
        self.message.chain_id = Some(chain_id.to_string());
        self
    }

    pub fn folder(mut self, folder: Folder) -> Self {
        self.message.folder = folder;
        self
    }

    pub fn from(mut self, from: &str) -> Self {
        self.message.from = from.to_string();
        self
    }

    pub fn to(mut self, to: &str) -> Self {
        self.message.to = to.to_string();
        self
    }

    pub fn cc(mut self, cc: &str) -> Self {
        self.message.cc = cc.to_string();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.message.received_at = received_at;
        self
    }

    pub fn attachment(mut self, id: i64, file_name: &str, is_embedded: bool) -> Self {
        self.message.attachments.push(Attachment {
            id,
            file_name: file_name.to_string(),
            content_type: "application/octet-stream".to_string(),
            is_embedded,
            content: Some(file_name.as_bytes().to_vec()),
        });
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

/// Directory that fails for selected addresses and records every lookup.
pub struct FlakyDirectory {
    inner: SqliteContactDirectory,
    failing: HashSet<String>,
    pub lookups: Mutex<Vec<String>>,
}

impl FlakyDirectory {
    pub fn new(db: Database, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteContactDirectory::new(db),
            failing: failing.iter().map(|a| a.to_string()).collect(),
            lookups: Mutex::new(Vec::new()),
        })
    }

    pub fn looked_up(&self, address: &str) -> bool {
        self.lookups.lock().unwrap().iter().any(|a| a == address)
    }
}

impl ContactDirectory for FlakyDirectory {
    fn find_contact_ids_by_email(
        &self,
        tenant: i64,
        address: &str,
    ) -> Result<Vec<i64>, LinkError> {
        self.lookups.lock().unwrap().push(address.to_string());
        if self.failing.contains(address) {
            return Err(LinkError::Directory(format!("directory unavailable for {}", address)));
        }
        self.inner.find_contact_ids_by_email(tenant, address)
    }
}
