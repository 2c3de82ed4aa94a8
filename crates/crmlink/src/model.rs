//! Typed records shared by the mail store, the directory and the linker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mail folder a message lives in.
///
/// The numeric values match the mail store's `folder` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    Sent,
    Inbox,
    Draft,
    Trash,
    Spam,
}

impl Folder {
    pub fn code(self) -> i64 {
        match self {
            Folder::Sent => 1,
            Folder::Inbox => 2,
            Folder::Draft => 3,
            Folder::Trash => 4,
            Folder::Spam => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Folder::Sent),
            2 => Some(Folder::Inbox),
            3 => Some(Folder::Draft),
            4 => Some(Folder::Trash),
            5 => Some(Folder::Spam),
            _ => None,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Folder::Sent => write!(f, "sent"),
            Folder::Inbox => write!(f, "inbox"),
            Folder::Draft => write!(f, "draft"),
            Folder::Trash => write!(f, "trash"),
            Folder::Spam => write!(f, "spam"),
        }
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: i64,
    pub file_name: String,
    pub content_type: String,
    /// Inline parts (signatures, embedded images) are never uploaded.
    pub is_embedded: bool,
    /// Only populated when the message was loaded with attachments.
    pub content: Option<Vec<u8>>,
}

/// A single stored email.
///
/// Identity is `(tenant, id)`. Messages sharing `chain_id` inside one
/// mailbox form a chain, the unit of linking.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub tenant: i64,
    pub user_id: String,
    pub mailbox_id: i64,
    pub chain_id: Option<String>,
    pub folder: Folder,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// The raw participant header fields, in From/To/Cc/Bcc order.
    pub fn participant_fields(&self) -> [&str; 4] {
        [&self.from, &self.to, &self.cc, &self.bcc]
    }

    /// The chain id, treating an empty string as absent.
    pub fn chain(&self) -> Option<&str> {
        self.chain_id.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// The principal the linker acts as for this message: its owner.
    pub fn owner(&self) -> Principal {
        Principal {
            tenant: self.tenant,
            user_id: self.user_id.clone(),
        }
    }
}

/// What to load alongside a message's header columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub load_body: bool,
    pub load_attachments: bool,
}

impl MessageOptions {
    pub fn full() -> Self {
        Self {
            load_body: true,
            load_attachments: true,
        }
    }
}

/// Position in the candidate ordering: receipt time, then message id.
///
/// Candidates are the messages strictly after the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ScanCursor {
    pub received_at: DateTime<Utc>,
    pub message_id: i64,
}

impl ScanCursor {
    /// Cursor just past every message received at or before `received_at`.
    pub fn after(received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            message_id: i64::MAX,
        }
    }

    /// Cursor just past `message`.
    pub fn past(message: &Message) -> Self {
        Self {
            received_at: message.received_at,
            message_id: message.id,
        }
    }
}

impl From<DateTime<Utc>> for ScanCursor {
    fn from(received_at: DateTime<Utc>) -> Self {
        Self::after(received_at)
    }
}

/// Kind of CRM entity a link points at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Case,
    Opportunity,
}

impl EntityKind {
    pub fn code(self) -> i64 {
        match self {
            EntityKind::Contact => 0,
            EntityKind::Case => 1,
            EntityKind::Opportunity => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EntityKind::Contact),
            1 => Some(EntityKind::Case),
            2 => Some(EntityKind::Opportunity),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Contact => write!(f, "contact"),
            EntityKind::Case => write!(f, "case"),
            EntityKind::Opportunity => write!(f, "opportunity"),
        }
    }
}

/// A typed reference to a CRM entity. Equality is `(id, kind)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContactRef {
    pub id: i64,
    pub kind: EntityKind,
}

impl ContactRef {
    pub fn new(id: i64, kind: EntityKind) -> Self {
        Self { id, kind }
    }

    pub fn contact(id: i64) -> Self {
        Self::new(id, EntityKind::Contact)
    }
}

impl fmt::Display for ContactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// The security principal a linking pass runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub tenant: i64,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_codes_round_trip() {
        for folder in [
            Folder::Sent,
            Folder::Inbox,
            Folder::Draft,
            Folder::Trash,
            Folder::Spam,
        ] {
            assert_eq!(Folder::from_code(folder.code()), Some(folder));
        }
        assert_eq!(Folder::from_code(42), None);
    }

    #[test]
    fn test_contact_ref_equality_includes_kind() {
        assert_eq!(ContactRef::contact(4), ContactRef::new(4, EntityKind::Contact));
        assert_ne!(ContactRef::contact(4), ContactRef::new(4, EntityKind::Case));
        assert_eq!(ContactRef::new(7, EntityKind::Opportunity).to_string(), "opportunity:7");
    }

    #[test]
    fn test_blank_chain_is_absent() {
        let mut message = Message {
            id: 1,
            tenant: 1,
            user_id: "u".to_string(),
            mailbox_id: 1,
            chain_id: Some("  ".to_string()),
            folder: Folder::Inbox,
            from: String::new(),
            to: String::new(),
            cc: String::new(),
            bcc: String::new(),
            subject: String::new(),
            received_at: Utc::now(),
            body: None,
            attachments: Vec::new(),
        };
        assert_eq!(message.chain(), None);
        message.chain_id = Some("c1".to_string());
        assert_eq!(message.chain(), Some("c1"));
    }
}
