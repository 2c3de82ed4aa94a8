//! History event repository: operations on `crm_history_event`.
//!
//! The same table also carries the no-match tombstone: a row with the
//! reserved [`CATEGORY_NO_MATCH`] category and entity id 0.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::model::{ContactRef, EntityKind};

/// Category of history events created for linked emails.
pub const CATEGORY_EMAIL: i64 = -3;
/// Reserved category marking "evaluated, no contact found".
pub const CATEGORY_NO_MATCH: i64 = -99;
/// Content stored on tombstone rows.
pub const NO_MATCH_CONTENT: &str = "NO_CRM_MATCH";

/// A history event about to be written.
#[derive(Debug, Clone)]
pub struct NewHistoryEvent {
    pub tenant: i64,
    pub message_id: i64,
    pub entity: ContactRef,
    pub content: String,
    pub created_on: DateTime<Utc>,
    pub created_by: String,
}

/// A raw history event row from the database.
#[derive(Debug, Clone)]
pub struct HistoryEventRow {
    pub id: i64,
    pub tenant: i64,
    pub message_id: i64,
    /// `None` for tombstones.
    pub entity: Option<ContactRef>,
    pub category: i64,
    pub content: String,
    pub have_files: bool,
    pub created_on: DateTime<Utc>,
    pub created_by: String,
}

impl HistoryEventRow {
    pub fn is_tombstone(&self) -> bool {
        self.category == CATEGORY_NO_MATCH
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let category: i64 = row.get("category_id")?;
        let entity = if category == CATEGORY_NO_MATCH {
            None
        } else {
            let code: i64 = row.get("entity_type")?;
            let kind = EntityKind::from_code(code).ok_or(DatabaseError::InvalidCode {
                column: "entity_type",
                code,
            })?;
            Some(ContactRef::new(row.get("entity_id")?, kind))
        };
        let created_on: String = row.get("created_on")?;

        Ok(Self {
            id: row.get("id")?,
            tenant: row.get("tenant_id")?,
            message_id: row.get("message_id")?,
            entity,
            category,
            content: row.get("content")?,
            have_files: row.get::<_, i64>("have_files")? != 0,
            created_on: parse_timestamp(&created_on)?,
            created_by: row.get("created_by")?,
        })
    }
}

/// Inserts an email history event unless one already exists for the same
/// `(message, entity)` pair.
///
/// Returns `true` when a row was inserted, `false` for a duplicate.
pub fn insert_event(conn: &Connection, event: &NewHistoryEvent) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO crm_history_event
         (tenant_id, message_id, entity_id, entity_type, category_id, content, created_on, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.tenant,
            event.message_id,
            event.entity.id,
            event.entity.kind.code(),
            CATEGORY_EMAIL,
            event.content,
            format_timestamp(&event.created_on),
            event.created_by,
        ],
    )?;
    Ok(changed == 1)
}

/// Flags the event for `(message, entity)` as carrying uploaded files.
pub fn mark_has_files(
    conn: &Connection,
    tenant: i64,
    message_id: i64,
    entity: &ContactRef,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE crm_history_event SET have_files = 1
         WHERE tenant_id = ?1 AND message_id = ?2 AND entity_id = ?3 AND entity_type = ?4
           AND category_id = ?5",
        params![
            tenant,
            message_id,
            entity.id,
            entity.kind.code(),
            CATEGORY_EMAIL
        ],
    )?;
    Ok(())
}

/// Writes the no-match tombstone for a message. A second call is a no-op.
///
/// Returns `true` when the tombstone was newly written.
pub fn insert_tombstone(
    conn: &Connection,
    tenant: i64,
    message_id: i64,
    created_by: &str,
    created_on: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO crm_history_event
         (tenant_id, message_id, entity_id, entity_type, category_id, content, created_on, created_by)
         VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7)",
        params![
            tenant,
            message_id,
            EntityKind::Contact.code(),
            CATEGORY_NO_MATCH,
            NO_MATCH_CONTENT,
            format_timestamp(created_on),
            created_by,
        ],
    )?;
    Ok(changed == 1)
}

/// Returns whether the message carries a no-match tombstone.
pub fn has_tombstone(conn: &Connection, tenant: i64, message_id: i64) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM crm_history_event
         WHERE tenant_id = ?1 AND message_id = ?2 AND category_id = ?3",
        params![tenant, message_id, CATEGORY_NO_MATCH],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Entities that already have an email event for the message.
pub fn recorded_entities(
    conn: &Connection,
    tenant: i64,
    message_id: i64,
) -> Result<BTreeSet<ContactRef>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, entity_type FROM crm_history_event
         WHERE tenant_id = ?1 AND message_id = ?2 AND category_id = ?3",
    )?;
    let mut rows = stmt.query(params![tenant, message_id, CATEGORY_EMAIL])?;
    let mut entities = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let code: i64 = row.get(1)?;
        let kind = EntityKind::from_code(code).ok_or(DatabaseError::InvalidCode {
            column: "entity_type",
            code,
        })?;
        entities.insert(ContactRef::new(row.get(0)?, kind));
    }
    Ok(entities)
}

/// Returns every history row (events and tombstones) for a message.
pub fn find_by_message(
    conn: &Connection,
    tenant: i64,
    message_id: i64,
) -> Result<Vec<HistoryEventRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM crm_history_event WHERE tenant_id = ?1 AND message_id = ?2 ORDER BY id",
    )?;
    let mut rows = stmt.query(params![tenant, message_id])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(HistoryEventRow::from_row(row)?);
    }
    Ok(events)
}
