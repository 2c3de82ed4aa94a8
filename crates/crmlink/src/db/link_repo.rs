//! Chain link repository: operations on `mail_chain_x_crm_entity`.
//!
//! Functions take a plain `Connection` so they can run either on their own
//! or inside a transaction opened by the caller.

use rusqlite::{params, Connection};

use super::DatabaseError;
use crate::model::{ContactRef, EntityKind};

/// Returns every entity linked to the chain, ordered by kind then id.
pub fn find_linked_entities(
    conn: &Connection,
    tenant: i64,
    mailbox_id: i64,
    chain_id: &str,
) -> Result<Vec<ContactRef>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, entity_type FROM mail_chain_x_crm_entity
         WHERE id_tenant = ?1 AND id_mailbox = ?2 AND id_chain = ?3
         ORDER BY entity_type, entity_id",
    )?;
    let rows = stmt
        .query_map(params![tenant, mailbox_id, chain_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, code)| {
            EntityKind::from_code(code)
                .map(|kind| ContactRef::new(id, kind))
                .ok_or(DatabaseError::InvalidCode {
                    column: "entity_type",
                    code,
                })
        })
        .collect()
}

/// Inserts the missing `(chain, entity)` pairs and leaves existing ones alone.
///
/// Returns how many rows were actually inserted.
pub fn insert_links<'a, I>(
    conn: &Connection,
    tenant: i64,
    mailbox_id: i64,
    chain_id: &str,
    entities: I,
) -> Result<usize, DatabaseError>
where
    I: IntoIterator<Item = &'a ContactRef>,
{
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO mail_chain_x_crm_entity
         (id_tenant, id_mailbox, id_chain, entity_id, entity_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut inserted = 0;
    for entity in entities {
        inserted += stmt.execute(params![
            tenant,
            mailbox_id,
            chain_id,
            entity.id,
            entity.kind.code()
        ])?;
    }
    Ok(inserted)
}
