//! Contact directory repository (`crm_contact` / `crm_contact_info`).

use rusqlite::{params, Connection};

use super::DatabaseError;

/// `crm_contact_info.type` value for email addresses.
pub const INFO_TYPE_EMAIL: i64 = 1;
/// `crm_contact.status_id` value for archived contacts.
pub const STATUS_ARCHIVED: i64 = 1;

/// Returns the ids of live contacts in `tenant` owning `address`.
///
/// The match is exact but case-insensitive.
pub fn find_ids_by_email(
    conn: &Connection,
    tenant: i64,
    address: &str,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.id FROM crm_contact_info i
         JOIN crm_contact c ON c.id = i.contact_id
         WHERE i.tenant_id = ?1 AND c.tenant_id = ?1
           AND i.type = ?2
           AND i.data = ?3 COLLATE NOCASE
           AND c.status_id != ?4
         ORDER BY c.id",
    )?;
    let ids = stmt
        .query_map(
            params![tenant, INFO_TYPE_EMAIL, address.trim(), STATUS_ARCHIVED],
            |row| row.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Inserts a contact with optional email addresses.
pub fn insert_contact(
    conn: &Connection,
    tenant: i64,
    contact_id: i64,
    display_name: &str,
    emails: &[&str],
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO crm_contact (id, tenant_id, display_name) VALUES (?1, ?2, ?3)",
        params![contact_id, tenant, display_name],
    )?;
    for email in emails {
        conn.execute(
            "INSERT INTO crm_contact_info (contact_id, tenant_id, type, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![contact_id, tenant, INFO_TYPE_EMAIL, email],
        )?;
    }
    Ok(())
}

/// Sets a contact's status.
pub fn set_status(conn: &Connection, contact_id: i64, status: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE crm_contact SET status_id = ?1 WHERE id = ?2",
        params![status, contact_id],
    )?;
    Ok(())
}
