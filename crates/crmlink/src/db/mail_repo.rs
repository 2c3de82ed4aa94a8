//! Mail store repository: read access to `mail_mail` and `mail_attachment`
//! plus the inserts used to seed an embedded store.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::model::{Attachment, Folder, Message, MessageOptions, ScanCursor};

const MESSAGE_COLUMNS: &str = "m.id, m.tenant, m.id_user, m.id_mailbox, m.chain_id, m.folder,
     m.from_text, m.to_text, m.cc, m.bcc, m.subject, m.body, m.date_received";

/// Tenant status value for active tenants.
pub const TENANT_ACTIVE: i64 = 0;

fn message_from_row(row: &Row<'_>, load_body: bool) -> Result<Message, DatabaseError> {
    let folder_code: i64 = row.get("folder")?;
    let folder = Folder::from_code(folder_code).ok_or(DatabaseError::InvalidCode {
        column: "folder",
        code: folder_code,
    })?;
    let received: String = row.get("date_received")?;
    let body: Option<String> = if load_body { row.get("body")? } else { None };

    Ok(Message {
        id: row.get("id")?,
        tenant: row.get("tenant")?,
        user_id: row.get("id_user")?,
        mailbox_id: row.get("id_mailbox")?,
        chain_id: row.get("chain_id")?,
        folder,
        from: row.get("from_text")?,
        to: row.get("to_text")?,
        cc: row.get("cc")?,
        bcc: row.get("bcc")?,
        subject: row.get("subject")?,
        received_at: parse_timestamp(&received)?,
        body,
        attachments: Vec::new(),
    })
}

fn collect_messages(
    conn: &Connection,
    sql: &str,
    values: &[&dyn ToSql],
) -> Result<Vec<Message>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(values)?;
    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        messages.push(message_from_row(row, false)?);
    }
    Ok(messages)
}

/// Finds messages past `after` in the given folders that have neither a
/// chain link nor any history row (event or tombstone).
///
/// Ordered by `(receipt time, id)` ascending, at most `limit` rows.
/// Messages sharing a receipt time are split by id, so a cursor taken from
/// the last row of a batch always moves past that batch.
pub fn find_candidates(
    conn: &Connection,
    tenant: i64,
    after: &ScanCursor,
    folders: &[Folder],
    limit: usize,
) -> Result<Vec<Message>, DatabaseError> {
    if folders.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (0..folders.len()).map(|i| format!("?{}", i + 5)).collect();
    let sql = format!(
        "SELECT {} FROM mail_mail m
         WHERE m.tenant = ?1
           AND (m.date_received, m.id) > (?2, ?4)
           AND m.is_removed = 0
           AND m.folder IN ({})
           AND NOT EXISTS (
               SELECT 1 FROM crm_history_event e
               WHERE e.tenant_id = m.tenant AND e.message_id = m.id
           )
           AND NOT EXISTS (
               SELECT 1 FROM mail_chain_x_crm_entity l
               WHERE l.id_tenant = m.tenant AND l.id_mailbox = m.id_mailbox
                 AND l.id_chain = m.chain_id
           )
         ORDER BY m.date_received ASC, m.id ASC
         LIMIT ?3",
        MESSAGE_COLUMNS,
        placeholders.join(", ")
    );

    let since = format_timestamp(&after.received_at);
    let limit = limit as i64;
    let codes: Vec<i64> = folders.iter().map(|f| f.code()).collect();

    let mut param_values: Vec<&dyn ToSql> = Vec::with_capacity(4 + codes.len());
    param_values.push(&tenant);
    param_values.push(&since);
    param_values.push(&limit);
    param_values.push(&after.message_id);
    for code in &codes {
        param_values.push(code);
    }

    collect_messages(conn, &sql, &param_values)
}

/// Finds one message by id within a tenant.
pub fn find_by_id(
    conn: &Connection,
    tenant: i64,
    message_id: i64,
    options: MessageOptions,
) -> Result<Option<Message>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM mail_mail m WHERE m.tenant = ?1 AND m.id = ?2 AND m.is_removed = 0",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![tenant, message_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut message = message_from_row(row, options.load_body)?;
    if options.load_attachments {
        message.attachments = find_attachments(conn, message.id, true)?;
    }
    Ok(Some(message))
}

/// Returns every live message of a chain inside one mailbox, oldest first.
pub fn find_chain(
    conn: &Connection,
    tenant: i64,
    mailbox_id: i64,
    chain_id: &str,
) -> Result<Vec<Message>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM mail_mail m
         WHERE m.tenant = ?1 AND m.id_mailbox = ?2 AND m.chain_id = ?3 AND m.is_removed = 0
         ORDER BY m.date_received ASC, m.id ASC",
        MESSAGE_COLUMNS
    );
    collect_messages(
        conn,
        &sql,
        &[&tenant as &dyn ToSql, &mailbox_id, &chain_id],
    )
}

/// Returns a message's attachments, with or without their content.
pub fn find_attachments(
    conn: &Connection,
    message_id: i64,
    with_content: bool,
) -> Result<Vec<Attachment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, content_type, is_embedded, content FROM mail_attachment
         WHERE id_mail = ?1 ORDER BY id",
    )?;
    let attachments = stmt
        .query_map(params![message_id], |row| {
            Ok(Attachment {
                id: row.get(0)?,
                file_name: row.get(1)?,
                content_type: row.get(2)?,
                is_embedded: row.get::<_, i64>(3)? != 0,
                content: if with_content { row.get(4)? } else { None },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attachments)
}

/// Returns the ids of all active tenants.
pub fn find_active_tenants(conn: &Connection) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id FROM tenant WHERE status = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![TENANT_ACTIVE], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Inserts or updates a tenant row.
pub fn upsert_tenant(conn: &Connection, tenant: i64, status: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tenant (id, status) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status",
        params![tenant, status],
    )?;
    Ok(())
}

/// Inserts a message together with its attachments.
pub fn insert_message(conn: &Connection, message: &Message) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO mail_mail (id, tenant, id_user, id_mailbox, chain_id, folder, from_text,
         to_text, cc, bcc, subject, body, date_received)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            message.id,
            message.tenant,
            message.user_id,
            message.mailbox_id,
            message.chain_id,
            message.folder.code(),
            message.from,
            message.to,
            message.cc,
            message.bcc,
            message.subject,
            message.body,
            format_timestamp(&message.received_at),
        ],
    )?;
    for attachment in &message.attachments {
        conn.execute(
            "INSERT INTO mail_attachment (id, id_mail, name, content_type, is_embedded, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.id,
                message.id,
                attachment.file_name,
                attachment.content_type,
                attachment.is_embedded as i64,
                attachment.content,
            ],
        )?;
    }
    Ok(())
}
