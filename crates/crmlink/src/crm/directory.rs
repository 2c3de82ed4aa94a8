//! Contact lookup by email address.

use std::sync::Arc;

use crate::db::{contact_repo, Database};
use crate::error::LinkError;
use crate::mail::address;
use crate::model::ContactRef;

/// The CRM contact directory.
pub trait ContactDirectory: Send + Sync {
    /// Ids of contacts in `tenant` owning `address` (exact, case-insensitive).
    fn find_contact_ids_by_email(&self, tenant: i64, address: &str)
        -> Result<Vec<i64>, LinkError>;
}

/// [`ContactDirectory`] backed by the `crm_contact` tables of a [`Database`].
#[derive(Clone)]
pub struct SqliteContactDirectory {
    db: Database,
}

impl SqliteContactDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ContactDirectory for SqliteContactDirectory {
    fn find_contact_ids_by_email(
        &self,
        tenant: i64,
        address: &str,
    ) -> Result<Vec<i64>, LinkError> {
        self.db
            .with_conn(|conn| contact_repo::find_ids_by_email(conn, tenant, address))
            .map_err(|e| LinkError::Directory(e.to_string()))
    }
}

/// Maps one address to the contacts that own it.
#[derive(Clone)]
pub struct ContactResolver {
    directory: Arc<dyn ContactDirectory>,
}

impl ContactResolver {
    pub fn new(directory: Arc<dyn ContactDirectory>) -> Self {
        Self { directory }
    }

    /// Returns the contacts owning `address` in `tenant`.
    ///
    /// A malformed address resolves to nothing. Directory failures are
    /// returned so the caller can log them and move on to the next address.
    pub fn resolve(&self, tenant: i64, address: &str) -> Result<Vec<ContactRef>, LinkError> {
        let Some(normalized) = address::normalize(address) else {
            return Ok(Vec::new());
        };
        let ids = self.directory.find_contact_ids_by_email(tenant, &normalized)?;
        Ok(ids.into_iter().map(ContactRef::contact).collect())
    }
}
