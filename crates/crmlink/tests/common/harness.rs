//! Test harness for isolated test execution.
//!
//! Every harness owns a temp directory with its own SQLite file, so tests
//! can open a second `Database` handle on the same file to stand in for a
//! second process.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crmlink::db::history_repo::{self, HistoryEventRow};
use crmlink::db::{contact_repo, link_repo, mail_repo};
use crmlink::{
    ActivityLog, ContactDirectory, ContactRef, Database, LinkStore, LinkingEngine, Message,
    Scanner, ScannerSettings, SqliteContactDirectory, SqliteMailStore,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("crmlink.db");
        let db = Database::open(&db_path, crmlink::db::DEFAULT_BUSY_TIMEOUT)
            .expect("Failed to open test database");
        Self {
            temp_dir,
            db_path,
            db,
        }
    }

    /// Opens an independent connection on the same database file.
    pub fn second_handle(&self) -> Database {
        Database::open(&self.db_path, crmlink::db::DEFAULT_BUSY_TIMEOUT)
            .expect("Failed to open second handle")
    }

    /// Engine on the bundled SQLite adapters of `db`.
    pub fn engine_on(db: &Database) -> LinkingEngine {
        Self::engine_with_directory(db, Arc::new(SqliteContactDirectory::new(db.clone())))
    }

    pub fn engine_with_directory(db: &Database, directory: Arc<dyn ContactDirectory>) -> LinkingEngine {
        LinkingEngine::new(
            LinkStore::new(db.clone()),
            Arc::new(SqliteMailStore::new(db.clone())),
            directory,
            ActivityLog::default(),
        )
    }

    pub fn engine(&self) -> LinkingEngine {
        Self::engine_on(&self.db)
    }

    pub fn scanner(&self, engine: LinkingEngine, settings: ScannerSettings) -> Scanner {
        Scanner::new(Arc::new(engine), settings, ActivityLog::default())
    }

    pub fn activate_tenant(&self, tenant: i64) {
        self.db
            .with_conn(|conn| mail_repo::upsert_tenant(conn, tenant, mail_repo::TENANT_ACTIVE))
            .expect("Failed to activate tenant");
    }

    pub fn insert_message(&self, message: &Message) {
        self.db
            .with_conn(|conn| mail_repo::insert_message(conn, message))
            .expect("Failed to insert message");
    }

    pub fn add_contact(&self, tenant: i64, contact_id: i64, emails: &[&str]) {
        self.db
            .with_conn(|conn| {
                contact_repo::insert_contact(
                    conn,
                    tenant,
                    contact_id,
                    &format!("Contact {}", contact_id),
                    emails,
                )
            })
            .expect("Failed to add contact");
    }

    pub fn links(&self, tenant: i64, mailbox_id: i64, chain_id: &str) -> Vec<ContactRef> {
        self.db
            .with_conn(|conn| link_repo::find_linked_entities(conn, tenant, mailbox_id, chain_id))
            .expect("Failed to read links")
    }

    pub fn history(&self, tenant: i64, message_id: i64) -> Vec<HistoryEventRow> {
        self.db
            .with_conn(|conn| history_repo::find_by_message(conn, tenant, message_id))
            .expect("Failed to read history")
    }

    pub fn count_rows(&self, table: &str) -> i64 {
        self.db
            .with_conn(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
            })
            .expect("Failed to count rows")
    }
}
