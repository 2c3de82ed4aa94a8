//! The host-facing facade: lifecycle, status and on-demand linking.

use std::sync::Arc;

use crate::broadcast::ActivityLog;
use crate::config::Config;
use crate::crm::SqliteContactDirectory;
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Result};
use crate::link::{BatchReport, EngineOptions, LinkReport, LinkStore, LinkingEngine};
use crate::mail::SqliteMailStore;
use crate::worker::{CycleReport, ScanScheduler, Scanner, ScannerSettings, ScannerStatus};

pub struct CrmLinkService {
    engine: Arc<LinkingEngine>,
    scheduler: ScanScheduler,
    activity: ActivityLog,
}

impl CrmLinkService {
    /// Wires a service around an existing engine. The activity log should be
    /// the one the engine was built with.
    pub fn new(engine: Arc<LinkingEngine>, settings: ScannerSettings, activity: ActivityLog) -> Self {
        let scanner = Arc::new(Scanner::new(Arc::clone(&engine), settings, activity.clone()));
        Self {
            engine,
            scheduler: ScanScheduler::new(scanner, activity.clone()),
            activity,
        }
    }

    /// Builds the service on the bundled SQLite adapters of `db`.
    pub fn with_database(db: Database, config: &Config) -> Self {
        let activity = ActivityLog::default();
        let engine = LinkingEngine::new(
            LinkStore::new(db.clone()),
            Arc::new(SqliteMailStore::new(db.clone())),
            Arc::new(SqliteContactDirectory::new(db)),
            activity.clone(),
        )
        .with_options(EngineOptions {
            load_attachments: config.linking.load_attachments,
            check_access: config.linking.check_access,
        });
        Self::new(
            Arc::new(engine),
            ScannerSettings::from(&config.scanner),
            activity,
        )
    }

    /// Opens the configured database and builds the service on it.
    pub fn open(config: &Config) -> Result<Self> {
        let path = match &config.database.path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database.path is not set and no home directory was found".to_string(),
            })?,
        };
        let db = Database::open(&path, config.database.busy_timeout())?;
        Ok(Self::with_database(db, config))
    }

    pub fn engine(&self) -> &Arc<LinkingEngine> {
        &self.engine
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Starts periodic scanning. Returns `false` if it was already running.
    pub fn start(&self) -> Result<bool> {
        Ok(self.scheduler.start()?)
    }

    /// Drains and stops periodic scanning. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn status(&self) -> ScannerStatus {
        self.scheduler.status()
    }

    /// Links one message on demand.
    pub fn process_message(&self, tenant: i64, message_id: i64) -> LinkReport {
        LinkReport::new(message_id, self.engine.process_message_id(tenant, message_id))
    }

    /// Re-examines the last `hours` of one tenant's mail.
    pub fn process_recent(&self, tenant: i64, hours: u32) -> BatchReport {
        let scanner = self.scheduler.scanner();
        scanner.process_recent(tenant, hours).unwrap_or_else(|e| {
            tracing::error!(tenant, hours, error = %e, "Failed to process recent mail");
            BatchReport::failed(
                tenant,
                chrono::Utc::now() - chrono::Duration::hours(i64::from(hours)),
                e.to_string(),
            )
        })
    }

    /// Runs one scan cycle now on the calling thread. Returns `None` when a
    /// cycle is already in progress.
    pub fn scan_now(&self) -> Option<CycleReport> {
        self.scheduler.scanner().run_cycle()
    }
}
