//! Watermark-driven candidate scanning.
//!
//! One [`Scanner::run_cycle`] visits every active tenant, asks the mail store
//! for messages past the watermark that have neither a link nor a history
//! row, and hands them to the engine oldest first. The watermark moves only
//! after the cycle finishes.
//!
//! The watermark is a `(received_at, id)` cursor. A full batch moves it to
//! the batch's last message, so a batch whose messages keep being skipped
//! cannot hold back the mail behind it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::broadcast::{ActivityEvent, ActivityKind, ActivityLog};
use crate::config::ScannerConfig;
use crate::error::LinkError;
use crate::link::{BatchReport, LinkOutcome, LinkingEngine, OutcomeCounts};
use crate::model::{Folder, Message, ScanCursor};

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub grace_window: chrono::Duration,
    pub batch_size: usize,
    pub folders: Vec<Folder>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScannerSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            grace_window: chrono::Duration::seconds(config.grace_window_secs as i64),
            batch_size: config.batch_size,
            folders: config.folders.clone(),
        }
    }
}

/// What one scan cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Watermark the candidate queries ran against.
    pub since: ScanCursor,
    /// Watermark after the cycle.
    pub watermark: ScanCursor,
    pub tenants: usize,
    pub failed_tenants: Vec<i64>,
    #[serde(flatten)]
    pub counts: OutcomeCounts,
    /// The cycle stopped early because shutdown was requested.
    pub drained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct CycleHistory {
    last_completed_at: Option<DateTime<Utc>>,
    cycles_completed: u64,
    last_cycle: Option<CycleReport>,
}

/// Read-only view of the scanner's progress.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub scanning: bool,
    pub watermark: ScanCursor,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
}

/// Resets the single-flight flag when a cycle ends, including on panic.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Scanner {
    engine: Arc<LinkingEngine>,
    settings: ScannerSettings,
    activity: ActivityLog,
    scanning: AtomicBool,
    draining: AtomicBool,
    watermark: Mutex<ScanCursor>,
    history: Mutex<CycleHistory>,
}

impl Scanner {
    /// Creates a scanner whose watermark starts one grace window in the past.
    pub fn new(engine: Arc<LinkingEngine>, settings: ScannerSettings, activity: ActivityLog) -> Self {
        let watermark = ScanCursor::after(Utc::now() - settings.grace_window);
        Self {
            engine,
            settings,
            activity,
            scanning: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            watermark: Mutex::new(watermark),
            history: Mutex::new(CycleHistory::default()),
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    pub fn watermark(&self) -> ScanCursor {
        *lock(&self.watermark)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Asks an in-flight cycle to stop after its current message.
    pub fn request_drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    /// Accepts new work again after a drain.
    pub fn resume(&self) {
        self.draining.store(false, Ordering::Release);
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let history = lock(&self.history);
        ScanSnapshot {
            scanning: self.is_scanning(),
            watermark: self.watermark(),
            last_completed_at: history.last_completed_at,
            cycles_completed: history.cycles_completed,
            last_cycle: history.last_cycle.clone(),
        }
    }

    /// Runs one cycle unless another is already running, in which case the
    /// call returns `None` immediately.
    pub fn run_cycle(&self) -> Option<CycleReport> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Scan cycle already in progress, skipping");
            return None;
        }
        let _guard = ScanGuard(&self.scanning);
        Some(self.scan())
    }

    fn scan(&self) -> CycleReport {
        let started_at = Utc::now();
        let since = self.watermark();
        let mut counts = OutcomeCounts::default();
        let mut failed_tenants = Vec::new();
        let mut drained = false;
        let mut cycle_error = None;
        // `None` keeps the current watermark.
        let mut advance_to = Some(ScanCursor::after(started_at));

        let tenants = match self.engine.mail().active_tenants() {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Failed to list active tenants: {}", e);
                cycle_error = Some(e.to_string());
                advance_to = None;
                Vec::new()
            }
        };

        for &tenant in &tenants {
            if self.is_draining() {
                drained = true;
                break;
            }
            match self.scan_tenant(tenant, &since, &mut counts) {
                Ok(TenantScan::Complete) => {}
                Ok(TenantScan::Full { last }) => {
                    // Leave the rest of this tenant's window for the next cycle.
                    advance_to = advance_to.map(|t| t.min(last));
                }
                Ok(TenantScan::Drained) => {
                    drained = true;
                    break;
                }
                Err(e) => {
                    error!("Candidate query failed for tenant {}: {}", tenant, e);
                    self.activity.send(
                        ActivityEvent::new(
                            "ERROR",
                            ActivityKind::CycleFailed,
                            format!("Candidate query failed: {}", e),
                        )
                        .for_tenant(tenant),
                    );
                    failed_tenants.push(tenant);
                    advance_to = None;
                }
            }
        }

        if drained {
            info!("Scan cycle drained, watermark left at {}", since.received_at);
            advance_to = None;
        }

        let watermark = match advance_to {
            Some(target) => self.advance_watermark(target),
            None => self.watermark(),
        };

        let completed_at = Utc::now();
        let report = CycleReport {
            started_at,
            completed_at,
            since,
            watermark,
            tenants: tenants.len(),
            failed_tenants,
            counts,
            drained,
            error: cycle_error,
        };

        if counts.processed > 0 {
            info!(
                "Scan cycle: {} processed, {} linked, {} no match, {} already linked, {} skipped",
                counts.processed, counts.linked, counts.no_match, counts.already_linked, counts.skipped
            );
        } else {
            debug!("Scan cycle found no candidates");
        }
        self.activity.scanner(
            "INFO",
            ActivityKind::CycleCompleted,
            format!("{} messages processed", counts.processed),
        );

        let mut history = lock(&self.history);
        history.last_completed_at = Some(completed_at);
        history.cycles_completed += 1;
        history.last_cycle = Some(report.clone());

        report
    }

    fn scan_tenant(
        &self,
        tenant: i64,
        since: &ScanCursor,
        counts: &mut OutcomeCounts,
    ) -> Result<TenantScan, LinkError> {
        let candidates = self.engine.mail().find_candidate_messages(
            tenant,
            since,
            &self.settings.folders,
            self.settings.batch_size,
        )?;
        debug!("Tenant {}: {} candidates", tenant, candidates.len());

        let full = candidates.len() >= self.settings.batch_size;
        let last = candidates.last().map(ScanCursor::past);

        for message in &candidates {
            if self.is_draining() {
                return Ok(TenantScan::Drained);
            }
            counts.record(&self.process_guarded(message));
        }

        Ok(match last {
            Some(last) if full => TenantScan::Full { last },
            _ => TenantScan::Complete,
        })
    }

    /// Runs the engine, turning a panic into `Skipped` so the batch goes on.
    fn process_guarded(&self, message: &Message) -> LinkOutcome {
        catch_unwind(AssertUnwindSafe(|| self.engine.process_message(message))).unwrap_or_else(
            |_| {
                error!(
                    "Panic while processing message {} (tenant {})",
                    message.id, message.tenant
                );
                LinkOutcome::Skipped("panic while processing message".to_string())
            },
        )
    }

    fn advance_watermark(&self, target: ScanCursor) -> ScanCursor {
        let mut watermark = lock(&self.watermark);
        if target > *watermark {
            *watermark = target;
        }
        *watermark
    }

    /// Re-examines candidates received in the last `hours`, ignoring the
    /// watermark and leaving it untouched.
    pub fn process_recent(&self, tenant: i64, hours: u32) -> Result<BatchReport, LinkError> {
        let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
        let candidates = self.engine.mail().find_candidate_messages(
            tenant,
            &ScanCursor::after(since),
            &self.settings.folders,
            self.settings.batch_size,
        )?;
        if candidates.len() >= self.settings.batch_size {
            warn!(
                "Tenant {}: more than {} candidates in the last {}h, processing the oldest",
                tenant, self.settings.batch_size, hours
            );
        }

        let mut report = BatchReport::new(tenant, since);
        for message in &candidates {
            report.record(message.id, self.process_guarded(message));
        }
        Ok(report)
    }
}

enum TenantScan {
    Complete,
    /// The batch hit the limit; more candidates may follow `last`.
    Full { last: ScanCursor },
    Drained,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::SqliteContactDirectory;
    use crate::db::{contact_repo, mail_repo, Database};
    use crate::link::LinkStore;
    use crate::mail::SqliteMailStore;

    fn settings(batch_size: usize) -> ScannerSettings {
        ScannerSettings {
            batch_size,
            grace_window: chrono::Duration::hours(1),
            ..ScannerSettings::default()
        }
    }

    fn scanner(db: &Database, batch_size: usize) -> Scanner {
        let engine = LinkingEngine::new(
            LinkStore::new(db.clone()),
            Arc::new(SqliteMailStore::new(db.clone())),
            Arc::new(SqliteContactDirectory::new(db.clone())),
            ActivityLog::default(),
        );
        Scanner::new(Arc::new(engine), settings(batch_size), ActivityLog::default())
    }

    fn seed(db: &Database, count: i64) -> Vec<DateTime<Utc>> {
        let base = Utc::now() - chrono::Duration::minutes(30);
        db.with_conn(|conn| {
            mail_repo::upsert_tenant(conn, 1, mail_repo::TENANT_ACTIVE)?;
            contact_repo::insert_contact(conn, 1, 4, "Bob", &["b@y.com"])?;
            let mut times = Vec::new();
            for id in 1..=count {
                let received_at = base + chrono::Duration::minutes(id);
                mail_repo::insert_message(
                    conn,
                    &Message {
                        id,
                        tenant: 1,
                        user_id: "user-1".to_string(),
                        mailbox_id: 9,
                        chain_id: Some(format!("c{}", id)),
                        folder: Folder::Inbox,
                        from: "a@x.com".to_string(),
                        to: if id % 2 == 0 { "b@y.com" } else { "n@o.com" }.to_string(),
                        cc: String::new(),
                        bcc: String::new(),
                        subject: String::new(),
                        received_at,
                        body: None,
                        attachments: Vec::new(),
                    },
                )?;
                times.push(received_at);
            }
            Ok(times)
        })
        .unwrap()
    }

    #[test]
    fn test_watermark_starts_in_the_past() {
        let db = Database::open_in_memory().unwrap();
        let scanner = scanner(&db, 10);
        let age = Utc::now() - scanner.watermark().received_at;
        assert!(age >= chrono::Duration::minutes(59));
        assert!(age <= chrono::Duration::minutes(61));
    }

    #[test]
    fn test_cycle_processes_and_advances() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 4);
        let scanner = scanner(&db, 10);

        let report = scanner.run_cycle().unwrap();
        assert_eq!(report.counts.processed, 4);
        assert_eq!(report.counts.linked, 2);
        assert_eq!(report.counts.no_match, 2);
        assert!(report.watermark >= ScanCursor::after(report.started_at));
        assert_eq!(scanner.watermark(), report.watermark);

        let again = scanner.run_cycle().unwrap();
        assert_eq!(again.counts.processed, 0);
        assert_eq!(scanner.snapshot().cycles_completed, 2);
    }

    #[test]
    fn test_full_batch_holds_watermark() {
        let db = Database::open_in_memory().unwrap();
        let times = seed(&db, 5);
        let scanner = scanner(&db, 3);

        let report = scanner.run_cycle().unwrap();
        assert_eq!(report.counts.processed, 3);
        assert_eq!(report.watermark.message_id, 3);
        assert!(report.watermark.received_at <= times[2]);
        assert!(report.watermark.received_at > times[1]);

        let second = scanner.run_cycle().unwrap();
        assert_eq!(second.counts.processed, 2);
        assert!(second.watermark >= ScanCursor::after(second.started_at));
    }

    #[test]
    fn test_single_flight() {
        let db = Database::open_in_memory().unwrap();
        let scanner = scanner(&db, 10);
        scanner.scanning.store(true, Ordering::Release);
        assert!(scanner.run_cycle().is_none());
        scanner.scanning.store(false, Ordering::Release);
        assert!(scanner.run_cycle().is_some());
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn test_drain_keeps_watermark() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 3);
        let scanner = scanner(&db, 10);
        let before = scanner.watermark();

        scanner.request_drain();
        let report = scanner.run_cycle().unwrap();
        assert!(report.drained);
        assert_eq!(report.counts.processed, 0);
        assert_eq!(scanner.watermark(), before);

        scanner.resume();
        assert_eq!(scanner.run_cycle().unwrap().counts.processed, 3);
    }

    #[test]
    fn test_process_recent_ignores_watermark() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 2);
        let scanner = scanner(&db, 10);
        *scanner.watermark.lock().unwrap() = ScanCursor::after(Utc::now());

        assert_eq!(scanner.run_cycle().unwrap().counts.processed, 0);
        let watermark = scanner.watermark();

        let report = scanner.process_recent(1, 1).unwrap();
        assert_eq!(report.counts.processed, 2);
        assert_eq!(report.counts.linked, 1);
        assert_eq!(scanner.watermark(), watermark);
    }
}
