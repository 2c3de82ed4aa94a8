//! Periodic scan scheduler.
//!
//! Owns the background thread that ticks the [`Scanner`]. `start` and `stop`
//! are idempotent; `stop` lets an in-flight cycle finish its current message
//! and then joins the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::broadcast::{ActivityKind, ActivityLog};
use crate::error::ScannerError;
use crate::worker::scanner::{CycleReport, Scanner};

#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub running: bool,
    pub scanning: bool,
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
    pub watermark: DateTime<Utc>,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
}

struct Running {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

pub struct ScanScheduler {
    scanner: Arc<Scanner>,
    activity: ActivityLog,
    running: Mutex<Option<Running>>,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<Scanner>, activity: ActivityLog) -> Self {
        Self {
            scanner,
            activity,
            running: Mutex::new(None),
        }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Starts the scan loop in a background thread.
    ///
    /// Returns `Ok(false)` without doing anything when already running.
    pub fn start(&self) -> Result<bool, ScannerError> {
        let mut state = self.state();
        if state.is_some() {
            log::debug!("Scanner already running");
            return Ok(false);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| ScannerError::RuntimeFailed(e.to_string()))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let scanner = Arc::clone(&self.scanner);
        let settings = scanner.settings().clone();
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_wake = Arc::clone(&wake);

        scanner.resume();
        let handle = std::thread::Builder::new()
            .name("crmlink-scanner".to_string())
            .spawn(move || {
                runtime.block_on(scan_loop(
                    scanner,
                    settings.initial_delay,
                    settings.interval,
                    thread_shutdown,
                    thread_wake,
                ))
            })
            .map_err(|e| ScannerError::SpawnFailed(e.to_string()))?;

        *state = Some(Running {
            shutdown,
            wake,
            handle,
        });
        log::info!(
            "Scanner started (interval {:?}, initial delay {:?})",
            self.scanner.settings().interval,
            self.scanner.settings().initial_delay
        );
        self.activity
            .scanner("INFO", ActivityKind::ScannerStarted, "Scanner started");
        Ok(true)
    }

    /// Stops the scan loop and waits for it to exit.
    ///
    /// Returns `false` when the scanner was not running.
    pub fn stop(&self) -> bool {
        let Some(running) = self.state().take() else {
            return false;
        };

        self.scanner.request_drain();
        running.shutdown.store(true, Ordering::Release);
        running.wake.notify_one();
        if running.handle.join().is_err() {
            log::error!("Scanner thread panicked");
        }
        self.scanner.resume();

        log::info!("Scanner stopped");
        self.activity
            .scanner("INFO", ActivityKind::ScannerStopped, "Scanner stopped");
        true
    }

    pub fn status(&self) -> ScannerStatus {
        let snapshot = self.scanner.snapshot();
        ScannerStatus {
            running: self.is_running(),
            scanning: snapshot.scanning,
            last_cycle_completed_at: snapshot.last_completed_at,
            watermark: snapshot.watermark.received_at,
            cycles_completed: snapshot.cycles_completed,
            last_cycle: snapshot.last_cycle,
        }
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn scan_loop(
    scanner: Arc<Scanner>,
    initial_delay: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {},
        _ = wake.notified() => {},
    }

    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {},
            _ = wake.notified() => {},
        }

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let cycle_scanner = Arc::clone(&scanner);
        match tokio::task::spawn_blocking(move || cycle_scanner.run_cycle()).await {
            Ok(Some(report)) => log::debug!(
                "Scan cycle finished in {} ms",
                (report.completed_at - report.started_at).num_milliseconds()
            ),
            Ok(None) => {}
            Err(e) => log::error!("Scan cycle task failed: {}", e),
        }
    }
}
