//! Scan duty cycle.
//!
//! Each cycle opens a scan window, feeds what it heard to the estimator,
//! publishes the result and then idles until the cycle period has elapsed:
//!
//! ```text
//! |<------------------- interval (5 s) ------------------->|
//! |<-- window (2 s) -->|<------------- idle -------------->|
//!   scanning             radio off                          next cycle
//! ```
//!
//! Opening the adapter, the window and the idle sleep all race a shutdown
//! signal, so [`FloorScheduler::stop`] returns within one window and only
//! after the open scan session has been closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ElevoxConfig;
use crate::estimator::{FloorEstimator, WindowReport};
use crate::reading::{reading_cell, FloorReading, ReadingHandle, ReadingPublisher, ReadingStore};
use crate::registry::{floor_label, BeaconRegistry, SCAN_INTERVAL, SCAN_WINDOW};
use crate::scanner::{ScanAdapter, ScanDriver};
use crate::status::ScanStatus;

/// Buffered status events per subscriber before the oldest are dropped.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Errors controlling the scheduler.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A cycle task is already running.
    #[error("Scan scheduler is already running")]
    AlreadyRunning,

    /// Scanning was found to be unsupported; the scheduler cannot restart.
    #[error("Scan scheduler halted permanently: Bluetooth LE scanning is unsupported")]
    Terminated,
}

/// Cycle period and the scan window nested inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Time from the start of one cycle to the start of the next.
    ///
    /// A cycle starts at the permission check, before the window is opened,
    /// so time spent opening the adapter is taken out of the idle gap rather
    /// than added to the period.
    pub interval: Duration,
    /// How long each window listens.
    pub window: Duration,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            interval: SCAN_INTERVAL,
            window: SCAN_WINDOW,
        }
    }
}

impl From<&ElevoxConfig> for ScanTiming {
    fn from(config: &ElevoxConfig) -> Self {
        Self {
            interval: config.scan.interval(),
            window: config.scan.window(),
        }
    }
}

struct Shared {
    estimator: Mutex<FloorEstimator>,
    readings: ReadingPublisher,
    status_tx: broadcast::Sender<ScanStatus>,
    latest_status: watch::Sender<Option<ScanStatus>>,
    latest_report: watch::Sender<Option<WindowReport>>,
    store: Option<ReadingStore>,
    running: AtomicBool,
    terminated: AtomicBool,
}

impl Shared {
    fn publish_status(&self, status: ScanStatus) {
        debug!(status = status.name(), "{}", status.label());
        // No subscribers is fine; the latest status is still kept.
        let _ = self.status_tx.send(status);
        self.latest_status.send_replace(Some(status));
    }

    fn persist(&self, reading: &FloorReading) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(reading) {
                warn!(error = %err, "Failed to persist floor reading");
            }
        }
    }
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Runs the scan duty cycle and owns the published floor reading.
pub struct FloorScheduler<A: ScanAdapter> {
    driver: Arc<ScanDriver<A>>,
    shared: Arc<Shared>,
    timing: ScanTiming,
    task: Option<RunningTask>,
}

impl<A: ScanAdapter> FloorScheduler<A> {
    /// Create a stopped scheduler.
    ///
    /// If `store` holds a reading from a previous run it becomes the current
    /// reading until a new one is produced.
    pub fn new(
        driver: ScanDriver<A>,
        estimator: FloorEstimator,
        timing: ScanTiming,
        store: Option<ReadingStore>,
    ) -> Self {
        let restored = store.as_ref().and_then(|store| match store.load() {
            Ok(reading) => reading,
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable stored floor reading");
                None
            }
        });
        if let Some(reading) = restored {
            info!(floor = reading.floor, observed_at = %reading.observed_at, "Restored floor reading");
        }

        let (readings, _) = reading_cell(restored);
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (latest_status, _) = watch::channel(None);
        let (latest_report, _) = watch::channel(None);

        Self {
            driver: Arc::new(driver),
            shared: Arc::new(Shared {
                estimator: Mutex::new(estimator),
                readings,
                status_tx,
                latest_status,
                latest_report,
                store,
                running: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
            }),
            timing,
            task: None,
        }
    }

    /// Build a scheduler for `adapter` with everything else taken from `config`.
    pub fn from_config(adapter: A, registry: Arc<BeaconRegistry>, config: &ElevoxConfig) -> Self {
        let driver =
            ScanDriver::with_capacity(adapter, Arc::clone(&registry), config.scan.channel_capacity);
        let estimator = FloorEstimator::with_tuning(
            registry,
            config.detection.rssi_threshold,
            config.detection.hysteresis_margin_db,
        );
        let store = ReadingStore::new(config.storage.reading_path());
        Self::new(driver, estimator, ScanTiming::from(config), Some(store))
    }

    /// The scan driver.
    pub fn driver(&self) -> &ScanDriver<A> {
        &self.driver
    }

    /// Cloneable read/reset access for other tasks.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
            readings: self.shared.readings.subscribe(),
        }
    }

    /// Spawn the cycle task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] if a cycle task is live, or
    /// [`SchedulerError::Terminated`] after scanning was found unsupported.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.shared.terminated.load(Ordering::SeqCst) {
            return Err(SchedulerError::Terminated);
        }
        if self.task.as_ref().is_some_and(|task| !task.join.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let cycle = CycleLoop {
            driver: Arc::clone(&self.driver),
            shared: Arc::clone(&self.shared),
            timing: self.timing,
            shutdown: shutdown_rx,
        };

        self.shared.running.store(true, Ordering::SeqCst);
        let join = tokio::spawn(cycle.run());
        self.task = Some(RunningTask { shutdown, join });

        info!(
            interval = ?self.timing.interval,
            window = ?self.timing.window,
            "Floor detection started"
        );
        Ok(())
    }

    /// Stop the cycle task and wait for it to unwind.
    ///
    /// Any open scan window is closed before this returns. The current
    /// reading is kept. Calling `stop` on a stopped scheduler does nothing.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        // The task may already be gone after a terminal halt.
        let _ = task.shutdown.send(true);
        if let Err(err) = task.join.await {
            if err.is_panic() {
                error!(error = %err, "Scan cycle task panicked");
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
        info!("Floor detection stopped");
    }

    /// Forget the locked floor; the next window is accepted unconditionally.
    pub fn reset(&self) {
        self.handle().reset();
    }

    /// Last published reading.
    #[must_use]
    pub fn current_reading(&self) -> Option<FloorReading> {
        self.shared.readings.subscribe().current()
    }

    /// Subscribe to status events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScanStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Whether the cycle task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl<A: ScanAdapter> Drop for FloorScheduler<A> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.shutdown.send(true);
        }
    }
}

/// Non-generic view of a scheduler for readers such as HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    readings: ReadingHandle,
}

impl SchedulerHandle {
    /// Last published reading. Never waits on the scan cycle.
    #[must_use]
    pub fn current_reading(&self) -> Option<FloorReading> {
        self.readings.current()
    }

    /// Read handle that can wait for new readings.
    #[must_use]
    pub fn readings(&self) -> ReadingHandle {
        self.readings.clone()
    }

    /// Subscribe to status events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScanStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Most recent status, if any cycle has run.
    #[must_use]
    pub fn latest_status(&self) -> Option<ScanStatus> {
        *self.shared.latest_status.borrow()
    }

    /// Diagnostics of the most recent completed window.
    #[must_use]
    pub fn latest_report(&self) -> Option<WindowReport> {
        self.shared.latest_report.borrow().clone()
    }

    /// Floor the estimator is locked on.
    #[must_use]
    pub fn last_floor(&self) -> Option<u32> {
        self.estimator().last_floor()
    }

    /// Forget the locked floor; the next window is accepted unconditionally.
    pub fn reset(&self) {
        self.estimator().reset();
        info!("Floor estimate reset");
    }

    /// Whether the cycle task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn estimator(&self) -> std::sync::MutexGuard<'_, FloorEstimator> {
        self.shared
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

enum CycleOutcome {
    Continue,
    Halt,
    Shutdown,
}

struct CycleLoop<A: ScanAdapter> {
    driver: Arc<ScanDriver<A>>,
    shared: Arc<Shared>,
    timing: ScanTiming,
    shutdown: watch::Receiver<bool>,
}

impl<A: ScanAdapter> CycleLoop<A> {
    async fn run(mut self) {
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            let started = Instant::now();

            let outcome = self
                .run_cycle()
                .instrument(info_span!("scan_cycle", cycle))
                .await;
            match outcome {
                CycleOutcome::Continue => {}
                CycleOutcome::Halt | CycleOutcome::Shutdown => break,
            }

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                () = sleep_until(started + self.timing.interval) => {}
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        debug!(cycles = cycle, "Scan cycle task finished");
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.changed() => return CycleOutcome::Shutdown,
            opened = self.driver.open() => opened,
        };

        let mut handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "Scan window not opened");
                self.shared.publish_status(err.into());
                if err.is_terminal() {
                    self.shared.terminated.store(true, Ordering::SeqCst);
                    error!("Bluetooth LE scanning unsupported, halting floor detection");
                    return CycleOutcome::Halt;
                }
                return CycleOutcome::Continue;
            }
        };

        self.shared.publish_status(ScanStatus::Scanning);

        // Dropping the handle on shutdown closes the session.
        let window = tokio::select! {
            biased;
            _ = self.shutdown.changed() => return CycleOutcome::Shutdown,
            window = handle.collect_window(self.timing.window) => window,
        };
        handle.close();

        let (estimate, report) = {
            let mut estimator = self
                .shared
                .estimator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let estimate = estimator.observe(&window);
            (estimate, estimator.report(&window))
        };
        if !report.entries.is_empty() {
            debug!("\n{report}");
        }
        self.shared.latest_report.send_replace(Some(report));

        match estimate.floor() {
            Some(floor) => {
                let reading = FloorReading::now(floor);
                self.shared.readings.publish(reading);
                self.shared.persist(&reading);
                info!(floor, label = %floor_label(floor), "Floor detected");
                self.shared.publish_status(ScanStatus::FloorDetected { floor });
            }
            None => {
                debug!("No floor detected this window");
                self.shared.publish_status(ScanStatus::NoBeaconInRange);
            }
        }

        CycleOutcome::Continue
    }
}
