//! Polling scheduler: one recurring task per monitored printer and one
//! per active print job.
//!
//! Poll results flow through the normalizer into the job state machine.
//! Failures back off and only degrade a printer after a sustained
//! streak, so a single dropped packet never flaps status.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::job::{Job, JobStatus};
use crate::printers::{
    PollError, PrinterDriver, PrinterStatus, PrinterStatusSnapshot, normalize,
};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Nominal printer status poll interval.
    pub status_interval: Duration,
    /// Ceiling for the printer poll delay while failing.
    pub status_error_cap: Duration,
    /// Nominal per-job poll interval.
    pub job_interval: Duration,
    /// Ceiling for the job poll delay while failing.
    pub job_error_cap: Duration,
    /// Consecutive failed cycles before a printer flips to
    /// offline/error instead of keeping its previous status.
    pub offline_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(30),
            status_error_cap: Duration::from_secs(60),
            job_interval: Duration::from_secs(10),
            job_error_cap: Duration::from_secs(30),
            offline_threshold: 3,
        }
    }
}

/// Latest known health of one printer. Snapshots are not history; only
/// the most recent one is retained.
#[derive(Debug, Clone)]
pub struct PrinterHealth {
    pub status: PrinterStatus,
    pub failure_streak: u32,
    pub last_snapshot: Option<PrinterStatusSnapshot>,
}

impl Default for PrinterHealth {
    fn default() -> Self {
        Self {
            status: PrinterStatus::Unknown,
            failure_streak: 0,
            last_snapshot: None,
        }
    }
}

struct MonitorInner {
    config: MonitorConfig,
    store: Arc<dyn JobStore>,
    drivers: RwLock<HashMap<String, Arc<dyn PrinterDriver>>>,
    health: RwLock<HashMap<String, PrinterHealth>>,
    /// Reentrancy guard: a printer is never polled by two overlapping
    /// cycles; the later caller skips instead of queueing.
    in_flight: Mutex<HashSet<String>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Cheaply cloneable handle; all clones share one monitor.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn JobStore>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                store,
                drivers: RwLock::new(HashMap::new()),
                health: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                shutdown_tx,
            }),
        }
    }

    /// Registers a printer and starts its status loop.
    pub async fn add_printer(&self, driver: Arc<dyn PrinterDriver>) {
        let printer_id = driver.printer_id().to_string();
        self.inner
            .drivers
            .write()
            .await
            .insert(printer_id.clone(), Arc::clone(&driver));
        self.inner
            .health
            .write()
            .await
            .entry(printer_id.clone())
            .or_default();

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.printer_loop(printer_id).await;
        });
    }

    pub async fn printer_health(&self, printer_id: &str) -> Option<PrinterHealth> {
        self.inner.health.read().await.get(printer_id).cloned()
    }

    /// Receives auto-started jobs from the slicing queue and begins
    /// tracking each.
    pub async fn run_job_intake(self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            self.track_job(job).await;
        }
        debug!("job intake channel closed");
    }

    /// Starts a per-job polling task. The task ends when the job
    /// reaches a terminal status.
    pub async fn track_job(&self, job: Job) {
        info!("tracking print job {} on printer {}", job.id, job.printer_id);
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.job_loop(job).await;
        });
    }

    /// One poll cycle for a printer: poll, normalize, record health.
    /// Returns Ok(None) when the cycle was skipped because another is
    /// still in flight.
    pub async fn poll_printer_once(
        &self,
        printer_id: &str,
    ) -> Result<Option<PrinterStatusSnapshot>, PollError> {
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            if !in_flight.insert(printer_id.to_string()) {
                debug!("printer {} still polling, skipping cycle", printer_id);
                return Ok(None);
            }
        }
        let result = self.poll_guarded(printer_id).await;
        self.inner.in_flight.lock().await.remove(printer_id);
        result.map(Some)
    }

    async fn poll_guarded(&self, printer_id: &str) -> Result<PrinterStatusSnapshot, PollError> {
        let driver = {
            let drivers = self.inner.drivers.read().await;
            drivers
                .get(printer_id)
                .cloned()
                .ok_or_else(|| PollError::Unreachable(format!("no driver for {printer_id}")))?
        };

        match driver.poll().await {
            Ok(raw) => {
                let snapshot = normalize(driver.vendor(), printer_id, raw);
                let mut health = self.inner.health.write().await;
                let entry = health.entry(printer_id.to_string()).or_default();
                entry.failure_streak = 0;
                entry.status = snapshot.status;
                entry.last_snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                let mut health = self.inner.health.write().await;
                let entry = health.entry(printer_id.to_string()).or_default();
                entry.failure_streak += 1;
                if entry.failure_streak >= self.inner.config.offline_threshold {
                    let degraded = e.degraded_status();
                    if entry.status != degraded {
                        warn!(
                            "printer {} degraded to {:?} after {} failed polls",
                            printer_id, degraded, entry.failure_streak
                        );
                    }
                    entry.status = degraded;
                } else {
                    debug!(
                        "printer {} poll failed ({}), streak {}/{}",
                        printer_id, e, entry.failure_streak, self.inner.config.offline_threshold
                    );
                }
                Err(e)
            }
        }
    }

    async fn printer_loop(self, printer_id: String) {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        info!(
            "status loop for {} started (interval {:?})",
            printer_id, self.inner.config.status_interval
        );
        loop {
            let streak = self
                .printer_health(&printer_id)
                .await
                .map(|h| h.failure_streak)
                .unwrap_or(0);
            let delay = poll_delay(
                self.inner.config.status_interval,
                self.inner.config.status_error_cap,
                streak,
            );
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("status loop for {} shutting down", printer_id);
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = self.poll_printer_once(&printer_id).await;
                }
            }
        }
    }

    async fn job_loop(self, job: Job) {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let job_id = job.id;
        let printer_id = job.printer_id.clone();
        let mut streak = 0u32;
        loop {
            let delay = poll_delay(
                self.inner.config.job_interval,
                self.inner.config.job_error_cap,
                streak,
            );
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut current = match self.inner.store.load_job(job_id).await {
                Ok(j) => j,
                Err(e) => {
                    warn!("job {} vanished from store: {}", job_id, e);
                    break;
                }
            };
            if current.status.is_terminal() {
                info!("job {} reached {:?}, tracking stopped", job_id, current.status);
                break;
            }

            let snapshot = match self.poll_printer_once(&printer_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    // Overlapping cycle; fall back to the latest health
                    // snapshot rather than polling twice.
                    match self.printer_health(&printer_id).await.and_then(|h| h.last_snapshot) {
                        Some(s) => s,
                        None => continue,
                    }
                }
                Err(_) => {
                    // Job status stays untouched on poll failure; the
                    // printer health already tracks the streak.
                    streak += 1;
                    continue;
                }
            };
            streak = 0;

            // A transition that starts the job must land before the
            // progress update (progress only moves while active); one
            // that finishes it must land after, or the final percent is
            // never recorded.
            let next = planned_transition(&current, &snapshot);
            if let Some(status) = next.filter(|s| !s.is_terminal()) {
                apply_snapshot_transition(&mut current, status);
            }
            if let Some(progress) = snapshot.progress {
                current.update_progress(progress);
            }
            if let Some(status) = next.filter(|s| s.is_terminal()) {
                apply_snapshot_transition(&mut current, status);
            }
            if let Err(e) = self.inner.store.save_job(&current).await {
                warn!("failed to persist job {}: {}", job_id, e);
            }
            if current.status.is_terminal() {
                info!("job {} reached {:?}, tracking stopped", job_id, current.status);
                break;
            }
        }
    }
}

fn apply_snapshot_transition(job: &mut Job, next: JobStatus) {
    match job.apply(next, false) {
        Ok(()) => info!("job {} -> {:?}", job.id, next),
        Err(e) => warn!("snapshot-driven transition rejected for job {}: {}", job.id, e),
    }
}

/// Fixed mapping from a telemetry snapshot to the job transition it
/// implies, if any. Error/offline/unknown never move the job; that is
/// the printer-health side's concern.
pub fn planned_transition(job: &Job, snapshot: &PrinterStatusSnapshot) -> Option<JobStatus> {
    match snapshot.status {
        PrinterStatus::Printing => match job.status {
            JobStatus::Printing => None,
            JobStatus::Pending | JobStatus::Unknown | JobStatus::Running | JobStatus::Paused => {
                Some(JobStatus::Printing)
            }
            _ => None,
        },
        PrinterStatus::Paused => match job.status {
            JobStatus::Running | JobStatus::Printing => Some(JobStatus::Paused),
            _ => None,
        },
        // Completion is inferred only from progress 100 plus an idle
        // printer; progress alone also shows during the final purge.
        PrinterStatus::Online => {
            if snapshot.progress == Some(100)
                && matches!(job.status, JobStatus::Running | JobStatus::Printing)
            {
                Some(JobStatus::Completed)
            } else {
                None
            }
        }
        PrinterStatus::Offline | PrinterStatus::Error | PrinterStatus::Unknown => None,
    }
}

/// Nominal delay while healthy; exponential up to the cap while failing.
fn poll_delay(nominal: Duration, cap: Duration, streak: u32) -> Duration {
    if streak == 0 {
        nominal
    } else {
        BackoffPolicy::new(nominal, 2.0, cap, u32::MAX).delay_for(streak + 1)
    }
}
