// src/slicing/queue.rs - Priority slicing queue and dispatcher
//
// Ordering: lower priority number first, strict FIFO within a band.
// Per-slicer concurrency is bounded (default 1); the running counters
// and cancel handles are the only shared mutable state, behind one
// mutex scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, with_backoff};
use crate::collab::{
    CancelHandle, CancelToken, ProfileRegistry, RegistryError, SliceError, SliceOutput, Slicer,
    SlicerProfile, Uploader, cancel_pair,
};
use crate::job::Job;
use crate::store::{JobStore, StoreError};

use super::job::{PRIORITY_MAX, PRIORITY_MIN, SliceRequest, SlicingJob, SlicingStatus};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid priority {0}: must be between {PRIORITY_MIN} and {PRIORITY_MAX}")]
    InvalidPriority(u8),
    #[error("Unknown slicer: {0}")]
    UnknownSlicer(String),
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for QueueError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSlicer(s) => QueueError::UnknownSlicer(s),
            RegistryError::UnknownProfile(p) => QueueError::UnknownProfile(p),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub dispatch_interval: Duration,
    /// Retry budget and delays for failed slicer invocations.
    pub backoff: BackoffPolicy,
    /// Retry tuning for the in-task artifact upload after a successful
    /// slice. Exhaustion downgrades to a warning, never a job failure.
    pub upload_backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
            upload_backoff: BackoffPolicy::default(),
        }
    }
}

/// Status counts over all known slicing jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Default)]
struct QueueShared {
    /// Running jobs per slicer id.
    running: HashMap<String, usize>,
    /// Cancel handles for in-flight slicer invocations.
    cancels: HashMap<Uuid, CancelHandle>,
}

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<dyn ProfileRegistry>,
    slicer: Arc<dyn Slicer>,
    uploader: Arc<dyn Uploader>,
    shared: Mutex<QueueShared>,
    /// Auto-started print jobs are handed to the monitor over this
    /// channel; the queue never polls printers itself.
    job_tx: mpsc::Sender<Job>,
}

/// Cheaply cloneable handle; all clones share one queue.
#[derive(Clone)]
pub struct SlicingQueue {
    inner: Arc<QueueInner>,
}

impl SlicingQueue {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        registry: Arc<dyn ProfileRegistry>,
        slicer: Arc<dyn Slicer>,
        uploader: Arc<dyn Uploader>,
        job_tx: mpsc::Sender<Job>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                registry,
                slicer,
                uploader,
                shared: Mutex::new(QueueShared::default()),
                job_tx,
            }),
        }
    }

    /// Validates and persists a new slicing request. No side effect
    /// beyond persistence; dispatch happens on the queue's own tick.
    pub async fn enqueue(&self, request: SliceRequest) -> Result<Uuid, QueueError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&request.priority) {
            return Err(QueueError::InvalidPriority(request.priority));
        }
        // Resolve now so a bad reference is rejected at the call
        // boundary instead of failing the job later.
        self.inner
            .registry
            .resolve(&request.slicer_id, &request.profile_id)?;

        let job = SlicingJob::from_request(&request);
        self.inner.store.save_slicing_job(&job).await?;
        info!(
            "enqueued slicing job {} (slicer {}, profile {}, priority {})",
            job.id, job.slicer_id, job.profile_id, job.priority
        );
        Ok(job.id)
    }

    /// Dispatches the next eligible job, if any. Returns the job id and
    /// the handle of the spawned slicer task so callers (and tests) can
    /// await completion; the periodic loop detaches it.
    pub async fn dispatch(&self) -> Result<Option<(Uuid, JoinHandle<()>)>, QueueError> {
        let inner = &self.inner;
        let mut shared = inner.shared.lock().await;

        let now = Utc::now();
        let mut candidates: Vec<SlicingJob> = inner
            .store
            .list_slicing_jobs()
            .await?
            .into_iter()
            .filter(|j| j.is_dispatchable(now))
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        for mut job in candidates {
            let profile = match inner.registry.resolve(&job.slicer_id, &job.profile_id) {
                Ok(p) => p,
                Err(e) => {
                    // Reference was valid at enqueue but no longer
                    // resolves; permanent failure, message kept.
                    warn!("slicing job {} references stale profile: {}", job.id, e);
                    job.status = SlicingStatus::Failed;
                    job.error = Some(e.to_string());
                    job.completed_at = Some(now);
                    job.updated_at = now;
                    inner.store.save_slicing_job(&job).await?;
                    continue;
                }
            };

            let in_flight = shared.running.get(&job.slicer_id).copied().unwrap_or(0);
            if in_flight >= profile.max_concurrent {
                debug!(
                    "slicer {} at concurrency limit ({}), holding job {}",
                    job.slicer_id, profile.max_concurrent, job.id
                );
                continue;
            }

            job.status = SlicingStatus::Running;
            if job.started_at.is_none() {
                job.started_at = Some(now);
            }
            job.not_before = None;
            job.updated_at = now;
            inner.store.save_slicing_job(&job).await?;

            *shared.running.entry(job.slicer_id.clone()).or_insert(0) += 1;
            let (handle, token) = cancel_pair();
            shared.cancels.insert(job.id, handle);

            info!(
                "dispatching slicing job {} on {} (attempt {})",
                job.id,
                job.slicer_id,
                job.retry_count + 1
            );
            let queue = self.clone();
            let job_id = job.id;
            let task = tokio::spawn(async move {
                queue.run_slice(job, profile, token).await;
            });
            return Ok(Some((job_id, task)));
        }

        Ok(None)
    }

    /// Runs one slicer invocation to completion and applies the outcome.
    ///
    /// The invocation runs in its own task: a panicking collaborator is
    /// recorded as a failed attempt, and the epilogue that returns the
    /// concurrency slot runs no matter how the invocation ended.
    async fn run_slice(self, job: SlicingJob, profile: SlicerProfile, token: CancelToken) {
        let mut invocation = {
            let slicer = Arc::clone(&self.inner.slicer);
            let job = job.clone();
            let token = token.clone();
            tokio::spawn(async move { slicer.slice(&job, &profile, token).await })
        };

        let result = tokio::select! {
            joined = &mut invocation => match joined {
                Ok(r) => r,
                Err(e) => Err(SliceError::Failed(format!("slicer task panicked: {e}"))),
            },
            _ = token.cancelled() => {
                // Abort at the next suspension point; kill_on_drop-style
                // implementations reap their child from there.
                invocation.abort();
                Err(SliceError::Cancelled)
            }
        };

        if let Err(e) = self.finish_slice(job.id, result).await {
            error!("failed to record outcome of slicing job {}: {}", job.id, e);
        }

        let mut shared = self.inner.shared.lock().await;
        if let Some(count) = shared.running.get_mut(&job.slicer_id) {
            *count = count.saturating_sub(1);
        }
        shared.cancels.remove(&job.id);
    }

    async fn finish_slice(
        &self,
        job_id: Uuid,
        result: Result<SliceOutput, SliceError>,
    ) -> Result<(), QueueError> {
        let inner = &self.inner;
        // Reload: a concurrent cancel may have already sealed the job.
        let mut job = inner.store.load_slicing_job(job_id).await?;
        if job.status != SlicingStatus::Running {
            debug!(
                "slicing job {} no longer running ({:?}), leaving as-is",
                job.id, job.status
            );
            return Ok(());
        }

        let now = Utc::now();
        match result {
            Ok(output) => {
                job.status = SlicingStatus::Completed;
                job.progress = 100;
                job.output_path = Some(output.output_path.clone());
                job.output_checksum = Some(output.output_checksum);
                job.estimated_duration_minutes = output.estimated_duration_minutes;
                job.material_grams = output.material_grams;
                job.completed_at = Some(now);
                job.updated_at = now;
                inner.store.save_slicing_job(&job).await?;
                info!("slicing job {} completed", job.id);
                self.chain_after_completion(job).await?;
            }
            Err(SliceError::Cancelled) => {
                job.status = SlicingStatus::Cancelled;
                job.completed_at = Some(now);
                job.updated_at = now;
                inner.store.save_slicing_job(&job).await?;
                info!("slicing job {} cancelled during run", job.id);
            }
            Err(SliceError::Failed(message)) => {
                job.retry_count += 1;
                if job.retry_count >= inner.config.backoff.max_attempts {
                    job.status = SlicingStatus::Failed;
                    job.error = Some(message.clone());
                    job.completed_at = Some(now);
                    job.updated_at = now;
                    warn!(
                        "slicing job {} failed permanently after {} attempts: {}",
                        job.id, job.retry_count, message
                    );
                } else {
                    let delay = inner.config.backoff.delay_for(job.retry_count);
                    job.status = SlicingStatus::Queued;
                    job.error = Some(message.clone());
                    job.not_before =
                        Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                    job.updated_at = now;
                    warn!(
                        "slicing job {} failed (attempt {}), re-queued with {:?} backoff: {}",
                        job.id, job.retry_count, delay, message
                    );
                }
                inner.store.save_slicing_job(&job).await?;
            }
        }
        Ok(())
    }

    /// Optional upload/auto-start chain after a successful slice.
    /// Failures here are warnings, never job failures.
    async fn chain_after_completion(&self, mut job: SlicingJob) -> Result<(), QueueError> {
        let inner = &self.inner;
        if !job.auto_upload {
            return Ok(());
        }
        let Some(printer_id) = job.target_printer.clone() else {
            job.warning = Some("auto_upload set but no target printer".to_string());
            inner.store.save_slicing_job(&job).await?;
            return Ok(());
        };
        let Some(artifact) = job.output_path.clone() else {
            job.warning = Some("auto_upload set but slicer recorded no artifact".to_string());
            inner.store.save_slicing_job(&job).await?;
            return Ok(());
        };

        let upload = with_backoff(&inner.config.upload_backoff, "artifact upload", || {
            inner.uploader.upload(&artifact, &printer_id)
        });
        if let Err(e) = upload.await {
            warn!("upload after slicing job {} failed: {}", job.id, e);
            job.warning = Some(format!("upload failed: {e}"));
            inner.store.save_slicing_job(&job).await?;
            return Ok(());
        }

        if !job.auto_start {
            return Ok(());
        }

        let mut print_job = Job::new(
            printer_id,
            crate::printers::PrinterVendor::Unknown,
            format!("{}-{}", short_checksum(&job.file_checksum), job.profile_id),
        );
        print_job.source_file = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        print_job.estimated_duration_minutes = job.estimated_duration_minutes;
        inner.store.save_job(&print_job).await?;

        if inner.job_tx.send(print_job.clone()).await.is_err() {
            warn!(
                "monitor is gone, auto-started job {} will not be tracked",
                print_job.id
            );
            job.warning = Some("auto-start: monitor unavailable".to_string());
            inner.store.save_slicing_job(&job).await?;
        } else {
            info!(
                "auto-started print job {} on {} from slicing job {}",
                print_job.id, print_job.printer_id, job.id
            );
        }
        Ok(())
    }

    /// Cancels a queued or running job. Running invocations are asked to
    /// stop cooperatively; the job is marked cancelled either way and a
    /// stale slicer process is reaped out-of-band.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), QueueError> {
        let inner = &self.inner;
        let mut shared = inner.shared.lock().await;
        let mut job = inner.store.load_slicing_job(job_id).await?;
        match job.status {
            SlicingStatus::Queued | SlicingStatus::Running => {
                if let Some(handle) = shared.cancels.get(&job.id) {
                    handle.cancel();
                }
                let now = Utc::now();
                job.status = SlicingStatus::Cancelled;
                job.completed_at = Some(now);
                job.updated_at = now;
                inner.store.save_slicing_job(&job).await?;
                info!("cancelled slicing job {}", job.id);
                Ok(())
            }
            status => Err(QueueError::InvalidTransition(format!(
                "cannot cancel slicing job {} in state {:?}",
                job.id, status
            ))),
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<SlicingJob, QueueError> {
        Ok(self.inner.store.load_slicing_job(job_id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<SlicingJob>, QueueError> {
        let mut jobs = self.inner.store.list_slicing_jobs().await?;
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for job in self.inner.store.list_slicing_jobs().await? {
            match job.status {
                SlicingStatus::Queued => stats.queued += 1,
                SlicingStatus::Running => stats.running += 1,
                SlicingStatus::Completed => stats.completed += 1,
                SlicingStatus::Failed => stats.failed += 1,
                SlicingStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    /// Periodic dispatch loop. Ticks are skipped, not queued, when a
    /// cycle overruns.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.inner.config.dispatch_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "slicing dispatch loop started (interval {:?})",
            self.inner.config.dispatch_interval
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("slicing dispatch loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    loop {
                        match self.dispatch().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                error!("dispatch error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

// Checksums are normally hex, but the queue never assumes it: a cut
// that would split a multibyte character keeps the whole string.
fn short_checksum(checksum: &str) -> &str {
    checksum.get(..8).unwrap_or(checksum)
}
