// Shared test doubles for the queue and monitor suites.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use printhive::backoff::BackoffPolicy;
use printhive::collab::{
    CancelToken, SliceError, SliceOutput, Slicer, SlicerEntry, SlicerProfile, StaticRegistry,
    UploadError, Uploader,
};
use printhive::job::Job;
use printhive::slicing::job::SlicingJob;
use printhive::slicing::{QueueConfig, SlicingQueue};
use printhive::store::{JobStore, MemoryStore};

/// Slicer double: replays scripted outcomes, records call order, and
/// optionally dawdles so cancellation and concurrency can be observed.
pub struct MockSlicer {
    outcomes: Mutex<VecDeque<Result<SliceOutput, SliceError>>>,
    pub calls: AtomicU32,
    pub dispatched: Mutex<Vec<Uuid>>,
    delay: Duration,
    panic_message: Option<String>,
}

impl MockSlicer {
    pub fn always_ok() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            dispatched: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            panic_message: None,
        }
    }

    pub fn scripted(outcomes: Vec<Result<SliceOutput, SliceError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::always_ok()
        }
    }

    /// Fails every attempt; the script is prefilled well past any
    /// sane retry budget.
    pub fn always_failing(message: &str) -> Self {
        Self::scripted(
            (0..32)
                .map(|_| Err(SliceError::Failed(message.to_string())))
                .collect(),
        )
    }

    /// Panics on every call, standing in for a buggy collaborator.
    pub fn panicking(message: &str) -> Self {
        Self {
            panic_message: Some(message.to_string()),
            ..Self::always_ok()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn ok_output() -> SliceOutput {
    SliceOutput {
        output_path: PathBuf::from("/tmp/out.gcode"),
        output_checksum: "cafebabe".to_string(),
        estimated_duration_minutes: Some(90),
        material_grams: Some(12.5),
    }
}

#[async_trait]
impl Slicer for MockSlicer {
    async fn slice(
        &self,
        job: &SlicingJob,
        _profile: &SlicerProfile,
        _cancel: CancelToken,
    ) -> Result<SliceOutput, SliceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatched.lock().await.push(job.id);
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.outcomes.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(ok_output()),
        }
    }
}

/// Uploader double.
pub struct MockUploader {
    pub fail: bool,
    pub uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl MockUploader {
    pub fn ok() -> Self {
        Self {
            fail: false,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            uploads: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(&self, artifact: &Path, printer_id: &str) -> Result<(), UploadError> {
        if self.fail {
            return Err(UploadError("spool unreachable".to_string()));
        }
        self.uploads
            .lock()
            .await
            .push((artifact.to_path_buf(), printer_id.to_string()));
        Ok(())
    }
}

/// Registry with one slicer id "slicer-a" (profile "draft") at the
/// given concurrency limit.
pub fn registry(max_concurrent: usize) -> Arc<StaticRegistry> {
    let mut profiles = HashMap::new();
    profiles.insert("draft".to_string(), PathBuf::from("/profiles/draft.ini"));
    profiles.insert("quality".to_string(), PathBuf::from("/profiles/quality.ini"));
    let mut slicers = HashMap::new();
    slicers.insert(
        "slicer-a".to_string(),
        SlicerEntry {
            executable: PathBuf::from("/bin/slicer-a"),
            max_concurrent,
            profiles: profiles.clone(),
        },
    );
    slicers.insert(
        "slicer-b".to_string(),
        SlicerEntry {
            executable: PathBuf::from("/bin/slicer-b"),
            max_concurrent,
            profiles,
        },
    );
    Arc::new(StaticRegistry::new(slicers))
}

pub struct QueueFixture {
    pub queue: SlicingQueue,
    pub store: Arc<MemoryStore>,
    pub slicer: Arc<MockSlicer>,
    pub uploader: Arc<MockUploader>,
    pub job_rx: mpsc::Receiver<Job>,
}

pub fn queue_fixture(slicer: MockSlicer, uploader: MockUploader, max_concurrent: usize) -> QueueFixture {
    queue_fixture_with_backoff(
        slicer,
        uploader,
        max_concurrent,
        BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(8), 3),
    )
}

pub fn queue_fixture_with_backoff(
    slicer: MockSlicer,
    uploader: MockUploader,
    max_concurrent: usize,
    backoff: BackoffPolicy,
) -> QueueFixture {
    let store = Arc::new(MemoryStore::new());
    let slicer = Arc::new(slicer);
    let uploader = Arc::new(uploader);
    let (job_tx, job_rx) = mpsc::channel(16);
    let queue = SlicingQueue::new(
        QueueConfig {
            dispatch_interval: Duration::from_millis(5),
            backoff,
            upload_backoff: BackoffPolicy::new(
                Duration::from_millis(1),
                2.0,
                Duration::from_millis(4),
                2,
            ),
        },
        store.clone() as Arc<dyn JobStore>,
        registry(max_concurrent),
        slicer.clone(),
        uploader.clone(),
        job_tx,
    );
    QueueFixture {
        queue,
        store,
        slicer,
        uploader,
        job_rx,
    }
}
