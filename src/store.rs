//! Persistence contract for jobs.
//!
//! The queue and monitor depend only on this trait; storage mechanics
//! live behind it. Writes are whole-record and atomic: no reader ever
//! observes a half-applied status transition.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::Job;
use crate::slicing::job::SlicingJob;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(Uuid),
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_slicing_job(&self, job: &SlicingJob) -> Result<(), StoreError>;
    async fn load_slicing_job(&self, id: Uuid) -> Result<SlicingJob, StoreError>;
    async fn list_slicing_jobs(&self) -> Result<Vec<SlicingJob>, StoreError>;

    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn load_job(&self, id: Uuid) -> Result<Job, StoreError>;
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
}

/// In-memory store backing the shipped binary and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    slicing_jobs: RwLock<HashMap<Uuid, SlicingJob>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_slicing_job(&self, job: &SlicingJob) -> Result<(), StoreError> {
        self.slicing_jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_slicing_job(&self, id: Uuid) -> Result<SlicingJob, StoreError> {
        self.slicing_jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_slicing_jobs(&self) -> Result<Vec<SlicingJob>, StoreError> {
        Ok(self.slicing_jobs.read().await.values().cloned().collect())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}
