// src/slicing/job.rs - Slicing job record

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PRIORITY_MIN: u8 = 1;
pub const PRIORITY_MAX: u8 = 10;
pub const PRIORITY_DEFAULT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlicingStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SlicingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a caller hands to `SlicingQueue::enqueue`.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    pub file_checksum: String,
    pub slicer_id: String,
    pub profile_id: String,
    pub target_printer: Option<String>,
    /// 1 highest .. 10 lowest.
    pub priority: u8,
    pub auto_upload: bool,
    pub auto_start: bool,
}

impl SliceRequest {
    pub fn new(
        file_checksum: impl Into<String>,
        slicer_id: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            file_checksum: file_checksum.into(),
            slicer_id: slicer_id.into(),
            profile_id: profile_id.into(),
            target_printer: None,
            priority: PRIORITY_DEFAULT,
            auto_upload: false,
            auto_start: false,
        }
    }
}

/// One request to turn a design file into machine instructions.
///
/// Mutated only by the queue; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicingJob {
    pub id: Uuid,
    pub file_checksum: String,
    pub slicer_id: String,
    pub profile_id: String,
    pub target_printer: Option<String>,
    pub status: SlicingStatus,
    pub priority: u8,
    pub progress: u8,
    pub output_path: Option<PathBuf>,
    pub output_checksum: Option<String>,
    pub estimated_duration_minutes: Option<u32>,
    pub material_grams: Option<f64>,
    pub error: Option<String>,
    /// Post-completion chaining problems (upload, auto-start). These do
    /// not fail the job; slicing itself succeeded.
    pub warning: Option<String>,
    pub retry_count: u32,
    /// Earliest re-dispatch time after a failed attempt.
    pub not_before: Option<DateTime<Utc>>,
    pub auto_upload: bool,
    pub auto_start: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SlicingJob {
    pub fn from_request(request: &SliceRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_checksum: request.file_checksum.clone(),
            slicer_id: request.slicer_id.clone(),
            profile_id: request.profile_id.clone(),
            target_printer: request.target_printer.clone(),
            status: SlicingStatus::Queued,
            priority: request.priority,
            progress: 0,
            output_path: None,
            output_checksum: None,
            estimated_duration_minutes: None,
            material_grams: None,
            error: None,
            warning: None,
            retry_count: 0,
            not_before: None,
            auto_upload: request.auto_upload,
            auto_start: request.auto_start,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Eligible for dispatch: queued and past any backoff gate.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status == SlicingStatus::Queued && self.not_before.is_none_or(|t| t <= now)
    }
}
