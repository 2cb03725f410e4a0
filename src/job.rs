// src/job.rs - Print job record and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::printers::PrinterVendor;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Lifecycle status of a physical print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Printing,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One tracked print execution. References exactly one printer for its
/// whole lifetime; becomes immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub printer_id: String,
    pub printer_type: PrinterVendor,
    pub name: String,
    pub source_file: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub estimated_duration_minutes: Option<u32>,
    pub actual_duration_minutes: Option<i64>,
    pub material_cost: Option<f64>,
    pub power_cost: Option<f64>,
    pub is_business: bool,
    pub customer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(printer_id: impl Into<String>, printer_type: PrinterVendor, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            printer_id: printer_id.into(),
            printer_type,
            name: name.into(),
            source_file: None,
            status: JobStatus::Pending,
            progress: 0,
            estimated_duration_minutes: None,
            actual_duration_minutes: None,
            material_cost: None,
            power_cost: None,
            is_business: false,
            customer: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// True once the job can never legally move again, even under
    /// `force` (both lifecycle timestamps are pinned).
    pub fn is_sealed(&self) -> bool {
        self.status.is_terminal() && self.started_at.is_some() && self.completed_at.is_some()
    }

    fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        if from == to {
            return true;
        }
        match (from, to) {
            (Pending, Running) | (Pending, Printing) | (Pending, Unknown) => true,
            (Unknown, Pending) | (Unknown, Running) | (Unknown, Printing) => true,
            (Running, Printing) | (Printing, Running) => true,
            (Running, Paused) | (Printing, Paused) => true,
            (Paused, Running) | (Paused, Printing) => true,
            (from, Completed) | (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Applies a status transition. Illegal transitions are rejected
    /// unless `force` is set; `force` is for manual administrative
    /// correction and still refuses to move a sealed job.
    pub fn apply(&mut self, new_status: JobStatus, force: bool) -> Result<(), JobError> {
        if self.is_sealed() && new_status != self.status {
            return Err(JobError::InvalidTransition(format!(
                "job {} is terminal ({:?}) and cannot change status",
                self.id, self.status
            )));
        }
        if !force && !Self::transition_allowed(self.status, new_status) {
            return Err(JobError::InvalidTransition(format!(
                "{:?} -> {:?} is not a legal job transition",
                self.status, new_status
            )));
        }

        let now = Utc::now();
        if matches!(new_status, JobStatus::Running | JobStatus::Printing) && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if new_status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
            if let Some(started) = self.started_at {
                self.actual_duration_minutes = Some((now - started).num_minutes());
            }
        }
        self.status = new_status;
        self.updated_at = now;
        Ok(())
    }

    /// Progress updates are clamped and only move forward while the job
    /// is actively printing.
    pub fn update_progress(&mut self, progress: u8) {
        if matches!(self.status, JobStatus::Running | JobStatus::Printing) {
            let clamped = progress.min(100);
            if clamped > self.progress {
                self.progress = clamped;
                self.updated_at = Utc::now();
            }
        }
    }
}
