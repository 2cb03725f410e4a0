// src/collab.rs - External collaborator contracts
//
// The core only knows these traits. The shipped implementations
// (CommandSlicer, LocalUploader, StaticRegistry) are deliberately thin;
// real deployments swap in their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::watch;

use crate::slicing::job::SlicingJob;

// ---------------------------------------------------------------------
// Cancellation

/// Cooperative cancellation signal handed to long-running collaborator
/// calls. Observed at suspension points; implementations that wrap a
/// child process should also kill it.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the
    /// owning handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

// ---------------------------------------------------------------------
// Profile registry

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown slicer: {0}")]
    UnknownSlicer(String),
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
}

/// Resolved executable configuration for one (slicer, profile) pair.
#[derive(Debug, Clone)]
pub struct SlicerProfile {
    pub slicer_id: String,
    pub profile_id: String,
    pub executable: PathBuf,
    pub profile_path: PathBuf,
    /// Simultaneously running jobs allowed for this slicer executable.
    /// Defaults to 1: most slicers are not process-safe for concurrent
    /// access to the same profile directory.
    pub max_concurrent: usize,
}

pub trait ProfileRegistry: Send + Sync {
    fn resolve(&self, slicer_id: &str, profile_id: &str) -> Result<SlicerProfile, RegistryError>;
}

/// Registry built once from configuration; no process-wide mutable
/// singleton, the instance travels with the context that needs it.
pub struct StaticRegistry {
    slicers: HashMap<String, SlicerEntry>,
}

pub struct SlicerEntry {
    pub executable: PathBuf,
    pub max_concurrent: usize,
    pub profiles: HashMap<String, PathBuf>,
}

impl StaticRegistry {
    pub fn new(slicers: HashMap<String, SlicerEntry>) -> Self {
        Self { slicers }
    }
}

impl ProfileRegistry for StaticRegistry {
    fn resolve(&self, slicer_id: &str, profile_id: &str) -> Result<SlicerProfile, RegistryError> {
        let entry = self
            .slicers
            .get(slicer_id)
            .ok_or_else(|| RegistryError::UnknownSlicer(slicer_id.to_string()))?;
        let profile_path = entry
            .profiles
            .get(profile_id)
            .ok_or_else(|| RegistryError::UnknownProfile(profile_id.to_string()))?;
        Ok(SlicerProfile {
            slicer_id: slicer_id.to_string(),
            profile_id: profile_id.to_string(),
            executable: entry.executable.clone(),
            profile_path: profile_path.clone(),
            max_concurrent: entry.max_concurrent.max(1),
        })
    }
}

// ---------------------------------------------------------------------
// Slicer invocation

#[derive(Debug, Clone)]
pub struct SliceOutput {
    pub output_path: PathBuf,
    pub output_checksum: String,
    pub estimated_duration_minutes: Option<u32>,
    pub material_grams: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("Slicing failed: {0}")]
    Failed(String),
    #[error("Slicing cancelled")]
    Cancelled,
}

/// Converts a design file into machine instructions. Must be safe to
/// retry with the same inputs and honor `cancel` best-effort.
#[async_trait]
pub trait Slicer: Send + Sync {
    async fn slice(
        &self,
        job: &SlicingJob,
        profile: &SlicerProfile,
        cancel: CancelToken,
    ) -> Result<SliceOutput, SliceError>;
}

/// Shells out to the configured slicer executable.
///
/// Input files are looked up by content checksum under `work_dir`;
/// output lands under `output_dir`. Cancellation kills the child.
pub struct CommandSlicer {
    work_dir: PathBuf,
    output_dir: PathBuf,
}

impl CommandSlicer {
    pub fn new(work_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self { work_dir, output_dir }
    }
}

#[async_trait]
impl Slicer for CommandSlicer {
    async fn slice(
        &self,
        job: &SlicingJob,
        profile: &SlicerProfile,
        cancel: CancelToken,
    ) -> Result<SliceOutput, SliceError> {
        let input = self.work_dir.join(&job.file_checksum);
        if !input.exists() {
            return Err(SliceError::Failed(format!(
                "input file for checksum {} not found under {}",
                job.file_checksum,
                self.work_dir.display()
            )));
        }
        let output = self
            .output_dir
            .join(format!("{}-{}.gcode", job.file_checksum, profile.profile_id));

        let mut child = tokio::process::Command::new(&profile.executable)
            .arg("--load")
            .arg(&profile.profile_path)
            .arg("--output")
            .arg(&output)
            .arg(&input)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SliceError::Failed(format!("failed to spawn slicer: {e}")))?;

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| SliceError::Failed(format!("slicer wait failed: {e}")))?
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(SliceError::Cancelled);
            }
        };

        if !status.success() {
            return Err(SliceError::Failed(format!("slicer exited with {status}")));
        }

        let gcode = tokio::fs::read(&output)
            .await
            .map_err(|e| SliceError::Failed(format!("slicer produced no output: {e}")))?;
        let checksum = hex_digest(&gcode);
        let (estimated, material) = scan_gcode_metadata(&gcode);

        Ok(SliceOutput {
            output_path: output,
            output_checksum: checksum,
            estimated_duration_minutes: estimated,
            material_grams: material,
        })
    }
}

pub fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Pulls the estimate comments PrusaSlicer-family tools write into the
/// output. Absent comments stay absent.
fn scan_gcode_metadata(gcode: &[u8]) -> (Option<u32>, Option<f64>) {
    let text = String::from_utf8_lossy(gcode);
    let mut estimated = None;
    let mut material = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("; estimated printing time (normal mode) =") {
            estimated = parse_duration_minutes(rest.trim());
        } else if let Some(rest) = line.strip_prefix("; filament used [g] =") {
            material = rest.trim().parse::<f64>().ok();
        }
    }
    (estimated, material)
}

/// Parses "1d 2h 3m 4s" style durations into whole minutes. The
/// comment is attacker-adjacent input (it comes out of the slicer's
/// output file), so an absurd value is rejected, never a panic.
fn parse_duration_minutes(text: &str) -> Option<u32> {
    let mut minutes = 0u32;
    let mut seen = false;
    for part in text.split_whitespace() {
        let (value, unit) = part.split_at(part.len().saturating_sub(1));
        let n: u32 = value.parse().ok()?;
        let contribution = match unit {
            "d" => n.checked_mul(24 * 60)?,
            "h" => n.checked_mul(60)?,
            "m" => n,
            "s" => 0,
            _ => return None,
        };
        minutes = minutes.checked_add(contribution)?;
        seen = true;
    }
    seen.then_some(minutes)
}

// ---------------------------------------------------------------------
// Upload / auto-start hand-off

#[derive(Debug, Error)]
#[error("Upload failed: {0}")]
pub struct UploadError(pub String);

/// Delivers a sliced artifact to a printer. Failure never unwinds the
/// completed slicing job; the queue records it as a warning.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, artifact: &Path, printer_id: &str) -> Result<(), UploadError>;
}

/// Drops artifacts into a per-printer spool directory.
pub struct LocalUploader {
    spool_dir: PathBuf,
}

impl LocalUploader {
    pub fn new(spool_dir: PathBuf) -> Self {
        Self { spool_dir }
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(&self, artifact: &Path, printer_id: &str) -> Result<(), UploadError> {
        let file_name = artifact
            .file_name()
            .ok_or_else(|| UploadError(format!("artifact path has no file name: {}", artifact.display())))?;
        let dest_dir = self.spool_dir.join(printer_id);
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| UploadError(format!("cannot create spool dir: {e}")))?;
        tokio::fs::copy(artifact, dest_dir.join(file_name))
            .await
            .map_err(|e| UploadError(format!("copy to spool failed: {e}")))?;
        Ok(())
    }
}
