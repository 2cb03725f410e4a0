// src/printers/snapshot.rs - Canonical telemetry snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PrinterStatus;

/// One filament slot (AMS tray, MMU slot, or the single direct spool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilamentSlot {
    pub index: u8,
    pub color: Option<String>,
    pub material: Option<String>,
    pub active: bool,
}

/// One normalized reading of a printer's live telemetry.
///
/// Produced each poll cycle, handed to the job state machine as an
/// immutable input, then replaced. Only the latest value per printer is
/// ever retained; this is not history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterStatusSnapshot {
    pub printer_id: String,
    pub status: PrinterStatus,
    pub bed_temperature: Option<f64>,
    pub nozzle_temperature: Option<f64>,
    pub progress: Option<u8>,
    pub current_job: Option<String>,
    pub thumbnail_url: Option<String>,
    pub remaining_minutes: Option<u32>,
    pub elapsed_minutes: Option<u32>,
    pub filament_slots: Vec<FilamentSlot>,
    /// Raw vendor payload, kept opaque for diagnostics.
    pub raw: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

impl PrinterStatusSnapshot {
    pub fn empty(printer_id: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            printer_id: printer_id.into(),
            status: PrinterStatus::Unknown,
            bed_temperature: None,
            nozzle_temperature: None,
            progress: None,
            current_job: None,
            thumbnail_url: None,
            remaining_minutes: None,
            elapsed_minutes: None,
            filament_slots: Vec::new(),
            raw,
            captured_at: Utc::now(),
        }
    }

    pub fn active_slot(&self) -> Option<&FilamentSlot> {
        self.filament_slots.iter().find(|s| s.active)
    }
}
