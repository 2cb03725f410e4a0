//! Printer vendor dispatch and the poll capability interface.
//!
//! Vendors are a closed set: telemetry normalization matches on the
//! variant tag, never on open-ended payload sniffing.

pub mod normalize;
pub mod sim;
pub mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use normalize::normalize;
pub use snapshot::{FilamentSlot, PrinterStatusSnapshot};

/// Supported printer firmware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterVendor {
    BambuLab,
    PrusaCore,
    Unknown,
}

impl Default for PrinterVendor {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Canonical printer status derived from vendor telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    Online,
    Offline,
    Printing,
    Paused,
    Error,
    Unknown,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Poll timed out: {0}")]
    Timeout(String),
    #[error("Printer unreachable: {0}")]
    Unreachable(String),
    #[error("Malformed telemetry: {0}")]
    Malformed(String),
}

impl PollError {
    /// Sustained timeouts/unreachability degrade a printer to offline;
    /// sustained malformed payloads degrade it to error.
    pub fn degraded_status(&self) -> PrinterStatus {
        match self {
            PollError::Timeout(_) | PollError::Unreachable(_) => PrinterStatus::Offline,
            PollError::Malformed(_) => PrinterStatus::Error,
        }
    }
}

/// Poll capability every printer driver implements. Returns the raw
/// vendor payload; normalization happens in one place (`normalize`),
/// not per driver.
#[async_trait]
pub trait PrinterDriver: Send + Sync {
    fn printer_id(&self) -> &str;
    fn vendor(&self) -> PrinterVendor;
    async fn poll(&self) -> Result<serde_json::Value, PollError>;
}
