// src/printers/sim.rs - Simulated printer driver
//
// Stands in for real vendor transports in the shipped binary and in
// tests. Scripted mode replays a fixed sequence of poll outcomes;
// idle mode reports a healthy idle machine forever.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{PollError, PrinterDriver, PrinterVendor};

pub struct SimPrinter {
    id: String,
    vendor: PrinterVendor,
    script: Mutex<VecDeque<Result<Value, PollError>>>,
    fallback: Value,
    poll_delay: std::time::Duration,
}

impl SimPrinter {
    /// Driver that always reports an idle, reachable printer.
    pub fn idle(id: impl Into<String>, vendor: PrinterVendor) -> Self {
        Self {
            id: id.into(),
            vendor,
            script: Mutex::new(VecDeque::new()),
            fallback: json!({"state": "idle"}),
            poll_delay: std::time::Duration::ZERO,
        }
    }

    /// Driver that replays `script` in order, then falls back to the
    /// idle payload once the script is exhausted.
    pub fn scripted(
        id: impl Into<String>,
        vendor: PrinterVendor,
        script: Vec<Result<Value, PollError>>,
    ) -> Self {
        Self {
            id: id.into(),
            vendor,
            script: Mutex::new(script.into()),
            fallback: json!({"state": "idle"}),
            poll_delay: std::time::Duration::ZERO,
        }
    }

    /// Makes every poll take at least `delay`, to exercise overlapping
    /// cycles.
    pub fn with_poll_delay(mut self, delay: std::time::Duration) -> Self {
        self.poll_delay = delay;
        self
    }
}

#[async_trait]
impl PrinterDriver for SimPrinter {
    fn printer_id(&self) -> &str {
        &self.id
    }

    fn vendor(&self) -> PrinterVendor {
        self.vendor
    }

    async fn poll(&self) -> Result<Value, PollError> {
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let mut script = self.script.lock().await;
        match script.pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.fallback.clone()),
        }
    }
}
