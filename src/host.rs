// src/host.rs - Wires the queue and monitor into one running host

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::collab::{Slicer, StaticRegistry, Uploader};
use crate::config::Config;
use crate::monitor::Monitor;
use crate::printers::PrinterDriver;
use crate::slicing::SlicingQueue;
use crate::store::{JobStore, MemoryStore};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host already started")]
    AlreadyStarted,
}

/// The fleet host: slicing queue plus polling monitor, sharing one
/// store and one shutdown signal. All collaborators are injected; there
/// is no process-wide state.
pub struct FleetHost {
    store: Arc<dyn JobStore>,
    queue: SlicingQueue,
    monitor: Monitor,
    drivers: Vec<Arc<dyn PrinterDriver>>,
    job_rx: Option<mpsc::Receiver<crate::job::Job>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl FleetHost {
    pub fn new(
        config: &Config,
        slicer: Arc<dyn Slicer>,
        uploader: Arc<dyn Uploader>,
        drivers: Vec<Arc<dyn PrinterDriver>>,
    ) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(StaticRegistry::new(config.registry_entries()));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (job_tx, job_rx) = mpsc::channel(16);

        let queue = SlicingQueue::new(
            config.queue_config(),
            Arc::clone(&store),
            registry,
            slicer,
            uploader,
            job_tx,
        );
        let monitor = Monitor::new(
            config.monitor_config(),
            Arc::clone(&store),
            shutdown_tx.clone(),
        );

        Self {
            store,
            queue,
            monitor,
            drivers,
            job_rx: Some(job_rx),
            shutdown_tx,
        }
    }

    /// Starts the dispatch loop, the job intake and one status loop per
    /// printer. Idempotence is not supported; a host starts once.
    pub async fn start(&mut self) -> Result<(), HostError> {
        let job_rx = self.job_rx.take().ok_or(HostError::AlreadyStarted)?;

        tracing::info!("Starting fleet host ({} printers)", self.drivers.len());
        tokio::spawn(self.queue.clone().run(self.shutdown_tx.subscribe()));
        tokio::spawn(self.monitor.clone().run_job_intake(job_rx));
        tokio::spawn(Self::stats_loop(self.queue.clone(), self.shutdown_tx.subscribe()));
        for driver in &self.drivers {
            self.monitor.add_printer(Arc::clone(driver)).await;
        }
        tracing::info!("Fleet host ready");
        Ok(())
    }

    /// Periodic queue summary in the log, one line a minute.
    async fn stats_loop(queue: SlicingQueue, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    match queue.stats().await {
                        Ok(s) => tracing::info!(
                            "queue: {} queued, {} running, {} completed, {} failed, {} cancelled",
                            s.queued, s.running, s.completed, s.failed, s.cancelled
                        ),
                        Err(e) => tracing::warn!("queue stats unavailable: {}", e),
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down fleet host");
        let _ = self.shutdown_tx.send(());
    }

    pub fn queue(&self) -> SlicingQueue {
        self.queue.clone()
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }
}
