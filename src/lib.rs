//! printhive - orchestration core for a fleet of 3D printers.
//!
//! Two chained async workflows: slicing a design file into machine
//! instructions through an external slicer, then tracking the resulting
//! print by polling heterogeneous printer devices. The crate owns the
//! priority slicing queue, the job/printer state machines and the
//! polling/backoff scheduler; slicer binaries, printer wire protocols
//! and storage backends stay behind collaborator traits.

pub mod backoff;
pub mod collab;
pub mod config;
pub mod host;
pub mod job;
pub mod monitor;
pub mod printers;
pub mod slicing;
pub mod store;

pub use backoff::BackoffPolicy;
pub use config::Config;
pub use host::FleetHost;
pub use job::{Job, JobStatus};
pub use printers::{PrinterStatus, PrinterStatusSnapshot, PrinterVendor};
pub use slicing::{SliceRequest, SlicingJob, SlicingStatus};
