mod common;

use std::sync::Arc;
use std::time::Duration;

use printhive::config::Config;
use printhive::host::FleetHost;
use printhive::job::JobStatus;
use printhive::printers::sim::SimPrinter;
use printhive::printers::{PrinterDriver, PrinterStatus, PrinterVendor};
use printhive::slicing::job::SliceRequest;
use printhive::slicing::SlicingStatus;

use common::{MockSlicer, MockUploader};

fn host_config() -> Config {
    let toml_config = r#"
[queue]
dispatch_interval_secs = 0.01

[queue.backoff]
base_secs = 0.01
cap_secs = 0.05
max_attempts = 3

[monitor]
status_interval_secs = 30
job_interval_secs = 1

[printers.x1c]
vendor = "bambu_lab"
name = "Bambu X1 Carbon"

[slicers.slicer-a]
executable = "/bin/slicer-a"

[slicers.slicer-a.profiles]
draft = "/profiles/draft.ini"
    "#;
    let config: Config = toml::from_str(toml_config).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn end_to_end_slice_upload_autostart() {
    let config = host_config();
    let drivers: Vec<Arc<dyn PrinterDriver>> =
        vec![Arc::new(SimPrinter::idle("x1c", PrinterVendor::BambuLab))];
    let mut host = FleetHost::new(
        &config,
        Arc::new(MockSlicer::always_ok()),
        Arc::new(MockUploader::ok()),
        drivers,
    );
    host.start().await.unwrap();

    let mut request = SliceRequest::new("deadbeef", "slicer-a", "draft");
    request.target_printer = Some("x1c".to_string());
    request.auto_upload = true;
    request.auto_start = true;
    let id = host.queue().enqueue(request).await.unwrap();

    // The dispatch loop runs on a 10ms tick; give the whole chain room.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let sliced = host.queue().get(id).await.unwrap();
    assert_eq!(sliced.status, SlicingStatus::Completed);
    assert!(sliced.warning.is_none());

    let jobs = host.store().list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].printer_id, "x1c");
    // The sim printer reports idle with no progress, so the tracked job
    // stays pending.
    assert_eq!(jobs[0].status, JobStatus::Pending);

    let health = host.monitor().printer_health("x1c").await.unwrap();
    assert!(matches!(
        health.status,
        PrinterStatus::Unknown | PrinterStatus::Online
    ));

    host.shutdown();
}

#[tokio::test]
async fn host_refuses_double_start() {
    let config = host_config();
    let mut host = FleetHost::new(
        &config,
        Arc::new(MockSlicer::always_ok()),
        Arc::new(MockUploader::ok()),
        Vec::new(),
    );
    host.start().await.unwrap();
    assert!(host.start().await.is_err());
    host.shutdown();
}
