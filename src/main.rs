// src/main.rs - Fleet host entry point

use std::sync::Arc;

use clap::Parser;

use printhive::collab::{CommandSlicer, LocalUploader};
use printhive::config::Config;
use printhive::host::FleetHost;
use printhive::printers::PrinterDriver;
use printhive::printers::sim::SimPrinter;

#[derive(Parser, Debug)]
#[command(name = "printhive", about = "3D printer fleet orchestration host")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "printhive.toml")]
    config: String,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting printhive fleet host");

    let config = Config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        tracing::error!("Please ensure the configuration file exists and is properly formatted");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Configured: {} printer(s), {} slicer(s)",
        config.printers.len(),
        config.slicers.len()
    );
    for (id, printer) in &config.printers {
        tracing::info!("Printer {}: {} ({:?})", id, printer.name, printer.vendor);
    }

    let slicer = Arc::new(CommandSlicer::new(
        config.paths.work_dir.clone(),
        config.paths.output_dir.clone(),
    ));
    let uploader = Arc::new(LocalUploader::new(config.paths.spool_dir.clone()));

    // Real vendor transports live outside this crate; the shipped
    // binary runs simulated drivers behind the same interface.
    let drivers: Vec<Arc<dyn PrinterDriver>> = config
        .printers
        .iter()
        .map(|(id, p)| Arc::new(SimPrinter::idle(id.clone(), p.vendor)) as Arc<dyn PrinterDriver>)
        .collect();

    let mut host = FleetHost::new(&config, slicer, uploader, drivers);
    host.start().await?;

    tokio::signal::ctrl_c().await?;
    host.shutdown();
    // Give the loops a moment to observe the shutdown signal.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    tracing::info!("Goodbye");
    Ok(())
}
