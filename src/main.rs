//! Cosmic Uplink - buffered uploader for CosmicWatch detector events
//!
//! Reads detector events from a (simulated) device, buffers them in memory,
//! and periodically uploads them to the remote collector with per-record
//! retry. Survives network outages by carrying the backlog across cycles
//! and drains the buffer once more on shutdown.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `COSMIC_UPLINK_SERVER_URL`: collector base URL (default: http://accel-kitchen.com:3000)
//! - `COSMIC_UPLINK_MEASUREMENT_ID`: measurement identifier (required)
//! - `COSMIC_UPLINK_AUTH_TOKEN`: bearer token for the collector (required)
//! - `COSMIC_UPLINK_UPLOAD_INTERVAL_SECS`: seconds between cycles (default: 60)
//! - `COSMIC_UPLINK_BATCH_SIZE`: records per cycle (default: 100)
//! - `COSMIC_UPLINK_MAX_ATTEMPTS`: send attempts per record (default: 3)
//! - `COSMIC_UPLINK_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 3)
//! - `RUST_LOG`: logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cosmic_uplink::buffer::RecordBuffer;
use cosmic_uplink::client::UploadClient;
use cosmic_uplink::config::Config;
use cosmic_uplink::detector::DetectorSimulator;
use cosmic_uplink::record::{parse_detector_line, EventRecord};
use cosmic_uplink::uploader::UploadScheduler;

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting cosmic uplink...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                server_url = %config.server_url,
                measurement_id = %config.measurement_id,
                upload_interval_secs = config.upload_interval.as_secs(),
                batch_size = config.batch_size,
                max_attempts = config.max_attempts,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Create HTTP client bound to this measurement session
    let client = match UploadClient::new(&config) {
        Ok(client) => {
            info!(upload_url = %client.upload_url(), "Upload client initialized");
            client
        }
        Err(e) => {
            error!(error = %e, "Failed to create upload client");
            std::process::exit(1);
        }
    };

    // Shared buffer between the producer and the scheduler
    let buffer = Arc::new(RecordBuffer::new());

    // Start the periodic uploader
    let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), client);
    let stats = scheduler.stats();
    let mut token_expired = scheduler.token_expired();

    // Spawn the producer - reads detector events and enqueues records
    let producer_handle = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            info!("Detector producer started");
            run_detector(DetectorSimulator::with_defaults(), buffer).await;
        })
    };

    // Wait for shutdown signal or token expiry
    info!("Cosmic uplink running. Press Ctrl+C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
        _ = token_expired.changed() => {
            error!("Authentication token expired; re-enroll and restart the uplink");
        }
    }

    // Graceful shutdown: stop producing, then flush the buffer once more
    info!("Initiating graceful shutdown...");
    producer_handle.abort();

    let summary = scheduler.stop().await;
    if summary.requeued > 0 {
        warn!(
            lost = summary.requeued,
            "Undelivered records remained at exit"
        );
    }

    info!(
        sent = stats.sent(),
        failed = stats.failed(),
        "Cosmic uplink stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Run the detector producer, enqueueing one record per parsed event line.
///
/// The producer never waits on the network; `RecordBuffer::push` is its only
/// contact with the upload side. Runs until aborted at shutdown.
async fn run_detector(simulator: DetectorSimulator, buffer: Arc<RecordBuffer>) {
    let mut sequence: u64 = 0;
    let mut events_read: u64 = 0;
    let mut last_report_time = std::time::Instant::now();
    let report_interval = Duration::from_secs(30);

    loop {
        tokio::time::sleep(simulator.next_delay()).await;

        let line = simulator.next_line();
        let reading = match parse_detector_line(&line) {
            Some(reading) => reading,
            None => continue,
        };

        sequence += 1;
        buffer.push(EventRecord::capture(sequence, reading));
        events_read += 1;

        // Periodic progress report
        if last_report_time.elapsed() >= report_interval {
            info!(
                events_read = events_read,
                buffered = buffer.len(),
                rate = format!(
                    "{:.2}/s",
                    events_read as f64 / last_report_time.elapsed().as_secs_f64()
                ),
                "Detector progress"
            );
            events_read = 0;
            last_report_time = std::time::Instant::now();
        }
    }
}
