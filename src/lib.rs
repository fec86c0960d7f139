//! Cosmic Uplink Library
//!
//! This library provides components for streaming CosmicWatch detector
//! events to a remote collector:
//!
//! - **config**: Environment-based configuration for the uplink
//! - **record**: Detector event records and raw line parsing
//! - **detector**: Simulated detector for running without hardware
//! - **buffer**: Pending/retry record queues shared with the producer
//! - **client**: Per-record HTTP delivery with retry and backoff
//! - **uploader**: Periodic upload scheduler with graceful drain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cosmic_uplink::buffer::RecordBuffer;
//! use cosmic_uplink::client::UploadClient;
//! use cosmic_uplink::config::Config;
//! use cosmic_uplink::record::{parse_detector_line, EventRecord};
//! use cosmic_uplink::uploader::UploadScheduler;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Shared buffer between the producer and the scheduler
//!     let buffer = Arc::new(RecordBuffer::new());
//!
//!     // Start the periodic uploader
//!     let client = UploadClient::new(&config).expect("Failed to create client");
//!     let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), client);
//!
//!     // Producer side: parse detector lines and enqueue records
//!     if let Some(reading) = parse_detector_line("512 1 34.12 12 24.8") {
//!         buffer.push(EventRecord::capture(1, reading));
//!     }
//!
//!     // Flush and stop
//!     scheduler.stop().await;
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod client;
pub mod config;
pub mod detector;
pub mod record;
pub mod uploader;

// Re-export commonly used types at crate root for convenience
pub use buffer::RecordBuffer;
pub use client::{ClientError, SendOutcome, UploadClient};
pub use config::{Config, ConfigError};
pub use detector::{DetectorSimulator, SimulatorConfig};
pub use record::{parse_detector_line, DetectorReading, EventRecord};
pub use uploader::{CycleSummary, RecordSink, UploadScheduler, UploaderStats};
