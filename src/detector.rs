//! Simulated CosmicWatch detector for running the pipeline without hardware.
//!
//! Emits raw serial-style lines in the shape the firmware prints (including
//! the occasional `###` banner and truncated read), so the producer exercises
//! the same parsing path as a real device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

/// Configuration for the simulated detector.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Mean gap between events
    pub mean_interval: Duration,

    /// Fraction of emitted lines that are firmware banners
    pub banner_rate: f64,

    /// Fraction of emitted lines that are truncated reads
    pub garble_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mean_interval: Duration::from_secs(1),
            banner_rate: 0.01,
            garble_rate: 0.01,
        }
    }
}

/// Generates plausible detector output lines.
#[derive(Debug, Default)]
pub struct DetectorSimulator {
    config: SimulatorConfig,
    device_count: AtomicU64,
}

impl DetectorSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            device_count: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulatorConfig::default())
    }

    /// Produce the next raw line: `ADC COUNT SIPM DEADTIME TEMP`, a banner,
    /// or a truncated read.
    pub fn next_line(&self) -> String {
        let mut rng = rand::thread_rng();

        if rng.gen_bool(self.config.banner_rate) {
            return "### CosmicWatch: The Desktop Muon Detector".to_string();
        }
        if rng.gen_bool(self.config.garble_rate) {
            return format!("{}", rng.gen_range(0..1024));
        }

        let count = self.device_count.fetch_add(1, Ordering::Relaxed) + 1;
        let adc: u32 = rng.gen_range(80..=1023);
        // Pulse amplitude loosely tracks the ADC value
        let sipm = 20.0 + (adc as f64 / 1023.0) * 120.0 + rng.gen_range(-4.0..4.0);
        let deadtime: u32 = rng.gen_range(1..=40);
        let temperature = 23.0 + rng.gen_range(-1.5..1.5);

        format!(
            "{} {} {:.2} {} {:.1}",
            adc, count, sipm, deadtime, temperature
        )
    }

    /// Gap to wait before the next event, spread around the mean.
    pub fn next_delay(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.2..=1.8);
        self.config.mean_interval.mul_f64(factor)
    }
}
