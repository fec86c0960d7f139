//! Detector event records and raw line parsing.
//!
//! A CosmicWatch detector emits one whitespace-separated line per event.
//! This module parses those lines into readings and stamps them into the
//! wire format the collector expects. The numeric fields stay as strings
//! end to end; the uplink forwards them verbatim and never interprets them.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Capture timestamp format, e.g. `2026-08-06-14-03-22.481095`.
const CAPTURED_AT_FORMAT: &str = "%Y-%m-%d-%H-%M-%S%.6f";

/// One detector event, immutable once created.
///
/// Serializes to the collector's upload body:
/// `{"event": .., "date": .., "time": .., "adc": .., "sipm": .., "deadtime": .., "temp": ..}`.
/// `date` and `time` are two representations of the same capture instant;
/// both are required by the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Producer-assigned sequence number, monotonically increasing per run
    #[serde(rename = "event")]
    pub sequence: u64,

    /// Capture instant as a formatted local timestamp string
    #[serde(rename = "date")]
    pub captured_at: String,

    /// Capture instant as microseconds since the Unix epoch
    #[serde(rename = "time")]
    pub captured_at_micros: i64,

    /// Raw ADC value as reported by the detector
    pub adc: String,

    /// SiPM voltage reading
    pub sipm: String,

    /// Dead time accumulated by the detector
    pub deadtime: String,

    /// Board temperature reading
    #[serde(rename = "temp")]
    pub temperature: String,
}

impl EventRecord {
    /// Build a record from a reading with an explicit capture instant.
    pub fn new(sequence: u64, captured: DateTime<Local>, reading: DetectorReading) -> Self {
        Self {
            sequence,
            captured_at: captured.format(CAPTURED_AT_FORMAT).to_string(),
            captured_at_micros: captured.timestamp_micros(),
            adc: reading.adc,
            sipm: reading.sipm,
            deadtime: reading.deadtime,
            temperature: reading.temperature,
        }
    }

    /// Build a record from a reading, stamping the current wall clock.
    pub fn capture(sequence: u64, reading: DetectorReading) -> Self {
        Self::new(sequence, Local::now(), reading)
    }
}

/// The opaque payload fields of one parsed detector line.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorReading {
    pub adc: String,
    pub sipm: String,
    pub deadtime: String,
    pub temperature: String,
}

/// Parse one raw detector line into a reading.
///
/// Lines are whitespace separated: ADC first, the device's own event count
/// second, then SiPM voltage, dead time, and temperature. Firmware banner
/// lines start with `###`. Returns `None` for banners and for lines with
/// fewer than three fields (truncated or garbled reads).
///
/// Dead time and temperature are optional trailing fields on older
/// firmware; they default to `0` and `25.0`.
pub fn parse_detector_line(line: &str) -> Option<DetectorReading> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() < 3 || fields[0] == "###" {
        return None;
    }

    Some(DetectorReading {
        adc: fields[0].to_string(),
        sipm: fields[2].to_string(),
        deadtime: fields.get(3).unwrap_or(&"0").to_string(),
        temperature: fields.get(4).unwrap_or(&"25.0").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading() -> DetectorReading {
        DetectorReading {
            adc: "512".to_string(),
            sipm: "34.12".to_string(),
            deadtime: "12".to_string(),
            temperature: "24.8".to_string(),
        }
    }

    #[test]
    fn test_parse_full_line() {
        let parsed = parse_detector_line("512 17 34.12 12 24.8").expect("should parse");
        assert_eq!(parsed, reading());
    }

    #[test]
    fn test_parse_defaults_for_missing_trailing_fields() {
        let parsed = parse_detector_line("512 17 34.12").expect("should parse");
        assert_eq!(parsed.adc, "512");
        assert_eq!(parsed.sipm, "34.12");
        assert_eq!(parsed.deadtime, "0");
        assert_eq!(parsed.temperature, "25.0");
    }

    #[test]
    fn test_parse_skips_banner_lines() {
        assert!(parse_detector_line("### CosmicWatch: The Desktop Muon Detector").is_none());
    }

    #[test]
    fn test_parse_skips_short_lines() {
        assert!(parse_detector_line("").is_none());
        assert!(parse_detector_line("512").is_none());
        assert!(parse_detector_line("512 17").is_none());
    }

    #[test]
    fn test_record_timestamp_representations() {
        let captured = Local.with_ymd_and_hms(2026, 8, 6, 14, 3, 22).unwrap()
            + chrono::Duration::microseconds(481_095);

        let record = EventRecord::new(7, captured, reading());
        assert_eq!(record.sequence, 7);
        assert_eq!(record.captured_at, "2026-08-06-14-03-22.481095");
        assert_eq!(record.captured_at_micros, captured.timestamp_micros());
    }

    #[test]
    fn test_record_wire_keys() {
        let captured = Local.with_ymd_and_hms(2026, 8, 6, 14, 3, 22).unwrap();
        let record = EventRecord::new(3, captured, reading());

        let value = serde_json::to_value(&record).expect("should serialize");
        let object = value.as_object().expect("should be an object");

        for key in ["event", "date", "time", "adc", "sipm", "deadtime", "temp"] {
            assert!(object.contains_key(key), "missing wire key '{}'", key);
        }
        assert_eq!(object.len(), 7);
        assert_eq!(object["event"], 3);
        assert_eq!(object["adc"], "512");
        assert_eq!(object["temp"], "24.8");
    }
}
