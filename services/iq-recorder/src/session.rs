//! Per-run capture session: output naming and the byte budget

use chrono::{DateTime, FixedOffset};

use crate::config::CaptureConfig;

/// Bytes per complex sample (8-bit I + 8-bit Q)
pub const BYTES_PER_SAMPLE: u64 = 2;

/// Layout of the timestamp embedded in capture filenames, e.g. `20250531_Sat_1407`
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%a_%H%M";

/// State derived from the config and the start time of one recording
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub filename: String,
    pub metadata_path: String,
    pub started_at: DateTime<FixedOffset>,
    pub total_target_bytes: u64,
    bytes_written: u64,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig, started_at: DateTime<FixedOffset>) -> Self {
        let filename = capture_filename(config, &started_at);
        let metadata_path = format!("{}.txt", filename);
        Self {
            filename,
            metadata_path,
            started_at,
            total_target_bytes: target_bytes(config.sample_rate, config.duration_seconds),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn record(&mut self, bytes: usize) {
        self.bytes_written += bytes as u64;
    }

    /// The target is only checked between chunks, so the last chunk may overshoot it
    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.total_target_bytes
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_target_bytes == 0 {
            return 100.0;
        }
        self.bytes_written as f64 * 100.0 / self.total_target_bytes as f64
    }
}

/// Total bytes to capture, computed in u64 so day-long captures do not overflow
pub fn target_bytes(sample_rate: u32, duration_seconds: u32) -> u64 {
    (sample_rate as u64 * duration_seconds as u64).saturating_mul(BYTES_PER_SAMPLE)
}

/// `<output_dir><name>_<YYYYMMDD_Dow_HHMM>_<rate>s_<gain>g.iq`
///
/// `output_dir` is expected to be normalized already (trailing `/`).
pub fn capture_filename(config: &CaptureConfig, started_at: &DateTime<FixedOffset>) -> String {
    format!(
        "{}{}_{}_{}s_{}g.iq",
        config.output_dir,
        config.name_prefix,
        started_at.format(FILENAME_TIMESTAMP_FORMAT),
        config.sample_rate,
        config.gain_tenths_db
    )
}
