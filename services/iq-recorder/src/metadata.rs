//! Text sidecar describing how a capture was produced
//!
//! One `key: value` per line, written once before streaming starts and
//! never touched again:
//!
//! ```text
//! provenance: iq-recorder 0.1.0 built on May 30 2025
//! epoch_start: 1748714862
//! time_start_local: Sat May 31 14:07:42 2025
//! sample_rate: 2400000
//! frequency: 119100000
//! gain: 402
//! duration_sec: 3600
//! device_index: 0
//! filename: /tmp/ksle_20250531_Sat_1407_2400000s_402g.iq
//! ```

use std::fmt;
use std::path::Path;

use crate::config::CaptureConfig;
use crate::session::CaptureSession;

/// asctime(3) layout
const LOCAL_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Program identity and build date
pub fn provenance() -> String {
    format!(
        "{} {} built on {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("IQREC_BUILD_DATE")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub provenance: String,
    pub epoch_start: i64,
    pub time_start_local: String,
    pub sample_rate: u32,
    pub frequency: u32,
    pub gain: i32,
    pub duration_sec: u32,
    pub device_index: u32,
    pub filename: String,
}

impl MetadataRecord {
    pub fn new(config: &CaptureConfig, session: &CaptureSession) -> Self {
        Self {
            provenance: provenance(),
            epoch_start: session.started_at.timestamp(),
            time_start_local: session.started_at.format(LOCAL_TIME_FORMAT).to_string(),
            sample_rate: config.sample_rate,
            frequency: config.frequency_hz,
            gain: config.gain_tenths_db,
            duration_sec: config.duration_seconds,
            device_index: config.device_index,
            filename: session.filename.clone(),
        }
    }

    /// Create (or truncate) the sidecar and write the whole record at once
    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_string())
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "provenance: {}", self.provenance)?;
        writeln!(f, "epoch_start: {}", self.epoch_start)?;
        writeln!(f, "time_start_local: {}", self.time_start_local)?;
        writeln!(f, "sample_rate: {}", self.sample_rate)?;
        writeln!(f, "frequency: {}", self.frequency)?;
        writeln!(f, "gain: {}", self.gain)?;
        writeln!(f, "duration_sec: {}", self.duration_sec)?;
        writeln!(f, "device_index: {}", self.device_index)?;
        writeln!(f, "filename: {}", self.filename)
    }
}
