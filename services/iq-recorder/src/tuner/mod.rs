//! Tuner capability
//!
//! The capture loop only ever talks to a tuner through these two traits:
//! a [`TunerDriver`] opens a device by index, and the resulting [`Tuner`]
//! is configured, flushed and then read synchronously one chunk at a time.
//!
//! Backends:
//! - [`process`]: pipes samples out of the `rtl_sdr` command-line tool
//! - [`sim`]: synthetic samples with optional fault injection
//! - `native`: direct USB access through `rtl-sdr-rs` (feature `rtlsdr`)

#[cfg(feature = "rtlsdr")]
pub mod native;
pub mod process;
pub mod sim;

use thiserror::Error;

use crate::config::CaptureConfig;

/// Errors reported by a tuner backend
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("cannot open tuner {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("tuner rejected {parameter}: {reason}")]
    Rejected {
        parameter: &'static str,
        reason: String,
    },

    #[error("tuner read failed: {0}")]
    Read(String),

    #[error("tuner stream ended")]
    EndOfStream,

    #[error("tuner is not streaming (buffer was never reset)")]
    NotStreaming,

    #[error("tuner device error: {0}")]
    Device(String),

    #[error("tuner I/O error")]
    Io(#[from] std::io::Error),
}

/// The four scalar parameters applied to a tuner before streaming.
/// Gain is always applied in manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerSettings {
    pub sample_rate: u32,
    pub center_freq: u32,
    pub gain_tenths_db: i32,
}

impl TunerSettings {
    pub fn gain_db(&self) -> f32 {
        self.gain_tenths_db as f32 / 10.0
    }
}

impl From<&CaptureConfig> for TunerSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            center_freq: config.frequency_hz,
            gain_tenths_db: config.gain_tenths_db,
        }
    }
}

/// Opens tuners by device index
pub trait TunerDriver {
    type Tuner: Tuner;

    fn open(&self, index: u32) -> Result<Self::Tuner, TunerError>;
}

/// An open tuner. Dropping it releases the device.
pub trait Tuner {
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), TunerError>;

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), TunerError>;

    /// Switch to manual gain mode and apply `tenths_db`
    fn set_manual_gain(&mut self, tenths_db: i32) -> Result<(), TunerError>;

    /// Discard anything queued before configuration and start streaming
    fn reset_buffer(&mut self) -> Result<(), TunerError>;

    /// Block until a chunk of interleaved u8 I/Q bytes is available.
    /// Returns the number of bytes written into `buf`, never zero.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TunerError>;

    fn close(&mut self) -> Result<(), TunerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = CaptureConfig {
            sample_rate: 1_024_000,
            frequency_hz: 1_090_000_000,
            gain_tenths_db: 496,
            ..CaptureConfig::default()
        };
        let settings = TunerSettings::from(&config);
        assert_eq!(settings.sample_rate, 1_024_000);
        assert_eq!(settings.center_freq, 1_090_000_000);
        assert_eq!(settings.gain_tenths_db, 496);
        assert!((settings.gain_db() - 49.6).abs() < 1e-4);
    }
}
