//! Capture configuration from command-line flags and environment variables

use clap::{Parser, ValueEnum};
use thiserror::Error;

pub const DEFAULT_SAMPLE_RATE: u32 = 2_400_000;
pub const DEFAULT_FREQUENCY_HZ: u32 = 119_100_000;
pub const DEFAULT_GAIN_TENTHS_DB: i32 = 402;
pub const DEFAULT_DURATION_SECONDS: i32 = 3600;
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/";
pub const DEFAULT_NAME_PREFIX: &str = "ksle";

/// Errors raised while resolving the capture configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,

    #[error("capture duration cannot be negative (got {0} s)")]
    NegativeDuration(i32),

    #[error("device index cannot be negative (got {0})")]
    NegativeDeviceIndex(i32),

    #[error("the {0} backend is not compiled in (rebuild with --features rtlsdr)")]
    BackendUnavailable(&'static str),
}

/// Which tuner implementation feeds the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Pipe samples from the `rtl_sdr` command-line tool
    Process,
    /// Synthetic samples paced at the sample rate (no hardware)
    Sim,
    /// Talk to the dongle directly over USB (needs the `rtlsdr` feature)
    Native,
}

/// Command-line arguments. Every flag falls back to an `IQREC_*` variable.
#[derive(Debug, Parser)]
#[command(name = "iq-recorder", version, about = "Record raw RTL-SDR IQ samples to disk")]
pub struct Args {
    /// Sample rate in Hz
    #[arg(short = 's', long = "sample_rate", alias = "sample-rate", env = "IQREC_SAMPLE_RATE",
          default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Center frequency in Hz (accepts float notation, e.g. 119.1e6)
    #[arg(short = 'f', long = "frequency", env = "IQREC_FREQUENCY",
          value_parser = parse_frequency, default_value_t = DEFAULT_FREQUENCY_HZ)]
    pub frequency: u32,

    /// Gain in tenths of dB
    #[arg(short = 'g', long = "gain", env = "IQREC_GAIN", allow_negative_numbers = true,
          default_value_t = DEFAULT_GAIN_TENTHS_DB)]
    pub gain: i32,

    /// RTL-SDR device index
    #[arg(short = 'd', long = "device", env = "IQREC_DEVICE", allow_negative_numbers = true,
          default_value_t = 0)]
    pub device: i32,

    /// Duration to capture in seconds
    #[arg(short = 't', long = "time_seconds", alias = "time-seconds", env = "IQREC_TIME_SECONDS",
          allow_negative_numbers = true, default_value_t = DEFAULT_DURATION_SECONDS)]
    pub time_seconds: i32,

    /// Output directory
    #[arg(short = 'o', long = "output_dir", alias = "output-dir", env = "IQREC_OUTPUT_DIR",
          default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: String,

    /// Output file prefix
    #[arg(short = 'n', long = "name", env = "IQREC_NAME", default_value = DEFAULT_NAME_PREFIX)]
    pub name: String,

    /// Tuner backend
    #[arg(short = 'b', long = "backend", env = "IQREC_BACKEND", value_enum,
          default_value_t = Backend::Process)]
    pub backend: Backend,

    /// Path to the rtl_sdr tool used by the process backend
    #[arg(long = "rtl_sdr_path", alias = "rtl-sdr-path", env = "IQREC_RTL_SDR_PATH",
          default_value = "rtl_sdr")]
    pub rtl_sdr_path: String,
}

/// Resolved capture parameters, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Samples per second (one sample = one I byte + one Q byte)
    pub sample_rate: u32,

    /// Center frequency in Hz
    pub frequency_hz: u32,

    /// Manual tuner gain in tenths of dB (402 = 40.2 dB)
    pub gain_tenths_db: i32,

    pub device_index: u32,

    pub duration_seconds: u32,

    /// Always ends with `/`
    pub output_dir: String,

    pub name_prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            gain_tenths_db: DEFAULT_GAIN_TENTHS_DB,
            device_index: 0,
            duration_seconds: DEFAULT_DURATION_SECONDS as u32,
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl TryFrom<&Args> for CaptureConfig {
    type Error = ConfigError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        if args.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if args.backend == Backend::Native && !cfg!(feature = "rtlsdr") {
            return Err(ConfigError::BackendUnavailable("native"));
        }
        let duration_seconds = u32::try_from(args.time_seconds)
            .map_err(|_| ConfigError::NegativeDuration(args.time_seconds))?;
        let device_index = u32::try_from(args.device)
            .map_err(|_| ConfigError::NegativeDeviceIndex(args.device))?;

        Ok(Self {
            sample_rate: args.sample_rate,
            frequency_hz: args.frequency,
            gain_tenths_db: args.gain,
            device_index,
            duration_seconds,
            output_dir: normalize_output_dir(&args.output_dir),
            name_prefix: args.name.clone(),
        })
    }
}

/// Make sure the directory ends with a path separator, without doubling it
pub fn normalize_output_dir(dir: &str) -> String {
    if dir.is_empty() {
        return "./".to_string();
    }
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}

fn parse_frequency(s: &str) -> Result<u32, String> {
    if let Ok(hz) = s.parse::<u32>() {
        return Ok(hz);
    }
    let hz: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a frequency in Hz", s))?;
    if !hz.is_finite() || hz < 0.0 || hz > u32::MAX as f64 {
        return Err(format!("{} Hz is outside the 0..={} range", s, u32::MAX));
    }
    Ok(hz as u32)
}
