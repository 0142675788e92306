//! Long-duration RTL-SDR raw IQ recorder
//!
//! Pulls interleaved u8 I/Q chunks from a tuner and appends them to a
//! headerless `.iq` file until a byte target derived from the sample rate
//! and duration is reached, next to a `key: value` metadata sidecar.

pub mod capture;
pub mod config;
pub mod metadata;
pub mod session;
pub mod tuner;

pub use capture::{run_capture, CaptureError, CaptureReport, CHUNK_SIZE};
pub use config::{CaptureConfig, ConfigError};
pub use session::CaptureSession;
