//! Bounded capture loop
//!
//! Opens and configures the tuner, creates the capture file and its
//! sidecar, then copies fixed-size chunks from the tuner to disk until the
//! byte target is reached or something fails. There are no retries: a
//! failure while streaming stops the loop and keeps whatever was written.

use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CaptureConfig, ConfigError};
use crate::metadata::MetadataRecord;
use crate::session::CaptureSession;
use crate::tuner::{Tuner, TunerDriver, TunerError, TunerSettings};

/// Bytes requested from the tuner per read
pub const CHUNK_SIZE: usize = 256 * 1024;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

const MIB: f64 = 1024.0 * 1024.0;

/// Why streaming stopped early
#[derive(Debug, Error)]
pub enum StreamFault {
    #[error("read failed")]
    Read(#[from] TunerError),

    #[error("write failed")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("unable to open RTL-SDR device {index}")]
    DeviceUnavailable {
        index: u32,
        #[source]
        source: TunerError,
    },

    #[error("cannot create capture file {path}")]
    OutputWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture interrupted after {bytes_written} bytes")]
    StreamInterrupted {
        bytes_written: u64,
        #[source]
        fault: StreamFault,
    },
}

impl CaptureError {
    /// Process exit code for this failure.
    ///
    /// An interrupted stream still exits 0: the partial capture is kept and
    /// the run is reported as finished.
    pub fn exit_code(&self) -> u8 {
        match self {
            CaptureError::StreamInterrupted { .. } => 0,
            _ => 1,
        }
    }
}

/// Outcome of a capture that got as far as streaming
#[derive(Debug)]
pub struct CaptureReport {
    pub filename: String,
    pub metadata_path: String,
    pub target_bytes: u64,
    pub bytes_written: u64,
    pub chunks: u64,
    pub interruption: Option<CaptureError>,
}

impl CaptureReport {
    pub fn mib_written(&self) -> f64 {
        self.bytes_written as f64 / MIB
    }

    pub fn is_complete(&self) -> bool {
        self.interruption.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        self.interruption.as_ref().map_or(0, CaptureError::exit_code)
    }
}

/// Record one capture.
///
/// Fails before any file exists if the tuner cannot be opened, and before
/// streaming if the capture file cannot be created. Once streaming, errors
/// end up in [`CaptureReport::interruption`] instead.
pub fn run_capture<D: TunerDriver>(
    config: &CaptureConfig,
    driver: &D,
    started_at: DateTime<FixedOffset>,
) -> Result<CaptureReport, CaptureError> {
    let mut session = CaptureSession::new(config, started_at);

    let mut tuner = driver
        .open(config.device_index)
        .map_err(|source| CaptureError::DeviceUnavailable {
            index: config.device_index,
            source,
        })?;
    configure_tuner(&mut tuner, &TunerSettings::from(config));
    tuner
        .reset_buffer()
        .map_err(|source| CaptureError::DeviceUnavailable {
            index: config.device_index,
            source,
        })?;

    let mut output = File::create(&session.filename).map_err(|source| {
        CaptureError::OutputWrite {
            path: session.filename.clone(),
            source,
        }
    })?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    let record = MetadataRecord::new(config, &session);
    match record.write_to(&session.metadata_path) {
        Ok(()) => debug!("Wrote metadata to {}", session.metadata_path),
        Err(e) => warn!("Could not write metadata {}: {}", session.metadata_path, e),
    }

    println!("Recording to: {}", session.filename);
    info!(
        "Capturing {} bytes ({:.2} MiB) in {} KiB chunks",
        session.total_target_bytes,
        session.total_target_bytes as f64 / MIB,
        CHUNK_SIZE / 1024
    );

    let streamed = stream(&mut tuner, &mut output, &mut buffer, &mut session);

    // Release in reverse order of acquisition
    drop(output);
    drop(buffer);
    if let Err(e) = tuner.close() {
        warn!("Failed to close tuner: {}", e);
    }
    drop(tuner);

    let (chunks, interruption) = match streamed {
        Ok(chunks) => (chunks, None),
        Err((chunks, fault)) => {
            let err = CaptureError::StreamInterrupted {
                bytes_written: session.bytes_written(),
                fault,
            };
            error!("{}", error_chain(&err));
            (chunks, Some(err))
        }
    };

    info!(
        "Capture {}: {} bytes in {} chunks",
        if interruption.is_none() { "complete" } else { "aborted" },
        session.bytes_written(),
        chunks
    );

    let bytes_written = session.bytes_written();
    Ok(CaptureReport {
        filename: session.filename,
        metadata_path: session.metadata_path,
        target_bytes: session.total_target_bytes,
        bytes_written,
        chunks,
        interruption,
    })
}

/// `err` followed by each of its causes, separated by `: `
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    anyhow::Chain::new(err)
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

/// Apply the four tuner parameters. The tuner is the authority on valid
/// ranges, so a rejected value is logged and the capture carries on.
fn configure_tuner<T: Tuner>(tuner: &mut T, settings: &TunerSettings) {
    info!("  Sample rate: {} S/s", settings.sample_rate);
    if let Err(e) = tuner.set_sample_rate(settings.sample_rate) {
        warn!("Sample rate {} not applied: {}", settings.sample_rate, e);
    }
    info!("  Center frequency: {:.3} MHz", settings.center_freq as f64 / 1e6);
    if let Err(e) = tuner.set_center_freq(settings.center_freq) {
        warn!("Center frequency {} Hz not applied: {}", settings.center_freq, e);
    }
    info!("  Gain: {:.1} dB (manual)", settings.gain_db());
    if let Err(e) = tuner.set_manual_gain(settings.gain_tenths_db) {
        warn!("Gain {} not applied: {}", settings.gain_tenths_db, e);
    }
}

/// Copy chunks until the session target is met. Returns the chunk count,
/// or the chunk count reached together with the fault that stopped it.
fn stream<T: Tuner, W: Write>(
    tuner: &mut T,
    output: &mut W,
    buffer: &mut [u8],
    session: &mut CaptureSession,
) -> Result<u64, (u64, StreamFault)> {
    let started = Instant::now();
    let mut last_progress = started;
    let mut chunks = 0u64;

    while !session.is_complete() {
        let n_read = tuner
            .read_chunk(buffer)
            .map_err(|e| (chunks, StreamFault::from(e)))?;
        output
            .write_all(&buffer[..n_read])
            .map_err(|e| (chunks, StreamFault::from(e)))?;

        session.record(n_read);
        chunks += 1;

        if chunks == 1 {
            debug!("First IQ data received ({} bytes)", n_read);
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            let elapsed = started.elapsed().as_secs_f64();
            info!(
                "[Progress] {:.2} MiB written ({:.1}%) | {:.2} MiB/s",
                session.bytes_written() as f64 / MIB,
                session.progress_percent(),
                session.bytes_written() as f64 / MIB / elapsed.max(f64::EPSILON)
            );
            last_progress = Instant::now();
        }
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::sim::SimDriver;
    use chrono::TimeZone;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn start_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 31, 14, 7, 0)
            .unwrap()
    }

    fn config_in(dir: &Path, duration_seconds: u32) -> CaptureConfig {
        CaptureConfig {
            duration_seconds,
            output_dir: crate::config::normalize_output_dir(&dir.to_string_lossy()),
            ..CaptureConfig::default()
        }
    }

    fn file_len(path: &str) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn test_overshoots_to_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1);
        let driver = SimDriver::new();

        let report = run_capture(&config, &driver, start_time()).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.target_bytes, 4_800_000);
        // 18 chunks = 4 718 592 < target, so a 19th full chunk is written
        assert_eq!(report.chunks, 19);
        assert_eq!(report.bytes_written, 19 * CHUNK_SIZE as u64);
        assert_eq!(report.bytes_written, 4_980_736);
        assert_eq!(file_len(&report.filename), report.bytes_written);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(driver.stats().resets.load(Ordering::Relaxed), 1);
        assert!(driver.stats().closed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_output_naming() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 0);

        let report = run_capture(&config, &SimDriver::new(), start_time()).unwrap();

        let expected = dir.path().join("ksle_20250531_Sat_1407_2400000s_402g.iq");
        assert_eq!(Path::new(&report.filename), expected);
        assert_eq!(report.metadata_path, format!("{}.txt", report.filename));
        assert!(Path::new(&report.metadata_path).exists());
    }

    #[test]
    fn test_zero_duration_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 0);
        let driver = SimDriver::new();

        let report = run_capture(&config, &driver, start_time()).unwrap();

        assert_eq!(driver.stats().reads.load(Ordering::Relaxed), 0);
        assert_eq!(report.chunks, 0);
        assert_eq!(file_len(&report.filename), 0);
        let sidecar = std::fs::read_to_string(&report.metadata_path).unwrap();
        assert!(sidecar.contains("duration_sec: 0\n"));
    }

    #[test]
    fn test_tuner_open_failure_creates_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1);

        let err = run_capture(&config, &SimDriver::new().failing_open(), start_time()).unwrap_err();

        assert!(matches!(err, CaptureError::DeviceUnavailable { index: 0, .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_output_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir.path().join("missing"), 1);
        let driver = SimDriver::new();

        let err = run_capture(&config, &driver, start_time()).unwrap_err();

        assert!(matches!(err, CaptureError::OutputWrite { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(driver.stats().reads.load(Ordering::Relaxed), 0);
        // Neither the capture file nor the sidecar exists
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_read_failure_keeps_partial_capture() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 10);
        let driver = SimDriver::new().failing_after(5);

        let report = run_capture(&config, &driver, start_time()).unwrap();

        assert_eq!(report.chunks, 5);
        assert_eq!(report.bytes_written, 5 * CHUNK_SIZE as u64);
        assert_eq!(file_len(&report.filename), 5 * CHUNK_SIZE as u64);
        assert!(matches!(
            report.interruption,
            Some(CaptureError::StreamInterrupted {
                bytes_written,
                fault: StreamFault::Read(TunerError::Read(_)),
            }) if bytes_written == 5 * CHUNK_SIZE as u64
        ));
        assert_eq!(report.exit_code(), 0);

        let record = MetadataRecord::new(&config, &CaptureSession::new(&config, start_time()));
        assert_eq!(
            std::fs::read_to_string(&report.metadata_path).unwrap(),
            record.to_string()
        );
    }

    #[test]
    fn test_sidecar_written_before_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1);

        // The very first read fails, so anything in the sidecar predates streaming
        let driver = SimDriver::new().failing_after(0);
        let report = run_capture(&config, &driver, start_time()).unwrap();

        assert!(!report.is_complete());
        // The buffer was flushed once, and no read ever succeeded
        assert_eq!(driver.stats().resets.load(Ordering::Relaxed), 1);
        assert_eq!(driver.stats().reads.load(Ordering::Relaxed), 0);
        assert!(matches!(
            report.interruption,
            Some(CaptureError::StreamInterrupted {
                fault: StreamFault::Read(TunerError::Read(_)),
                ..
            })
        ));
        assert_eq!(file_len(&report.filename), 0);
        let sidecar = std::fs::read_to_string(&report.metadata_path).unwrap();
        assert_eq!(sidecar.lines().count(), 9);
        assert!(sidecar.ends_with(&format!("filename: {}\n", report.filename)));
    }

    #[test]
    fn test_short_chunks_are_written_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            sample_rate: 1000,
            ..config_in(dir.path(), 3)
        };
        let driver = SimDriver::new().with_chunk_len(2500);

        let report = run_capture(&config, &driver, start_time()).unwrap();

        // target 6000 bytes -> 2500 + 2500 + 2500
        assert_eq!(report.chunks, 3);
        assert_eq!(file_len(&report.filename), 7500);
        assert_eq!(driver.stats().bytes_delivered.load(Ordering::Relaxed), 7500);
    }

    struct FailingWriter {
        accepted: usize,
        limit: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.accepted += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_stops_stream() {
        let config = CaptureConfig {
            sample_rate: 1000,
            duration_seconds: 10,
            ..CaptureConfig::default()
        };
        let mut session = CaptureSession::new(&config, start_time());
        let driver = SimDriver::new().with_chunk_len(1000);
        let mut tuner = driver.open(0).unwrap();
        tuner.reset_buffer().unwrap();
        let mut output = FailingWriter {
            accepted: 0,
            limit: 3500,
        };
        let mut buffer = vec![0u8; CHUNK_SIZE];

        let (chunks, fault) = stream(&mut tuner, &mut output, &mut buffer, &mut session).unwrap_err();

        assert_eq!(chunks, 3);
        assert!(matches!(fault, StreamFault::Write(_)));
        assert_eq!(session.bytes_written(), 3000);
        assert_eq!(driver.stats().reads.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_error_messages() {
        let err = CaptureError::DeviceUnavailable {
            index: 2,
            source: TunerError::Open {
                index: 2,
                reason: "usb_open error -3".to_string(),
            },
        };
        assert_eq!(err.to_string(), "unable to open RTL-SDR device 2");
        assert_eq!(
            error_chain(&err),
            "unable to open RTL-SDR device 2: cannot open tuner 2: usb_open error -3"
        );
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err).context("Capture failed")),
            "Capture failed: unable to open RTL-SDR device 2: cannot open tuner 2: usb_open error -3"
        );

        let err = CaptureError::OutputWrite {
            path: "/missing/x.iq".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            error_chain(&err),
            "cannot create capture file /missing/x.iq: No such file or directory"
        );

        let err = CaptureError::StreamInterrupted {
            bytes_written: 4096,
            fault: TunerError::Read("transfer error".to_string()).into(),
        };
        assert_eq!(
            error_chain(&err),
            "capture interrupted after 4096 bytes: read failed: tuner read failed: transfer error"
        );

        let err = CaptureError::from(ConfigError::ZeroSampleRate);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            error_chain(&err),
            "configuration error: sample rate must be greater than zero"
        );
    }
}
