//! IQ Recorder - long-duration RTL-SDR raw IQ capture
//!
//! Records interleaved u8 I/Q samples from an RTL-SDR dongle for a fixed
//! duration into a headerless `.iq` file, with a `.iq.txt` metadata sidecar.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use iq_recorder::config::{Args, Backend};
use iq_recorder::tuner::process::ProcessDriver;
use iq_recorder::tuner::sim::SimDriver;
use iq_recorder::{run_capture, CaptureConfig, CaptureError, CaptureReport};

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version go to stdout and are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if let Err(e) = init_logging() {
        eprintln!("Warning: {:#}", e);
    }

    let result = run(&args);
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    ExitCode::from(exit_code(&result))
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("iq_recorder=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize logging")
}

fn run(args: &Args) -> Result<CaptureReport> {
    let config = CaptureConfig::try_from(args).map_err(CaptureError::from)?;

    info!("===========================================");
    info!("   IQ Recorder - RTL-SDR raw capture");
    info!("===========================================");
    info!("Configuration:");
    info!("  Backend: {:?}", args.backend);
    info!("  Device index: {}", config.device_index);
    info!("  Duration: {} s", config.duration_seconds);
    info!("  Output directory: {}", config.output_dir);
    info!("  Name prefix: {}", config.name_prefix);

    let started_at = Local::now().fixed_offset();

    let report = match args.backend {
        Backend::Process => {
            let driver = ProcessDriver::new(&args.rtl_sdr_path);
            run_capture(&config, &driver, started_at)
        }
        Backend::Sim => run_capture(&config, &SimDriver::new().realtime(true), started_at),
        Backend::Native => run_native(&config, started_at),
    }
    .context("Capture failed")?;

    println!("Done. Wrote {:.2} MiB", report.mib_written());
    info!(
        "{} {} of {} bytes in {} chunks",
        if report.is_complete() { "Captured" } else { "Kept partial capture:" },
        report.bytes_written,
        report.target_bytes,
        report.chunks
    );
    info!("Capture file: {}", report.filename);
    info!("Metadata: {}", report.metadata_path);
    Ok(report)
}

#[cfg(feature = "rtlsdr")]
fn run_native(
    config: &CaptureConfig,
    started_at: chrono::DateTime<chrono::FixedOffset>,
) -> Result<CaptureReport, CaptureError> {
    run_capture(config, &iq_recorder::tuner::native::NativeDriver, started_at)
}

#[cfg(not(feature = "rtlsdr"))]
fn run_native(
    _config: &CaptureConfig,
    _started_at: chrono::DateTime<chrono::FixedOffset>,
) -> Result<CaptureReport, CaptureError> {
    Err(iq_recorder::ConfigError::BackendUnavailable("native").into())
}

/// 0 on success and on an interrupted stream, 1 for anything that stopped
/// the capture before streaming began
fn exit_code(result: &Result<CaptureReport>) -> u8 {
    match result {
        Ok(report) => report.exit_code(),
        Err(e) => e
            .downcast_ref::<CaptureError>()
            .map_or(1, CaptureError::exit_code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iq_recorder::tuner::TunerError;
    use iq_recorder::ConfigError;

    fn report(interruption: Option<CaptureError>) -> CaptureReport {
        CaptureReport {
            filename: "/tmp/x.iq".to_string(),
            metadata_path: "/tmp/x.iq.txt".to_string(),
            target_bytes: 100,
            bytes_written: 100,
            chunks: 1,
            interruption,
        }
    }

    #[test]
    fn test_exit_code_success() {
        assert_eq!(exit_code(&Ok(report(None))), 0);
    }

    #[test]
    fn test_exit_code_interrupted_stream() {
        let interrupted = CaptureError::StreamInterrupted {
            bytes_written: 100,
            fault: TunerError::EndOfStream.into(),
        };
        assert_eq!(exit_code(&Ok(report(Some(interrupted)))), 0);
    }

    #[test]
    fn test_exit_code_failures() {
        let device = anyhow::Error::from(CaptureError::DeviceUnavailable {
            index: 0,
            source: TunerError::Open {
                index: 0,
                reason: "no device".to_string(),
            },
        })
        .context("Capture failed");
        assert_eq!(exit_code(&Err(device)), 1);

        let config = anyhow::Error::from(CaptureError::from(ConfigError::ZeroSampleRate));
        assert_eq!(exit_code(&Err(config)), 1);

        assert_eq!(exit_code(&Err(anyhow::anyhow!("anything else"))), 1);
    }

    #[test]
    fn test_run_rejects_invalid_config() {
        let args = Args::try_parse_from(["iq-recorder", "-s", "0"]).unwrap();
        let result = run(&args);
        assert_eq!(exit_code(&result), 1);
        assert!(matches!(
            result.unwrap_err().downcast_ref::<CaptureError>(),
            Some(CaptureError::Config(ConfigError::ZeroSampleRate))
        ));
    }

    #[test]
    fn test_run_with_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().to_string_lossy().into_owned();
        let args = Args::try_parse_from([
            "iq-recorder",
            "-t",
            "1",
            "-o",
            output_dir.as_str(),
            "--rtl_sdr_path",
            "/nonexistent/rtl_sdr",
        ])
        .unwrap();

        assert_eq!(exit_code(&run(&args)), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = Args::try_parse_from(["iq-recorder", "--bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }
}
