//! Tuner backed by the `rtl_sdr` command-line tool
//!
//! `rtl_sdr -d <index> -f <freq> -s <rate> -g <gain> -` streams raw u8 I/Q
//! to stdout; we read that pipe in fixed-size chunks. Opening a device runs
//! the tool once with `-n 1` to check the dongle is actually there.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::{Tuner, TunerDriver, TunerError};

/// Opens tuners by running the `rtl_sdr` tool
pub struct ProcessDriver {
    rtl_sdr_path: PathBuf,
}

impl ProcessDriver {
    pub fn new(rtl_sdr_path: impl Into<PathBuf>) -> Self {
        Self {
            rtl_sdr_path: rtl_sdr_path.into(),
        }
    }
}

impl TunerDriver for ProcessDriver {
    type Tuner = ProcessTuner;

    fn open(&self, index: u32) -> Result<ProcessTuner, TunerError> {
        let probe = Command::new(&self.rtl_sdr_path)
            .arg("-d")
            .arg(index.to_string())
            .args(["-n", "1", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TunerError::Open {
                index,
                reason: format!("cannot run {}: {}", self.rtl_sdr_path.display(), e),
            })?;

        let stderr = String::from_utf8_lossy(&probe.stderr);
        if !probe.status.success() {
            let reason = stderr
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .last()
                .map(str::to_string)
                .unwrap_or_else(|| format!("rtl_sdr exited with {}", probe.status));
            return Err(TunerError::Open { index, reason });
        }

        match device_name(&stderr) {
            Some(name) => info!("Opened RTL-SDR device {}: {}", index, name),
            None => info!("Opened RTL-SDR device {}", index),
        }

        Ok(ProcessTuner::new(&self.rtl_sdr_path, index))
    }
}

/// Extract the product name from a line like "Using device 0: Generic RTL2832U"
fn device_name(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("Using device"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, name)| sanitize_string(name))
        .filter(|name| !name.is_empty())
}

/// Keep printable ASCII only
fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// A tuner streaming through a child `rtl_sdr` process.
///
/// Parameters are recorded by the setters and take effect when
/// [`Tuner::reset_buffer`] (re)starts the child.
pub struct ProcessTuner {
    rtl_sdr_path: PathBuf,
    device_index: u32,
    sample_rate: Option<u32>,
    center_freq: Option<u32>,
    gain_tenths_db: Option<i32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_thread: Option<JoinHandle<()>>,
}

impl ProcessTuner {
    fn new(rtl_sdr_path: &Path, device_index: u32) -> Self {
        Self {
            rtl_sdr_path: rtl_sdr_path.to_path_buf(),
            device_index,
            sample_rate: None,
            center_freq: None,
            gain_tenths_db: None,
            child: None,
            stdout: None,
            stderr_thread: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.rtl_sdr_path);
        cmd.arg("-d").arg(self.device_index.to_string());
        if let Some(freq) = self.center_freq {
            cmd.arg("-f").arg(freq.to_string());
        }
        if let Some(rate) = self.sample_rate {
            cmd.arg("-s").arg(rate.to_string());
        }
        if let Some(gain) = self.gain_tenths_db {
            cmd.arg("-g").arg(format!("{:.1}", gain as f32 / 10.0));
        }
        // "-" = samples to stdout
        cmd.arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// `rtl_sdr -g 0` switches the tuner to automatic gain
    fn selects_auto_gain(&self) -> bool {
        self.gain_tenths_db == Some(0)
    }

    fn stop(&mut self) -> Result<(), TunerError> {
        self.stdout = None;
        let result = match self.child.take() {
            Some(mut child) => {
                // The child may already have exited on its own
                let _ = child.kill();
                child.wait().map(|status| debug!("rtl_sdr exited: {}", status))
            }
            None => Ok(()),
        };
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        result.map_err(TunerError::from)
    }
}

impl Tuner for ProcessTuner {
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), TunerError> {
        self.sample_rate = Some(sample_rate);
        Ok(())
    }

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), TunerError> {
        self.center_freq = Some(freq_hz);
        Ok(())
    }

    fn set_manual_gain(&mut self, tenths_db: i32) -> Result<(), TunerError> {
        self.gain_tenths_db = Some(tenths_db);
        if self.selects_auto_gain() {
            warn!("rtl_sdr treats gain 0 as automatic gain; recording with AGC enabled");
        }
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<(), TunerError> {
        self.stop()?;

        let mut cmd = self.command();
        debug!("Executing: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| TunerError::Open {
            index: self.device_index,
            reason: format!("cannot start {}: {}", self.rtl_sdr_path.display(), e),
        })?;

        self.stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.child = Some(child);

        if let Some(stderr) = stderr {
            let handle = thread::Builder::new()
                .name("rtl_sdr-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!("[rtl_sdr] {}", line);
                        }
                    }
                })?;
            self.stderr_thread = Some(handle);
        }

        if self.stdout.is_none() {
            return Err(TunerError::Device("rtl_sdr stdout was not captured".to_string()));
        }
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TunerError> {
        let stdout = self.stdout.as_mut().ok_or(TunerError::NotStreaming)?;

        // Pipe reads come back short; fill the whole chunk unless the stream ends
        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TunerError::Read(e.to_string())),
            }
        }

        if filled == 0 {
            return Err(TunerError::EndOfStream);
        }
        Ok(filled)
    }

    fn close(&mut self) -> Result<(), TunerError> {
        self.stop()
    }
}

impl Drop for ProcessTuner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop rtl_sdr: {}", e);
        }
    }
}
