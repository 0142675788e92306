//! Simulated tuner
//!
//! Produces a clean carrier as interleaved u8 I/Q so the recorder can be
//! dry-run without a dongle, and lets tests inject open and read failures.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Tuner, TunerDriver, TunerError, TunerSettings};

/// Samples per carrier revolution
const CARRIER_PERIOD: u32 = 64;
const CARRIER_AMPLITUDE: f32 = 100.0;

/// Counters shared between a driver and the tuners it opened
#[derive(Debug, Default)]
pub struct SimStats {
    pub opens: AtomicU64,
    pub reads: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub resets: AtomicU64,
    pub closed: AtomicBool,
}

/// Opens [`SimTuner`]s
#[derive(Debug, Clone)]
pub struct SimDriver {
    chunk_len: Option<usize>,
    fail_open: bool,
    fail_after_reads: Option<u64>,
    realtime: bool,
    stats: Arc<SimStats>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDriver {
    pub fn new() -> Self {
        Self {
            chunk_len: None,
            fail_open: false,
            fail_after_reads: None,
            realtime: false,
            stats: Arc::new(SimStats::default()),
        }
    }

    /// Deliver at most `len` bytes per read instead of the whole buffer
    pub fn with_chunk_len(mut self, len: usize) -> Self {
        self.chunk_len = Some(len);
        self
    }

    /// Every `open` fails as if no dongle were plugged in
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Reads succeed `reads` times, then fail
    pub fn failing_after(mut self, reads: u64) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    /// Sleep so that samples arrive at the configured sample rate
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn stats(&self) -> &Arc<SimStats> {
        &self.stats
    }
}

impl TunerDriver for SimDriver {
    type Tuner = SimTuner;

    fn open(&self, index: u32) -> Result<SimTuner, TunerError> {
        if self.fail_open {
            return Err(TunerError::Open {
                index,
                reason: "no simulated device present".to_string(),
            });
        }
        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        Ok(SimTuner {
            settings: TunerSettings {
                sample_rate: 0,
                center_freq: 0,
                gain_tenths_db: 0,
            },
            streaming: false,
            phase: 0,
            reads: 0,
            chunk_len: self.chunk_len,
            fail_after_reads: self.fail_after_reads,
            realtime: self.realtime,
            stats: self.stats.clone(),
        })
    }
}

pub struct SimTuner {
    settings: TunerSettings,
    streaming: bool,
    phase: u32,
    reads: u64,
    chunk_len: Option<usize>,
    fail_after_reads: Option<u64>,
    realtime: bool,
    stats: Arc<SimStats>,
}

impl SimTuner {
    pub fn settings(&self) -> TunerSettings {
        self.settings
    }

    fn fill(&mut self, buf: &mut [u8]) {
        for pair in buf.chunks_exact_mut(2) {
            let angle = TAU * self.phase as f32 / CARRIER_PERIOD as f32;
            pair[0] = (127.5 + CARRIER_AMPLITUDE * angle.cos()) as u8;
            pair[1] = (127.5 + CARRIER_AMPLITUDE * angle.sin()) as u8;
            self.phase = (self.phase + 1) % CARRIER_PERIOD;
        }
    }
}

impl Tuner for SimTuner {
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), TunerError> {
        if sample_rate == 0 {
            return Err(TunerError::Rejected {
                parameter: "sample rate",
                reason: "must be non-zero".to_string(),
            });
        }
        self.settings.sample_rate = sample_rate;
        Ok(())
    }

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), TunerError> {
        self.settings.center_freq = freq_hz;
        Ok(())
    }

    fn set_manual_gain(&mut self, tenths_db: i32) -> Result<(), TunerError> {
        self.settings.gain_tenths_db = tenths_db;
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<(), TunerError> {
        self.stats.resets.fetch_add(1, Ordering::Relaxed);
        self.streaming = true;
        self.phase = 0;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TunerError> {
        if !self.streaming {
            return Err(TunerError::NotStreaming);
        }
        if self.fail_after_reads.is_some_and(|limit| self.reads >= limit) {
            return Err(TunerError::Read("simulated USB transfer error".to_string()));
        }

        // Whole I/Q pairs only
        let len = self.chunk_len.map_or(buf.len(), |c| c.min(buf.len())) & !1;
        if len == 0 {
            return Err(TunerError::Read("buffer too small for one sample".to_string()));
        }
        self.fill(&mut buf[..len]);

        if self.realtime && self.settings.sample_rate > 0 {
            let samples = (len / 2) as f64;
            std::thread::sleep(Duration::from_secs_f64(
                samples / self.settings.sample_rate as f64,
            ));
        }

        self.reads += 1;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_delivered
            .fetch_add(len as u64, Ordering::Relaxed);
        Ok(len)
    }

    fn close(&mut self) -> Result<(), TunerError> {
        self.streaming = false;
        self.stats.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
