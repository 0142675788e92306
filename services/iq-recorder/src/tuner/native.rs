//! Direct USB access to RTL2832U dongles through `rtl-sdr-rs`
//! (requires the `rtlsdr` feature)

use rtl_sdr_rs::{RtlSdr, TunerGain};
use tracing::debug;

use super::{Tuner, TunerDriver, TunerError};

pub struct NativeDriver;

impl TunerDriver for NativeDriver {
    type Tuner = NativeTuner;

    fn open(&self, index: u32) -> Result<NativeTuner, TunerError> {
        let dev = RtlSdr::open_with_index(index as usize).map_err(|e| TunerError::Open {
            index,
            reason: e.to_string(),
        })?;
        debug!("Opened RTL-SDR device {} over USB", index);
        Ok(NativeTuner { dev, index })
    }
}

pub struct NativeTuner {
    dev: RtlSdr,
    index: u32,
}

fn rejected(parameter: &'static str) -> impl FnOnce(rtl_sdr_rs::error::RtlsdrError) -> TunerError {
    move |e| TunerError::Rejected {
        parameter,
        reason: e.to_string(),
    }
}

impl Tuner for NativeTuner {
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), TunerError> {
        self.dev
            .set_sample_rate(sample_rate)
            .map_err(rejected("sample rate"))
    }

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), TunerError> {
        self.dev
            .set_center_freq(freq_hz)
            .map_err(rejected("center frequency"))
    }

    fn set_manual_gain(&mut self, tenths_db: i32) -> Result<(), TunerError> {
        self.dev
            .set_tuner_gain(TunerGain::Manual(tenths_db))
            .map_err(rejected("gain"))
    }

    fn reset_buffer(&mut self) -> Result<(), TunerError> {
        self.dev.reset_buffer().map_err(|e| TunerError::Open {
            index: self.index,
            reason: format!("buffer reset failed: {}", e),
        })
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TunerError> {
        match self.dev.read_sync(buf) {
            Ok(0) => Err(TunerError::EndOfStream),
            Ok(n) => Ok(n),
            Err(e) => Err(TunerError::Read(e.to_string())),
        }
    }

    fn close(&mut self) -> Result<(), TunerError> {
        self.dev
            .close()
            .map_err(|e| TunerError::Device(format!("close failed: {}", e)))
    }
}
