//! A recording played back as if it came from a tunable device.
//!
//! The recording was captured at a fixed center frequency. When the channel
//! manager retunes, [`ReplayShifter`] moves the recorded spectrum so that
//! the requested frequency sits at the center, just as a real tuner would.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use num_complex::Complex;
use sdrddc::dsp::oscillator::ComplexOscillator;
use sdrddc::error::{Error, Result};
use sdrddc::tuner::frequency::Tunable;

pub struct ReplayTuner {
    recording_center: u64,
    sample_rate: u32,
    tuned: Arc<AtomicU64>,
}

impl ReplayTuner {
    pub fn new(recording_center: u64, sample_rate: u32) -> Self {
        Self {
            recording_center,
            sample_rate,
            tuned: Arc::new(AtomicU64::new(recording_center)),
        }
    }

    /// Shifter following every retune of this tuner
    pub fn shifter(&self) -> ReplayShifter {
        ReplayShifter {
            recording_center: self.recording_center,
            tuned: Arc::clone(&self.tuned),
            oscillator: ComplexOscillator::new(0.0, self.sample_rate as f64),
        }
    }
}

impl Tunable for ReplayTuner {
    fn tuned_frequency(&self) -> Result<u64> {
        Ok(self.tuned.load(Ordering::Relaxed))
    }

    fn set_tuned_frequency(&mut self, frequency: u64) -> Result<()> {
        let half = self.sample_rate as u64 / 2;
        if frequency.abs_diff(self.recording_center) > half {
            return Err(Error::tuner(format!(
                "{frequency} Hz is outside of the recorded band {} ± {half} Hz",
                self.recording_center
            )));
        }
        self.tuned.store(frequency, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> Result<u32> {
        Ok(self.sample_rate)
    }

    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate != self.sample_rate {
            return Err(Error::tuner(format!(
                "recording sample rate is fixed at {} Hz",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

pub struct ReplayShifter {
    recording_center: u64,
    tuned: Arc<AtomicU64>,
    oscillator: ComplexOscillator,
}

impl ReplayShifter {
    /// Re-center recorded samples on the currently tuned frequency
    pub fn shift(&mut self, samples: &mut [Complex<f32>]) {
        let tuned = self.tuned.load(Ordering::Relaxed);
        let offset = self.recording_center as f64 - tuned as f64;
        if offset != self.oscillator.frequency() {
            self.oscillator.set_frequency(offset);
        }
        if offset != 0.0 {
            self.oscillator.mix_in_place(samples);
        }
    }
}
