//! A complex local oscillator used to translate a channel toward baseband.
//!
//! The `ComplexOscillator` keeps a unit phasor (`phasor`) and the per-sample
//! rotation (`step`) determined by the frequency/sample-rate ratio. Mixing a
//! block multiplies every sample by the current phasor and advances it, so
//! phase stays continuous across blocks and across frequency changes. The
//! phasor is renormalized after each block to stop magnitude drift.
//!
//! # Example
//! ```
//! use num_complex::Complex;
//! use sdrddc::dsp::oscillator::ComplexOscillator;
//!
//! let mut lo = ComplexOscillator::new(-12_500.0, 2_400_000.0);
//! let mut block = vec![Complex::new(1.0, 0.0); 4];
//! lo.mix_in_place(&mut block);
//! ```

use std::f64::consts::PI;

use num_complex::Complex;

use crate::dsp::DspBlock;

#[derive(Debug, Clone)]
pub struct ComplexOscillator {
    /// Oscillator frequency in Hz (negative values rotate clockwise)
    frequency: f64,
    /// Sample rate in Hz
    sample_rate: f64,
    /// Current complex phase
    phasor: Complex<f64>,
    /// Per-sample rotation multiplier
    step: Complex<f64>,
}

impl ComplexOscillator {
    /// Create an oscillator at `frequency` Hz for the given sample rate
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        let mut oscillator = Self {
            frequency,
            sample_rate,
            phasor: Complex::new(1.0, 0.0),
            step: Complex::new(1.0, 0.0),
        };
        oscillator.update_step();
        oscillator
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the oscillator frequency without a phase discontinuity
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
        self.update_step();
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.update_step();
    }

    fn update_step(&mut self) {
        let angle = if self.sample_rate > 0.0 {
            2.0 * PI * self.frequency / self.sample_rate
        } else {
            0.0
        };
        self.step = Complex::new(angle.cos(), angle.sin());
    }

    /// Current oscillator output; advances the phase by one sample
    pub fn next_sample(&mut self) -> Complex<f32> {
        let current = self.phasor;
        self.phasor *= self.step;
        Complex::new(current.re as f32, current.im as f32)
    }

    /// Fill `count` oscillator samples
    pub fn generate(&mut self, count: usize) -> Vec<Complex<f32>> {
        let out = (0..count).map(|_| self.next_sample()).collect();
        self.normalize();
        out
    }

    /// Multiply each sample by the oscillator output
    pub fn mix_in_place(&mut self, samples: &mut [Complex<f32>]) {
        for s in samples.iter_mut() {
            *s *= self.next_sample();
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        let norm = self.phasor.norm();
        if norm > 0.0 {
            self.phasor /= norm;
        }
    }
}

impl DspBlock for ComplexOscillator {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut out = data.to_vec();
        self.mix_in_place(&mut out);
        out
    }
}
