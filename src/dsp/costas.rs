//! Costas loop for suppressed-carrier recovery of QPSK signals.
//!
//! The loop keeps a phase estimate (`loop_phase`) and a frequency estimate
//! (`loop_frequency`, radians per sample). Every input sample is derotated
//! by the current phase and the loop advances by its frequency; when a
//! symbol decision is available its phase error steers the loop through a
//! second-order (proportional + integral) filter:
//!
//! ```text
//! frequency += beta * error
//! phase     += frequency + alpha * error
//! ```
//!
//! The gains come from the loop bandwidth `B` and damping `ζ`:
//! `alpha = 4ζB / (1 + 2ζB + B²)`, `beta = 4B² / (1 + 2ζB + B²)`.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex;
//! use sdrddc::dsp::costas::{CostasConfig, CostasLoop};
//!
//! let mut costas = CostasLoop::new(&CostasConfig::new(48_000.0));
//! let symbol = costas.derotate(Complex::new(0.0, 1.0));
//! let error = costas.phase_error(symbol);
//! costas.advance(error);
//! ```

use std::f32::consts::{PI, SQRT_2};

use num_complex::Complex;

const TWO_PI: f32 = 2.0 * PI;

/// Costas loop parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostasConfig {
    /// Rate at which `advance` is called, in Hz
    pub sample_rate: f64,
    /// Normalized loop bandwidth (radians)
    pub loop_bandwidth: f32,
    /// Damping factor
    pub damping: f32,
    /// Largest carrier offset the loop may track, in Hz
    pub maximum_frequency: f64,
    /// Constellation rotation applied on top of the loop phase (radians).
    /// `π/4` maps a diagonal QPSK constellation onto the axes.
    pub phase_offset: f32,
}

impl CostasConfig {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            loop_bandwidth: TWO_PI / 400.0,
            damping: SQRT_2 / 2.0,
            maximum_frequency: 1_200.0,
            phase_offset: 0.0,
        }
    }
}

/// Proportional (alpha) and integral (beta) gains of a second-order loop
pub fn loop_gains(bandwidth: f32, damping: f32) -> (f32, f32) {
    let denominator = 1.0 + 2.0 * damping * bandwidth + bandwidth * bandwidth;
    (
        4.0 * damping * bandwidth / denominator,
        4.0 * bandwidth * bandwidth / denominator,
    )
}

/// Quadrant of the nearest axis point: 0 for +1, 1 for +j, 2 for -1, 3 for -j.
#[inline]
pub fn decide(symbol: Complex<f32>) -> u8 {
    if symbol.re.abs() > symbol.im.abs() {
        if symbol.re > 0.0 { 0 } else { 2 }
    } else if symbol.im > 0.0 {
        1
    } else {
        3
    }
}

/// Replace NaN/infinite values by zero and clamp to `[-1, 1]`.
#[inline]
pub fn sanitize_error(error: f32) -> f32 {
    if error.is_finite() {
        error.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct CostasLoop {
    /// Phase estimate in radians, kept in [-π, π]
    phase: f32,
    /// Frequency estimate in radians per sample
    frequency: f32,
    /// Proportional gain
    alpha: f32,
    /// Integral gain
    beta: f32,
    /// Frequency bound in radians per sample
    maximum: f32,
    phase_offset: f32,
    sample_rate: f64,
}

impl CostasLoop {
    pub fn new(config: &CostasConfig) -> Self {
        let (alpha, beta) = loop_gains(config.loop_bandwidth, config.damping);
        let maximum = if config.sample_rate > 0.0 {
            (2.0 * std::f64::consts::PI * config.maximum_frequency / config.sample_rate) as f32
        } else {
            0.0
        };
        Self {
            phase: 0.0,
            frequency: 0.0,
            alpha,
            beta,
            maximum: maximum.abs(),
            phase_offset: config.phase_offset,
            sample_rate: config.sample_rate,
        }
    }

    pub fn loop_phase(&self) -> f32 {
        self.phase
    }

    /// Frequency estimate in radians per sample
    pub fn loop_frequency(&self) -> f32 {
        self.frequency
    }

    /// Frequency estimate in Hz
    pub fn loop_frequency_hz(&self) -> f64 {
        self.frequency as f64 * self.sample_rate / (2.0 * std::f64::consts::PI)
    }

    /// Frequency bound in radians per sample
    pub fn maximum_frequency(&self) -> f32 {
        self.maximum
    }

    pub fn gains(&self) -> (f32, f32) {
        (self.alpha, self.beta)
    }

    /// Remove the estimated carrier from `sample`
    #[inline]
    pub fn derotate(&self, sample: Complex<f32>) -> Complex<f32> {
        sample * Complex::from_polar(1.0, -(self.phase + self.phase_offset))
    }

    /// Phase error of a derotated symbol relative to its nearest axis point.
    ///
    /// The symbol is normalized first; the error is the component orthogonal
    /// to the decided axis, positive when the symbol leads it.
    pub fn phase_error(&self, symbol: Complex<f32>) -> f32 {
        let magnitude = symbol.norm();
        if !(magnitude > f32::EPSILON) || !magnitude.is_finite() {
            return 0.0;
        }
        let s = symbol / magnitude;
        let error = match decide(s) {
            0 => s.im,
            1 => -s.re,
            2 => -s.im,
            _ => s.re,
        };
        sanitize_error(error)
    }

    /// Advance the loop by one sample; `error` is zero between decisions
    pub fn advance(&mut self, error: f32) {
        let error = sanitize_error(error);
        self.frequency = (self.frequency + self.beta * error).clamp(-self.maximum, self.maximum);
        self.phase += self.frequency + self.alpha * error;
        self.phase = wrap_phase(self.phase);
    }

    /// Apply an external frequency correction (radians per sample).
    ///
    /// Corrections past the frequency bound wrap around to the opposite
    /// bound.
    pub fn correct_frequency(&mut self, correction: f32) {
        if !correction.is_finite() || self.maximum == 0.0 {
            return;
        }
        let mut frequency = self.frequency + correction;
        let span = 2.0 * self.maximum;
        while frequency > self.maximum {
            frequency -= span;
        }
        while frequency < -self.maximum {
            frequency += span;
        }
        self.frequency = frequency;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.frequency = 0.0;
    }
}

fn wrap_phase(mut phase: f32) -> f32 {
    if !phase.is_finite() {
        return 0.0;
    }
    while phase > PI {
        phase -= TWO_PI;
    }
    while phase < -PI {
        phase += TWO_PI;
    }
    phase
}
