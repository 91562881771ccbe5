//! Digital filter implementations.
//!
//! This module provides the low-pass filtering used after CIC decimation:
//! - [`design_low_pass`]: Kaiser-windowed sinc low-pass design from pass/stop
//!   band edges and ripple
//! - [`FirFilter`]: streaming FIR filter keeping its history across blocks
//! - [`FilterCache`]: explicit cache of designed taps, keyed by design
//!   parameters
//!
//! # Example
//!
//! ```
//! use sdrddc::dsp::filters::{FirFilter, LowPassSpec, design_low_pass};
//!
//! // 12.5 kHz channel at a 48 kHz output rate
//! let spec = LowPassSpec::new(48_000.0, 6_250.0, 7_750.0);
//! let taps = design_low_pass(&spec).unwrap();
//! let mut filter: FirFilter<f32> = FirFilter::new(taps.into());
//!
//! let mut block = vec![0.5f32; 100];
//! filter.filter_in_place(&mut block);
//! assert_eq!(block.len(), 100);
//! ```

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::dsp::Sample;
use crate::error::{Error, Result};

/// Pass and stop band ripple used by the cleanup filters
pub const DEFAULT_RIPPLE: f64 = 0.01;

/// Longest filter the designer agrees to produce
pub const MAX_FILTER_TAPS: usize = 4095;

/// Low-pass filter requirements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassSpec {
    /// Sample rate the filter runs at, in Hz
    pub sample_rate: f64,
    /// Upper edge of the pass band, in Hz
    pub pass_frequency: f64,
    /// Lower edge of the stop band, in Hz
    pub stop_frequency: f64,
    /// Maximum pass band ripple and stop band level (linear)
    pub ripple: f64,
}

impl LowPassSpec {
    pub fn new(sample_rate: f64, pass_frequency: f64, stop_frequency: f64) -> Self {
        Self {
            sample_rate,
            pass_frequency,
            stop_frequency,
            ripple: DEFAULT_RIPPLE,
        }
    }

    pub fn with_ripple(mut self, ripple: f64) -> Self {
        self.ripple = ripple;
        self
    }

    fn validate(&self) -> Result<()> {
        let nyquist = self.sample_rate / 2.0;
        if !(self.sample_rate > 0.0) {
            return Err(Error::filter_design(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.pass_frequency > 0.0) {
            return Err(Error::filter_design(format!(
                "pass frequency must be positive, got {}",
                self.pass_frequency
            )));
        }
        if !(self.stop_frequency > self.pass_frequency) {
            return Err(Error::filter_design(format!(
                "stop frequency {} must be above pass frequency {}",
                self.stop_frequency, self.pass_frequency
            )));
        }
        if self.stop_frequency > nyquist {
            return Err(Error::filter_design(format!(
                "stop frequency {} exceeds the Nyquist frequency {}",
                self.stop_frequency, nyquist
            )));
        }
        if !(self.ripple > 0.0 && self.ripple < 1.0) {
            return Err(Error::filter_design(format!(
                "ripple must be in (0, 1), got {}",
                self.ripple
            )));
        }
        Ok(())
    }

    fn key(&self) -> FilterKey {
        FilterKey {
            sample_rate: self.sample_rate.to_bits(),
            pass_frequency: self.pass_frequency.to_bits(),
            stop_frequency: self.stop_frequency.to_bits(),
            ripple: self.ripple.to_bits(),
        }
    }
}

/// Design a linear-phase low-pass filter with a Kaiser-windowed sinc.
///
/// The tap count and window shape follow Kaiser's estimates for the
/// attenuation implied by `ripple` and the transition width between the pass
/// and stop band edges. The cutoff sits in the middle of the transition band
/// and the taps are normalized to unity DC gain. The tap count is always odd.
///
/// # Errors
///
/// Returns [`Error::FilterDesign`] when the band edges are not ordered,
/// the stop band lies beyond Nyquist, or the filter would need more than
/// [`MAX_FILTER_TAPS`] taps.
pub fn design_low_pass(spec: &LowPassSpec) -> Result<Vec<f32>> {
    spec.validate()?;

    let attenuation = -20.0 * spec.ripple.log10();
    let beta = kaiser_beta(attenuation);
    let transition = 2.0 * PI * (spec.stop_frequency - spec.pass_frequency) / spec.sample_rate;
    let estimate = ((attenuation - 7.95) / (2.285 * transition)).ceil().max(2.0) + 1.0;
    if !estimate.is_finite() || estimate > MAX_FILTER_TAPS as f64 {
        return Err(Error::filter_design(format!(
            "{:.0} Hz transition band at {} Hz needs more than {} taps",
            spec.stop_frequency - spec.pass_frequency,
            spec.sample_rate,
            MAX_FILTER_TAPS
        )));
    }
    let mut taps = estimate as usize;
    if taps % 2 == 0 {
        taps += 1;
    }

    let cutoff = (spec.pass_frequency + spec.stop_frequency) / 2.0 / spec.sample_rate;
    let mid = (taps / 2) as f64;
    let denominator = bessel_i0(beta);
    let mut fir: Vec<f64> = (0..taps)
        .map(|n| {
            let x = n as f64 - mid;
            let sinc = if x == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * x).sin() / (PI * x)
            };
            let ratio = x / mid;
            let window = bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / denominator;
            sinc * window
        })
        .collect();

    let norm: f64 = fir.iter().sum();
    for v in fir.iter_mut() {
        *v /= norm;
    }
    Ok(fir.into_iter().map(|v| v as f32).collect())
}

fn kaiser_beta(attenuation: f64) -> f64 {
    if attenuation > 50.0 {
        0.1102 * (attenuation - 8.7)
    } else if attenuation >= 21.0 {
        0.5842 * (attenuation - 21.0).powf(0.4) + 0.07886 * (attenuation - 21.0)
    } else {
        0.0
    }
}

/// Zeroth order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..64 {
        term *= half / k as f64;
        let squared = term * term;
        sum += squared;
        if squared < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Streaming FIR filter with real taps.
///
/// The history is a circular buffer written twice (at `pointer` and
/// `pointer + len`) so every output is a single contiguous dot product.
/// Filter state persists across calls, so a stream may be fed in blocks of
/// any size.
#[derive(Debug, Clone)]
pub struct FirFilter<T: Sample> {
    /// Taps stored in reverse order (oldest sample first)
    reversed: Vec<f32>,
    /// Doubled circular history
    history: Vec<T>,
    pointer: usize,
}

impl<T: Sample> FirFilter<T> {
    pub fn new(taps: Arc<[f32]>) -> Self {
        let reversed: Vec<f32> = taps.iter().rev().copied().collect();
        let len = reversed.len().max(1);
        Self {
            reversed,
            history: vec![T::default(); 2 * len],
            pointer: 0,
        }
    }

    /// Number of filter taps
    pub fn taps(&self) -> usize {
        self.reversed.len()
    }

    /// Filter one sample
    pub fn filter(&mut self, sample: T) -> T {
        let len = self.reversed.len();
        if len == 0 {
            return sample;
        }
        self.history[self.pointer] = sample;
        self.history[self.pointer + len] = sample;
        self.pointer = (self.pointer + 1) % len;

        let window = &self.history[self.pointer..self.pointer + len];
        window
            .iter()
            .zip(self.reversed.iter())
            .fold(T::default(), |acc, (&s, &h)| acc + s * h)
    }

    /// Filter a block of samples in place
    pub fn filter_in_place(&mut self, samples: &mut [T]) {
        for s in samples.iter_mut() {
            *s = self.filter(*s);
        }
    }

    /// Clear the filter history
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = T::default());
        self.pointer = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FilterKey {
    sample_rate: u64,
    pass_frequency: u64,
    stop_frequency: u64,
    ripple: u64,
}

/// Cache of designed low-pass taps.
///
/// The cache has no eviction: it lives as long as its owner (typically one
/// decimator factory per tuner). Failed designs are never cached.
#[derive(Debug, Default)]
pub struct FilterCache {
    designs: Mutex<HashMap<FilterKey, Arc<[f32]>>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taps for `spec`, designing them on first use
    pub fn low_pass(&self, spec: &LowPassSpec) -> Result<Arc<[f32]>> {
        let key = spec.key();
        let mut designs = self.designs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(taps) = designs.get(&key) {
            debug!(
                sample_rate = spec.sample_rate,
                pass = spec.pass_frequency,
                stop = spec.stop_frequency,
                "low-pass filter cache hit"
            );
            return Ok(Arc::clone(taps));
        }
        let taps: Arc<[f32]> = design_low_pass(spec)?.into();
        debug!(
            sample_rate = spec.sample_rate,
            pass = spec.pass_frequency,
            stop = spec.stop_frequency,
            taps = taps.len(),
            "designed low-pass filter"
        );
        designs.insert(key, Arc::clone(&taps));
        Ok(taps)
    }

    /// Number of cached designs
    pub fn len(&self) -> usize {
        self.designs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
