//! Digital Signal Processing (DSP) module.
//!
//! This module provides the DSP building blocks of a digital drop channel:
//! frequency translation, prime-factor CIC decimation with a cleanup low-pass
//! filter, and carrier/symbol recovery for phase-shift-keyed channels.
//!
//! # Modules
//! - `oscillator`: Complex local oscillator and mixer.
//! - `filters`: Low-pass filter design, streaming FIR filter and taps cache.
//! - `cic`: Prime-factor CIC decimator.
//! - `interpolator`: Fractional-delay interpolation.
//! - `costas`: Costas carrier recovery loop.
//! - `timing`: Gardner and early-late timing error detectors.
//! - `psk`: Symbol recovery combining the Costas loop and a timing detector.
//! - `buffer`: Fixed-size block assembly and bounded drop-oldest queues.
//!
//! # Traits
//! - [`DspBlock`]: A trait representing a generic DSP processing block that
//!   operates on slices of complex samples.
//! - [`Sample`]: The arithmetic needed by blocks that work on both real and
//!   complex samples.

use std::ops::{Add, Mul, Sub};

use num_complex::Complex;

pub mod buffer;
pub mod cic;
pub mod costas;
pub mod filters;
pub mod interpolator;
pub mod oscillator;
pub mod psk;
pub mod timing;

pub trait DspBlock {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>>;
}

/// Sample types accepted by the generic filters (`f32` and `Complex<f32>`).
pub trait Sample:
    Copy
    + Default
    + Send
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f32, Output = Self>
{
}

impl<T> Sample for T where
    T: Copy
        + Default
        + Send
        + 'static
        + Add<Output = T>
        + Sub<Output = T>
        + Mul<f32, Output = T>
{
}
