//! Prime-factor CIC decimation.
//!
//! A decimation ratio is factored into primes and every prime gets its own
//! decimating stage: one or more non-recursive moving-sum stages (an O(1)
//! circular accumulator) followed by a decimator keeping every Nth sample.
//! The chained output is cleaned up by a low-pass FIR designed for the final
//! channel rate.
//!
//! ```text
//! in ─► [stages p0] ─► ↓p0 ─► [stages p1] ─► ↓p1 ─► ... ─► low-pass ─► out
//! ```
//!
//! # Example
//!
//! ```
//! use num_complex::Complex;
//! use sdrddc::dsp::cic::ComplexCicDecimator;
//!
//! // 2.4 MHz down to 48 kHz (50 = 2 x 5 x 5)
//! let mut cic = ComplexCicDecimator::new(2_400_000.0, 50, 6_250.0, 7_750.0).unwrap();
//! assert_eq!(cic.factors(), vec![2, 5, 5]);
//!
//! let out = cic.decimate(&vec![Complex::new(1.0, 0.0); 5_000]);
//! assert_eq!(out.len(), 100);
//! ```

use num_complex::Complex;

use crate::dsp::DspBlock;
use crate::dsp::Sample;
use crate::dsp::filters::{FilterCache, FirFilter, LowPassSpec, design_low_pass};
use crate::error::{Error, Result};

/// Largest decimation ratio supported for complex samples
pub const MAX_COMPLEX_DECIMATION: u32 = 2801;

/// Largest decimation ratio supported for real samples
pub const MAX_REAL_DECIMATION: u32 = 700;

/// Samples that can be decimated, with the size of their prime table.
pub trait CicSample: Sample {
    const MAX_DECIMATION: u32;
}

impl CicSample for f32 {
    const MAX_DECIMATION: u32 = MAX_REAL_DECIMATION;
}

impl CicSample for Complex<f32> {
    const MAX_DECIMATION: u32 = MAX_COMPLEX_DECIMATION;
}

/// Ascending primes up to and including `limit` (sieve of Eratosthenes).
pub fn primes_up_to(limit: u32) -> Vec<u32> {
    let limit = limit as usize;
    if limit < 2 {
        return Vec::new();
    }
    let mut composite = vec![false; limit + 1];
    let mut primes = Vec::new();
    for n in 2..=limit {
        if composite[n] {
            continue;
        }
        primes.push(n as u32);
        let mut multiple = n * n;
        while multiple <= limit {
            composite[multiple] = true;
            multiple += n;
        }
    }
    primes
}

/// Factor `ratio` into ascending primes taken from the table up to `maximum`.
///
/// # Errors
///
/// [`Error::UnsupportedDecimation`] when `ratio` is below 2, above
/// `maximum`, or has a prime factor missing from the table.
pub fn prime_factors(ratio: u32, maximum: u32) -> Result<Vec<u32>> {
    if ratio < 2 {
        return Err(Error::unsupported_decimation(
            ratio,
            "decimation must be at least 2",
        ));
    }
    if ratio > maximum {
        return Err(Error::unsupported_decimation(
            ratio,
            format!("decimation exceeds the maximum of {maximum}"),
        ));
    }

    let mut remainder = ratio;
    let mut factors = Vec::new();
    for prime in primes_up_to(maximum) {
        while remainder % prime == 0 {
            factors.push(prime);
            remainder /= prime;
        }
        if remainder == 1 {
            return Ok(factors);
        }
    }
    Err(Error::unsupported_decimation(
        ratio,
        format!("prime factor {remainder} is not in the supported table"),
    ))
}

/// Non-decimating moving-sum stage of size `factor`.
///
/// Factor 2 is a two-tap average. Larger factors keep a running sum over a
/// circular history of `factor - 1` samples; the gain `1/factor` is corrected
/// by `1/(1 - 1/factor)` so the stage has unity DC gain.
#[derive(Debug, Clone)]
struct Stage<T: Sample> {
    factor: u32,
    history: Vec<T>,
    pointer: usize,
    sum: T,
    gain: f32,
}

impl<T: Sample> Stage<T> {
    fn new(factor: u32) -> Self {
        let f = factor as f32;
        let (size, gain) = if factor == 2 {
            (1, 0.5)
        } else {
            ((factor - 1) as usize, (1.0 / f) * (1.0 / (1.0 - 1.0 / f)))
        };
        Self {
            factor,
            history: vec![T::default(); size],
            pointer: 0,
            sum: T::default(),
            gain,
        }
    }

    fn process(&mut self, samples: &mut [T]) {
        if self.factor == 2 {
            let mut previous = self.history[0];
            for s in samples.iter_mut() {
                let current = *s;
                *s = (previous + current) * 0.5;
                previous = current;
            }
            self.history[0] = previous;
            return;
        }

        let size = self.history.len();
        for s in samples.iter_mut() {
            let current = *s;
            self.sum = self.sum - self.history[self.pointer] + current;
            self.history[self.pointer] = current;
            self.pointer += 1;
            if self.pointer == size {
                self.pointer = 0;
            }
            *s = self.sum * self.gain;
        }
    }
}

/// Cascaded stages for one prime factor, followed by the decimator.
#[derive(Debug, Clone)]
struct DecimatingStage<T: Sample> {
    factor: u32,
    stages: Vec<Stage<T>>,
    /// Position within the current group of `factor` input samples
    phase: u32,
}

impl<T: Sample> DecimatingStage<T> {
    fn new(factor: u32, order: usize) -> Self {
        Self {
            factor,
            stages: (0..order.max(1)).map(|_| Stage::new(factor)).collect(),
            phase: 0,
        }
    }

    fn process(&mut self, samples: &mut Vec<T>) {
        for stage in self.stages.iter_mut() {
            stage.process(samples);
        }
        let mut kept = 0;
        for i in 0..samples.len() {
            if self.phase == 0 {
                samples[kept] = samples[i];
                kept += 1;
            }
            self.phase += 1;
            if self.phase == self.factor {
                self.phase = 0;
            }
        }
        samples.truncate(kept);
    }
}

/// Prime-factor CIC decimator with a low-pass cleanup filter.
#[derive(Debug, Clone)]
pub struct PrimeCicDecimator<T: CicSample> {
    stages: Vec<DecimatingStage<T>>,
    output: FirFilter<T>,
    decimation: u32,
    input_rate: f64,
}

/// Decimator for complex samples (ratios up to 2801)
pub type ComplexCicDecimator = PrimeCicDecimator<Complex<f32>>;

/// Decimator for real samples (ratios up to 700)
pub type RealCicDecimator = PrimeCicDecimator<f32>;

impl<T: CicSample> PrimeCicDecimator<T> {
    /// Build a first-order decimator, designing the cleanup filter directly.
    ///
    /// # Arguments
    ///
    /// * `input_rate` - Input sample rate in Hz
    /// * `decimation` - Integer decimation ratio
    /// * `pass_frequency` - Cleanup filter pass band edge in Hz
    /// * `stop_frequency` - Cleanup filter stop band edge in Hz
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedDecimation`] or [`Error::FilterDesign`].
    pub fn new(
        input_rate: f64,
        decimation: u32,
        pass_frequency: f64,
        stop_frequency: f64,
    ) -> Result<Self> {
        Self::build(input_rate, decimation, 1, pass_frequency, stop_frequency, None)
    }

    fn build(
        input_rate: f64,
        decimation: u32,
        order: usize,
        pass_frequency: f64,
        stop_frequency: f64,
        cache: Option<&FilterCache>,
    ) -> Result<Self> {
        let factors = prime_factors(decimation, T::MAX_DECIMATION)?;
        let spec = LowPassSpec::new(
            input_rate / decimation as f64,
            pass_frequency,
            stop_frequency,
        );
        let taps = match cache {
            Some(cache) => cache.low_pass(&spec)?,
            None => design_low_pass(&spec)?.into(),
        };
        Ok(Self {
            stages: factors
                .iter()
                .map(|&f| DecimatingStage::new(f, order))
                .collect(),
            output: FirFilter::new(taps),
            decimation,
            input_rate,
        })
    }

    /// Decimation ratio
    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    /// Prime factors, in processing order
    pub fn factors(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.factor).collect()
    }

    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    /// Output sample rate: `input_rate / decimation`
    pub fn output_rate(&self) -> f64 {
        self.input_rate / self.decimation as f64
    }

    /// Number of taps in the cleanup filter
    pub fn filter_taps(&self) -> usize {
        self.output.taps()
    }

    /// Decimate `samples` in place; the vector is truncated to the output.
    ///
    /// No allocation happens here: every stage works within the input
    /// buffer.
    pub fn decimate_in_place(&mut self, samples: &mut Vec<T>) {
        for stage in self.stages.iter_mut() {
            stage.process(samples);
        }
        self.output.filter_in_place(samples);
    }

    /// Decimate a block of samples into a new vector
    pub fn decimate(&mut self, samples: &[T]) -> Vec<T> {
        let mut out = samples.to_vec();
        self.decimate_in_place(&mut out);
        out
    }
}

impl DspBlock for ComplexCicDecimator {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        self.decimate(data)
    }
}

/// Builds decimators sharing one cleanup filter cache.
#[derive(Debug, Default)]
pub struct DecimatorFactory {
    cache: FilterCache,
}

impl DecimatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complex decimator with cached cleanup filter taps
    pub fn complex(
        &self,
        input_rate: f64,
        decimation: u32,
        pass_frequency: f64,
        stop_frequency: f64,
    ) -> Result<ComplexCicDecimator> {
        self.build(input_rate, decimation, 1, pass_frequency, stop_frequency)
    }

    /// Real decimator with cached cleanup filter taps
    pub fn real(
        &self,
        input_rate: f64,
        decimation: u32,
        pass_frequency: f64,
        stop_frequency: f64,
    ) -> Result<RealCicDecimator> {
        self.build(input_rate, decimation, 1, pass_frequency, stop_frequency)
    }

    /// Decimator with `order` cascaded stages per prime factor
    pub fn build<T: CicSample>(
        &self,
        input_rate: f64,
        decimation: u32,
        order: usize,
        pass_frequency: f64,
        stop_frequency: f64,
    ) -> Result<PrimeCicDecimator<T>> {
        PrimeCicDecimator::build(
            input_rate,
            decimation,
            order,
            pass_frequency,
            stop_frequency,
            Some(&self.cache),
        )
    }

    pub fn cache(&self) -> &FilterCache {
        &self.cache
    }
}
