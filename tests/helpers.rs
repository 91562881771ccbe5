//! Test helper utilities: synthetic I/Q signals and a stand-in tuner
#![allow(dead_code)]

use std::f32::consts::{FRAC_PI_2, PI};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sdrddc::IqFormat;
use sdrddc::dsp::costas::decide;
use sdrddc::tuner::frequency::Tunable;

/// Unit-amplitude complex tone
pub fn tone(frequency: f64, sample_rate: f64, num_samples: usize) -> Vec<Complex<f32>> {
    let step = TAU * frequency / sample_rate;
    (0..num_samples)
        .map(|n| {
            let phase = (step * n as f64) % TAU;
            Complex::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}

/// Encode samples in `format`, saturating at full scale
pub fn encode(format: IqFormat, samples: &[Complex<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for s in samples {
        for v in [s.re, s.im] {
            match format {
                IqFormat::Cu8 => out.push((v * 128.0 + 127.5).round().clamp(0.0, 255.0) as u8),
                IqFormat::Cs8 => out.push((v * 128.0).round().clamp(-128.0, 127.0) as i8 as u8),
                IqFormat::Cs16 => out.extend_from_slice(
                    &((v * 32768.0).round().clamp(-32768.0, 32767.0) as i16).to_le_bytes(),
                ),
                IqFormat::Cf32 => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
    }
    out
}

/// Device that accepts every frequency; the tuned value is observable
/// through a shared handle.
pub struct FixedTunable {
    frequency: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FixedTunable {
    pub fn new(sample_rate: u32) -> (Self, Arc<AtomicU64>) {
        let frequency = Arc::new(AtomicU64::new(0));
        (
            Self {
                frequency: Arc::clone(&frequency),
                sample_rate,
            },
            frequency,
        )
    }
}

impl Tunable for FixedTunable {
    fn tuned_frequency(&self) -> sdrddc::Result<u64> {
        Ok(self.frequency.load(Ordering::SeqCst))
    }

    fn set_tuned_frequency(&mut self, frequency: u64) -> sdrddc::Result<()> {
        self.frequency.store(frequency, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> sdrddc::Result<u32> {
        Ok(self.sample_rate)
    }

    fn set_sample_rate(&mut self, sample_rate: u32) -> sdrddc::Result<()> {
        self.sample_rate = sample_rate;
        Ok(())
    }
}

/// Raised-cosine pulse at `t` symbol periods from its center
pub fn raised_cosine(t: f32, rolloff: f32) -> f32 {
    let sinc = |x: f32| if x.abs() < 1e-6 { 1.0 } else { (PI * x).sin() / (PI * x) };
    let denominator = 1.0 - (2.0 * rolloff * t).powi(2);
    if denominator.abs() < 1e-4 {
        // limit at t = ±1/(2·rolloff)
        PI / 4.0 * sinc(1.0 / (2.0 * rolloff))
    } else {
        sinc(t) * (PI * rolloff * t).cos() / denominator
    }
}

/// Axis-aligned QPSK burst and the quadrants it carries
pub struct QpskSignal {
    /// Transmitted quadrant per symbol (0 = +1, 1 = +j, 2 = -1, 3 = -j)
    pub symbols: Vec<u8>,
    pub samples: Vec<Complex<f32>>,
}

/// Raised-cosine shaped QPSK (rolloff 0.5).
///
/// # Arguments
/// * `count` - Number of symbols
/// * `samples_per_symbol` - Oversampling factor
/// * `timing_offset` - Delay of the symbol instants, in samples
/// * `carrier` - Residual carrier in cycles per sample
/// * `seed` - Seed of the symbol sequence
pub fn qpsk_signal(
    count: usize,
    samples_per_symbol: f32,
    timing_offset: f32,
    carrier: f32,
    seed: u64,
) -> QpskSignal {
    const ROLLOFF: f32 = 0.5;
    const SPAN: isize = 8;

    let mut rng = StdRng::seed_from_u64(seed);
    let symbols: Vec<u8> = (0..count).map(|_| rng.gen_range(0..4u8)).collect();
    let points: Vec<Complex<f32>> = symbols
        .iter()
        .map(|&q| Complex::from_polar(1.0, q as f32 * FRAC_PI_2))
        .collect();

    let num_samples = (count as f32 * samples_per_symbol).ceil() as usize;
    let samples = (0..num_samples)
        .map(|n| {
            let t = (n as f32 - timing_offset) / samples_per_symbol;
            let center = t.round() as isize;
            let mut sum = Complex::new(0.0, 0.0);
            for k in (center - SPAN).max(0)..=(center + SPAN).min(count as isize - 1) {
                sum += points[k as usize] * raised_cosine(t - k as f32, ROLLOFF);
            }
            let phase = (carrier as f64 * TAU * n as f64) % TAU;
            sum * Complex::from_polar(1.0, phase as f32)
        })
        .collect();

    QpskSignal { symbols, samples }
}

/// Fraction of the last `window` received symbols matching the transmitted
/// quadrants, for the best lag in `-max_lag..=max_lag` and the best of the
/// four constellation rotations.
pub fn best_alignment(received: &[Complex<f32>], sent: &[u8], window: usize, max_lag: isize) -> f64 {
    let decided: Vec<u8> = received.iter().map(|&s| decide(s)).collect();
    let start = decided.len().saturating_sub(window);
    let mut best = 0.0f64;
    for lag in -max_lag..=max_lag {
        for rotation in 0..4u8 {
            let mut compared = 0usize;
            let mut matched = 0usize;
            for (j, &quadrant) in decided.iter().enumerate().skip(start) {
                let k = j as isize + lag;
                if k < 0 || k as usize >= sent.len() {
                    continue;
                }
                compared += 1;
                if (quadrant + rotation) % 4 == sent[k as usize] {
                    matched += 1;
                }
            }
            if compared > window / 2 {
                best = best.max(matched as f64 / compared as f64);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length_and_amplitude() {
        let samples = tone(1000.0, 96_000.0, 100);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|s| (s.norm() - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_encode_sizes() {
        let samples = tone(0.0, 96_000.0, 10);
        assert_eq!(encode(IqFormat::Cu8, &samples).len(), 20);
        assert_eq!(encode(IqFormat::Cs16, &samples).len(), 40);
        assert_eq!(encode(IqFormat::Cf32, &samples).len(), 80);
    }

    #[test]
    fn test_raised_cosine_is_nyquist() {
        assert!((raised_cosine(0.0, 0.5) - 1.0).abs() < 1e-6);
        for k in 1..6 {
            assert!(raised_cosine(k as f32, 0.5).abs() < 1e-5);
        }
        assert!(raised_cosine(1.0, 0.5).is_finite());
    }

    #[test]
    fn test_qpsk_hits_symbols_at_instants() {
        let signal = qpsk_signal(50, 10.0, 0.0, 0.0, 7);
        for k in 10..40 {
            let s = signal.samples[k * 10];
            assert_eq!(decide(s), signal.symbols[k]);
            assert!((s.norm() - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_alignment_finds_lag_and_rotation() {
        let signal = qpsk_signal(200, 10.0, 0.0, 0.0, 3);
        // received stream 2 symbols late, rotated by a quarter turn
        let received: Vec<Complex<f32>> = std::iter::repeat_n(Complex::new(1.0, 0.0), 2)
            .chain(
                signal
                    .symbols
                    .iter()
                    .map(|&q| Complex::from_polar(1.0, (q + 1) as f32 * FRAC_PI_2)),
            )
            .collect();
        assert_eq!(best_alignment(&received, &signal.symbols, 100, 5), 1.0);
    }
}
