//! PSK symbol recovery: Costas carrier tracking composed with a timing
//! error detector.
//!
//! Every input sample is derotated by the Costas loop and written into a
//! delay line of `2 × samples/symbol` entries. A countdown `mu` marks the
//! next sampling instant; when it falls to one sample or less the detector
//! interpolates the symbol and a timing error from the delay line, and:
//!
//! ```text
//! omega = omega_mid + clamp(omega + gain_omega·e − omega_mid, ±0.5 %)
//! mu   += omega + gain_mu·e
//! ```
//!
//! The decided symbol then feeds the Costas phase error. Errors are
//! NaN-sanitized and clamped to `[-1, 1]` before use.

use std::sync::Arc;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::dsp::DspBlock;
use crate::dsp::costas::{CostasConfig, CostasLoop, sanitize_error};
use crate::dsp::timing::{DetectorKind, TimingErrorDetector};

/// Largest relative deviation of `omega` from its nominal value
pub const OMEGA_RELATIVE_LIMIT: f32 = 0.005;

/// Delay-line snapshot delivered to a [`DiagnosticTap`] at every symbol.
#[derive(Debug, Clone)]
pub struct EyeDiagramSnapshot {
    /// Delay line contents, oldest sample first
    pub delay_line: Vec<Complex<f32>>,
    /// Sampling instant of the symbol within `delay_line`, in samples
    pub sample_point: f32,
    /// Sanitized timing error
    pub timing_error: f32,
    /// Samples per symbol estimate
    pub omega: f32,
}

/// Instrumentation hook for eye diagrams and timing plots.
pub trait DiagnosticTap: Send + Sync {
    fn name(&self) -> &str;
    fn receive(&self, snapshot: &EyeDiagramSnapshot);
}

/// Symbol consumer. Symbols are dropped when no listener is registered.
pub type SymbolListener = Box<dyn FnMut(Complex<f32>) + Send>;

/// Symbol recovery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolRecoveryConfig {
    /// Nominal samples per symbol
    pub samples_per_symbol: f32,
    pub detector: DetectorKind,
    /// Proportional timing gain; the detector default when unset
    pub gain_mu: Option<f32>,
    /// Integral timing gain; `0.1 · gain_mu²` when unset
    pub gain_omega: Option<f32>,
    /// Costas loop bandwidth (radians)
    pub loop_bandwidth: f32,
    pub damping: f32,
    /// Largest trackable carrier offset in Hz
    pub maximum_frequency: f64,
    /// Constellation rotation in radians
    pub phase_offset: f32,
}

impl Default for SymbolRecoveryConfig {
    fn default() -> Self {
        let costas = CostasConfig::new(0.0);
        Self {
            samples_per_symbol: 10.0,
            detector: DetectorKind::Gardner,
            gain_mu: None,
            gain_omega: None,
            loop_bandwidth: costas.loop_bandwidth,
            damping: costas.damping,
            maximum_frequency: costas.maximum_frequency,
            phase_offset: costas.phase_offset,
        }
    }
}

impl SymbolRecoveryConfig {
    pub fn with_detector(mut self, detector: DetectorKind) -> Self {
        self.detector = detector;
        self
    }

    pub fn gain_mu(&self) -> f32 {
        self.gain_mu.unwrap_or_else(|| self.detector.default_gain_mu())
    }

    pub fn gain_omega(&self) -> f32 {
        self.gain_omega.unwrap_or_else(|| {
            let gain_mu = self.gain_mu();
            0.1 * gain_mu * gain_mu
        })
    }

    fn costas(&self, sample_rate: f64) -> CostasConfig {
        CostasConfig {
            sample_rate,
            loop_bandwidth: self.loop_bandwidth,
            damping: self.damping,
            maximum_frequency: self.maximum_frequency,
            phase_offset: self.phase_offset,
        }
    }
}

/// PSK demodulator parametrized by its timing error detector.
pub struct PskDemodulator<D = Box<dyn TimingErrorDetector>> {
    costas: CostasLoop,
    detector: D,
    /// Doubled delay line of derotated samples
    delay_line: Vec<Complex<f32>>,
    /// Logical delay line length
    length: usize,
    pointer: usize,
    /// Samples until the next symbol
    mu: f32,
    /// Samples per symbol estimate
    omega: f32,
    omega_mid: f32,
    omega_limit: f32,
    gain_mu: f32,
    gain_omega: f32,
    timing_error: f32,
    symbols: u64,
    listener: Option<SymbolListener>,
    tap: Option<Arc<dyn DiagnosticTap>>,
}

impl PskDemodulator {
    /// Demodulator with the detector named in `config`
    pub fn from_config(config: &SymbolRecoveryConfig, sample_rate: f64) -> Self {
        PskDemodulator::new(config.detector.build(), config, sample_rate)
    }
}

impl<D: TimingErrorDetector> PskDemodulator<D> {
    /// # Arguments
    ///
    /// * `detector` - Timing error detector strategy
    /// * `config` - Loop parameters
    /// * `sample_rate` - Input sample rate in Hz
    pub fn new(detector: D, config: &SymbolRecoveryConfig, sample_rate: f64) -> Self {
        let omega = config.samples_per_symbol.max(2.0);
        let length = 2 * omega.ceil() as usize;
        Self {
            costas: CostasLoop::new(&config.costas(sample_rate)),
            detector,
            delay_line: vec![Complex::new(0.0, 0.0); 2 * length],
            length,
            pointer: 0,
            mu: omega,
            omega,
            omega_mid: omega,
            omega_limit: omega * OMEGA_RELATIVE_LIMIT,
            gain_mu: config.gain_mu(),
            gain_omega: config.gain_omega(),
            timing_error: 0.0,
            symbols: 0,
            listener: None,
            tap: None,
        }
    }

    /// Process one input sample; returns a symbol at every symbol period
    pub fn receive(&mut self, sample: Complex<f32>) -> Option<Complex<f32>> {
        self.mu -= 1.0;

        let derotated = self.costas.derotate(sample);
        self.delay_line[self.pointer] = derotated;
        self.delay_line[self.pointer + self.length] = derotated;
        self.pointer += 1;
        if self.pointer == self.length {
            self.pointer = 0;
        }

        let mut phase_error = 0.0;
        let mut output = None;
        if self.mu <= 1.0 {
            let mu = self.mu.clamp(0.0, 1.0);
            let decision = self
                .detector
                .detect(&self.delay_line, self.pointer, mu, self.omega);
            let error = sanitize_error(decision.error);
            self.timing_error = error;

            if let Some(tap) = &self.tap {
                tap.receive(&EyeDiagramSnapshot {
                    delay_line: self.delay_line[self.pointer..self.pointer + self.length].to_vec(),
                    sample_point: decision.sample_point,
                    timing_error: error,
                    omega: self.omega,
                });
            }

            let omega = self.omega + self.gain_omega * error;
            self.omega =
                self.omega_mid + (omega - self.omega_mid).clamp(-self.omega_limit, self.omega_limit);
            self.mu += self.omega + self.gain_mu * error;

            phase_error = self.costas.phase_error(decision.symbol);
            self.symbols += 1;
            if let Some(listener) = self.listener.as_mut() {
                listener(decision.symbol);
            }
            output = Some(decision.symbol);
        }

        self.costas.advance(phase_error);
        output
    }

    /// Register (or clear) the symbol listener
    pub fn set_listener(&mut self, listener: Option<SymbolListener>) {
        self.listener = listener;
    }

    /// Attach (or detach) a diagnostic tap; loop state is unaffected
    pub fn set_tap(&mut self, tap: Option<Arc<dyn DiagnosticTap>>) {
        self.tap = tap;
    }

    pub fn costas(&self) -> &CostasLoop {
        &self.costas
    }

    pub fn costas_mut(&mut self) -> &mut CostasLoop {
        &mut self.costas
    }

    pub fn mu(&self) -> f32 {
        self.mu
    }

    pub fn omega(&self) -> f32 {
        self.omega
    }

    pub fn nominal_omega(&self) -> f32 {
        self.omega_mid
    }

    /// Last sanitized timing error
    pub fn timing_error(&self) -> f32 {
        self.timing_error
    }

    /// Symbols produced so far
    pub fn symbol_count(&self) -> u64 {
        self.symbols
    }

    pub fn reset(&mut self) {
        self.costas.reset();
        self.detector.reset();
        self.delay_line.iter_mut().for_each(|s| *s = Complex::new(0.0, 0.0));
        self.pointer = 0;
        self.mu = self.omega_mid;
        self.omega = self.omega_mid;
        self.timing_error = 0.0;
    }
}

impl<D: TimingErrorDetector> DspBlock for PskDemodulator<D> {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let expected = (data.len() as f32 / self.omega_mid) as usize + 1;
        let mut out = Vec::with_capacity(expected);
        for &s in data {
            if let Some(symbol) = self.receive(s) {
                out.push(symbol);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::timing::GardnerDetector;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_one_symbol_per_period() {
        let mut demod = PskDemodulator::new(
            GardnerDetector::new(),
            &SymbolRecoveryConfig::default(),
            48_000.0,
        );
        let out = demod.process(&vec![Complex::new(1.0, 0.0); 10_000]);
        assert!((999..=1001).contains(&out.len()), "{} symbols", out.len());
        assert_eq!(demod.symbol_count(), out.len() as u64);
    }

    #[test]
    fn test_omega_stays_within_limit() {
        let config = SymbolRecoveryConfig {
            gain_omega: Some(0.5),
            ..SymbolRecoveryConfig::default()
        };
        let mut demod = PskDemodulator::from_config(&config, 48_000.0);
        let noisy: Vec<Complex<f32>> = (0..20_000)
            .map(|n| Complex::new(((n * 7919) % 13) as f32 - 6.0, ((n * 104_729) % 11) as f32 - 5.0))
            .collect();
        for &s in &noisy {
            demod.receive(s);
            assert!((demod.omega() - 10.0).abs() <= 10.0 * OMEGA_RELATIVE_LIMIT + 1e-5);
        }
    }

    #[test]
    fn test_nan_input_does_not_poison_loop() {
        let mut demod = PskDemodulator::from_config(&SymbolRecoveryConfig::default(), 48_000.0);
        for _ in 0..100 {
            demod.receive(Complex::new(f32::NAN, f32::NAN));
        }
        assert!(demod.omega().is_finite());
        assert!(demod.mu().is_finite());
        assert!(demod.costas().loop_frequency().is_finite());
        assert!(demod.costas().loop_phase().is_finite());
    }

    #[test]
    fn test_listener_receives_symbols() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let mut demod = PskDemodulator::from_config(&SymbolRecoveryConfig::default(), 48_000.0);
        demod.set_listener(Some(Box::new(move |s: Complex<f32>| sink.lock().unwrap().push(s))));
        let out = demod.process(&vec![Complex::new(0.0, 1.0); 1_000]);
        assert_eq!(received.lock().unwrap().len(), out.len());

        demod.set_listener(None);
        let more = demod.process(&vec![Complex::new(0.0, 1.0); 1_000]);
        assert!(!more.is_empty());
        assert_eq!(received.lock().unwrap().len(), out.len());
    }

    struct CountingTap(AtomicUsize);

    impl DiagnosticTap for CountingTap {
        fn name(&self) -> &str {
            "counting"
        }

        fn receive(&self, snapshot: &EyeDiagramSnapshot) {
            assert_eq!(snapshot.delay_line.len(), 20);
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_tap_does_not_alter_state() {
        let input: Vec<Complex<f32>> = (0..5_000)
            .map(|n| Complex::from_polar(1.0, ((n / 10) % 4) as f32 * std::f32::consts::FRAC_PI_2))
            .collect();

        let mut plain = PskDemodulator::from_config(&SymbolRecoveryConfig::default(), 48_000.0);
        let expected = plain.process(&input);

        let tap = Arc::new(CountingTap(AtomicUsize::new(0)));
        let mut tapped = PskDemodulator::from_config(&SymbolRecoveryConfig::default(), 48_000.0);
        tapped.set_tap(Some(tap.clone()));
        let actual = tapped.process(&input);

        assert_eq!(expected, actual);
        assert_eq!(tap.0.load(Ordering::Relaxed), actual.len());
        assert_eq!(tap.name(), "counting");
    }
}
