//! Symbol timing error detectors.
//!
//! A detector looks at the delay line of derotated samples around the
//! current sampling instant and returns the symbol together with a timing
//! error. A positive error means the strobe is early and should move later.
//!
//! Two detectors are provided:
//! - [`GardnerDetector`]: `(previous − current) · middle` summed over I and Q,
//!   with `middle` half a symbol before `current`. Needs the carrier removed
//!   first, which the Costas loop does upstream.
//! - [`EarlyLateDetector`]: `|late| − |early|` with samples one sample apart
//!   around the symbol, relying on the pulse magnitude peaking at the ideal
//!   sampling point.

use num_complex::Complex;

use crate::dsp::interpolator::interpolate;

/// Result of one timing decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingDecision {
    /// Interpolated symbol
    pub symbol: Complex<f32>,
    /// Raw timing error (sanitized by the caller)
    pub error: f32,
    /// Position of the symbol relative to the oldest delay line sample
    pub sample_point: f32,
}

/// Timing error detector strategy.
pub trait TimingErrorDetector: Send {
    /// Detect at the strobe `pointer + 1 + mu` within `delay_line`.
    ///
    /// `delay_line` holds the doubled history so `delay_line[pointer..]`
    /// runs from the oldest to the newest sample without wrapping; `omega`
    /// is the current samples-per-symbol estimate.
    fn detect(
        &mut self,
        delay_line: &[Complex<f32>],
        pointer: usize,
        mu: f32,
        omega: f32,
    ) -> TimingDecision;

    /// Clear detector memory
    fn reset(&mut self) {}
}

impl<D: TimingErrorDetector + ?Sized> TimingErrorDetector for Box<D> {
    fn detect(
        &mut self,
        delay_line: &[Complex<f32>],
        pointer: usize,
        mu: f32,
        omega: f32,
    ) -> TimingDecision {
        (**self).detect(delay_line, pointer, mu, omega)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GardnerDetector {
    previous: Complex<f32>,
}

impl GardnerDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimingErrorDetector for GardnerDetector {
    fn detect(
        &mut self,
        delay_line: &[Complex<f32>],
        pointer: usize,
        mu: f32,
        omega: f32,
    ) -> TimingDecision {
        let half_omega = omega / 2.0;
        let mut half_sps = half_omega.floor() as usize;
        let mut half_mu = mu + half_omega - half_sps as f32;
        if half_mu > 1.0 {
            half_mu -= 1.0;
            half_sps += 1;
        }

        let middle = interpolate(delay_line, pointer, mu);
        let current = interpolate(delay_line, pointer + half_sps, half_mu);

        let error = (self.previous.re - current.re) * middle.re
            + (self.previous.im - current.im) * middle.im;
        self.previous = current;

        TimingDecision {
            symbol: current,
            error,
            sample_point: (half_sps + 1) as f32 + half_mu,
        }
    }

    fn reset(&mut self) {
        self.previous = Complex::new(0.0, 0.0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EarlyLateDetector;

impl EarlyLateDetector {
    pub fn new() -> Self {
        Self
    }
}

impl TimingErrorDetector for EarlyLateDetector {
    fn detect(
        &mut self,
        delay_line: &[Complex<f32>],
        pointer: usize,
        mu: f32,
        _omega: f32,
    ) -> TimingDecision {
        let early = interpolate(delay_line, pointer, mu);
        let middle = interpolate(delay_line, pointer + 1, mu);
        let late = interpolate(delay_line, pointer + 2, mu);

        TimingDecision {
            symbol: middle,
            error: late.norm() - early.norm(),
            sample_point: 2.0 + mu,
        }
    }
}

/// Which detector a demodulator should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    #[default]
    Gardner,
    EarlyLate,
}

impl DetectorKind {
    pub fn build(self) -> Box<dyn TimingErrorDetector> {
        match self {
            DetectorKind::Gardner => Box::new(GardnerDetector::new()),
            DetectorKind::EarlyLate => Box::new(EarlyLateDetector::new()),
        }
    }

    /// Default proportional timing gain for this detector
    pub fn default_gain_mu(self) -> f32 {
        match self {
            DetectorKind::Gardner => 0.05,
            DetectorKind::EarlyLate => 0.5,
        }
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gardner" => Ok(DetectorKind::Gardner),
            "early-late" | "earlylate" | "early_late" => Ok(DetectorKind::EarlyLate),
            other => Err(format!("Unknown timing detector: {other}")),
        }
    }
}
