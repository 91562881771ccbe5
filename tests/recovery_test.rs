//! Carrier and symbol timing recovery on synthetic QPSK

mod helpers;

use num_complex::Complex;
use sdrddc::dsp::DspBlock;
use sdrddc::dsp::psk::{PskDemodulator, SymbolRecoveryConfig};
use sdrddc::dsp::timing::{DetectorKind, EarlyLateDetector, GardnerDetector};

const SAMPLE_RATE: f64 = 48_000.0;

fn recover(detector: DetectorKind, samples: &[Complex<f32>]) -> Vec<Complex<f32>> {
    let config = SymbolRecoveryConfig::default().with_detector(detector);
    let mut demod = PskDemodulator::from_config(&config, SAMPLE_RATE);
    let symbols = demod.process(samples);
    assert!(demod.omega().is_finite() && demod.mu().is_finite());
    symbols
}

/// Once locked, every symbol over the last 1000 matches and the symbol
/// period settles on the 10 samples it was sent with
fn assert_exact_recovery(detector: DetectorKind, timing_offset: f32, seed: u64) {
    let signal = helpers::qpsk_signal(3_000, 10.0, timing_offset, 0.0, seed);
    let config = SymbolRecoveryConfig::default().with_detector(detector);
    let mut demod = PskDemodulator::from_config(&config, SAMPLE_RATE);
    let symbols = demod.process(&signal.samples);

    assert!(
        (2_990..=3_010).contains(&symbols.len()),
        "{detector:?} offset {timing_offset}: {} symbols",
        symbols.len()
    );
    let ratio = helpers::best_alignment(&symbols, &signal.symbols, 1_000, 8);
    assert_eq!(ratio, 1.0, "{detector:?} offset {timing_offset}: matched {ratio}");
    let omega = demod.omega();
    assert!(
        (omega - 10.0).abs() < 0.01,
        "{detector:?} offset {timing_offset}: omega {omega}"
    );
    assert!(demod.mu().is_finite());
}

#[test]
fn test_gardner_recovers_offset_timing() {
    for (offset, seed) in [(0.0, 11), (3.0, 11), (5.0, 12), (7.5, 99)] {
        assert_exact_recovery(DetectorKind::Gardner, offset, seed);
    }
}

#[test]
fn test_early_late_recovers_offset_timing() {
    for (offset, seed) in [(0.0, 12), (3.0, 12), (5.0, 99), (7.5, 11)] {
        assert_exact_recovery(DetectorKind::EarlyLate, offset, seed);
    }
}

#[test]
fn test_residual_carrier_is_tracked() {
    // 50 Hz residual carrier on top of a fractional timing offset
    let carrier = (50.0 / SAMPLE_RATE) as f32;
    let signal = helpers::qpsk_signal(4_000, 10.0, 4.5, carrier, 13);
    let config = SymbolRecoveryConfig::default();
    let mut demod = PskDemodulator::new(GardnerDetector::new(), &config, SAMPLE_RATE);
    let symbols = demod.process(&signal.samples);

    let ratio = helpers::best_alignment(&symbols, &signal.symbols, 1_000, 8);
    assert!(ratio >= 0.98, "matched {ratio}");
    let estimate = demod.costas().loop_frequency_hz();
    assert!((estimate - 50.0).abs() < 5.0, "loop frequency {estimate} Hz");
}

#[test]
fn test_generic_detector_matches_boxed() {
    let signal = helpers::qpsk_signal(500, 10.0, 2.0, 0.0, 14);
    let config = SymbolRecoveryConfig::default().with_detector(DetectorKind::EarlyLate);
    let mut generic = PskDemodulator::new(EarlyLateDetector::new(), &config, SAMPLE_RATE);
    assert_eq!(
        generic.process(&signal.samples),
        recover(DetectorKind::EarlyLate, &signal.samples)
    );
}
