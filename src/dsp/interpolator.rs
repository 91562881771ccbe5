//! Fractional-delay interpolation for symbol timing recovery.
//!
//! A four-point cubic (Lagrange) interpolator in Farrow form: the polynomial
//! coefficients are computed from four neighbouring samples and evaluated by
//! Horner's rule at the fractional offset `mu`.

use num_complex::Complex;

/// Interpolate between `samples[index + 1]` and `samples[index + 2]`.
///
/// Reads `samples[index..index + 4]`; `mu` in `[0, 1]` is the fractional
/// position after `samples[index + 1]`. Out-of-range reads yield zero.
#[inline]
pub fn interpolate(samples: &[Complex<f32>], index: usize, mu: f32) -> Complex<f32> {
    let Some(window) = samples.get(index..index + 4) else {
        return Complex::new(0.0, 0.0);
    };
    let (x0, x1, x2, x3) = (window[0], window[1], window[2], window[3]);

    let c0 = x1;
    let c1 = x2 - x0 * (1.0 / 3.0) - x1 * 0.5 - x3 * (1.0 / 6.0);
    let c2 = (x0 + x2) * 0.5 - x1;
    let c3 = (x1 - x2) * 0.5 + (x3 - x0) * (1.0 / 6.0);

    ((c3 * mu + c2) * mu + c1) * mu + c0
}
