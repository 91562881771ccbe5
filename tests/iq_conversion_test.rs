//! Integration tests for I/Q format conversion
//!
//! These tests verify that `convert_bytes_to_complex` maps every supported
//! format onto normalized `Complex<f32>` samples, both directly and through
//! files read with `IqRead`.

mod helpers;

use num_complex::Complex;
use sdrddc::IqFormat;
use sdrddc::iqread::{IqRead, complex_to_cf32_bytes, convert_bytes_to_complex};
use std::fs;

fn assert_close(actual: Complex<f32>, re: f32, im: f32, epsilon: f32) {
    assert!(
        (actual.re - re).abs() < epsilon && (actual.im - im).abs() < epsilon,
        "expected ({re}, {im}), got {actual}"
    );
}

#[test]
fn test_tone_survives_every_format() {
    let tone = helpers::tone(1_000.0, 96_000.0, 96);
    for (format, epsilon) in [
        (IqFormat::Cu8, 0.01),
        (IqFormat::Cs8, 0.01),
        (IqFormat::Cs16, 1e-4),
        (IqFormat::Cf32, 1e-7),
    ] {
        let path = std::env::temp_dir().join(format!(
            "sdrddc_{}_tone.{format}",
            std::process::id()
        ));
        fs::write(&path, helpers::encode(format, &tone)).expect("Failed to write test file");

        let mut reader = IqRead::from_file(&path, 162_000_000, 96_000, 96, format)
            .expect("Failed to open IQ file");
        let chunk = reader.next().expect("No data").expect("Read error");
        assert_eq!(chunk.len(), 96);
        for (got, want) in chunk.iter().zip(&tone) {
            assert_close(*got, want.re, want.im, epsilon);
        }
        fs::remove_file(&path).ok();
    }
}

#[test]
fn test_convert_cu8_boundaries() {
    // (byte - 127.5) / 128
    let samples = [0, 0, 127, 127, 128, 128, 255, 255];
    let chunk = convert_bytes_to_complex(IqFormat::Cu8, &samples);
    assert_eq!(chunk.len(), 4);
    assert_close(chunk[0], -0.996, -0.996, 0.001);
    assert_close(chunk[1], -0.004, -0.004, 0.001);
    assert_close(chunk[2], 0.004, 0.004, 0.001);
    assert_close(chunk[3], 0.996, 0.996, 0.001);
}

#[test]
fn test_convert_cs8_sign_handling() {
    let samples = [0x80, 0x80, 0xFF, 0xFF, 0, 0, 127, 127];
    let chunk = convert_bytes_to_complex(IqFormat::Cs8, &samples);
    assert_close(chunk[0], -1.0, -1.0, 1e-6);
    assert_close(chunk[1], -0.0078, -0.0078, 1e-4);
    assert_close(chunk[2], 0.0, 0.0, 1e-6);
    assert_close(chunk[3], 0.992, 0.992, 1e-3);
}

#[test]
fn test_convert_cs16_endianness() {
    let samples = [
        0x00, 0x80, 0x00, 0x80, // -32768
        0x00, 0x00, 0x00, 0x00, // 0
        0xFF, 0x7F, 0x01, 0x00, // 32767, 1
    ];
    let chunk = convert_bytes_to_complex(IqFormat::Cs16, &samples);
    assert_eq!(chunk.len(), 3);
    assert_close(chunk[0], -1.0, -1.0, 1e-6);
    assert_close(chunk[1], 0.0, 0.0, 1e-6);
    assert_close(chunk[2], 0.99997, 1.0 / 32768.0, 1e-5);
}

#[test]
fn test_convert_drops_trailing_partial_sample() {
    let mut bytes = complex_to_cf32_bytes(&[Complex::new(0.5, -0.5)]);
    bytes.extend_from_slice(&[1, 2, 3]);
    let chunk = convert_bytes_to_complex(IqFormat::Cf32, &bytes);
    assert_eq!(chunk, vec![Complex::new(0.5, -0.5)]);
}

#[test]
fn test_convert_empty_file() {
    let path = std::env::temp_dir().join(format!("sdrddc_{}_empty.iq", std::process::id()));
    fs::write(&path, b"").expect("Failed to write test file");

    let mut reader = IqRead::from_file(&path, 162_000_000, 96_000, 100, IqFormat::Cu8)
        .expect("Failed to open IQ file");
    let result = reader.next();
    assert!(result.is_none(), "Expected None for empty file, got {:?}", result);

    fs::remove_file(&path).ok();
}
