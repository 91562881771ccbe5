//! Integration tests for the iqread module

use sdrddc::IqFormat;
use sdrddc::iqread::IqRead;
use std::fs;
use std::path::PathBuf;

fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sdrddc_{}_{name}", std::process::id()));
    fs::write(&path, bytes).expect("Failed to write test file");
    path
}

#[test]
fn test_bytes_per_sample() {
    assert_eq!(IqFormat::Cu8.bytes_per_sample(), 2);
    assert_eq!(IqFormat::Cs8.bytes_per_sample(), 2);
    assert_eq!(IqFormat::Cs16.bytes_per_sample(), 4);
    assert_eq!(IqFormat::Cf32.bytes_per_sample(), 8);
}

#[test]
fn test_one_chunk_per_format() {
    // 3 samples in every format
    for format in [IqFormat::Cu8, IqFormat::Cs8, IqFormat::Cs16, IqFormat::Cf32] {
        let bytes = vec![0u8; 3 * format.bytes_per_sample()];
        let path = temp_file(&format!("chunk_{format}.iq"), &bytes);

        let mut reader = IqRead::from_file(&path, 162_000_000, 96_000, 3, format)
            .expect("Failed to open IQ file");
        let chunk = reader.next().expect("No data").expect("Read error");
        assert_eq!(chunk.len(), 3, "{format}");
        assert!(reader.next().is_none());

        fs::remove_file(&path).ok();
    }
}

#[test]
fn test_format_names() {
    for name in ["cu8", "cs8", "cs16", "cf32"] {
        let format: IqFormat = name.parse().expect("known format");
        assert_eq!(format.to_string(), name);
    }
    assert!("cs32".parse::<IqFormat>().is_err());
}

#[test]
fn test_expanduser_with_tilde() {
    let home = dirs::home_dir().expect("Could not get home directory");
    let test_file = home.join(format!(".sdrddc_test_{}.iq", std::process::id()));
    fs::write(&test_file, [127, 127, 128, 128]).expect("Failed to write test file");

    let tilde_path = format!("~/.sdrddc_test_{}.iq", std::process::id());
    let result = IqRead::from_file(&tilde_path, 162_000_000, 96_000, 2, IqFormat::Cu8);
    assert!(result.is_ok(), "Failed to open file with tilde path: {:?}", result.err());

    let chunk = result.unwrap().next().expect("No data").expect("Read error");
    assert_eq!(chunk.len(), 2);

    fs::remove_file(&test_file).ok();
}

#[test]
fn test_nonexistent_file() {
    let result = IqRead::from_file(
        "~/nonexistent_file_12345.iq",
        162_000_000,
        96_000,
        100,
        IqFormat::Cu8,
    );
    let err = result.err().expect("Should return error for nonexistent file");
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn test_multiple_chunks() {
    let samples: Vec<u8> = (0..30u8).flat_map(|v| [v, v]).collect();
    let path = temp_file("multi_chunk.iq", &samples);

    let mut reader = IqRead::from_file(&path, 162_000_000, 96_000, 10, IqFormat::Cu8)
        .expect("Failed to open IQ file");
    assert_eq!(reader.config().chunk_size, 10);
    for chunk_idx in 0..3 {
        let chunk = reader
            .next()
            .unwrap_or_else(|| panic!("Chunk {chunk_idx} missing"))
            .expect("Read error");
        assert_eq!(chunk.len(), 10, "Chunk {chunk_idx} should have 10 samples");
    }
    assert!(reader.next().is_none(), "Should reach EOF after 3 chunks");

    fs::remove_file(&path).ok();
}

#[test]
fn test_partial_chunk_is_delivered() {
    // 25 samples read in chunks of 10, plus half a sample
    let mut samples: Vec<u8> = (0..25u8).flat_map(|v| [v, v]).collect();
    samples.push(0);
    let path = temp_file("partial_chunk.iq", &samples);

    let mut reader = IqRead::from_file(&path, 162_000_000, 96_000, 10, IqFormat::Cu8)
        .expect("Failed to open IQ file");
    let lengths: Vec<usize> = reader.by_ref().map(|c| c.expect("Read error").len()).collect();
    assert_eq!(lengths, vec![10, 10, 5]);

    fs::remove_file(&path).ok();
}

#[test]
fn test_from_stdin_configuration() {
    let reader = IqRead::from_stdin(162_000_000, 96_000, 0, IqFormat::Cs16);
    let config = reader.config();
    assert_eq!(config.center_freq, 162_000_000);
    assert_eq!(config.sample_rate, 96_000);
    assert_eq!(config.chunk_size, 1, "chunk size is at least one sample");
    assert_eq!(config.iq_format, IqFormat::Cs16);
}
