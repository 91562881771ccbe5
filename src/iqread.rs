//! I/Q Data Reading Module
//!
//! Reads recorded I/Q samples from files or standard input in fixed-size
//! chunks. A recording stands in for a live tuner: every chunk becomes one
//! wideband buffer for the channel feed.
use std::io::Read;
use std::path::{Path, PathBuf};

use num_complex::Complex;

use crate::IqFormat;

/**
 * I/Q Data Source Configuration
 */
#[derive(Debug, Clone, Copy)]
pub struct IqConfig {
    pub iq_format: IqFormat,
    pub center_freq: u64,
    pub sample_rate: u32,
    pub chunk_size: usize,
}

impl IqConfig {
    pub fn new(center_freq: u64, sample_rate: u32, chunk_size: usize, iq_format: IqFormat) -> Self {
        Self {
            iq_format,
            center_freq,
            sample_rate,
            chunk_size: chunk_size.max(1),
        }
    }
}

/**
 * Synchronous I/Q Reader
 *
 * Yields chunks of `chunk_size` samples; a trailing partial chunk is
 * returned as is, a trailing partial sample is discarded.
 */
pub struct IqRead<R: Read> {
    config: IqConfig,
    reader: R,
    buffer: Vec<u8>,
}

impl IqRead<std::io::BufReader<std::fs::File>> {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        center_freq: u64,
        sample_rate: u32,
        chunk_size: usize,
        iq_format: IqFormat,
    ) -> Result<Self, std::io::Error> {
        let path = expanduser(path.as_ref().to_path_buf());
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = IqConfig::new(center_freq, sample_rate, chunk_size, iq_format);
        Ok(Self::new(reader, config))
    }
}

impl IqRead<std::io::BufReader<std::io::Stdin>> {
    pub fn from_stdin(
        center_freq: u64,
        sample_rate: u32,
        chunk_size: usize,
        iq_format: IqFormat,
    ) -> Self {
        let reader = std::io::BufReader::new(std::io::stdin());
        let config = IqConfig::new(center_freq, sample_rate, chunk_size, iq_format);
        Self::new(reader, config)
    }
}

impl<R: Read> IqRead<R> {
    pub fn new(reader: R, config: IqConfig) -> Self {
        let buffer = vec![0u8; config.chunk_size * config.iq_format.bytes_per_sample()];
        Self {
            config,
            reader,
            buffer,
        }
    }

    pub fn config(&self) -> &IqConfig {
        &self.config
    }

    /// Fill the chunk buffer; returns the number of bytes read
    fn fill(&mut self) -> Result<usize, std::io::Error> {
        let mut total = 0;
        while total < self.buffer.len() {
            match self.reader.read(&mut self.buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

impl<R: Read> Iterator for IqRead<R> {
    type Item = Result<Vec<Complex<f32>>, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let read = match self.fill() {
            Ok(read) => read,
            Err(e) => return Some(Err(e)),
        };
        let whole = read - read % self.config.iq_format.bytes_per_sample();
        if whole == 0 {
            return None;
        }
        Some(Ok(convert_bytes_to_complex(
            self.config.iq_format,
            &self.buffer[..whole],
        )))
    }
}

/// Decode interleaved little-endian I/Q bytes into normalized samples
pub fn convert_bytes_to_complex(format: IqFormat, buffer: &[u8]) -> Vec<Complex<f32>> {
    match format {
        IqFormat::Cu8 => buffer
            .chunks_exact(2)
            .map(|c| Complex::new((c[0] as f32 - 127.5) / 128.0, (c[1] as f32 - 127.5) / 128.0))
            .collect(),
        IqFormat::Cs8 => buffer
            .chunks_exact(2)
            .map(|c| Complex::new((c[0] as i8) as f32 / 128.0, (c[1] as i8) as f32 / 128.0))
            .collect(),
        IqFormat::Cs16 => buffer
            .chunks_exact(4)
            .map(|c| {
                Complex::new(
                    i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0,
                    i16::from_le_bytes([c[2], c[3]]) as f32 / 32768.0,
                )
            })
            .collect(),
        IqFormat::Cf32 => buffer
            .chunks_exact(8)
            .map(|c| {
                Complex::new(
                    f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                    f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect(),
    }
}

/// Encode samples as interleaved little-endian cf32
pub fn complex_to_cf32_bytes(samples: &[Complex<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 8);
    for sample in samples {
        out.extend_from_slice(&sample.re.to_le_bytes());
        out.extend_from_slice(&sample.im.to_le_bytes());
    }
    out
}

pub fn expanduser(path: PathBuf) -> PathBuf {
    // Check if the path starts with "~"
    if let Some(stripped) = path.to_str().and_then(|p| p.strip_prefix("~"))
        && let Some(home_dir) = dirs::home_dir()
    {
        return home_dir.join(stripped.trim_start_matches('/'));
    }
    path
}
