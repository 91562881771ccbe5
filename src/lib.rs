#![doc = include_str!("../readme.md")]

use std::sync::Arc;

use num_complex::Complex;

pub mod config;
pub mod dsp;
pub mod error;
pub mod iqread;
pub mod tuner;

pub use error::{Error, Result};

/// Wideband buffer shared between every channel fed by one capture buffer
pub type ComplexBuffer = Arc<[Complex<f32>]>;

/**
 * I/Q Data Format
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqFormat {
    /// Complex unsigned 8-bit (Cu8)
    #[default]
    Cu8,
    /// Complex signed 8-bit (Cs8)
    Cs8,
    /// Complex signed 16-bit (Cs16)
    Cs16,
    /// Complex 32-bit float (Cf32)
    Cf32,
}

impl IqFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqFormat::Cu8 | IqFormat::Cs8 => 2,
            IqFormat::Cs16 => 4,
            IqFormat::Cf32 => 8,
        }
    }
}

impl std::str::FromStr for IqFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cu8" => Ok(IqFormat::Cu8),
            "cs8" => Ok(IqFormat::Cs8),
            "cs16" => Ok(IqFormat::Cs16),
            "cf32" => Ok(IqFormat::Cf32),
            other => Err(format!("Unknown I/Q format: {other}")),
        }
    }
}

impl std::fmt::Display for IqFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IqFormat::Cu8 => "cu8",
            IqFormat::Cs8 => "cs8",
            IqFormat::Cs16 => "cs16",
            IqFormat::Cf32 => "cf32",
        };
        f.write_str(name)
    }
}
