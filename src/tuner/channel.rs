use std::fmt;

use serde::{Deserialize, Serialize};

/// A narrowband channel requested from a tuner.
///
/// Channels order by frequency, then bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TunerChannel {
    /// Center frequency in Hz
    pub frequency: u64,
    /// Occupied bandwidth in Hz
    pub bandwidth: u64,
}

impl TunerChannel {
    pub fn new(frequency: u64, bandwidth: u64) -> Self {
        Self {
            frequency,
            bandwidth,
        }
    }

    /// Lowest frequency occupied by the channel
    pub fn min_frequency(&self) -> u64 {
        self.frequency.saturating_sub(self.bandwidth / 2)
    }

    /// Highest frequency occupied by the channel
    pub fn max_frequency(&self) -> u64 {
        self.frequency.saturating_add(self.bandwidth / 2)
    }

    /// True when the channel intersects `[minimum, maximum]` (bounds included)
    pub fn overlaps(&self, minimum: u64, maximum: u64) -> bool {
        self.min_frequency() <= maximum && self.max_frequency() >= minimum
    }
}

impl fmt::Display for TunerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} MHz ({} Hz)",
            self.frequency as f64 / 1e6,
            self.bandwidth
        )
    }
}
