//! Channelizer configuration.
//!
//! All sections deserialize with defaults for missing fields, so a JSON file
//! only needs to name what differs:
//!
//! ```json
//! {
//!   "tuner": { "sample_rate": 2400000, "center_blackout_bandwidth": 5000 },
//!   "channel": { "tick_interval_ms": 25 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest and longest drain interval of a channel source, in milliseconds
pub const TICK_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=50;

/// Physical tuner parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Lowest tunable frequency in Hz
    pub minimum_frequency: u64,
    /// Highest tunable frequency in Hz
    pub maximum_frequency: u64,
    /// Wideband sample rate in Hz
    pub sample_rate: u32,
    /// Oscillator error in parts per million
    pub frequency_correction: f64,
    /// Half-width of the DC spike dead zone around the center, in Hz
    pub center_blackout_bandwidth: u64,
    /// Part of the sampled bandwidth free of filter roll-off
    pub usable_bandwidth_fraction: f64,
    /// Frequency tuned at startup, in Hz
    pub initial_frequency: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            minimum_frequency: 24_000_000,
            maximum_frequency: 1_766_000_000,
            sample_rate: 2_400_000,
            frequency_correction: 0.0,
            center_blackout_bandwidth: 5_000,
            usable_bandwidth_fraction: 0.9,
            initial_frequency: 100_000_000,
        }
    }
}

/// Per-channel pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Output sample rate of every channel in Hz
    pub sample_rate: u32,
    /// Width of the cleanup filter transition band in Hz
    pub transition_bandwidth: u64,
    /// Samples per block delivered to consumers of unmodulated channels
    pub block_size: usize,
    /// Wideband buffers a channel may hold before dropping the oldest
    pub queue_capacity: usize,
    /// Buffers drained per scheduler tick
    pub max_buffers_per_tick: usize,
    /// Interval between two drains in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            transition_bandwidth: 1_500,
            block_size: 1024,
            queue_capacity: 64,
            max_buffers_per_tick: 8,
            tick_interval_ms: 20,
        }
    }
}

impl ChannelConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; available cores when unset, never fewer than two
    pub worker_threads: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelizerConfig {
    pub tuner: TunerConfig,
    pub channel: ChannelConfig,
    pub scheduler: SchedulerConfig,
}

impl ChannelizerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = crate::iqread::expanduser(path.as_ref().to_path_buf());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every section for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let tuner = &self.tuner;
        if tuner.minimum_frequency >= tuner.maximum_frequency {
            return Err(Error::config(format!(
                "minimum frequency {} Hz must be below maximum frequency {} Hz",
                tuner.minimum_frequency, tuner.maximum_frequency
            )));
        }
        if !(tuner.minimum_frequency..=tuner.maximum_frequency).contains(&tuner.initial_frequency) {
            return Err(Error::config(format!(
                "initial frequency {} Hz is outside of the tunable range",
                tuner.initial_frequency
            )));
        }
        if tuner.sample_rate == 0 {
            return Err(Error::config("tuner sample rate must be positive"));
        }
        if !tuner.frequency_correction.is_finite() {
            return Err(Error::config("frequency correction must be finite"));
        }
        if !(tuner.usable_bandwidth_fraction > 0.0 && tuner.usable_bandwidth_fraction <= 1.0) {
            return Err(Error::config(format!(
                "usable bandwidth fraction {} must be in (0, 1]",
                tuner.usable_bandwidth_fraction
            )));
        }
        let usable = (tuner.sample_rate as f64 * tuner.usable_bandwidth_fraction).round() as u64;
        if tuner.center_blackout_bandwidth * 2 >= usable {
            return Err(Error::config(format!(
                "center blackout of {} Hz leaves no usable bandwidth out of {usable} Hz",
                tuner.center_blackout_bandwidth
            )));
        }

        let channel = &self.channel;
        if channel.sample_rate == 0 || channel.sample_rate > tuner.sample_rate {
            return Err(Error::config(format!(
                "channel sample rate {} Hz must be positive and at most the tuner rate",
                channel.sample_rate
            )));
        }
        if channel.block_size == 0 || channel.queue_capacity == 0 || channel.max_buffers_per_tick == 0
        {
            return Err(Error::config(
                "block size, queue capacity and buffers per tick must be positive",
            ));
        }
        if !TICK_INTERVAL_RANGE_MS.contains(&channel.tick_interval_ms) {
            return Err(Error::config(format!(
                "tick interval {} ms must be within {}..={} ms",
                channel.tick_interval_ms,
                TICK_INTERVAL_RANGE_MS.start(),
                TICK_INTERVAL_RANGE_MS.end()
            )));
        }
        if self.scheduler.worker_threads == Some(0) {
            return Err(Error::config("worker thread count must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ChannelizerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channel.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ChannelizerConfig::from_json_str(
            r#"{ "tuner": { "sample_rate": 1200000 }, "channel": { "tick_interval_ms": 40 } }"#,
        )
        .unwrap();
        assert_eq!(config.tuner.sample_rate, 1_200_000);
        assert_eq!(config.tuner.usable_bandwidth_fraction, 0.9);
        assert_eq!(config.channel.tick_interval_ms, 40);
        assert_eq!(config.channel.block_size, 1024);
        assert_eq!(config.scheduler.worker_threads, None);
    }

    #[test]
    fn test_rejects_tick_interval_out_of_range() {
        let result = ChannelizerConfig::from_json_str(r#"{ "channel": { "tick_interval_ms": 80 } }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_oversized_blackout() {
        let mut config = ChannelizerConfig::default();
        config.tuner.center_blackout_bandwidth = 2_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let result = ChannelizerConfig::from_json_str("{ tuner: ");
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
