//! Error handling for the sdrddc library
//!
//! This module provides a unified error type for channel allocation, tuner
//! control, filter construction and I/O. Runtime numeric faults inside the
//! control loops never surface here: they are clamped where they occur.

use std::io;

use thiserror::Error;

/// A specialized Result type for sdrddc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sdrddc operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, stdin, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested decimation ratio cannot be built from the prime table
    #[error("Unsupported decimation ratio {ratio}: {reason}")]
    UnsupportedDecimation { ratio: u32, reason: String },

    /// No low-pass filter can be designed for the requested band edges
    #[error("Filter design error: {0}")]
    FilterDesign(String),

    /// The frequency controller is locked by the channel allocator
    #[error("Frequency controller is locked")]
    Locked,

    /// The requested frequency is outside of the tuner range
    #[error("Frequency {frequency} Hz is outside of the tunable range [{minimum}, {maximum}] Hz")]
    InvalidFrequency {
        frequency: u64,
        minimum: u64,
        maximum: u64,
    },

    /// The channel does not fit alongside the currently active channels
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// No center frequency satisfies every active channel
    #[error("No viable center frequency: {0}")]
    NoViableCenter(String),

    /// Tunable device error
    #[error("Tuner error: {0}")]
    Tuner(String),

    /// Channel source lifecycle error
    #[error("Source error: {0}")]
    Source(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

// Helper constructors for common error scenarios

impl Error {
    /// Create an unsupported decimation error
    pub fn unsupported_decimation<S: Into<String>>(ratio: u32, reason: S) -> Self {
        Error::UnsupportedDecimation {
            ratio,
            reason: reason.into(),
        }
    }

    /// Create a filter design error with a custom message
    pub fn filter_design<S: Into<String>>(msg: S) -> Self {
        Error::FilterDesign(msg.into())
    }

    /// Create a tuner error with a custom message
    pub fn tuner<S: Into<String>>(msg: S) -> Self {
        Error::Tuner(msg.into())
    }

    /// Create a source error with a custom message
    pub fn channel_source<S: Into<String>>(msg: S) -> Self {
        Error::Source(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// True when the error was caused by a locked frequency controller
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Locked)
    }
}
