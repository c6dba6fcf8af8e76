//! Error types for the Pendula core crate.
//!
//! Each concern gets its own enum so call sites can apply the
//! degrade-and-continue policy explicitly instead of catching blindly.

use thiserror::Error;

// ============================================================================
// Wire Protocol Errors
// ============================================================================

/// Errors raised while parsing sensor-board packets and replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not enough bytes to hold the structure being parsed
    #[error("incomplete packet: got {received} bytes, need {expected}")]
    IncompletePacket {
        /// Bytes available
        received: usize,
        /// Bytes required
        expected: usize,
    },

    /// Sync bytes at the packet start do not match the header constant
    #[error("invalid sync bytes: got 0x{got_0:02X} 0x{got_1:02X}")]
    InvalidSync {
        /// First byte observed
        got_0: u8,
        /// Second byte observed
        got_1: u8,
    },

    /// Slave-enumeration reply did not match the `!C` layout
    #[error("malformed enumeration reply: {reason}")]
    MalformedReply {
        /// What was wrong with the reply
        reason: &'static str,
    },
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Filter Construction Errors
// ============================================================================

/// Errors raised when a digital filter is constructed with bad parameters.
///
/// These are the one class of failure that surfaces synchronously: the set of
/// valid designs is known at construction time, so a bad cutoff or order is a
/// programming error rather than a runtime condition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// Cutoff frequency is outside (0, Nyquist)
    #[error("cutoff {cutoff_hz} Hz invalid for sample rate {sample_rate_hz} Hz")]
    InvalidCutoff {
        /// Requested cutoff in Hz
        cutoff_hz: f64,
        /// Sampling rate in Hz
        sample_rate_hz: f64,
    },

    /// Butterworth order must be a nonzero even number (biquad cascade)
    #[error("filter order must be even and nonzero, got {order}")]
    InvalidOrder {
        /// Requested order
        order: usize,
    },

    /// Band edges reversed or degenerate
    #[error("band edges reversed: low {low_hz} Hz >= high {high_hz} Hz")]
    InvalidBand {
        /// Lower band edge in Hz
        low_hz: f64,
        /// Upper band edge in Hz
        high_hz: f64,
    },

    /// FIR tap count must be odd so the filter has a symmetric center tap
    #[error("FIR tap count must be odd and >= 3, got {taps}")]
    InvalidTapCount {
        /// Requested tap count
        taps: usize,
    },
}

// ============================================================================
// Stimulation Engine Errors
// ============================================================================

/// Errors raised when the stimulation engine is configured with bad values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// The ease-out exponent needs a half-span of at least 2 LEDs
    #[error("led count {led_num} too small, need at least 4")]
    LedCountTooSmall {
        /// Requested LED count
        led_num: u16,
    },

    /// Sweep speed must be a positive number of cycles per minute
    #[error("sweep speed must be positive, got {speed_cpm}")]
    InvalidSpeed {
        /// Requested speed in cycles per minute
        speed_cpm: f64,
    },
}
