//! mc-core: Shared types and utilities for the media controller crates
//!
//! Sample-accurate time types, config value parsing (time strings, gain
//! strings) and the core error type.

mod error;
mod time;
mod value;

pub use error::*;
pub use time::*;
pub use value::*;

/// Default output sample rate of the sound system
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Validate a sample rate accepted by the mixer
pub fn validate_sample_rate(sample_rate: u32) -> McResult<u32> {
    match sample_rate {
        8000..=384000 => Ok(sample_rate),
        other => Err(McError::InvalidSampleRate(other)),
    }
}
