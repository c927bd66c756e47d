//! Error types for the media controller core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum McError {
    #[error("Invalid time value: {0}")]
    InvalidTime(String),

    #[error("Invalid gain value: {0}")]
    InvalidGain(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Result type alias
pub type McResult<T> = Result<T, McError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_bad_value() {
        assert_eq!(McError::InvalidTime("3 parsecs".into()).to_string(), "Invalid time value: 3 parsecs");
        assert_eq!(McError::InvalidGain("loud".into()).to_string(), "Invalid gain value: loud");
        assert_eq!(McError::InvalidSampleRate(7).to_string(), "Invalid sample rate: 7");
    }
}
