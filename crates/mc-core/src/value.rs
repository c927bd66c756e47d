//! Config value parsing
//!
//! Machine configs express durations as plain numbers (seconds) or strings
//! such as `"10ms"`, `"2 sec"` or `"1.5s"`, and gains as plain numbers or
//! decibel strings such as `"-4.5 db"`.

use crate::error::{McError, McResult};
use crate::time::SampleDuration;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// TIME VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// Duration as written in a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    /// Plain number, in seconds
    Seconds(f64),
    /// Time string with an optional unit suffix
    Text(String),
}

impl TimeValue {
    /// Resolve to seconds
    pub fn to_seconds(&self) -> McResult<f64> {
        match self {
            TimeValue::Seconds(secs) => {
                if secs.is_finite() {
                    Ok(*secs)
                } else {
                    Err(McError::InvalidTime(secs.to_string()))
                }
            }
            TimeValue::Text(text) => parse_time_str(text),
        }
    }

    /// Resolve to samples at the given rate (negative values clamp to 0)
    pub fn to_samples(&self, sample_rate: u32) -> McResult<SampleDuration> {
        Ok(SampleDuration::from_seconds(self.to_seconds()?, sample_rate))
    }
}

impl From<f64> for TimeValue {
    fn from(secs: f64) -> Self {
        TimeValue::Seconds(secs)
    }
}

impl From<&str> for TimeValue {
    fn from(text: &str) -> Self {
        TimeValue::Text(text.to_string())
    }
}

/// Parse a time string into seconds
///
/// Accepted units: `ms`, `s`, `sec`, `secs`, `second(s)`, `m`, `min`,
/// `minute(s)`. A bare number is seconds.
pub fn parse_time_str(text: &str) -> McResult<f64> {
    let trimmed = text.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(McError::InvalidTime(text.to_string()));
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| McError::InvalidTime(text.to_string()))?;

    let scale = match unit.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "ms" | "msec" | "msecs" => 0.001,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        _ => return Err(McError::InvalidTime(text.to_string())),
    };

    Ok(value * scale)
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAIN VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// Gain as written in a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GainValue {
    /// Linear gain
    Linear(f32),
    /// `"0.5"` or `"-6 db"`
    Text(String),
}

impl GainValue {
    /// Resolve to linear gain, clamped to [0.0, 1.0]
    pub fn to_gain(&self) -> McResult<f32> {
        let gain = match self {
            GainValue::Linear(gain) => *gain,
            GainValue::Text(text) => parse_gain_str(text)?,
        };
        if gain.is_finite() {
            Ok(gain.clamp(0.0, 1.0))
        } else {
            Err(McError::InvalidGain(format!("{gain}")))
        }
    }
}

impl From<f32> for GainValue {
    fn from(gain: f32) -> Self {
        GainValue::Linear(gain)
    }
}

/// Parse a gain string (linear number or decibels) into linear gain
///
/// The result is not clamped; positive decibel values exceed 1.0.
pub fn parse_gain_str(text: &str) -> McResult<f32> {
    let trimmed = text.trim().to_ascii_lowercase();

    if let Some(db) = trimmed.strip_suffix("db") {
        let db: f32 = db
            .trim()
            .parse()
            .map_err(|_| McError::InvalidGain(text.to_string()))?;
        return Ok(db_to_gain(db));
    }

    trimmed
        .parse()
        .map_err(|_| McError::InvalidGain(text.to_string()))
}

/// Convert dB to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear gain to dB (silence maps to negative infinity)
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parse_time_units() {
        assert_abs_diff_eq!(parse_time_str("10ms").unwrap(), 0.01);
        assert_abs_diff_eq!(parse_time_str("10 ms").unwrap(), 0.01);
        assert_abs_diff_eq!(parse_time_str("2 sec").unwrap(), 2.0);
        assert_abs_diff_eq!(parse_time_str("1.5s").unwrap(), 1.5);
        assert_abs_diff_eq!(parse_time_str("0.75").unwrap(), 0.75);
        assert_abs_diff_eq!(parse_time_str("1m").unwrap(), 60.0);
        assert_abs_diff_eq!(parse_time_str("-1s").unwrap(), -1.0);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time_str("").is_err());
        assert!(parse_time_str("fast").is_err());
        assert!(parse_time_str("10 parsecs").is_err());
    }

    #[test]
    fn test_time_value_to_samples() {
        let value = TimeValue::from("10ms");
        assert_eq!(value.to_samples(44100).unwrap(), SampleDuration(441));

        let value = TimeValue::from(0.5);
        assert_eq!(value.to_samples(48000).unwrap(), SampleDuration(24000));
    }

    #[test]
    fn test_time_value_deserialize() {
        let v: Vec<TimeValue> = serde_json::from_str(r#"[1.25, "500ms"]"#).unwrap();
        assert_eq!(v[0], TimeValue::Seconds(1.25));
        assert_eq!(v[1], TimeValue::Text("500ms".into()));
    }

    #[test]
    fn test_parse_gain() {
        assert_abs_diff_eq!(parse_gain_str("0.5").unwrap(), 0.5);
        assert_abs_diff_eq!(parse_gain_str("-6 db").unwrap(), 0.501_187, epsilon = 1e-5);
        assert_abs_diff_eq!(parse_gain_str("0dB").unwrap(), 1.0);
        assert!(parse_gain_str("loud").is_err());
    }

    #[test]
    fn test_gain_value_clamps() {
        assert_abs_diff_eq!(GainValue::Text("+6 db".into()).to_gain().unwrap(), 1.0);
        assert_abs_diff_eq!(GainValue::Linear(-0.2).to_gain().unwrap(), 0.0);
    }

    #[test]
    fn test_db_roundtrip_points() {
        assert_abs_diff_eq!(gain_to_db(1.0), 0.0);
        assert!(gain_to_db(0.0).is_infinite());
        assert_abs_diff_eq!(db_to_gain(-20.0), 0.1, epsilon = 1e-6);
    }
}
