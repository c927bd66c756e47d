//! Time-related types for sample-accurate scheduling

use serde::{Deserialize, Serialize};

/// Sample position in a sound or on the engine clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: u32) -> Self {
        Self(seconds_to_samples(seconds, sample_rate))
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: u32) -> f64 {
        self.0 as f64 / sample_rate as f64
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for SamplePosition {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Time duration in samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleDuration(pub u64);

impl SampleDuration {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: u32) -> Self {
        Self(seconds_to_samples(seconds, sample_rate))
    }

    #[inline]
    pub fn from_ms(ms: f64, sample_rate: u32) -> Self {
        Self::from_seconds(ms / 1000.0, sample_rate)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: u32) -> f64 {
        self.0 as f64 / sample_rate as f64
    }

    #[inline]
    pub fn to_ms(self, sample_rate: u32) -> f64 {
        self.to_seconds(sample_rate) * 1000.0
    }

    #[inline]
    pub fn samples(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Clamp to a lower bound
    #[inline]
    pub fn at_least(self, floor: SampleDuration) -> Self {
        Self(self.0.max(floor.0))
    }
}

/// Convert seconds to a whole number of samples (negative input clamps to 0)
#[inline]
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as u64
}

/// Tempo in BPM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo(pub f64);

impl Tempo {
    pub const DEFAULT: Self = Self(120.0);

    /// Slowest tempo accepted for a beat grid
    pub const MIN_BPM: f64 = 1.0;

    #[inline]
    pub fn beat_duration_samples(self, sample_rate: u32) -> f64 {
        (60.0 / self.0.max(Self::MIN_BPM)) * sample_rate as f64
    }

    #[inline]
    pub fn bar_duration_samples(self, sample_rate: u32, beats_per_bar: u32) -> f64 {
        self.beat_duration_samples(sample_rate) * beats_per_bar as f64
    }

    /// Beat grid rounded to whole samples (never zero)
    #[inline]
    pub fn beat_grid(self, sample_rate: u32) -> SampleDuration {
        SampleDuration((self.beat_duration_samples(sample_rate).round() as u64).max(1))
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Samples remaining until the next multiple of `grid` at or after `position`
///
/// A position sitting exactly on a grid line returns 0.
#[inline]
pub fn samples_to_next_boundary(position: u64, grid: u64) -> u64 {
    if grid == 0 {
        return 0;
    }
    let offset = position % grid;
    if offset == 0 { 0 } else { grid - offset }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_samples_rounds() {
        assert_eq!(seconds_to_samples(0.3, 44100), 13230);
        assert_eq!(seconds_to_samples(0.5, 48000), 24000);
        assert_eq!(seconds_to_samples(-1.0, 48000), 0);
        assert_eq!(seconds_to_samples(f64::NAN, 48000), 0);
    }

    #[test]
    fn test_duration_conversions() {
        let d = SampleDuration::from_ms(10.0, 44100);
        assert_eq!(d.samples(), 441);
        assert!((d.to_ms(44100) - 10.0).abs() < 1e-9);
        assert_eq!(SampleDuration(5).at_least(SampleDuration(441)), SampleDuration(441));
    }

    #[test]
    fn test_position_arithmetic() {
        let mut p = SamplePosition::ZERO;
        p.advance(100);
        assert_eq!(p + 50, SamplePosition(150));
        assert_eq!(SamplePosition(10) - SamplePosition(20), 0);
    }

    #[test]
    fn test_beat_grid() {
        // 120 BPM at 48kHz: 0.5s per beat
        assert_eq!(Tempo(120.0).beat_grid(48000), SampleDuration(24000));
        assert_eq!(Tempo(130.0).bar_duration_samples(44100, 4).round(), 81415.0);
    }

    #[test]
    fn test_next_boundary() {
        assert_eq!(samples_to_next_boundary(0, 100), 0);
        assert_eq!(samples_to_next_boundary(20, 50), 30);
        assert_eq!(samples_to_next_boundary(100, 50), 0);
        assert_eq!(samples_to_next_boundary(7, 0), 0);
    }
}
