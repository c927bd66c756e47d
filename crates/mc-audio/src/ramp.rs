//! Linear gain ramps
//!
//! Used for sound fades, track volume changes and layer fades. Ramps are
//! advanced in whole samples by the control thread.

/// Gain value with linear interpolation state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    current: f32,
    start: f32,
    target: f32,
    total: u64,
    elapsed: u64,
}

impl GainRamp {
    /// Create a ramp resting at `value`
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            start: value,
            target: value,
            total: 0,
            elapsed: 0,
        }
    }

    /// Jump to a value immediately
    pub fn set(&mut self, value: f32) {
        *self = Self::new(value);
    }

    /// Start a ramp from the current value to `target` over `samples`
    ///
    /// A zero-length ramp jumps straight to the target.
    pub fn ramp_to(&mut self, target: f32, samples: u64) {
        if samples == 0 {
            self.set(target);
            return;
        }
        self.start = self.current;
        self.target = target;
        self.total = samples;
        self.elapsed = 0;
    }

    /// Advance the ramp; returns true when the ramp finished during this call
    pub fn update(&mut self, samples: u64) -> bool {
        if !self.is_ramping() {
            return false;
        }

        self.elapsed = (self.elapsed + samples).min(self.total);
        if self.elapsed >= self.total {
            self.current = self.target;
            self.total = 0;
            self.elapsed = 0;
            return true;
        }

        let progress = self.elapsed as f32 / self.total as f32;
        self.current = self.start + (self.target - self.start) * progress;
        false
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.total > 0
    }

    /// Samples left in the active ramp
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.total - self.elapsed
    }

    /// Length of the active ramp
    #[inline]
    pub fn length(&self) -> u64 {
        self.total
    }
}

impl Default for GainRamp {
    fn default() -> Self {
        Self::new(1.0)
    }
}
