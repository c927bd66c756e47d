//! Ducking Engine
//!
//! Each playing sound with a ducking envelope owns one [`DuckingState`].
//! The envelope is driven by the sound's own sample position while it plays,
//! and free-runs on the engine clock once the sound stops, so a release that
//! extends past the end of the sound still completes.
//!
//! Multiple envelopes on the same target combine multiplicatively.

use crate::instance::SoundInstanceId;
use crate::sound::DuckingEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuckingPhase {
    Idle,
    Delay,
    Attack,
    Sustained,
    Release,
}

/// Envelope progress for one sound instance
#[derive(Debug, Clone)]
pub struct DuckingState {
    instance_id: SoundInstanceId,
    envelope: DuckingEnvelope,
    phase: DuckingPhase,
    level: f32,
    phase_elapsed: u64,
    position: u64,
    release_at: Option<u64>,
    release_from: f32,
    free_running: bool,
}

impl DuckingState {
    /// `end` is the number of samples until the sound's natural end, or `None`
    /// when it loops forever.
    pub fn new(instance_id: SoundInstanceId, envelope: DuckingEnvelope, end: Option<u64>) -> Self {
        let release_at = end.map(|e| e.saturating_sub(envelope.release_point.samples()));
        let phase = if envelope.delay.is_zero() {
            DuckingPhase::Attack
        } else {
            DuckingPhase::Delay
        };
        Self {
            instance_id,
            envelope,
            phase,
            level: 1.0,
            phase_elapsed: 0,
            position: 0,
            release_at,
            release_from: 1.0,
            free_running: false,
        }
    }

    /// Advance the envelope by `samples`
    pub fn advance(&mut self, mut samples: u64) {
        while self.phase != DuckingPhase::Idle {
            if self.phase != DuckingPhase::Release {
                if let Some(release_at) = self.release_at {
                    if self.position >= release_at {
                        self.begin_release();
                        continue;
                    }
                }
            }
            if samples == 0 {
                break;
            }

            let phase_left = match self.phase {
                DuckingPhase::Delay => self.envelope.delay.samples() - self.phase_elapsed,
                DuckingPhase::Attack => self.envelope.attack.samples().max(1) - self.phase_elapsed,
                DuckingPhase::Release => self.envelope.release.samples().max(1) - self.phase_elapsed,
                DuckingPhase::Sustained => u64::MAX,
                DuckingPhase::Idle => 0,
            };
            let until_release = match (self.phase, self.release_at) {
                (DuckingPhase::Release, _) | (_, None) => u64::MAX,
                (_, Some(release_at)) => release_at - self.position,
            };

            let step = samples.min(phase_left).min(until_release);
            self.phase_elapsed += step;
            self.position += step;
            samples -= step;

            match self.phase {
                DuckingPhase::Delay => {
                    if self.phase_elapsed >= self.envelope.delay.samples() {
                        self.enter(DuckingPhase::Attack);
                    }
                }
                DuckingPhase::Attack => {
                    let attack = self.envelope.attack.samples().max(1);
                    let progress = self.phase_elapsed as f32 / attack as f32;
                    self.level = 1.0 + (self.envelope.attenuation - 1.0) * progress.min(1.0);
                    if self.phase_elapsed >= attack {
                        self.level = self.envelope.attenuation;
                        self.enter(DuckingPhase::Sustained);
                    }
                }
                DuckingPhase::Release => {
                    let release = self.envelope.release.samples().max(1);
                    let progress = self.phase_elapsed as f32 / release as f32;
                    self.level = self.release_from + (1.0 - self.release_from) * progress.min(1.0);
                    if self.phase_elapsed >= release {
                        self.level = 1.0;
                        self.enter(DuckingPhase::Idle);
                    }
                }
                DuckingPhase::Sustained | DuckingPhase::Idle => {}
            }
        }
    }

    fn enter(&mut self, phase: DuckingPhase) {
        self.phase = phase;
        self.phase_elapsed = 0;
    }

    /// Start the release from the current level
    pub fn begin_release(&mut self) {
        match self.phase {
            DuckingPhase::Release | DuckingPhase::Idle => {}
            DuckingPhase::Delay => {
                // Never ducked
                self.level = 1.0;
                self.enter(DuckingPhase::Idle);
            }
            DuckingPhase::Attack | DuckingPhase::Sustained => {
                self.release_from = self.level;
                self.enter(DuckingPhase::Release);
            }
        }
    }

    /// Update the natural end after a loop count change
    pub fn set_end(&mut self, end: Option<u64>) {
        self.release_at = end.map(|e| {
            (self.position + e).saturating_sub(self.envelope.release_point.samples())
        });
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn phase(&self) -> DuckingPhase {
        self.phase
    }

    #[inline]
    pub fn target_track(&self) -> &str {
        &self.envelope.target_track
    }

    #[inline]
    pub fn instance_id(&self) -> SoundInstanceId {
        self.instance_id
    }
}

/// All active ducking envelopes
#[derive(Debug, Default)]
pub struct DuckingEngine {
    active: Vec<DuckingState>,
}

impl DuckingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ducking for a sound instance
    pub fn attach(&mut self, instance_id: SoundInstanceId, envelope: DuckingEnvelope, end: Option<u64>) {
        log::debug!(
            "[DuckingEngine] Instance {} ducks '{}' to {}",
            instance_id,
            envelope.target_track,
            envelope.attenuation
        );
        self.active.push(DuckingState::new(instance_id, envelope, end));
    }

    /// Advance the envelope of a playing instance by the samples it played
    pub fn advance_instance(&mut self, instance_id: SoundInstanceId, samples: u64) {
        for state in self.active.iter_mut().filter(|s| s.instance_id == instance_id && !s.free_running) {
            state.advance(samples);
        }
    }

    /// The instance stopped or ended; release and let the envelope free-run
    pub fn release(&mut self, instance_id: SoundInstanceId) {
        for state in self.active.iter_mut().filter(|s| s.instance_id == instance_id) {
            state.begin_release();
            state.free_running = true;
        }
    }

    pub fn set_end(&mut self, instance_id: SoundInstanceId, end: Option<u64>) {
        for state in self.active.iter_mut().filter(|s| s.instance_id == instance_id) {
            state.set_end(end);
        }
    }

    /// Advance free-running envelopes and drop finished ones
    pub fn process(&mut self, samples: u64) {
        for state in self.active.iter_mut().filter(|s| s.free_running) {
            state.advance(samples);
        }
        self.active.retain(|s| s.phase != DuckingPhase::Idle);
    }

    /// Combined ducking gain for a track (1.0 when nothing ducks it)
    pub fn gain_for(&self, track: &str) -> f32 {
        self.active
            .iter()
            .filter(|s| s.target_track().eq_ignore_ascii_case(track))
            .map(DuckingState::gain)
            .product::<f32>()
            .clamp(0.0, 1.0)
    }

    pub fn state(&self, instance_id: SoundInstanceId) -> Option<&DuckingState> {
        self.active.iter().find(|s| s.instance_id == instance_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use mc_core::SampleDuration;

    fn envelope(delay: u64, attack: u64, attenuation: f32, release_point: u64, release: u64) -> DuckingEnvelope {
        DuckingEnvelope {
            target_track: "music".into(),
            delay: SampleDuration(delay),
            attack: SampleDuration(attack),
            attenuation,
            release_point: SampleDuration(release_point),
            release: SampleDuration(release),
        }
    }

    #[test]
    fn test_envelope_shape() {
        // 1000-sample sound: delay 100, attack 100, release starts at 700, lasts 200
        let mut state = DuckingState::new(1, envelope(100, 100, 0.2, 300, 200), Some(1000));

        state.advance(100);
        assert_eq!(state.phase(), DuckingPhase::Attack);
        assert_abs_diff_eq!(state.gain(), 1.0);

        state.advance(50);
        assert_abs_diff_eq!(state.gain(), 0.6, epsilon = 1e-6);

        state.advance(50);
        assert_eq!(state.phase(), DuckingPhase::Sustained);
        assert_abs_diff_eq!(state.gain(), 0.2);

        state.advance(500);
        assert_eq!(state.phase(), DuckingPhase::Release);

        state.advance(100);
        assert_abs_diff_eq!(state.gain(), 0.6, epsilon = 1e-6);

        state.advance(100);
        assert_eq!(state.phase(), DuckingPhase::Idle);
        assert_abs_diff_eq!(state.gain(), 1.0);
    }

    #[test]
    fn test_large_step_crosses_phases() {
        let mut state = DuckingState::new(1, envelope(0, 10, 0.5, 0, 10), Some(100));
        state.advance(100);
        assert_eq!(state.phase(), DuckingPhase::Release);
        assert_abs_diff_eq!(state.gain(), 0.5);
    }

    #[test]
    fn test_infinite_loop_never_releases() {
        let mut state = DuckingState::new(1, envelope(0, 10, 0.5, 0, 10), None);
        state.advance(1_000_000);
        assert_eq!(state.phase(), DuckingPhase::Sustained);
    }

    #[test]
    fn test_early_stop_releases_from_current_level() {
        let mut engine = DuckingEngine::new();
        engine.attach(7, envelope(0, 100, 0.0, 0, 100), None);
        engine.advance_instance(7, 50);
        assert_abs_diff_eq!(engine.gain_for("music"), 0.5);

        engine.release(7);
        engine.process(50);
        assert_abs_diff_eq!(engine.gain_for("music"), 0.75);

        engine.process(50);
        assert_abs_diff_eq!(engine.gain_for("music"), 1.0);
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_release_during_delay_goes_idle() {
        let mut engine = DuckingEngine::new();
        engine.attach(3, envelope(100, 10, 0.5, 0, 10), None);
        engine.release(3);
        engine.process(1);
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_envelopes_combine_multiplicatively() {
        let mut engine = DuckingEngine::new();
        engine.attach(1, envelope(0, 10, 0.5, 0, 10), None);
        engine.attach(2, envelope(0, 10, 0.4, 0, 10), None);
        engine.advance_instance(1, 10);
        engine.advance_instance(2, 10);

        assert_abs_diff_eq!(engine.gain_for("music"), 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(engine.gain_for("MUSIC"), 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(engine.gain_for("sfx"), 1.0);
    }

    #[test]
    fn test_set_end_after_stop_looping() {
        let mut state = DuckingState::new(1, envelope(0, 10, 0.5, 0, 10), None);
        state.advance(500);
        state.set_end(Some(20));
        state.advance(20);
        assert_eq!(state.phase(), DuckingPhase::Release);
    }
}
