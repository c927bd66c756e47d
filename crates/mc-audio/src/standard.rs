//! Standard track: a bounded set of concurrent sounds plus a priority queue
//!
//! ```text
//!  play(request)
//!     │
//!     ├─ simultaneous_limit reached? ── skip / steal oldest / steal newest
//!     ├─ free slot?                  ── start
//!     ├─ lower priority playing?     ── pre-empt lowest (oldest among equals), start
//!     ├─ max_queue_time == 0?        ── drop
//!     └─ otherwise                   ── queue (priority, then FIFO)
//! ```
//!
//! Instances that are fading out live in a separate list and do not hold a
//! slot.

use crate::instance::{Context, SoundInstance, SoundInstanceId, SoundInstanceState};
use crate::playback::{
    ProcessContext, TrackHandle, advance_instance, notify_stopped, start_instance, stop_instance,
    stop_looping_instance,
};
use crate::queue::SoundQueue;
use crate::sound::{ModeEndAction, StealingMethod};
use crate::{AudioError, AudioResult};
use mc_core::SampleDuration;
use serde::{Deserialize, Serialize};

/// Result of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started(SoundInstanceId),
    Queued(SoundInstanceId),
    /// Dropped (stealing method `skip`, or no wait allowed)
    Skipped,
}

impl PlayOutcome {
    pub fn instance_id(&self) -> Option<SoundInstanceId> {
        match self {
            PlayOutcome::Started(id) | PlayOutcome::Queued(id) => Some(*id),
            PlayOutcome::Skipped => None,
        }
    }
}

/// Which instances a stop request applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTarget {
    Instance(SoundInstanceId),
    Key(String),
    Sound(String),
}

impl StopTarget {
    pub fn matches(&self, instance: &SoundInstance) -> bool {
        match self {
            StopTarget::Instance(id) => instance.id() == *id,
            StopTarget::Key(key) => instance.key() == Some(key.as_str()),
            StopTarget::Sound(name) => instance.name() == name,
        }
    }
}

/// Snapshot of one instance on a track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundStatus {
    pub instance_id: SoundInstanceId,
    pub sound: String,
    pub state: SoundInstanceState,
    pub priority: i32,
    pub position: u64,
    pub loops_remaining: i32,
    pub key: Option<String>,
}

impl From<&SoundInstance> for SoundStatus {
    fn from(instance: &SoundInstance) -> Self {
        Self {
            instance_id: instance.id(),
            sound: instance.name().to_string(),
            state: instance.state(),
            priority: instance.priority(),
            position: instance.position(),
            loops_remaining: instance.loops_remaining(),
            key: instance.key().map(str::to_string),
        }
    }
}

#[derive(Debug)]
pub struct StandardTrack {
    handle: TrackHandle,
    max_simultaneous_sounds: usize,
    /// In start order
    playing: Vec<SoundInstance>,
    stopping: Vec<SoundInstance>,
    queue: SoundQueue,
}

impl StandardTrack {
    pub fn new(handle: TrackHandle, max_simultaneous_sounds: usize) -> Self {
        Self {
            handle,
            max_simultaneous_sounds: max_simultaneous_sounds.max(1),
            playing: Vec::new(),
            stopping: Vec::new(),
            queue: SoundQueue::new(),
        }
    }

    /// Play, pre-empt or queue a sound instance
    pub fn play(&mut self, instance: SoundInstance, ctx: &mut ProcessContext<'_>) -> AudioResult<PlayOutcome> {
        Self::validate_request(&instance)?;

        let descriptor = std::sync::Arc::clone(instance.descriptor());
        if let Some(limit) = descriptor.simultaneous_limit {
            let same: Vec<usize> = self
                .playing
                .iter()
                .enumerate()
                .filter(|(_, i)| i.name() == descriptor.name)
                .map(|(idx, _)| idx)
                .collect();
            if same.len() >= limit as usize {
                let victim = match descriptor.stealing_method {
                    StealingMethod::Skip => {
                        log::debug!(
                            "[Track:{}] '{}' at simultaneous limit {}, skipping",
                            self.handle.name,
                            descriptor.name,
                            limit
                        );
                        return Ok(PlayOutcome::Skipped);
                    }
                    StealingMethod::Oldest => same.first().copied(),
                    StealingMethod::Newest => same.last().copied(),
                };
                if let Some(idx) = victim {
                    self.retire(idx, None, ctx);
                }
            }
        }

        let id = instance.id();
        if self.playing.len() < self.max_simultaneous_sounds {
            self.start(instance, ctx.now, ctx);
            return Ok(PlayOutcome::Started(id));
        }

        let lowest = self
            .playing
            .iter()
            .enumerate()
            .min_by_key(|(_, i)| i.priority())
            .map(|(idx, i)| (idx, i.priority()));
        if let Some((idx, priority)) = lowest {
            if priority < instance.priority() {
                log::debug!(
                    "[Track:{}] '{}' (priority {}) pre-empts '{}' (priority {})",
                    self.handle.name,
                    instance.name(),
                    instance.priority(),
                    self.playing[idx].name(),
                    priority
                );
                self.retire(idx, None, ctx);
                self.start(instance, ctx.now, ctx);
                return Ok(PlayOutcome::Started(id));
            }
        }

        if instance.settings().max_queue_time == Some(SampleDuration::ZERO) {
            log::debug!(
                "[Track:{}] No free slot for '{}' and no wait allowed, dropping",
                self.handle.name,
                instance.name()
            );
            return Ok(PlayOutcome::Skipped);
        }

        log::debug!("[Track:{}] Queueing '{}' (instance {})", self.handle.name, instance.name(), id);
        self.queue.push(instance, ctx.now);
        Ok(PlayOutcome::Queued(id))
    }

    fn validate_request(instance: &SoundInstance) -> AudioResult<()> {
        let settings = instance.settings();
        if !settings.volume.is_finite() {
            return Err(AudioError::InvalidSoundRequest(format!(
                "'{}': volume is not a number",
                instance.name()
            )));
        }
        if instance.length() > 0 && settings.start_at.samples() >= instance.length() {
            return Err(AudioError::InvalidSoundRequest(format!(
                "'{}': start_at is beyond the end of the sound",
                instance.name()
            )));
        }
        Ok(())
    }

    fn start(&mut self, mut instance: SoundInstance, now: u64, ctx: &mut ProcessContext<'_>) {
        start_instance(&mut instance, now, &self.handle, ctx);
        self.playing.push(instance);
    }

    /// Move a playing instance to the stopping list
    fn retire(&mut self, idx: usize, fade: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) {
        let mut instance = self.playing.remove(idx);
        let fade = fade.unwrap_or(instance.settings().fade_out).samples();
        stop_instance(&mut instance, fade, ctx);
        notify_stopped(&mut instance, &self.handle, ctx);
        self.stopping.push(instance);
    }

    /// Start queued requests while slots are free
    fn fill_slots(&mut self, now: u64, ctx: &mut ProcessContext<'_>) {
        for expired in self.queue.expire(now) {
            log::debug!(
                "[Track:{}] Queued '{}' expired before a slot freed up",
                self.handle.name,
                expired.name()
            );
        }
        while self.playing.len() < self.max_simultaneous_sounds {
            let Some(instance) = self.queue.pop() else {
                break;
            };
            self.start(instance, now, ctx);
        }
    }

    /// Stop matching instances; queued matches are removed. Returns the count.
    pub fn stop(&mut self, target: &StopTarget, fade: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) -> usize {
        let mut count = 0;
        let mut idx = 0;
        while idx < self.playing.len() {
            if target.matches(&self.playing[idx]) {
                self.retire(idx, fade, ctx);
                count += 1;
            } else {
                idx += 1;
            }
        }

        count += self.queue.remove_where(|i| target.matches(i)).len();

        if let Some(fade) = fade {
            // A shorter fade speeds up instances already on their way out
            for instance in self.stopping.iter_mut().filter(|i| target.matches(i)) {
                instance.fade_to(0.0, fade.samples());
            }
        }

        self.fill_slots(ctx.now, ctx);
        count
    }

    /// Let matching instances finish their current loop
    pub fn stop_looping(&mut self, target: &StopTarget, ctx: &mut ProcessContext<'_>) -> usize {
        let mut count = 0;
        for instance in self.playing.iter_mut().filter(|i| target.matches(i)) {
            stop_looping_instance(instance, ctx);
            count += 1;
        }
        self.queue.for_each_mut(|instance| {
            if target.matches(instance) {
                instance.stop_looping();
                count += 1;
            }
        });
        count
    }

    /// Stop everything and clear the queue
    pub fn stop_all_sounds(&mut self, fade: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) {
        while !self.playing.is_empty() {
            self.retire(0, fade, ctx);
        }
        let dropped = self.queue.clear();
        if !dropped.is_empty() {
            log::debug!("[Track:{}] Cleared {} queued sounds", self.handle.name, dropped.len());
        }
    }

    /// Wind down everything started by `context`
    pub fn clear_context(&mut self, context: &Context, ctx: &mut ProcessContext<'_>) {
        let mut idx = 0;
        while idx < self.playing.len() {
            if self.playing[idx].context() != Some(context) {
                idx += 1;
                continue;
            }
            let action = self.playing[idx].settings().mode_end_action;
            match action {
                ModeEndAction::Stop => self.retire(idx, None, ctx),
                ModeEndAction::StopLooping => {
                    stop_looping_instance(&mut self.playing[idx], ctx);
                    idx += 1;
                }
            }
        }
        self.queue.remove_where(|i| i.context() == Some(context));
        self.fill_slots(ctx.now, ctx);
    }

    /// Advance every instance by `samples`
    pub fn process(&mut self, samples: u64, ctx: &mut ProcessContext<'_>) {
        let mut idx = 0;
        while idx < self.playing.len() {
            let report = advance_instance(&mut self.playing[idx], samples, &self.handle, ctx);
            if report.finished {
                let mut instance = self.playing.remove(idx);
                notify_stopped(&mut instance, &self.handle, ctx);
            } else {
                idx += 1;
            }
        }

        for instance in &mut self.stopping {
            instance.advance(samples);
        }
        self.stopping.retain(|i| !i.state().is_finished());

        self.fill_slots(ctx.now + samples, ctx);
    }

    // Queries

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    pub fn stopping_count(&self) -> usize {
        self.stopping.len()
    }

    pub fn sound_queue_count(&self) -> usize {
        self.queue.len()
    }

    pub fn max_simultaneous_sounds(&self) -> usize {
        self.max_simultaneous_sounds
    }

    pub fn sound_is_in_queue(&self, sound: &str) -> bool {
        self.queue.contains_sound(sound)
    }

    pub fn sound_is_playing(&self, sound: &str) -> bool {
        self.playing.iter().any(|i| i.name() == sound)
    }

    pub fn instance(&self, id: SoundInstanceId) -> Option<&SoundInstance> {
        self.playing
            .iter()
            .chain(self.stopping.iter())
            .chain(self.queue.iter().map(|r| &r.instance))
            .find(|i| i.id() == id)
    }

    pub fn instance_state(&self, id: SoundInstanceId) -> Option<SoundInstanceState> {
        self.instance(id).map(SoundInstance::state)
    }

    /// Playing, then stopping, then queued (highest priority first)
    pub fn get_status(&self) -> Vec<SoundStatus> {
        let mut queued: Vec<_> = self.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));

        self.playing
            .iter()
            .chain(self.stopping.iter())
            .chain(queued.into_iter().map(|r| &r.instance))
            .map(SoundStatus::from)
            .collect()
    }

    pub fn handle(&self) -> &TrackHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducking::DuckingEngine;
    use crate::events::{AudioEvent, EventQueue};
    use crate::mixer::create_mixer_link;
    use crate::settings::{PlaybackSettingsOverride, SoundDefaults, resolve_settings};
    use crate::sound::{SoundDescriptor, SoundLibrary};
    use std::sync::Arc;

    const SR: u32 = 1000;

    struct Harness {
        events: EventQueue,
        ducking: DuckingEngine,
        mixer: crate::mixer::MixerLink,
        sounds: SoundLibrary,
        now: u64,
    }

    impl Harness {
        fn new() -> Self {
            let (mixer, _endpoint) = create_mixer_link(256);
            Self {
                events: EventQueue::new(256),
                ducking: DuckingEngine::new(),
                mixer,
                sounds: SoundLibrary::new(),
                now: 0,
            }
        }

        fn ctx(&mut self) -> ProcessContext<'_> {
            ProcessContext {
                now: self.now,
                sample_rate: SR,
                events: &mut self.events,
                ducking: &mut self.ducking,
                mixer: &self.mixer,
                sounds: &self.sounds,
            }
        }

        fn names(&mut self) -> Vec<String> {
            self.events.drain().into_iter().map(|e: AudioEvent| e.name).collect()
        }
    }

    fn instance(desc: &Arc<SoundDescriptor>) -> SoundInstance {
        let none = PlaybackSettingsOverride::default();
        let settings = resolve_settings(&none, &none, desc, &SoundDefaults::default(), SR);
        SoundInstance::new(Arc::clone(desc), settings, None)
    }

    fn sound(name: &str, len: u64, priority: i32) -> Arc<SoundDescriptor> {
        Arc::new(SoundDescriptor::new(name, "sfx", SampleDuration(len)).with_priority(priority))
    }

    #[test]
    fn test_preempts_lower_priority() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);

        let low = track.play(instance(&sound("low", 1000, 1)), &mut h.ctx()).unwrap();
        let high = track.play(instance(&sound("high", 1000, 5)), &mut h.ctx()).unwrap();

        let low_id = low.instance_id().unwrap();
        assert!(matches!(high, PlayOutcome::Started(_)));
        assert_eq!(track.instance_state(low_id), Some(SoundInstanceState::Stopping));
        assert_eq!(h.names(), vec!["low_played", "low_stopped", "high_played"]);
    }

    #[test]
    fn test_equal_priority_queues_then_plays() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);

        track.play(instance(&sound("beep", 100, 0)), &mut h.ctx()).unwrap();
        let boop = track.play(instance(&sound("boop", 100, 0)), &mut h.ctx()).unwrap();
        assert!(matches!(boop, PlayOutcome::Queued(_)));
        assert!(track.sound_is_in_queue("boop"));
        h.names();

        track.process(100, &mut h.ctx());
        assert_eq!(h.names(), vec!["beep_stopped", "boop_played"]);
        assert_eq!(track.sound_queue_count(), 0);
    }

    #[test]
    fn test_zero_queue_time_drops() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);
        track.play(instance(&sound("a", 100, 0)), &mut h.ctx()).unwrap();

        let impatient = Arc::new(
            SoundDescriptor::new("b", "sfx", SampleDuration(100)).with_max_queue_time(Some(SampleDuration::ZERO)),
        );
        assert_eq!(track.play(instance(&impatient), &mut h.ctx()).unwrap(), PlayOutcome::Skipped);
        assert_eq!(track.sound_queue_count(), 0);
    }

    #[test]
    fn test_queued_request_expires() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);
        track.play(instance(&sound("long", 1000, 0)), &mut h.ctx()).unwrap();

        let waiting = Arc::new(
            SoundDescriptor::new("short_wait", "sfx", SampleDuration(100)).with_max_queue_time(Some(SampleDuration(50))),
        );
        track.play(instance(&waiting), &mut h.ctx()).unwrap();
        assert_eq!(track.sound_queue_count(), 1);

        track.process(100, &mut h.ctx());
        assert_eq!(track.sound_queue_count(), 0);
    }

    #[test]
    fn test_simultaneous_limit_stealing() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 4);

        let oldest = Arc::new(
            SoundDescriptor::new("hit", "sfx", SampleDuration(1000)).with_simultaneous_limit(2, StealingMethod::Oldest),
        );
        let first = track.play(instance(&oldest), &mut h.ctx()).unwrap().instance_id().unwrap();
        track.play(instance(&oldest), &mut h.ctx()).unwrap();
        track.play(instance(&oldest), &mut h.ctx()).unwrap();
        assert_eq!(track.playing_count(), 2);
        assert_eq!(track.instance_state(first), Some(SoundInstanceState::Stopping));

        let skip = Arc::new(
            SoundDescriptor::new("blip", "sfx", SampleDuration(1000)).with_simultaneous_limit(1, StealingMethod::Skip),
        );
        track.play(instance(&skip), &mut h.ctx()).unwrap();
        assert_eq!(track.play(instance(&skip), &mut h.ctx()).unwrap(), PlayOutcome::Skipped);
    }

    #[test]
    fn test_stop_removes_queued_and_stops_playing() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);
        let a = sound("a", 1000, 0);
        track.play(instance(&a), &mut h.ctx()).unwrap();
        track.play(instance(&a), &mut h.ctx()).unwrap();
        assert_eq!(track.sound_queue_count(), 1);

        let stopped = track.stop(&StopTarget::Sound("a".into()), None, &mut h.ctx());
        assert_eq!(stopped, 2);
        assert_eq!(track.playing_count(), 0);
        assert_eq!(track.sound_queue_count(), 0);

        track.process(1, &mut h.ctx());
        assert_eq!(track.stopping_count(), 0);
    }

    #[test]
    fn test_stop_by_key() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 2);
        let desc = sound("coin", 1000, 0);
        let none = PlaybackSettingsOverride::default();
        let keyed = PlaybackSettingsOverride::new().with_key("bonus");
        let settings = resolve_settings(&keyed, &none, &desc, &SoundDefaults::default(), SR);
        track
            .play(SoundInstance::new(Arc::clone(&desc), settings, None), &mut h.ctx())
            .unwrap();
        track.play(instance(&desc), &mut h.ctx()).unwrap();

        assert_eq!(track.stop(&StopTarget::Key("bonus".into()), None, &mut h.ctx()), 1);
        assert_eq!(track.playing_count(), 1);
    }

    #[test]
    fn test_clear_context_applies_mode_end_action() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 4);
        let mode = Context::from("attract");
        let none = PlaybackSettingsOverride::default();

        let stopper = Arc::new(
            SoundDescriptor::new("stopper", "sfx", SampleDuration(1000))
                .with_loops(-1)
                .with_mode_end_action(ModeEndAction::Stop),
        );
        let looper = Arc::new(SoundDescriptor::new("looper", "sfx", SampleDuration(100)).with_loops(-1));
        for desc in [&stopper, &looper] {
            let settings = resolve_settings(&none, &none, desc, &SoundDefaults::default(), SR);
            track
                .play(SoundInstance::new(Arc::clone(desc), settings, Some(mode.clone())), &mut h.ctx())
                .unwrap();
        }

        track.clear_context(&mode, &mut h.ctx());
        assert!(!track.sound_is_playing("stopper"));
        assert!(track.sound_is_playing("looper"));

        track.process(100, &mut h.ctx());
        assert!(!track.sound_is_playing("looper"));
    }

    #[test]
    fn test_rejects_start_beyond_end() {
        let mut h = Harness::new();
        let mut track = StandardTrack::new(TrackHandle::new(0, "sfx"), 1);
        let desc = sound("short", 100, 0);
        let none = PlaybackSettingsOverride::default();
        let late = PlaybackSettingsOverride {
            start_at: Some(1.0),
            ..Default::default()
        };
        let settings = resolve_settings(&late, &none, &desc, &SoundDefaults::default(), SR);
        let err = track
            .play(SoundInstance::new(desc, settings, None), &mut h.ctx())
            .unwrap_err();
        assert!(matches!(err, AudioError::InvalidSoundRequest(_)));
    }
}
