//! Tracks
//!
//! A track is a named output bus feeding the native mixer. Its kind decides
//! which controller owns the sounds on it:
//!
//! | Kind         | Controller                  |
//! |--------------|-----------------------------|
//! | `standard`   | [`StandardTrack`]           |
//! | `playlist`   | [`PlaylistController`]      |
//! | `sound_loop` | [`SoundLoopController`]     |
//!
//! Track-level actions (play, stop, pause, resume, volume) act on the bus
//! itself and apply to whatever the controller is playing.

use crate::events::{AudioEvent, AudioEventKind};
use crate::instance::Context;
use crate::mixer::MixerCommand;
use crate::playback::{ProcessContext, TrackHandle};
use crate::playlist::{PlaylistController, PlaylistSlotStatus};
use crate::ramp::GainRamp;
use crate::settings::SoundDefaults;
use crate::sound::DEFAULT_SOUND_VOLUME;
use crate::sound_loop::{SoundLoopController, SoundLoopSetStatus};
use crate::standard::{SoundStatus, StandardTrack, StopTarget};
use crate::{AudioError, AudioResult};
use mc_core::SampleDuration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════════════
// KIND / STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Standard,
    Playlist,
    SoundLoop,
}

impl FromStr for TrackKind {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(TrackKind::Standard),
            "playlist" => Ok(TrackKind::Playlist),
            "sound_loop" => Ok(TrackKind::SoundLoop),
            "sound_pool" | "live_loop" => Err(AudioError::TrackKindNotImplemented(s.to_string())),
            _ => Err(AudioError::InvalidTrackKind(s.to_string())),
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackKind::Standard => "standard",
            TrackKind::Playlist => "playlist",
            TrackKind::SoundLoop => "sound_loop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Playing,
    Paused,
    Stopped,
}

/// Index of a track in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub usize);

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub volume: f32,
    /// Standard tracks only
    pub simultaneous_sounds: usize,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_paused: Vec<String>,
    pub events_when_resumed: Vec<String>,
    pub sound_defaults: SoundDefaults,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_SOUND_VOLUME,
            simultaneous_sounds: 1,
            events_when_played: Vec::new(),
            events_when_stopped: Vec::new(),
            events_when_paused: Vec::new(),
            events_when_resumed: Vec::new(),
            sound_defaults: SoundDefaults::default(),
        }
    }
}

impl TrackConfig {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_simultaneous_sounds(mut self, count: usize) -> Self {
        self.simultaneous_sounds = count;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub enum TrackBody {
    Standard(StandardTrack),
    Playlist(PlaylistController),
    SoundLoop(SoundLoopController),
}

/// Status snapshot of what a track is playing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum TrackBodyStatus {
    Standard(Vec<SoundStatus>),
    Playlist(Vec<PlaylistSlotStatus>),
    SoundLoop(Vec<SoundLoopSetStatus>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStatus {
    pub name: String,
    pub kind: TrackKind,
    pub state: TrackState,
    pub volume: f32,
    pub body: TrackBodyStatus,
}

#[derive(Debug)]
pub struct Track {
    handle: TrackHandle,
    kind: TrackKind,
    config: TrackConfig,
    volume: GainRamp,
    state: TrackState,
    /// Pause once the volume fade completes
    pause_pending: bool,
    body: TrackBody,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, kind: TrackKind, config: TrackConfig) -> AudioResult<Self> {
        let handle = TrackHandle::new(id.0, name);
        if kind == TrackKind::Standard && config.simultaneous_sounds == 0 {
            return Err(AudioError::InvalidConfig(format!(
                "track '{}' needs simultaneous_sounds >= 1",
                handle.name
            )));
        }
        let volume = config.volume.clamp(0.0, 1.0);

        let body = match kind {
            TrackKind::Standard => TrackBody::Standard(StandardTrack::new(handle.clone(), config.simultaneous_sounds)),
            TrackKind::Playlist => {
                TrackBody::Playlist(PlaylistController::new(handle.clone(), config.sound_defaults.clone()))
            }
            TrackKind::SoundLoop => TrackBody::SoundLoop(SoundLoopController::new(handle.clone())),
        };

        log::debug!("[Track:{}] Created {} track (volume {})", handle.name, kind, volume);
        Ok(Self {
            handle,
            kind,
            config,
            volume: GainRamp::new(volume),
            state: TrackState::Playing,
            pause_pending: false,
            body,
        })
    }

    // Track actions

    /// Start (or restart) the track, fading its volume in
    pub fn play(&mut self, fade: SampleDuration, ctx: &mut ProcessContext<'_>) {
        let target = self.config.volume.clamp(0.0, 1.0);
        if self.state == TrackState::Paused {
            ctx.mixer.send(MixerCommand::ResumeTrack { track: self.handle.index });
        }
        if !fade.is_zero() {
            self.volume.set(0.0);
        }
        self.volume.ramp_to(target, fade.samples());
        self.state = TrackState::Playing;
        self.pause_pending = false;
        self.post_custom(AudioEventKind::Played, ctx);
    }

    /// Stop everything on the track
    pub fn stop(&mut self, fade: SampleDuration, ctx: &mut ProcessContext<'_>) {
        self.stop_all_sounds(Some(fade), ctx);
        self.state = TrackState::Stopped;
        self.pause_pending = false;
        self.post_custom(AudioEventKind::Stopped, ctx);
    }

    /// Pause after fading the volume out
    pub fn pause(&mut self, fade: SampleDuration, ctx: &mut ProcessContext<'_>) {
        if self.state != TrackState::Playing {
            return;
        }
        if fade.is_zero() {
            self.enter_pause(ctx);
        } else {
            self.volume.ramp_to(0.0, fade.samples());
            self.pause_pending = true;
        }
    }

    fn enter_pause(&mut self, ctx: &mut ProcessContext<'_>) {
        self.state = TrackState::Paused;
        self.pause_pending = false;
        ctx.mixer.send(MixerCommand::PauseTrack { track: self.handle.index });
        log::debug!("[Track:{}] Paused", self.handle.name);
        self.post_custom(AudioEventKind::Paused, ctx);
    }

    /// Resume a paused track, fading its volume back in
    pub fn resume(&mut self, fade: SampleDuration, ctx: &mut ProcessContext<'_>) {
        if self.state != TrackState::Paused && !self.pause_pending {
            return;
        }
        if self.state == TrackState::Paused {
            ctx.mixer.send(MixerCommand::ResumeTrack { track: self.handle.index });
            self.volume.set(0.0);
        }
        self.state = TrackState::Playing;
        self.pause_pending = false;
        self.volume.ramp_to(self.config.volume.clamp(0.0, 1.0), fade.samples());
        log::debug!("[Track:{}] Resumed", self.handle.name);
        self.post_custom(AudioEventKind::Resumed, ctx);
    }

    /// Change the track volume; posts `<track>_volume_changed`
    pub fn set_volume(&mut self, volume: f32, fade: SampleDuration, ctx: &mut ProcessContext<'_>) {
        let volume = volume.clamp(0.0, 1.0);
        self.config.volume = volume;
        self.volume.ramp_to(volume, fade.samples());
        ctx.post(
            AudioEvent::new(format!("{}_volume_changed", self.handle.name), AudioEventKind::VolumeChanged)
                .with_track(self.handle.name.clone())
                .with_value(volume),
        );
    }

    pub fn stop_all_sounds(&mut self, fade: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) {
        match &mut self.body {
            TrackBody::Standard(track) => track.stop_all_sounds(fade, ctx),
            TrackBody::Playlist(controller) => controller.stop(fade, ctx),
            TrackBody::SoundLoop(controller) => controller.stop_current_sound_loop_set(fade, ctx),
        }
    }

    /// Stop a target on a standard track; other kinds ignore it
    pub fn stop_target(&mut self, target: &StopTarget, fade: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) -> usize {
        match &mut self.body {
            TrackBody::Standard(track) => track.stop(target, fade, ctx),
            _ => 0,
        }
    }

    pub fn stop_looping_target(&mut self, target: &StopTarget, ctx: &mut ProcessContext<'_>) -> usize {
        match &mut self.body {
            TrackBody::Standard(track) => track.stop_looping(target, ctx),
            _ => 0,
        }
    }

    pub fn clear_context(&mut self, context: &Context, ctx: &mut ProcessContext<'_>) {
        match &mut self.body {
            TrackBody::Standard(track) => track.clear_context(context, ctx),
            TrackBody::Playlist(controller) => controller.clear_context(context, ctx),
            TrackBody::SoundLoop(controller) => controller.clear_context(context, ctx),
        }
    }

    /// Advance the track; a paused track holds its sounds in place
    pub fn process(&mut self, samples: u64, ctx: &mut ProcessContext<'_>) {
        let faded = self.volume.update(samples);
        if self.pause_pending && (faded || !self.volume.is_ramping()) {
            self.enter_pause(ctx);
        }
        if self.state == TrackState::Paused {
            return;
        }
        match &mut self.body {
            TrackBody::Standard(track) => track.process(samples, ctx),
            TrackBody::Playlist(controller) => controller.process(samples, ctx),
            TrackBody::SoundLoop(controller) => controller.process(samples, ctx),
        }
    }

    fn post_custom(&self, kind: AudioEventKind, ctx: &mut ProcessContext<'_>) {
        let names = match kind {
            AudioEventKind::Played => &self.config.events_when_played,
            AudioEventKind::Stopped => &self.config.events_when_stopped,
            AudioEventKind::Paused => &self.config.events_when_paused,
            AudioEventKind::Resumed => &self.config.events_when_resumed,
            _ => return,
        };
        for name in names {
            ctx.post(AudioEvent::new(name.clone(), kind).with_track(self.handle.name.clone()));
        }
    }

    // Accessors

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn id(&self) -> TrackId {
        TrackId(self.handle.index)
    }

    pub fn handle(&self) -> &TrackHandle {
        &self.handle
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn sound_defaults(&self) -> &SoundDefaults {
        &self.config.sound_defaults
    }

    /// Current (possibly fading) track volume
    pub fn volume(&self) -> f32 {
        self.volume.current()
    }

    pub fn body(&self) -> &TrackBody {
        &self.body
    }

    pub fn standard(&self) -> Option<&StandardTrack> {
        match &self.body {
            TrackBody::Standard(track) => Some(track),
            _ => None,
        }
    }

    pub fn standard_mut(&mut self) -> Option<&mut StandardTrack> {
        match &mut self.body {
            TrackBody::Standard(track) => Some(track),
            _ => None,
        }
    }

    pub fn playlist(&self) -> Option<&PlaylistController> {
        match &self.body {
            TrackBody::Playlist(controller) => Some(controller),
            _ => None,
        }
    }

    pub fn playlist_mut(&mut self) -> Option<&mut PlaylistController> {
        match &mut self.body {
            TrackBody::Playlist(controller) => Some(controller),
            _ => None,
        }
    }

    pub fn sound_loop(&self) -> Option<&SoundLoopController> {
        match &self.body {
            TrackBody::SoundLoop(controller) => Some(controller),
            _ => None,
        }
    }

    pub fn sound_loop_mut(&mut self) -> Option<&mut SoundLoopController> {
        match &mut self.body {
            TrackBody::SoundLoop(controller) => Some(controller),
            _ => None,
        }
    }

    pub fn get_status(&self) -> TrackStatus {
        let body = match &self.body {
            TrackBody::Standard(track) => TrackBodyStatus::Standard(track.get_status()),
            TrackBody::Playlist(controller) => TrackBodyStatus::Playlist(controller.get_status()),
            TrackBody::SoundLoop(controller) => TrackBodyStatus::SoundLoop(controller.get_status()),
        };
        TrackStatus {
            name: self.handle.name.clone(),
            kind: self.kind,
            state: self.state,
            volume: self.volume.current(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducking::DuckingEngine;
    use crate::events::EventQueue;
    use crate::mixer::{MixerEndpoint, MixerLink, create_mixer_link};
    use crate::sound::SoundLibrary;
    use approx::assert_relative_eq;

    struct Harness {
        events: EventQueue,
        ducking: DuckingEngine,
        mixer: MixerLink,
        endpoint: MixerEndpoint,
        sounds: SoundLibrary,
    }

    impl Harness {
        fn new() -> Self {
            let (mixer, endpoint) = create_mixer_link(64);
            Self {
                events: EventQueue::new(64),
                ducking: DuckingEngine::new(),
                mixer,
                endpoint,
                sounds: SoundLibrary::new(),
            }
        }

        fn ctx(&mut self) -> ProcessContext<'_> {
            ProcessContext {
                now: 0,
                sample_rate: 1000,
                events: &mut self.events,
                ducking: &mut self.ducking,
                mixer: &self.mixer,
                sounds: &self.sounds,
            }
        }
    }

    #[test]
    fn test_track_kind_parsing() {
        assert_eq!("standard".parse::<TrackKind>().unwrap(), TrackKind::Standard);
        assert_eq!("Sound_Loop".parse::<TrackKind>().unwrap(), TrackKind::SoundLoop);
        assert!(matches!(
            "sound_pool".parse::<TrackKind>(),
            Err(AudioError::TrackKindNotImplemented(_))
        ));
        assert!(matches!("radio".parse::<TrackKind>(), Err(AudioError::InvalidTrackKind(_))));
        assert_eq!(TrackKind::Playlist.to_string(), "playlist");
    }

    #[test]
    fn test_zero_simultaneous_sounds_rejected() {
        let config = TrackConfig::default().with_simultaneous_sounds(0);
        assert!(Track::new(TrackId(0), "sfx", TrackKind::Standard, config).is_err());
    }

    #[test]
    fn test_volume_fade_and_event() {
        let mut h = Harness::new();
        let mut track = Track::new(TrackId(0), "music", TrackKind::Playlist, TrackConfig::default()).unwrap();
        assert_relative_eq!(track.volume(), 0.5);

        track.set_volume(1.5, SampleDuration(100), &mut h.ctx());
        track.process(50, &mut h.ctx());
        assert_relative_eq!(track.volume(), 0.75);
        track.process(50, &mut h.ctx());
        assert_relative_eq!(track.volume(), 1.0);

        let events = h.events.drain();
        assert_eq!(events[0].name, "music_volume_changed");
        assert_eq!(events[0].value, Some(1.0));
    }

    #[test]
    fn test_pause_after_fade_then_resume() {
        let mut h = Harness::new();
        let config = TrackConfig {
            events_when_paused: vec!["music_paused".into()],
            events_when_resumed: vec!["music_back".into()],
            ..Default::default()
        };
        let mut track = Track::new(TrackId(2), "music", TrackKind::Standard, config).unwrap();

        track.pause(SampleDuration(100), &mut h.ctx());
        assert_eq!(track.state(), TrackState::Playing);
        track.process(100, &mut h.ctx());
        assert_eq!(track.state(), TrackState::Paused);
        assert!(matches!(h.endpoint.pop(), Some(MixerCommand::PauseTrack { track: 2 })));

        track.resume(SampleDuration::ZERO, &mut h.ctx());
        assert_eq!(track.state(), TrackState::Playing);
        assert_relative_eq!(track.volume(), 0.5);
        assert!(matches!(h.endpoint.pop(), Some(MixerCommand::ResumeTrack { track: 2 })));

        let names: Vec<_> = h.events.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["music_paused", "music_back"]);
    }

    #[test]
    fn test_stop_sets_state() {
        let mut h = Harness::new();
        let mut track = Track::new(TrackId(0), "loops", TrackKind::SoundLoop, TrackConfig::default()).unwrap();
        track.stop(SampleDuration::ZERO, &mut h.ctx());
        assert_eq!(track.state(), TrackState::Stopped);
        track.play(SampleDuration(10), &mut h.ctx());
        assert_eq!(track.state(), TrackState::Playing);
        assert_relative_eq!(track.volume(), 0.0);
        assert!(matches!(track.get_status().body, TrackBodyStatus::SoundLoop(ref s) if s.is_empty()));
    }
}
