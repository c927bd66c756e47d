//! Audio Engine
//!
//! Top-level coordinator. Owns the tracks, the asset tables and the
//! collaborators every track works through:
//!
//! ```text
//!   execute(Action) / direct API
//!            │
//!            ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ AudioEngine                                              │
//!   │   tracks[] ─ standard / playlist / sound_loop            │
//!   │   sounds, pools, playlists, loop sets (Arc descriptors)  │
//!   │   DuckingEngine   EventQueue ──▶ EventBus                │
//!   │   MixerLink ──(rtrb commands + gain snapshot)──▶ mixer   │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `process_tick(dt)` advances every track in creation order, then ducking,
//! publishes the gain snapshot and returns the events generated since the
//! previous tick (also delivered to the [`EventBus`]).

use crate::action::{Action, ActionOutcome};
use crate::ducking::DuckingEngine;
use crate::events::{AudioEvent, AudioEventKind, DEFAULT_EVENT_QUEUE_CAPACITY, EventBus, EventQueue};
use crate::instance::{Context, SoundInstance, SoundInstanceId};
use crate::mixer::{DEFAULT_MIXER_QUEUE_CAPACITY, GainSnapshot, MixerEndpoint, MixerLink, create_mixer_link};
use crate::playback::ProcessContext;
use crate::playlist::{PlaylistController, PlaylistDescriptor, PlaylistPlaySettings};
use crate::pool::{SoundPool, SoundPoolDescriptor};
use crate::settings::{PlaybackSettingsOverride, resolve_settings};
use crate::sound::{SoundDescriptor, SoundLibrary};
use crate::sound_loop::{LayerTiming, SoundLoopController, SoundLoopPlaySettings, SoundLoopSetDescriptor};
use crate::standard::{PlayOutcome, StandardTrack, StopTarget};
use crate::track::{Track, TrackConfig, TrackId, TrackKind, TrackStatus};
use crate::{AudioError, AudioResult};
use mc_core::{DEFAULT_SAMPLE_RATE, SampleDuration, validate_sample_rate};
use std::collections::HashMap;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub master_volume: f32,
    pub event_queue_capacity: usize,
    pub mixer_queue_capacity: usize,
    /// Seed for every random selection (playlists, pools); OS entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            master_volume: 0.5,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            mixer_queue_capacity: DEFAULT_MIXER_QUEUE_CAPACITY,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_master_volume(mut self, volume: f32) -> Self {
        self.master_volume = volume;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioEngine {
    sample_rate: u32,
    tracks: Vec<Track>,
    /// Lowercase name → index
    track_lookup: HashMap<String, usize>,
    sounds: SoundLibrary,
    pools: HashMap<String, SoundPool>,
    playlists: HashMap<String, Arc<PlaylistDescriptor>>,
    loop_sets: HashMap<String, Arc<SoundLoopSetDescriptor>>,
    ducking: DuckingEngine,
    events: EventQueue,
    bus: EventBus,
    mixer: MixerLink,
    endpoint: Option<MixerEndpoint>,
    master_volume: f32,
    clock: u64,
    /// Fractional samples carried between ticks
    sample_remainder: f64,
    rng_seed: Option<u64>,
    seeds_issued: u64,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> AudioResult<Self> {
        let sample_rate = validate_sample_rate(config.sample_rate)?;
        let (mixer, endpoint) = create_mixer_link(config.mixer_queue_capacity);
        log::info!(
            "[AudioEngine] Initialized at {} Hz (master volume {})",
            sample_rate,
            config.master_volume
        );
        Ok(Self {
            sample_rate,
            tracks: Vec::new(),
            track_lookup: HashMap::new(),
            sounds: SoundLibrary::new(),
            pools: HashMap::new(),
            playlists: HashMap::new(),
            loop_sets: HashMap::new(),
            ducking: DuckingEngine::new(),
            events: EventQueue::new(config.event_queue_capacity),
            bus: EventBus::new(),
            mixer,
            endpoint: Some(endpoint),
            master_volume: config.master_volume.clamp(0.0, 1.0),
            clock: 0,
            sample_remainder: 0.0,
            rng_seed: config.rng_seed,
            seeds_issued: 0,
        })
    }

    /// Run `f` on a track with a processing context borrowed from the engine
    fn with_track<R>(&mut self, index: usize, f: impl FnOnce(&mut Track, &mut ProcessContext<'_>) -> R) -> R {
        let Self {
            tracks,
            events,
            ducking,
            mixer,
            sounds,
            clock,
            sample_rate,
            ..
        } = self;
        let mut ctx = ProcessContext {
            now: *clock,
            sample_rate: *sample_rate,
            events,
            ducking,
            mixer,
            sounds,
        };
        f(&mut tracks[index], &mut ctx)
    }

    fn next_seed(&mut self) -> Option<u64> {
        let seed = self.rng_seed.map(|s| s.wrapping_add(self.seeds_issued));
        self.seeds_issued += 1;
        seed
    }

    fn secs(&self, seconds: f64) -> SampleDuration {
        SampleDuration::from_seconds(seconds, self.sample_rate)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracks
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a track; `kind` is `standard`, `playlist` or `sound_loop`
    pub fn create_track(&mut self, name: &str, kind: &str, config: TrackConfig) -> AudioResult<TrackId> {
        let kind: TrackKind = kind.parse()?;
        self.add_track(name, kind, config)
    }

    pub fn add_track(&mut self, name: &str, kind: TrackKind, config: TrackConfig) -> AudioResult<TrackId> {
        let key = name.to_lowercase();
        if key.is_empty() {
            return Err(AudioError::InvalidConfig("track name is empty".into()));
        }
        if self.track_lookup.contains_key(&key) {
            return Err(AudioError::DuplicateTrackName(name.to_string()));
        }
        let id = TrackId(self.tracks.len());
        let track = Track::new(id, name, kind, config)?;
        self.tracks.push(track);
        self.track_lookup.insert(key, id.0);
        log::info!("[AudioEngine] Track '{}' ({}) created", name, kind);
        Ok(id)
    }

    fn track_index(&self, name: &str) -> AudioResult<usize> {
        self.track_lookup
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| AudioError::UnknownTrack(name.to_string()))
    }

    fn track_index_of_kind(&self, name: &str, expected: TrackKind) -> AudioResult<usize> {
        let index = self.track_index(name)?;
        if self.tracks[index].kind() != expected {
            return Err(AudioError::WrongTrackKind {
                track: name.to_string(),
                expected,
            });
        }
        Ok(index)
    }

    pub fn track(&self, name: &str) -> Option<&Track> {
        self.track_index(name).ok().map(|i| &self.tracks[i])
    }

    pub fn track_by_id(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id.0)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn standard_track(&self, name: &str) -> Option<&StandardTrack> {
        self.track(name).and_then(Track::standard)
    }

    pub fn playlist_controller(&self, name: &str) -> Option<&PlaylistController> {
        self.track(name).and_then(Track::playlist)
    }

    pub fn sound_loop_controller(&self, name: &str) -> Option<&SoundLoopController> {
        self.track(name).and_then(Track::sound_loop)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Asset registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Name of the only track, used when an asset names none
    fn default_track(&self) -> Option<String> {
        match self.tracks.as_slice() {
            [only] => Some(only.name().to_string()),
            _ => None,
        }
    }

    /// Register a sound; its track (and ducking target) must exist
    pub fn register_sound(&mut self, mut descriptor: SoundDescriptor) -> AudioResult<Arc<SoundDescriptor>> {
        if descriptor.track.is_empty() {
            descriptor.track = self.default_track().ok_or_else(|| {
                AudioError::InvalidConfig(format!("sound '{}' must name a track", descriptor.name))
            })?;
        }
        descriptor.validate()?;
        self.track_index(&descriptor.track)?;
        if let Some(ducking) = &descriptor.ducking {
            self.track_index(&ducking.target_track)?;
        }

        let descriptor = Arc::new(descriptor);
        if self
            .sounds
            .insert(descriptor.name.clone(), Arc::clone(&descriptor))
            .is_some()
        {
            log::warn!("[AudioEngine] Sound '{}' replaced", descriptor.name);
        }
        log::debug!(
            "[AudioEngine] Sound '{}' registered on '{}' ({} samples)",
            descriptor.name,
            descriptor.track,
            descriptor.length.samples()
        );
        Ok(descriptor)
    }

    pub fn register_sound_pool(&mut self, descriptor: SoundPoolDescriptor) -> AudioResult<()> {
        descriptor.validate(&self.sounds)?;
        if let Some(track) = &descriptor.track {
            self.track_index_of_kind(track, TrackKind::Standard)?;
        }
        let seed = self.next_seed();
        log::debug!("[AudioEngine] Sound pool '{}' registered", descriptor.name);
        self.pools
            .insert(descriptor.name.clone(), SoundPool::new(descriptor, seed));
        Ok(())
    }

    pub fn register_playlist(&mut self, mut descriptor: PlaylistDescriptor) -> AudioResult<()> {
        if descriptor.track.is_empty() {
            descriptor.track = self.default_track().ok_or_else(|| {
                AudioError::InvalidConfig(format!("playlist '{}' must name a track", descriptor.name))
            })?;
        }
        descriptor.validate(&self.sounds)?;
        self.track_index_of_kind(&descriptor.track, TrackKind::Playlist)?;
        log::debug!("[AudioEngine] Playlist '{}' registered", descriptor.name);
        self.playlists
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn register_sound_loop_set(&mut self, mut descriptor: SoundLoopSetDescriptor) -> AudioResult<()> {
        if descriptor.track.is_empty() {
            descriptor.track = self.default_track().ok_or_else(|| {
                AudioError::InvalidConfig(format!("sound loop set '{}' must name a track", descriptor.name))
            })?;
        }
        descriptor.validate(&self.sounds)?;
        self.track_index_of_kind(&descriptor.track, TrackKind::SoundLoop)?;
        log::debug!("[AudioEngine] Sound loop set '{}' registered", descriptor.name);
        self.loop_sets
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn sound(&self, name: &str) -> Option<&Arc<SoundDescriptor>> {
        self.sounds.get(name)
    }

    pub fn sounds(&self) -> &SoundLibrary {
        &self.sounds
    }

    pub fn playlist(&self, name: &str) -> Option<&Arc<PlaylistDescriptor>> {
        self.playlists.get(name)
    }

    pub fn sound_loop_set(&self, name: &str) -> Option<&Arc<SoundLoopSetDescriptor>> {
        self.loop_sets.get(name)
    }

    pub fn has_sound_pool(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sounds
    // ─────────────────────────────────────────────────────────────────────────

    /// Play a sound (or a sound from a pool) on its track
    pub fn play_sound(
        &mut self,
        name: &str,
        context: Option<Context>,
        settings: PlaybackSettingsOverride,
    ) -> AudioResult<PlayOutcome> {
        self.play_sound_on(name, None, context, settings)
    }

    /// Play a sound on an explicit track (or the sound's own when `None`)
    pub fn play_sound_on(
        &mut self,
        name: &str,
        track: Option<&str>,
        context: Option<Context>,
        settings: PlaybackSettingsOverride,
    ) -> AudioResult<PlayOutcome> {
        let (sound_name, pool_settings, pool_track) = match self.pools.get_mut(name) {
            Some(pool) => {
                let picked = pool
                    .next_sound()
                    .ok_or_else(|| AudioError::InvalidConfig(format!("sound pool '{name}' has no sounds")))?;
                log::debug!("[AudioEngine] Pool '{}' picked '{}'", name, picked);
                (
                    picked,
                    pool.descriptor().settings.clone(),
                    pool.descriptor().track.clone(),
                )
            }
            None => (name.to_string(), PlaybackSettingsOverride::default(), None),
        };

        let descriptor = self
            .sounds
            .get(&sound_name)
            .cloned()
            .ok_or_else(|| AudioError::UnknownSound(sound_name.clone()))?;
        let track_name = track
            .map(str::to_string)
            .or(pool_track)
            .unwrap_or_else(|| descriptor.track.clone());
        let index = self.track_index_of_kind(&track_name, TrackKind::Standard)?;

        let resolved = resolve_settings(
            &settings,
            &pool_settings,
            &descriptor,
            self.tracks[index].sound_defaults(),
            self.sample_rate,
        );
        let instance = SoundInstance::new(descriptor, resolved, context);

        self.with_track(index, |track, ctx| match track.standard_mut() {
            Some(standard) => standard.play(instance, ctx),
            None => Err(AudioError::WrongTrackKind {
                track: track.name().to_string(),
                expected: TrackKind::Standard,
            }),
        })
    }

    fn stop_target_everywhere(&mut self, target: &StopTarget, fade: Option<f64>) -> usize {
        let fade = fade.map(|secs| self.secs(secs));
        (0..self.tracks.len())
            .map(|i| self.with_track(i, |track, ctx| track.stop_target(target, fade, ctx)))
            .sum()
    }

    /// Stop every instance of a sound; `fade_out` defaults to each instance's own
    pub fn stop_sound(&mut self, name: &str, fade_out: Option<f64>) -> usize {
        self.stop_target_everywhere(&StopTarget::Sound(name.to_string()), fade_out)
    }

    pub fn stop_sound_instance(&mut self, id: SoundInstanceId, fade_out: Option<f64>) -> usize {
        self.stop_target_everywhere(&StopTarget::Instance(id), fade_out)
    }

    pub fn stop_key(&mut self, key: &str, fade_out: Option<f64>) -> usize {
        self.stop_target_everywhere(&StopTarget::Key(key.to_string()), fade_out)
    }

    pub fn stop_sound_looping(&mut self, name: &str) -> usize {
        let target = StopTarget::Sound(name.to_string());
        (0..self.tracks.len())
            .map(|i| self.with_track(i, |track, ctx| track.stop_looping_target(&target, ctx)))
            .sum()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Track actions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn play_track(&mut self, name: &str, fade: f64) -> AudioResult<()> {
        let index = self.track_index(name)?;
        let fade = self.secs(fade);
        self.with_track(index, |track, ctx| track.play(fade, ctx));
        Ok(())
    }

    pub fn stop_track(&mut self, name: &str, fade: f64) -> AudioResult<()> {
        let index = self.track_index(name)?;
        let fade = self.secs(fade);
        self.with_track(index, |track, ctx| track.stop(fade, ctx));
        Ok(())
    }

    pub fn pause_track(&mut self, name: &str, fade: f64) -> AudioResult<()> {
        let index = self.track_index(name)?;
        let fade = self.secs(fade);
        self.with_track(index, |track, ctx| track.pause(fade, ctx));
        Ok(())
    }

    pub fn resume_track(&mut self, name: &str, fade: f64) -> AudioResult<()> {
        let index = self.track_index(name)?;
        let fade = self.secs(fade);
        self.with_track(index, |track, ctx| track.resume(fade, ctx));
        Ok(())
    }

    pub fn set_track_volume(&mut self, name: &str, volume: f32, fade: f64) -> AudioResult<()> {
        let index = self.track_index(name)?;
        let fade = self.secs(fade);
        self.with_track(index, |track, ctx| track.set_volume(volume, fade, ctx));
        Ok(())
    }

    /// Stop all sounds on one track, or on every track
    pub fn stop_all_sounds(&mut self, track: Option<&str>, fade: Option<f64>) -> AudioResult<()> {
        let fade = fade.map(|secs| self.secs(secs));
        let indices: Vec<usize> = match track {
            Some(name) => vec![self.track_index(name)?],
            None => (0..self.tracks.len()).collect(),
        };
        for index in indices {
            self.with_track(index, |track, ctx| track.stop_all_sounds(fade, ctx));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playlists
    // ─────────────────────────────────────────────────────────────────────────

    /// Play a playlist; `None` when the request waits for a transition
    pub fn play_playlist(
        &mut self,
        name: &str,
        track: Option<&str>,
        context: Option<Context>,
        settings: PlaylistPlaySettings,
    ) -> AudioResult<Option<SoundInstanceId>> {
        let descriptor = self
            .playlists
            .get(name)
            .cloned()
            .ok_or_else(|| AudioError::UnknownPlaylist(name.to_string()))?;
        let track = track.unwrap_or(&descriptor.track).to_string();
        let index = self.track_index_of_kind(&track, TrackKind::Playlist)?;
        let seed = self.next_seed();
        self.with_playlist(index, |controller, ctx| {
            controller.play(descriptor, context, settings, seed, ctx)
        })?
    }

    fn with_playlist<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut PlaylistController, &mut ProcessContext<'_>) -> R,
    ) -> AudioResult<R> {
        self.with_track(index, |track, ctx| {
            let name = track.name().to_string();
            match track.playlist_mut() {
                Some(controller) => Ok(f(controller, ctx)),
                None => Err(AudioError::WrongTrackKind {
                    track: name,
                    expected: TrackKind::Playlist,
                }),
            }
        })
    }

    pub fn advance_playlist(&mut self, track: &str) -> AudioResult<bool> {
        let index = self.track_index_of_kind(track, TrackKind::Playlist)?;
        self.with_playlist(index, |controller, ctx| controller.advance(ctx))?
    }

    pub fn stop_playlist(&mut self, track: &str, fade_out: Option<f64>) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::Playlist)?;
        let fade = fade_out.map(|secs| self.secs(secs));
        self.with_playlist(index, |controller, ctx| controller.stop(fade, ctx))
    }

    pub fn set_playlist_repeat(&mut self, track: &str, repeat: bool) -> AudioResult<bool> {
        let index = self.track_index_of_kind(track, TrackKind::Playlist)?;
        self.with_playlist(index, |controller, _| controller.set_repeat(repeat))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sound loops
    // ─────────────────────────────────────────────────────────────────────────

    fn with_sound_loop<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut SoundLoopController, &mut ProcessContext<'_>) -> R,
    ) -> AudioResult<R> {
        self.with_track(index, |track, ctx| {
            let name = track.name().to_string();
            match track.sound_loop_mut() {
                Some(controller) => Ok(f(controller, ctx)),
                None => Err(AudioError::WrongTrackKind {
                    track: name,
                    expected: TrackKind::SoundLoop,
                }),
            }
        })
    }

    /// Play a loop set; `None` when it waits for the current loop end
    pub fn play_sound_loop_set(
        &mut self,
        name: &str,
        track: Option<&str>,
        context: Option<Context>,
        settings: SoundLoopPlaySettings,
    ) -> AudioResult<Option<SoundInstanceId>> {
        let descriptor = self
            .loop_sets
            .get(name)
            .cloned()
            .ok_or_else(|| AudioError::UnknownSoundLoopSet(name.to_string()))?;
        let track = track.unwrap_or(&descriptor.track).to_string();
        let index = self.track_index_of_kind(&track, TrackKind::SoundLoop)?;
        self.with_sound_loop(index, |controller, ctx| {
            controller.play_sound_loop_set(descriptor, context, settings, ctx)
        })?
    }

    pub fn stop_sound_loop_set(&mut self, track: &str, fade_out: Option<f64>) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        let fade = fade_out.map(|secs| self.secs(secs));
        self.with_sound_loop(index, |controller, ctx| controller.stop_current_sound_loop_set(fade, ctx))
    }

    pub fn stop_looping_sound_loop_set(&mut self, track: &str) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        self.with_sound_loop(index, |controller, ctx| controller.stop_looping_current_sound_loop_set(ctx))
    }

    pub fn play_layer(
        &mut self,
        track: &str,
        layer: usize,
        fade_in: Option<f64>,
        timing: LayerTiming,
        volume: Option<f32>,
    ) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        let fade_in = fade_in.map(|secs| self.secs(secs));
        self.with_sound_loop(index, |controller, ctx| {
            controller.play_layer(layer, fade_in, timing, volume, ctx)
        })?
    }

    pub fn stop_layer(&mut self, track: &str, layer: usize, fade_out: Option<f64>) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        let fade_out = fade_out.map(|secs| self.secs(secs));
        self.with_sound_loop(index, |controller, ctx| controller.stop_layer(layer, fade_out, ctx))?
    }

    pub fn stop_looping_layer(&mut self, track: &str, layer: usize) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        self.with_sound_loop(index, |controller, ctx| controller.stop_looping_layer(layer, ctx))?
    }

    /// Reposition the playing loop set (seconds)
    pub fn jump_to_time(&mut self, track: &str, time: f64) -> AudioResult<()> {
        let index = self.track_index_of_kind(track, TrackKind::SoundLoop)?;
        let time = self.secs(time);
        self.with_sound_loop(index, |controller, ctx| {
            controller.jump_to_time_current_sound_loop_set(time, ctx)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contexts, volume, actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop or wind down everything `context` started (idempotent)
    pub fn clear_context(&mut self, context: &Context) {
        log::debug!("[AudioEngine] Clearing context '{}'", context);
        for index in 0..self.tracks.len() {
            self.with_track(index, |track, ctx| track.clear_context(context, ctx));
        }
    }

    /// Set the master volume (clamped to [0, 1])
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if (volume - self.master_volume).abs() > f32::EPSILON {
            log::info!("[AudioEngine] Master volume {} -> {}", self.master_volume, volume);
        }
        self.master_volume = volume;
        self.events.push(
            AudioEvent::new("master_volume_changed", AudioEventKind::VolumeChanged).with_value(volume),
        );
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Execute an action on behalf of `context`
    pub fn execute(&mut self, context: Option<Context>, action: Action) -> AudioResult<ActionOutcome> {
        log::trace!("[AudioEngine] Executing {}", action.display_name());
        let outcome = match action {
            Action::PlaySound { sound, track, settings } => {
                ActionOutcome::Sound(self.play_sound_on(&sound, track.as_deref(), context, settings)?)
            }
            Action::StopSound { sound, fade_out } => ActionOutcome::Stopped(self.stop_sound(&sound, fade_out)),
            Action::StopSoundLooping { sound } => ActionOutcome::Stopped(self.stop_sound_looping(&sound)),
            Action::StopKey { key, fade_out } => ActionOutcome::Stopped(self.stop_key(&key, fade_out)),
            Action::PlayTrack { track, fade } => {
                self.play_track(&track, fade)?;
                ActionOutcome::Done
            }
            Action::StopTrack { track, fade } => {
                self.stop_track(&track, fade)?;
                ActionOutcome::Done
            }
            Action::PauseTrack { track, fade } => {
                self.pause_track(&track, fade)?;
                ActionOutcome::Done
            }
            Action::ResumeTrack { track, fade } => {
                self.resume_track(&track, fade)?;
                ActionOutcome::Done
            }
            Action::SetTrackVolume { track, volume, fade } => {
                self.set_track_volume(&track, volume, fade)?;
                ActionOutcome::Done
            }
            Action::StopAllSounds { track, fade } => {
                self.stop_all_sounds(track.as_deref(), fade)?;
                ActionOutcome::Done
            }
            Action::PlayPlaylist {
                playlist,
                track,
                settings,
            } => ActionOutcome::Started(self.play_playlist(&playlist, track.as_deref(), context, settings)?),
            Action::AdvancePlaylist { track } => {
                self.advance_playlist(&track)?;
                ActionOutcome::Done
            }
            Action::StopPlaylist { track, fade_out } => {
                self.stop_playlist(&track, fade_out)?;
                ActionOutcome::Done
            }
            Action::SetPlaylistRepeat { track, repeat } => {
                self.set_playlist_repeat(&track, repeat)?;
                ActionOutcome::Done
            }
            Action::PlaySoundLoopSet {
                sound_loop_set,
                track,
                settings,
            } => ActionOutcome::Started(self.play_sound_loop_set(
                &sound_loop_set,
                track.as_deref(),
                context,
                settings,
            )?),
            Action::StopSoundLoopSet { track, fade_out } => {
                self.stop_sound_loop_set(&track, fade_out)?;
                ActionOutcome::Done
            }
            Action::StopLoopingSoundLoopSet { track } => {
                self.stop_looping_sound_loop_set(&track)?;
                ActionOutcome::Done
            }
            Action::PlayLayer {
                track,
                layer,
                fade_in,
                timing,
                volume,
            } => {
                self.play_layer(&track, layer, fade_in, timing, volume)?;
                ActionOutcome::Done
            }
            Action::StopLayer { track, layer, fade_out } => {
                self.stop_layer(&track, layer, fade_out)?;
                ActionOutcome::Done
            }
            Action::StopLoopingLayer { track, layer } => {
                self.stop_looping_layer(&track, layer)?;
                ActionOutcome::Done
            }
            Action::JumpToTime { track, time } => {
                self.jump_to_time(&track, time)?;
                ActionOutcome::Done
            }
            Action::SetMasterVolume { volume } => {
                self.set_master_volume(volume);
                ActionOutcome::Done
            }
        };
        Ok(outcome)
    }

    /// Execute an action; runtime errors are logged and swallowed
    pub fn dispatch(&mut self, context: Option<Context>, action: Action) -> Option<ActionOutcome> {
        let name = action.display_name();
        match self.execute(context, action) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                log::warn!("[AudioEngine] {} failed: {}", name, err);
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Advance the engine by `dt` seconds; returns the events of this tick
    pub fn process_tick(&mut self, dt: f64) -> Vec<AudioEvent> {
        let exact = dt.max(0.0) * self.sample_rate as f64 + self.sample_remainder;
        // Tolerate float error just under a whole sample
        let samples = (exact + 1e-9).floor();
        self.sample_remainder = (exact - samples).max(0.0);
        self.process_samples(samples as u64)
    }

    /// Advance the engine by a whole number of samples
    pub fn process_samples(&mut self, samples: u64) -> Vec<AudioEvent> {
        for index in 0..self.tracks.len() {
            self.with_track(index, |track, ctx| track.process(samples, ctx));
        }
        self.ducking.process(samples);
        self.clock += samples;

        let track_gains = self
            .tracks
            .iter()
            .map(|t| (t.volume() * self.ducking.gain_for(t.name()) * self.master_volume).clamp(0.0, 1.0))
            .collect();
        self.mixer.publish(GainSnapshot {
            track_gains,
            master_volume: self.master_volume,
            clock: self.clock,
        });

        let events = self.events.drain();
        for event in &events {
            self.bus.post(event);
        }
        events
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Hand the command consumer to the native mixer (once)
    pub fn take_mixer_endpoint(&mut self) -> Option<MixerEndpoint> {
        let endpoint = self.endpoint.take()?;
        self.mixer.attach();
        Some(endpoint)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ducking(&self) -> &DuckingEngine {
        &self.ducking
    }

    /// Current combined gain of a track (volume × ducking × master)
    pub fn track_gain(&self, name: &str) -> Option<f32> {
        let track = self.track(name)?;
        Some((track.volume() * self.ducking.gain_for(track.name()) * self.master_volume).clamp(0.0, 1.0))
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn dropped_event_count(&self) -> u64 {
        self.events.dropped_count()
    }

    pub fn dropped_mixer_command_count(&self) -> u64 {
        self.mixer.dropped_count()
    }

    pub fn get_status(&self) -> Vec<TrackStatus> {
        self.tracks.iter().map(Track::get_status).collect()
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("sample_rate", &self.sample_rate)
            .field("tracks", &self.tracks.len())
            .field("sounds", &self.sounds.len())
            .field("clock", &self.clock)
            .field("master_volume", &self.master_volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MixerCommand;
    use crate::randomizer::WeightedSound;
    use approx::assert_relative_eq;

    fn engine() -> AudioEngine {
        AudioEngine::new(EngineConfig::default().with_sample_rate(1000).with_seed(7)).unwrap()
    }

    #[test]
    fn test_create_track_errors() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default()).unwrap();
        assert!(matches!(
            engine.create_track("SFX", "standard", TrackConfig::default()),
            Err(AudioError::DuplicateTrackName(_))
        ));
        assert!(matches!(
            engine.create_track("pool", "sound_pool", TrackConfig::default()),
            Err(AudioError::TrackKindNotImplemented(_))
        ));
        assert!(matches!(
            engine.create_track("x", "banana", TrackConfig::default()),
            Err(AudioError::InvalidTrackKind(_))
        ));
        assert_eq!(engine.tracks().len(), 1);
    }

    #[test]
    fn test_single_track_is_default() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default()).unwrap();
        let sound = engine
            .register_sound(SoundDescriptor::new("beep", "", SampleDuration(100)))
            .unwrap();
        assert_eq!(sound.track, "sfx");

        engine.create_track("music", "playlist", TrackConfig::default()).unwrap();
        assert!(engine
            .register_sound(SoundDescriptor::new("boop", "", SampleDuration(100)))
            .is_err());
        assert!(matches!(
            engine.register_sound(SoundDescriptor::new("boop", "nowhere", SampleDuration(100))),
            Err(AudioError::UnknownTrack(_))
        ));
    }

    #[test]
    fn test_play_on_wrong_track_kind() {
        let mut engine = engine();
        engine.create_track("music", "playlist", TrackConfig::default()).unwrap();
        engine
            .register_sound(SoundDescriptor::new("song", "music", SampleDuration(100)))
            .unwrap();
        assert!(matches!(
            engine.play_sound("song", None, PlaybackSettingsOverride::default()),
            Err(AudioError::WrongTrackKind { .. })
        ));
        assert!(matches!(
            engine.play_sound("missing", None, PlaybackSettingsOverride::default()),
            Err(AudioError::UnknownSound(_))
        ));
    }

    #[test]
    fn test_master_volume_in_snapshot() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default().with_volume(0.8)).unwrap();
        assert!(!engine.mixer.is_attached());
        let endpoint = engine.take_mixer_endpoint().unwrap();
        assert!(engine.take_mixer_endpoint().is_none());
        assert!(engine.mixer.is_attached());

        engine.set_master_volume(2.0);
        assert_relative_eq!(engine.master_volume(), 1.0);
        let events = engine.process_tick(0.01);
        assert_eq!(events[0].name, "master_volume_changed");
        assert_relative_eq!(endpoint.track_gain(0), 0.8);

        engine.set_master_volume(0.5);
        engine.process_tick(0.01);
        assert_relative_eq!(endpoint.track_gain(0), 0.4);
        assert_eq!(engine.clock(), 20);
    }

    #[test]
    fn test_fractional_ticks_accumulate() {
        let mut engine = engine();
        for _ in 0..3 {
            engine.process_tick(0.0005);
        }
        // 1.5 samples
        assert_eq!(engine.clock(), 1);
        engine.process_tick(0.0005);
        assert_eq!(engine.clock(), 2);
    }

    #[test]
    fn test_sound_pool_plays_members() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default().with_simultaneous_sounds(4)).unwrap();
        for name in ["hit1", "hit2"] {
            engine
                .register_sound(SoundDescriptor::new(name, "sfx", SampleDuration(100)))
                .unwrap();
        }
        engine
            .register_sound_pool(SoundPoolDescriptor::new(
                "hits",
                vec![WeightedSound::new("hit1", 1), WeightedSound::new("hit2", 1)],
            ))
            .unwrap();
        assert!(engine.has_sound_pool("hits"));

        let outcome = engine
            .play_sound("hits", None, PlaybackSettingsOverride::default())
            .unwrap();
        assert!(matches!(outcome, PlayOutcome::Started(_)));
        let events = engine.process_tick(0.001);
        assert!(events[0].name == "hit1_played" || events[0].name == "hit2_played");
    }

    #[test]
    fn test_execute_and_dispatch() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default()).unwrap();
        engine
            .register_sound(SoundDescriptor::new("beep", "sfx", SampleDuration(100)))
            .unwrap();
        let mut endpoint = engine.take_mixer_endpoint().unwrap();

        let outcome = engine
            .execute(
                Some(Context::from("base")),
                Action::PlaySound {
                    sound: "beep".into(),
                    track: None,
                    settings: PlaybackSettingsOverride::default(),
                },
            )
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Sound(PlayOutcome::Started(_))));
        assert!(matches!(endpoint.pop(), Some(MixerCommand::Play { track: 0, .. })));

        let stopped = engine.execute(
            None,
            Action::StopSound {
                sound: "beep".into(),
                fade_out: None,
            },
        );
        assert_eq!(stopped.unwrap(), ActionOutcome::Stopped(1));

        // Runtime errors are swallowed
        assert!(
            engine
                .dispatch(None, Action::AdvancePlaylist { track: "sfx".into() })
                .is_none()
        );
    }

    #[test]
    fn test_bus_receives_tick_events() {
        let mut engine = engine();
        engine.create_track("sfx", "standard", TrackConfig::default()).unwrap();
        engine
            .register_sound(SoundDescriptor::new("beep", "sfx", SampleDuration(100)))
            .unwrap();
        let (rx, _id) = engine.event_bus().subscribe();

        engine.play_sound("beep", None, PlaybackSettingsOverride::default()).unwrap();
        let events = engine.process_tick(0.2);
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["beep_played", "beep_stopped"]);

        let received: Vec<_> = rx.try_iter().map(|e| e.name).collect();
        assert_eq!(received, vec!["beep_played", "beep_stopped"]);
    }
}
