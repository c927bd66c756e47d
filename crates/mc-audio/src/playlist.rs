//! Playlist Controller
//!
//! Plays the sounds of a playlist one after another on a playlist track,
//! crossfading between entries.
//!
//! ```text
//!   Idle ──play──▶ Playing ──advance / about_to_finish──▶ Crossfading ──done──▶ Playing
//!     ▲               │                                                           │
//!     └──── stop ─────┴───────────── end of playlist (no repeat) ◀────────────────┘
//! ```
//!
//! Two slots hold sound instances: `current` (incoming / playing) and
//! `fading` (outgoing during a crossfade). A play request that arrives while
//! a fade is in flight is parked in a single pending slot and replayed once
//! the transition completes.

use crate::events::{AudioEvent, AudioEventKind};
use crate::instance::{Context, SoundInstance, SoundInstanceId};
use crate::playback::{
    ProcessContext, TrackHandle, advance_instance, notify_stopped, start_instance, stop_instance,
};
use crate::randomizer::{Randomizer, SelectionMode, WeightedSound};
use crate::settings::{PlaybackSettingsOverride, SoundDefaults, resolve_settings};
use crate::sound::SoundLibrary;
use crate::{AudioError, AudioResult};
use mc_core::{SampleDuration, TimeValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDescriptor {
    pub name: String,
    pub track: String,
    pub sounds: Vec<WeightedSound>,
    pub kind: SelectionMode,
    pub repeat: bool,
    pub crossfade_time: SampleDuration,
    /// Fade the first sound in over `crossfade_time`
    pub fade_in_first_sound: bool,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_sound_changed: Vec<String>,
    pub events_when_sound_stopped: Vec<String>,
}

impl PlaylistDescriptor {
    pub fn new(name: impl Into<String>, track: impl Into<String>, sounds: Vec<WeightedSound>) -> Self {
        Self {
            name: name.into(),
            track: track.into(),
            sounds,
            kind: SelectionMode::Sequence,
            repeat: false,
            crossfade_time: SampleDuration::ZERO,
            fade_in_first_sound: true,
            events_when_played: Vec::new(),
            events_when_stopped: Vec::new(),
            events_when_sound_changed: Vec::new(),
            events_when_sound_stopped: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: SelectionMode) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_crossfade_time(mut self, crossfade_time: SampleDuration) -> Self {
        self.crossfade_time = crossfade_time;
        self
    }

    pub fn with_fade_in_first_sound(mut self, fade_in: bool) -> Self {
        self.fade_in_first_sound = fade_in;
        self
    }

    pub fn from_config(
        name: &str,
        config: &PlaylistConfig,
        default_track: &str,
        sample_rate: u32,
    ) -> AudioResult<Self> {
        let sounds = config
            .sounds
            .iter()
            .map(|entry| WeightedSound::parse(entry))
            .collect::<AudioResult<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            track: config.track.clone().unwrap_or_else(|| default_track.to_string()),
            sounds,
            kind: config.kind,
            repeat: config.repeat,
            crossfade_time: config.crossfade_time.to_samples(sample_rate)?,
            fade_in_first_sound: config.fade_in_first_sound,
            events_when_played: config.events_when_played.clone(),
            events_when_stopped: config.events_when_stopped.clone(),
            events_when_sound_changed: config.events_when_sound_changed.clone(),
            events_when_sound_stopped: config.events_when_sound_stopped.clone(),
        })
    }

    /// Every entry must name a registered sound
    pub fn validate(&self, sounds: &SoundLibrary) -> AudioResult<()> {
        if self.sounds.is_empty() {
            return Err(AudioError::InvalidConfig(format!("playlist '{}' has no sounds", self.name)));
        }
        for entry in &self.sounds {
            if !sounds.contains_key(&entry.name) {
                return Err(AudioError::UnknownSound(format!(
                    "{} (in playlist '{}')",
                    entry.name, self.name
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_crossfade() -> TimeValue {
    TimeValue::Seconds(0.0)
}

/// Playlist section of a machine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistConfig {
    #[serde(default)]
    pub track: Option<String>,
    /// `"name"` or `"name|weight"`
    pub sounds: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: SelectionMode,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default = "default_crossfade")]
    pub crossfade_time: TimeValue,
    #[serde(default = "default_true")]
    pub fade_in_first_sound: bool,
    #[serde(default)]
    pub events_when_played: Vec<String>,
    #[serde(default)]
    pub events_when_stopped: Vec<String>,
    #[serde(default)]
    pub events_when_sound_changed: Vec<String>,
    #[serde(default)]
    pub events_when_sound_stopped: Vec<String>,
}

/// Per-request playlist settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistPlaySettings {
    /// Seconds
    pub crossfade_time: Option<f64>,
    pub repeat: Option<bool>,
    pub shuffle: Option<bool>,
    /// Applied to every sound the playlist plays
    pub sound_settings: PlaybackSettingsOverride,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYLIST INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// One playing run of a playlist
#[derive(Debug, Clone)]
pub struct PlaylistInstance {
    descriptor: Arc<PlaylistDescriptor>,
    context: Option<Context>,
    crossfade_time: SampleDuration,
    shuffle: bool,
    sequence: Randomizer,
    sound_settings: PlaybackSettingsOverride,
}

impl PlaylistInstance {
    pub fn new(
        descriptor: Arc<PlaylistDescriptor>,
        context: Option<Context>,
        settings: &PlaylistPlaySettings,
        sample_rate: u32,
        seed: Option<u64>,
    ) -> Self {
        let mode = match settings.shuffle {
            Some(true) if descriptor.kind == SelectionMode::Sequence => SelectionMode::RandomForceAll,
            Some(false) => SelectionMode::Sequence,
            _ => descriptor.kind,
        };
        let repeat = settings.repeat.unwrap_or(descriptor.repeat);
        let crossfade_time = settings
            .crossfade_time
            .map(|secs| SampleDuration::from_seconds(secs, sample_rate))
            .unwrap_or(descriptor.crossfade_time);

        Self {
            sequence: Randomizer::new(descriptor.sounds.clone(), mode, repeat, seed),
            shuffle: mode != SelectionMode::Sequence,
            descriptor,
            context,
            crossfade_time,
            sound_settings: settings.sound_settings.clone(),
        }
    }

    /// Next sound to play, `None` once the playlist is exhausted without repeat
    pub fn get_next_sound_name(&mut self) -> Option<String> {
        self.sequence.next_sound()
    }

    pub fn end_of_playlist(&self) -> bool {
        self.sequence.end_of_playlist()
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<PlaylistDescriptor> {
        &self.descriptor
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn crossfade_time(&self) -> SampleDuration {
        self.crossfade_time
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat(&self) -> bool {
        self.sequence.repeat()
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.sequence.set_repeat(repeat);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fade in flight on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistTransition {
    Idle,
    FadingIn { elapsed: u64, duration: u64 },
    Crossfading { elapsed: u64, duration: u64 },
}

impl PlaylistTransition {
    /// Advance; returns true when the transition completed during this call
    pub fn advance(&mut self, samples: u64) -> bool {
        match self {
            PlaylistTransition::FadingIn { elapsed, duration }
            | PlaylistTransition::Crossfading { elapsed, duration } => {
                *elapsed = (*elapsed + samples).min(*duration);
                *elapsed >= *duration
            }
            PlaylistTransition::Idle => false,
        }
    }

    /// 0.0 → 1.0 through the transition
    pub fn progress(&self) -> Option<f32> {
        match self {
            PlaylistTransition::FadingIn { elapsed, duration }
            | PlaylistTransition::Crossfading { elapsed, duration } => {
                Some(if *duration == 0 { 1.0 } else { *elapsed as f32 / *duration as f32 })
            }
            PlaylistTransition::Idle => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, PlaylistTransition::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistState {
    Idle,
    Playing,
    Crossfading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistSlotState {
    Idle,
    Playing,
    Stopping,
}

/// One slot of [`PlaylistController::get_status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistSlotStatus {
    pub status: PlaylistSlotState,
    pub sound_id: Option<SoundInstanceId>,
    pub sound: Option<String>,
    pub playlist: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingPlaylistRequest {
    descriptor: Arc<PlaylistDescriptor>,
    context: Option<Context>,
    settings: PlaylistPlaySettings,
    seed: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct PlaylistController {
    handle: TrackHandle,
    defaults: SoundDefaults,
    active: Option<PlaylistInstance>,
    current: Option<SoundInstance>,
    fading: Option<SoundInstance>,
    /// Playlist being replaced by the crossfade in flight
    retiring: Option<PlaylistInstance>,
    stopping: Vec<SoundInstance>,
    transition: PlaylistTransition,
    pending: Option<PendingPlaylistRequest>,
    /// About-to-finish arrived during a transition; advance once it completes
    advance_deferred: bool,
}

impl PlaylistController {
    pub fn new(handle: TrackHandle, defaults: SoundDefaults) -> Self {
        Self {
            handle,
            defaults,
            active: None,
            current: None,
            fading: None,
            retiring: None,
            stopping: Vec::new(),
            transition: PlaylistTransition::Idle,
            pending: None,
            advance_deferred: false,
        }
    }

    /// Start a playlist, or park the request while a fade is in flight
    ///
    /// Every request that arrives during a fade-in or crossfade is parked,
    /// whatever its context, and starts when the fade completes. A request
    /// from the active playlist's own context is parked too, so a fade is
    /// never cut short.
    ///
    /// Returns the instance ID of the first sound, or `None` when parked.
    pub fn play(
        &mut self,
        descriptor: Arc<PlaylistDescriptor>,
        context: Option<Context>,
        settings: PlaylistPlaySettings,
        seed: Option<u64>,
        ctx: &mut ProcessContext<'_>,
    ) -> AudioResult<Option<SoundInstanceId>> {
        if self.transition.is_active() {
            let request = PendingPlaylistRequest {
                descriptor,
                context,
                settings,
                seed,
            };
            log::debug!(
                "[Playlist:{}] Transition in flight, parking '{}'",
                self.handle.name,
                request.descriptor.name
            );
            if let Some(replaced) = self.pending.replace(request) {
                log::debug!(
                    "[Playlist:{}] Pending '{}' replaced",
                    self.handle.name,
                    replaced.descriptor.name
                );
            }
            return Ok(None);
        }

        let mut playlist = PlaylistInstance::new(descriptor, context, &settings, ctx.sample_rate, seed);
        let first = playlist
            .get_next_sound_name()
            .ok_or_else(|| AudioError::InvalidConfig(format!("playlist '{}' has no sounds", playlist.name())))?;
        let crossfade = playlist.crossfade_time();
        let mut sound = self.make_sound(&playlist, &first, ctx)?;
        let id = sound.id();

        match self.active.take() {
            Some(previous) => {
                log::debug!(
                    "[Playlist:{}] Crossfading '{}' into '{}'",
                    self.handle.name,
                    previous.name(),
                    playlist.name()
                );
                post_playlist_event(&playlist, "played", AudioEventKind::Played, &self.handle, ctx);
                self.retiring = Some(previous);
                self.active = Some(playlist);
                self.begin_crossfade(sound, crossfade, ctx);
            }
            None => {
                let fade_in = if playlist.descriptor.fade_in_first_sound {
                    crossfade
                } else {
                    SampleDuration::ZERO
                };
                sound.set_fade_in(fade_in);

                post_playlist_event(&playlist, "played", AudioEventKind::Played, &self.handle, ctx);
                start_instance(&mut sound, ctx.now, &self.handle, ctx);
                post_playlist_event(&playlist, "sound_changed", AudioEventKind::SoundChanged, &self.handle, ctx);

                self.current = Some(sound);
                self.active = Some(playlist);
                self.advance_deferred = false;
                if !fade_in.is_zero() {
                    self.transition = PlaylistTransition::FadingIn {
                        elapsed: 0,
                        duration: fade_in.samples(),
                    };
                }
            }
        }

        Ok(Some(id))
    }

    /// Crossfade to the next sound; returns false when ignored
    pub fn advance(&mut self, ctx: &mut ProcessContext<'_>) -> AudioResult<bool> {
        if self.transition.is_active() {
            log::debug!("[Playlist:{}] Advance ignored during a transition", self.handle.name);
            return Ok(false);
        }
        let Some(playlist) = self.active.as_mut() else {
            return Ok(false);
        };

        match playlist.get_next_sound_name() {
            Some(next) => {
                let crossfade = playlist.crossfade_time();
                let sound = match self.active.as_ref() {
                    Some(playlist) => self.make_sound(playlist, &next, ctx)?,
                    None => return Ok(false),
                };
                self.begin_crossfade(sound, crossfade, ctx);
                Ok(true)
            }
            None => {
                log::debug!("[Playlist:{}] End of playlist", self.handle.name);
                self.stop(None, ctx);
                Ok(false)
            }
        }
    }

    /// Stop the playlist, fading out its sounds
    ///
    /// `fade_out` defaults to the playlist's crossfade time.
    pub fn stop(&mut self, fade_out: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) {
        if self.pending.take().is_some() {
            log::debug!("[Playlist:{}] Pending request cancelled by stop", self.handle.name);
        }
        let Some(playlist) = self.active.take() else {
            return;
        };
        self.advance_deferred = false;
        let fade = fade_out.unwrap_or(playlist.crossfade_time()).samples();

        for mut sound in [self.current.take(), self.fading.take()].into_iter().flatten() {
            stop_instance(&mut sound, fade, ctx);
            notify_stopped(&mut sound, &self.handle, ctx);
            if !sound.state().is_finished() {
                self.stopping.push(sound);
            }
        }

        for stopped in [Some(playlist), self.retiring.take()].into_iter().flatten() {
            post_playlist_event(&stopped, "sound_stopped", AudioEventKind::SoundStopped, &self.handle, ctx);
            post_playlist_event(&stopped, "stopped", AudioEventKind::Stopped, &self.handle, ctx);
        }
        self.transition = PlaylistTransition::Idle;
    }

    /// Stop or discard whatever `context` started
    pub fn clear_context(&mut self, context: &Context, ctx: &mut ProcessContext<'_>) {
        if self.pending.as_ref().and_then(|p| p.context.as_ref()) == Some(context) {
            log::debug!("[Playlist:{}] Pending request discarded for '{}'", self.handle.name, context);
            self.pending = None;
        }
        if self.active.as_ref().and_then(PlaylistInstance::context) == Some(context) {
            self.stop(None, ctx);
        }
    }

    pub fn set_repeat(&mut self, repeat: bool) -> bool {
        match self.active.as_mut() {
            Some(playlist) => {
                playlist.set_repeat(repeat);
                true
            }
            None => false,
        }
    }

    pub fn process(&mut self, samples: u64, ctx: &mut ProcessContext<'_>) {
        let mut current_finished = false;
        let mut wants_advance = false;
        let mut current_id = None;
        if let Some(sound) = self.current.as_mut() {
            let report = advance_instance(sound, samples, &self.handle, ctx);
            current_finished = report.finished;
            wants_advance = report.about_to_finish;
            current_id = Some(sound.id());
        }

        if let Some(sound) = self.fading.as_mut() {
            sound.advance(samples);
        }
        for sound in &mut self.stopping {
            sound.advance(samples);
        }
        self.stopping.retain(|s| !s.state().is_finished());

        if self.transition.advance(samples) {
            self.complete_transition(ctx);
        }

        // A pending request consumed above replaces the current sound; the
        // report from this tick then belongs to the outgoing one.
        let replaced = current_id.is_some() && self.current.as_ref().map(SoundInstance::id) != current_id;
        if replaced {
            if current_finished {
                if let Some(outgoing) = self.fading.as_mut().filter(|s| Some(s.id()) == current_id) {
                    notify_stopped(outgoing, &self.handle, ctx);
                }
            }
            return;
        }

        if current_finished {
            self.on_current_finished(ctx);
        } else if wants_advance || self.advance_deferred {
            if self.transition.is_active() {
                self.advance_deferred = true;
            } else {
                self.advance_deferred = false;
                self.auto_advance(ctx);
            }
        }
    }

    /// Crossfade into the next sound ahead of the current one's end
    fn auto_advance(&mut self, ctx: &mut ProcessContext<'_>) {
        let last_round = self
            .active
            .as_ref()
            .is_some_and(|p| p.end_of_playlist() && !p.repeat());
        let crossfades = self
            .active
            .as_ref()
            .is_some_and(|p| !p.crossfade_time().is_zero());
        if crossfades && !last_round {
            if let Err(err) = self.advance(ctx) {
                log::warn!("[Playlist:{}] Auto-advance failed: {}", self.handle.name, err);
            }
        }
    }

    fn on_current_finished(&mut self, ctx: &mut ProcessContext<'_>) {
        self.advance_deferred = false;
        if self.transition.is_active() {
            self.complete_transition(ctx);
            if self.transition.is_active() {
                // A pending request started a new transition
                return;
            }
        }
        let Some(playlist) = self.active.as_mut() else {
            return;
        };

        match playlist.get_next_sound_name() {
            Some(next) => {
                let result = match self.active.as_ref() {
                    Some(playlist) => self.make_sound(playlist, &next, ctx),
                    None => return,
                };
                let sound = match result {
                    Ok(sound) => sound,
                    Err(err) => {
                        log::warn!("[Playlist:{}] Cannot play next sound: {}", self.handle.name, err);
                        self.stop(Some(SampleDuration::ZERO), ctx);
                        return;
                    }
                };
                self.begin_crossfade(sound, SampleDuration::ZERO, ctx);
            }
            None => self.stop(Some(SampleDuration::ZERO), ctx),
        }
    }

    fn begin_crossfade(&mut self, mut incoming: SoundInstance, duration: SampleDuration, ctx: &mut ProcessContext<'_>) {
        if let Some(mut outgoing) = self.current.take() {
            stop_instance(&mut outgoing, duration.samples(), ctx);
            if let Some(mut previous) = self.fading.replace(outgoing) {
                notify_stopped(&mut previous, &self.handle, ctx);
            }
        }

        incoming.set_fade_in(duration);
        start_instance(&mut incoming, ctx.now, &self.handle, ctx);
        self.current = Some(incoming);
        self.advance_deferred = false;
        self.transition = PlaylistTransition::Crossfading {
            elapsed: 0,
            duration: duration.samples(),
        };

        if duration.is_zero() {
            self.complete_transition(ctx);
        }
    }

    fn complete_transition(&mut self, ctx: &mut ProcessContext<'_>) {
        let finished = std::mem::replace(&mut self.transition, PlaylistTransition::Idle);
        if let PlaylistTransition::Crossfading { .. } = finished {
            if let Some(playlist) = &self.active {
                post_playlist_event(playlist, "sound_changed", AudioEventKind::SoundChanged, &self.handle, ctx);
            }
            if let Some(mut outgoing) = self.fading.take() {
                notify_stopped(&mut outgoing, &self.handle, ctx);
                if !outgoing.state().is_finished() {
                    self.stopping.push(outgoing);
                }
            }
            if let Some(previous) = self.retiring.take() {
                post_playlist_event(&previous, "sound_stopped", AudioEventKind::SoundStopped, &self.handle, ctx);
                post_playlist_event(&previous, "stopped", AudioEventKind::Stopped, &self.handle, ctx);
            }
        }

        if let Some(request) = self.pending.take() {
            log::debug!(
                "[Playlist:{}] Playing pending '{}'",
                self.handle.name,
                request.descriptor.name
            );
            if let Err(err) = self.play(request.descriptor, request.context, request.settings, request.seed, ctx) {
                log::warn!("[Playlist:{}] Pending request failed: {}", self.handle.name, err);
            }
        }
    }

    fn make_sound(
        &self,
        playlist: &PlaylistInstance,
        name: &str,
        ctx: &ProcessContext<'_>,
    ) -> AudioResult<SoundInstance> {
        let descriptor = ctx
            .sounds
            .get(name)
            .cloned()
            .ok_or_else(|| AudioError::UnknownSound(name.to_string()))?;
        let mut settings = resolve_settings(
            &PlaybackSettingsOverride::default(),
            &playlist.sound_settings,
            &descriptor,
            &self.defaults,
            ctx.sample_rate,
        );
        if !playlist.crossfade_time().is_zero() {
            settings.about_to_finish_time = Some(playlist.crossfade_time());
        }
        Ok(SoundInstance::new(descriptor, settings, playlist.context().cloned()))
    }

    // Queries

    pub fn state(&self) -> PlaylistState {
        match (self.transition, &self.active) {
            (PlaylistTransition::Crossfading { .. }, _) => PlaylistState::Crossfading,
            (_, Some(_)) => PlaylistState::Playing,
            (_, None) => PlaylistState::Idle,
        }
    }

    pub fn transition(&self) -> PlaylistTransition {
        self.transition
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending.is_some()
    }

    pub fn active_playlist(&self) -> Option<&PlaylistInstance> {
        self.active.as_ref()
    }

    pub fn current_sound(&self) -> Option<&SoundInstance> {
        self.current.as_ref()
    }

    pub fn fading_sound(&self) -> Option<&SoundInstance> {
        self.fading.as_ref()
    }

    /// `[current slot, fading slot]`; the fading slot only during a crossfade
    pub fn get_status(&self) -> Vec<PlaylistSlotStatus> {
        let playlist = self.active.as_ref().map(|p| p.name().to_string());
        let first = match (&self.current, self.stopping.first()) {
            (Some(sound), _) => slot_status(PlaylistSlotState::Playing, sound, playlist.clone()),
            (None, Some(sound)) => slot_status(PlaylistSlotState::Stopping, sound, None),
            (None, None) => PlaylistSlotStatus {
                status: PlaylistSlotState::Idle,
                sound_id: None,
                sound: None,
                playlist: None,
            },
        };

        let mut status = vec![first];
        if let Some(sound) = &self.fading {
            let owner = self.retiring.as_ref().map(|p| p.name().to_string()).or(playlist);
            status.push(slot_status(PlaylistSlotState::Stopping, sound, owner));
        }
        status
    }
}

fn slot_status(status: PlaylistSlotState, sound: &SoundInstance, playlist: Option<String>) -> PlaylistSlotStatus {
    PlaylistSlotStatus {
        status,
        sound_id: Some(sound.id()),
        sound: Some(sound.name().to_string()),
        playlist,
    }
}

fn post_playlist_event(
    playlist: &PlaylistInstance,
    suffix: &str,
    kind: AudioEventKind,
    track: &TrackHandle,
    ctx: &mut ProcessContext<'_>,
) {
    let descriptor = &playlist.descriptor;
    let custom = match kind {
        AudioEventKind::Played => &descriptor.events_when_played,
        AudioEventKind::Stopped => &descriptor.events_when_stopped,
        AudioEventKind::SoundChanged => &descriptor.events_when_sound_changed,
        AudioEventKind::SoundStopped => &descriptor.events_when_sound_stopped,
        _ => return,
    };
    let names = std::iter::once(format!("{}_{}", descriptor.name, suffix)).chain(custom.iter().cloned());
    for name in names {
        ctx.post(AudioEvent::new(name, kind).with_track(track.name.clone()));
    }
}
