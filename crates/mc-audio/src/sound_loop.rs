//! Sound Loop Controller
//!
//! Beat-synchronized layered loops on a `sound_loop` track. A loop set is a
//! base loop plus numbered layers (1-based). Every layer plays in phase with
//! the base loop on its beat grid:
//!
//! ```text
//!   base   |0 ─────── 500 ─────── 1000 ─────── 1500 ─────── 2000|  (grid = 500)
//!   layer 1          ▲ play_layer(quantized) at 200 starts here (500)
//!   layer 2    ▲ play_layer(immediate) at 200 starts at base position 200
//! ```
//!
//! Switching loop sets is either deferred to the end of the current base
//! iteration (`loop_end`, sample accurate inside the tick) or immediate with
//! an optional synchronized crossfade (`now`).
//!
//! Loop tracks post set-level events only (`<set>_played`, `<set>_stopped`,
//! `<set>_looping`); the sounds inside a set stay silent on the event queue.

use crate::events::{AudioEvent, AudioEventKind};
use crate::instance::{Context, SoundInstance, SoundInstanceId, SoundInstanceState};
use crate::mixer::MixerCommand;
use crate::playback::{ProcessContext, TrackHandle, stop_instance, stop_looping_instance};
use crate::settings::{PlaybackSettingsOverride, SoundDefaults, resolve_settings};
use crate::sound::{ModeEndAction, SoundDescriptor, SoundLibrary};
use crate::{AudioError, AudioResult};
use mc_core::{SampleDuration, Tempo, TimeValue, samples_to_next_boundary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// When a newly requested loop set replaces the playing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSetTiming {
    Now,
    #[default]
    LoopEnd,
}

/// When a layer starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTiming {
    /// On the next beat of the base loop
    #[default]
    Quantized,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerInitialState {
    Play,
    #[default]
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopLayerDescriptor {
    pub sound: String,
    pub volume: f32,
    pub initial_state: LayerInitialState,
    pub fade_in: SampleDuration,
    pub fade_out: SampleDuration,
}

impl LoopLayerDescriptor {
    pub fn new(sound: impl Into<String>) -> Self {
        Self {
            sound: sound.into(),
            volume: crate::sound::DEFAULT_SOUND_VOLUME,
            initial_state: LayerInitialState::Stop,
            fade_in: SampleDuration::ZERO,
            fade_out: SampleDuration::ZERO,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_initial_state(mut self, state: LayerInitialState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_fades(mut self, fade_in: SampleDuration, fade_out: SampleDuration) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundLoopSetDescriptor {
    pub name: String,
    pub track: String,
    /// Base loop sound
    pub sound: String,
    pub tempo: Tempo,
    pub volume: f32,
    pub layers: Vec<LoopLayerDescriptor>,
    pub fade_in: SampleDuration,
    pub fade_out: SampleDuration,
    pub timing: LoopSetTiming,
    /// With `timing: now`, start at the playing set's position
    pub synchronize: bool,
    pub mode_end_action: ModeEndAction,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_looping: Vec<String>,
}

impl SoundLoopSetDescriptor {
    pub fn new(name: impl Into<String>, track: impl Into<String>, sound: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            track: track.into(),
            sound: sound.into(),
            tempo: Tempo::DEFAULT,
            volume: crate::sound::DEFAULT_SOUND_VOLUME,
            layers: Vec::new(),
            fade_in: SampleDuration::ZERO,
            fade_out: SampleDuration::ZERO,
            timing: LoopSetTiming::LoopEnd,
            synchronize: false,
            mode_end_action: ModeEndAction::StopLooping,
            events_when_played: Vec::new(),
            events_when_stopped: Vec::new(),
            events_when_looping: Vec::new(),
        }
    }

    pub fn with_tempo(mut self, bpm: f64) -> Self {
        self.tempo = Tempo(bpm);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_layer(mut self, layer: LoopLayerDescriptor) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_fades(mut self, fade_in: SampleDuration, fade_out: SampleDuration) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }

    pub fn with_timing(mut self, timing: LoopSetTiming, synchronize: bool) -> Self {
        self.timing = timing;
        self.synchronize = synchronize;
        self
    }

    pub fn with_mode_end_action(mut self, action: ModeEndAction) -> Self {
        self.mode_end_action = action;
        self
    }

    pub fn from_config(
        name: &str,
        config: &SoundLoopSetConfig,
        default_track: &str,
        sample_rate: u32,
    ) -> AudioResult<Self> {
        let mut layers = Vec::with_capacity(config.layers.len());
        for layer in &config.layers {
            layers.push(
                LoopLayerDescriptor::new(layer.sound.clone())
                    .with_volume(layer.volume)
                    .with_initial_state(layer.initial_state)
                    .with_fades(
                        layer.fade_in.to_samples(sample_rate)?,
                        layer.fade_out.to_samples(sample_rate)?,
                    ),
            );
        }

        Ok(Self {
            name: name.to_string(),
            track: config.track.clone().unwrap_or_else(|| default_track.to_string()),
            sound: config.sound.clone(),
            tempo: Tempo(config.tempo),
            volume: config.volume.clamp(0.0, 1.0),
            layers,
            fade_in: config.fade_in.to_samples(sample_rate)?,
            fade_out: config.fade_out.to_samples(sample_rate)?,
            timing: config.timing,
            synchronize: config.synchronize,
            mode_end_action: config.mode_end_action,
            events_when_played: config.events_when_played.clone(),
            events_when_stopped: config.events_when_stopped.clone(),
            events_when_looping: config.events_when_looping.clone(),
        })
    }

    /// Base and layer sounds must be registered, in-memory sounds
    pub fn validate(&self, sounds: &SoundLibrary) -> AudioResult<()> {
        let names = std::iter::once(&self.sound).chain(self.layers.iter().map(|l| &l.sound));
        for name in names {
            let sound = sounds
                .get(name)
                .ok_or_else(|| AudioError::UnknownSound(format!("{} (in sound loop set '{}')", name, self.name)))?;
            if sound.streaming {
                return Err(AudioError::InvalidLoopSound {
                    set: self.name.clone(),
                    sound: name.clone(),
                });
            }
            if sound.length.is_zero() {
                return Err(AudioError::InvalidLoopSound {
                    set: self.name.clone(),
                    sound: name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn default_tempo() -> f64 {
    Tempo::DEFAULT.0
}

fn default_volume() -> f32 {
    crate::sound::DEFAULT_SOUND_VOLUME
}

fn zero_time() -> TimeValue {
    TimeValue::Seconds(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopLayerConfig {
    pub sound: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub initial_state: LayerInitialState,
    #[serde(default = "zero_time")]
    pub fade_in: TimeValue,
    #[serde(default = "zero_time")]
    pub fade_out: TimeValue,
}

/// `sound_loop_sets:` entry of a machine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundLoopSetConfig {
    #[serde(default)]
    pub track: Option<String>,
    pub sound: String,
    #[serde(default = "default_tempo")]
    pub tempo: f64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub layers: Vec<LoopLayerConfig>,
    #[serde(default = "zero_time")]
    pub fade_in: TimeValue,
    #[serde(default = "zero_time")]
    pub fade_out: TimeValue,
    #[serde(default)]
    pub timing: LoopSetTiming,
    #[serde(default)]
    pub synchronize: bool,
    #[serde(default)]
    pub mode_end_action: ModeEndAction,
    #[serde(default)]
    pub events_when_played: Vec<String>,
    #[serde(default)]
    pub events_when_stopped: Vec<String>,
    #[serde(default)]
    pub events_when_looping: Vec<String>,
}

/// Per-request loop set settings (seconds for times)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundLoopPlaySettings {
    pub volume: Option<f32>,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
    pub timing: Option<LoopSetTiming>,
    pub synchronize: Option<bool>,
    pub start_at: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSetState {
    Playing,
    Delayed,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Stopped,
    Queued,
    Playing,
    FadingIn,
    FadingOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStatusEntry {
    pub layer: usize,
    pub status: LayerStatus,
    pub sound: String,
    pub sound_id: Option<SoundInstanceId>,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundLoopSetStatus {
    pub status: LoopSetState,
    pub name: String,
    pub sound: String,
    pub sound_id: Option<SoundInstanceId>,
    pub tempo: f64,
    pub position: u64,
    pub length: u64,
    /// Samples until a delayed set starts
    pub start_delay_samples_remaining: Option<u64>,
    /// Samples until the playing set's current iteration ends
    pub stop_loop_samples_remaining: Option<u64>,
    pub layers: Vec<LayerStatusEntry>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum LayerSlot {
    Stopped,
    /// Starts at engine sample `start_at`
    Queued { start_at: u64, fade_in: SampleDuration, volume: f32 },
    Active(SoundInstance),
}

#[derive(Debug, Clone)]
struct LayerState {
    descriptor: Arc<SoundDescriptor>,
    config: LoopLayerDescriptor,
    slot: LayerSlot,
}

impl LayerState {
    fn status(&self) -> LayerStatus {
        match &self.slot {
            LayerSlot::Stopped => LayerStatus::Stopped,
            LayerSlot::Queued { .. } => LayerStatus::Queued,
            LayerSlot::Active(sound) => match sound.state() {
                SoundInstanceState::Stopping => LayerStatus::FadingOut,
                SoundInstanceState::Playing if sound.fade_gain() < 1.0 => LayerStatus::FadingIn,
                SoundInstanceState::Playing => LayerStatus::Playing,
                _ => LayerStatus::Stopped,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveLoopSet {
    descriptor: Arc<SoundLoopSetDescriptor>,
    context: Option<Context>,
    base: SoundInstance,
    layers: Vec<LayerState>,
    beat_grid: u64,
    fade_out: SampleDuration,
}

impl ActiveLoopSet {
    fn length(&self) -> u64 {
        self.base.length()
    }

    /// Samples until the current base iteration ends
    fn samples_to_loop_end(&self) -> u64 {
        self.length().saturating_sub(self.base.position())
    }

    /// Base and every layer have gone silent
    fn is_finished(&self) -> bool {
        self.base.state().is_finished() && self.layers.iter().all(|l| !matches!(l.slot, LayerSlot::Active(_)))
    }

    fn stop_all(&mut self, fade_out: u64, ctx: &mut ProcessContext<'_>) {
        stop_instance(&mut self.base, fade_out, ctx);
        for layer in &mut self.layers {
            if let LayerSlot::Active(sound) = &mut layer.slot {
                stop_instance(sound, fade_out, ctx);
            } else {
                layer.slot = LayerSlot::Stopped;
            }
        }
    }

    /// Advance the set; returns the number of base loop wraps and whether the
    /// base finished
    fn advance(&mut self, samples: u64, track: &TrackHandle, ctx: &mut ProcessContext<'_>) -> (u32, bool) {
        let base_len = self.length();
        let base_start = self.base.position();

        for layer in &mut self.layers {
            if let LayerSlot::Active(sound) = &mut layer.slot {
                sound.advance(samples);
                if sound.state().is_finished() {
                    layer.slot = LayerSlot::Stopped;
                }
            }
        }

        // Queued layers start mid-tick, in phase with the base loop
        for layer in &mut self.layers {
            let LayerSlot::Queued { start_at, fade_in, volume } = layer.slot else {
                continue;
            };
            if start_at >= ctx.now + samples {
                continue;
            }
            let offset = start_at.saturating_sub(ctx.now);
            let base_pos = if base_len == 0 { 0 } else { (base_start + offset) % base_len };
            let mut sound = make_loop_sound(&layer.descriptor, volume, fade_in, self.context.clone(), ctx);
            start_loop_sound(&mut sound, ctx.now + offset, base_pos, track, ctx);
            sound.advance(samples - offset);
            layer.slot = LayerSlot::Active(sound);
        }

        let report = self.base.advance(samples);
        (report.loops, report.finished)
    }

    fn status(&self, state: LoopSetState) -> SoundLoopSetStatus {
        SoundLoopSetStatus {
            status: state,
            name: self.descriptor.name.clone(),
            sound: self.base.name().to_string(),
            sound_id: Some(self.base.id()),
            tempo: self.descriptor.tempo.0,
            position: self.base.position(),
            length: self.length(),
            start_delay_samples_remaining: None,
            stop_loop_samples_remaining: Some(self.samples_to_loop_end()),
            layers: self
                .layers
                .iter()
                .enumerate()
                .map(|(i, layer)| LayerStatusEntry {
                    layer: i + 1,
                    status: layer.status(),
                    sound: layer.config.sound.clone(),
                    sound_id: match &layer.slot {
                        LayerSlot::Active(sound) => Some(sound.id()),
                        _ => None,
                    },
                    volume: layer.config.volume,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingLoopSet {
    descriptor: Arc<SoundLoopSetDescriptor>,
    context: Option<Context>,
    settings: SoundLoopPlaySettings,
}

fn make_loop_sound(
    descriptor: &Arc<SoundDescriptor>,
    volume: f32,
    fade_in: SampleDuration,
    context: Option<Context>,
    ctx: &ProcessContext<'_>,
) -> SoundInstance {
    let overrides = PlaybackSettingsOverride {
        volume: Some(volume),
        loops: Some(-1),
        ..Default::default()
    };
    let settings = resolve_settings(
        &overrides,
        &PlaybackSettingsOverride::default(),
        descriptor,
        &SoundDefaults::default(),
        ctx.sample_rate,
    );
    let mut sound = SoundInstance::new(Arc::clone(descriptor), settings, context);
    sound.set_fade_in(fade_in);
    sound
}

fn start_loop_sound(sound: &mut SoundInstance, now: u64, position: u64, track: &TrackHandle, ctx: &mut ProcessContext<'_>) {
    sound.start(now);
    sound.seek(position);
    ctx.mixer.send(MixerCommand::Play {
        instance_id: sound.id(),
        track: track.index,
        sound: Arc::clone(sound.descriptor()),
        start_position: sound.position(),
        volume: sound.settings().volume,
        loops: sound.loops_remaining(),
        fade_in: sound.settings().fade_in.samples(),
    });
}

fn seek_loop_sound(sound: &mut SoundInstance, position: u64, ctx: &mut ProcessContext<'_>) {
    sound.seek(position);
    ctx.mixer.send(MixerCommand::Seek {
        instance_id: sound.id(),
        position: sound.position(),
    });
}

fn post_set_event(
    descriptor: &SoundLoopSetDescriptor,
    kind: AudioEventKind,
    track: &TrackHandle,
    ctx: &mut ProcessContext<'_>,
) {
    let (suffix, custom) = match kind {
        AudioEventKind::Played => ("played", &descriptor.events_when_played),
        AudioEventKind::Stopped => ("stopped", &descriptor.events_when_stopped),
        AudioEventKind::Looping => ("looping", &descriptor.events_when_looping),
        _ => return,
    };
    let names = std::iter::once(format!("{}_{}", descriptor.name, suffix)).chain(custom.iter().cloned());
    for name in names {
        ctx.post(AudioEvent::new(name, kind).with_track(track.name.clone()));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct SoundLoopController {
    handle: TrackHandle,
    current: Option<ActiveLoopSet>,
    pending: Option<PendingLoopSet>,
    /// Sets fading out after an immediate switch or a stop
    fading_out: Vec<ActiveLoopSet>,
}

impl SoundLoopController {
    pub fn new(handle: TrackHandle) -> Self {
        Self {
            handle,
            current: None,
            pending: None,
            fading_out: Vec::new(),
        }
    }

    /// Play a loop set
    ///
    /// Returns the base loop instance ID, or `None` when the set waits for
    /// the end of the current iteration.
    pub fn play_sound_loop_set(
        &mut self,
        descriptor: Arc<SoundLoopSetDescriptor>,
        context: Option<Context>,
        settings: SoundLoopPlaySettings,
        ctx: &mut ProcessContext<'_>,
    ) -> AudioResult<Option<SoundInstanceId>> {
        descriptor.validate(ctx.sounds)?;
        let timing = settings.timing.unwrap_or(descriptor.timing);

        let Some(mut previous) = self.current.take() else {
            let start_at = settings
                .start_at
                .map(|secs| SampleDuration::from_seconds(secs, ctx.sample_rate).samples())
                .unwrap_or(0);
            let id = self.start_set(descriptor, context, &settings, ctx.now, start_at, ctx)?;
            return Ok(Some(id));
        };

        match timing {
            LoopSetTiming::LoopEnd => {
                log::debug!(
                    "[SoundLoop:{}] '{}' delayed until '{}' reaches its loop end",
                    self.handle.name,
                    descriptor.name,
                    previous.descriptor.name
                );
                self.current = Some(previous);
                self.pending = Some(PendingLoopSet {
                    descriptor,
                    context,
                    settings,
                });
                Ok(None)
            }
            LoopSetTiming::Now => {
                self.pending = None;
                let fade_out = settings
                    .fade_out
                    .map(|secs| SampleDuration::from_seconds(secs, ctx.sample_rate))
                    .unwrap_or(previous.fade_out);
                let synchronize = settings.synchronize.unwrap_or(descriptor.synchronize);
                let position = if synchronize { previous.base.position() } else { 0 };

                previous.stop_all(fade_out.samples(), ctx);
                post_set_event(&previous.descriptor, AudioEventKind::Stopped, &self.handle, ctx);
                self.fading_out.push(previous);

                let id = self.start_set(descriptor, context, &settings, ctx.now, position, ctx)?;
                Ok(Some(id))
            }
        }
    }

    fn start_set(
        &mut self,
        descriptor: Arc<SoundLoopSetDescriptor>,
        context: Option<Context>,
        settings: &SoundLoopPlaySettings,
        now: u64,
        position: u64,
        ctx: &mut ProcessContext<'_>,
    ) -> AudioResult<SoundInstanceId> {
        let base_sound = ctx
            .sounds
            .get(&descriptor.sound)
            .cloned()
            .ok_or_else(|| AudioError::UnknownSound(descriptor.sound.clone()))?;
        let mut layers = Vec::with_capacity(descriptor.layers.len());
        for layer in &descriptor.layers {
            let sound = ctx
                .sounds
                .get(&layer.sound)
                .cloned()
                .ok_or_else(|| AudioError::UnknownSound(layer.sound.clone()))?;
            layers.push(LayerState {
                descriptor: sound,
                config: layer.clone(),
                slot: LayerSlot::Stopped,
            });
        }

        let volume = settings.volume.unwrap_or(descriptor.volume).clamp(0.0, 1.0);
        let fade_in = settings
            .fade_in
            .map(|secs| SampleDuration::from_seconds(secs, ctx.sample_rate))
            .unwrap_or(descriptor.fade_in);
        let fade_out = settings
            .fade_out
            .map(|secs| SampleDuration::from_seconds(secs, ctx.sample_rate))
            .unwrap_or(descriptor.fade_out);

        let mut base = make_loop_sound(&base_sound, volume, fade_in, context.clone(), ctx);
        start_loop_sound(&mut base, now, position, &self.handle, ctx);
        let base_position = base.position();

        for layer in &mut layers {
            if layer.config.initial_state == LayerInitialState::Play {
                let mut sound = make_loop_sound(&layer.descriptor, layer.config.volume, fade_in, context.clone(), ctx);
                start_loop_sound(&mut sound, now, base_position, &self.handle, ctx);
                layer.slot = LayerSlot::Active(sound);
            }
        }

        let id = base.id();
        log::debug!(
            "[SoundLoop:{}] Playing '{}' ({} layers, {} BPM)",
            self.handle.name,
            descriptor.name,
            layers.len(),
            descriptor.tempo.0
        );
        post_set_event(&descriptor, AudioEventKind::Played, &self.handle, ctx);

        self.current = Some(ActiveLoopSet {
            beat_grid: descriptor.tempo.beat_grid(ctx.sample_rate).samples(),
            descriptor,
            context,
            base,
            layers,
            fade_out,
        });
        Ok(id)
    }

    fn layer_mut(&mut self, layer: usize) -> AudioResult<(&mut ActiveLoopSet, usize)> {
        let track = self.handle.name.clone();
        let set = self
            .current
            .as_mut()
            .ok_or_else(|| AudioError::InvalidSoundRequest(format!("no sound loop set playing on '{track}'")))?;
        if layer == 0 || layer > set.layers.len() {
            return Err(AudioError::InvalidSoundRequest(format!(
                "sound loop set '{}' has no layer {}",
                set.descriptor.name, layer
            )));
        }
        Ok((set, layer - 1))
    }

    /// Start a layer (1-based)
    pub fn play_layer(
        &mut self,
        layer: usize,
        fade_in: Option<SampleDuration>,
        timing: LayerTiming,
        volume: Option<f32>,
        ctx: &mut ProcessContext<'_>,
    ) -> AudioResult<()> {
        let handle = self.handle.clone();
        let (set, idx) = self.layer_mut(layer)?;
        let state = &mut set.layers[idx];
        if matches!(&state.slot, LayerSlot::Active(s) if s.state() == SoundInstanceState::Playing) {
            log::debug!("[SoundLoop:{}] Layer {} already playing", handle.name, layer);
            return Ok(());
        }

        let fade_in = fade_in.unwrap_or(state.config.fade_in);
        let volume = volume.unwrap_or(state.config.volume).clamp(0.0, 1.0);
        match timing {
            LayerTiming::Quantized => {
                let delay = samples_to_next_boundary(set.base.position(), set.beat_grid);
                let start_at = ctx.now + delay;
                log::debug!(
                    "[SoundLoop:{}] Layer {} queued for sample {} ({} samples)",
                    handle.name,
                    layer,
                    start_at,
                    delay
                );
                set.layers[idx].slot = LayerSlot::Queued {
                    start_at,
                    fade_in,
                    volume,
                };
            }
            LayerTiming::Immediate => {
                let position = set.base.position();
                let context = set.context.clone();
                let state = &mut set.layers[idx];
                let mut sound = make_loop_sound(&state.descriptor, volume, fade_in, context, ctx);
                start_loop_sound(&mut sound, ctx.now, position, &handle, ctx);
                if let LayerSlot::Active(mut previous) = std::mem::replace(&mut state.slot, LayerSlot::Stopped) {
                    stop_instance(&mut previous, 0, ctx);
                }
                state.slot = LayerSlot::Active(sound);
            }
        }
        Ok(())
    }

    pub fn stop_layer(
        &mut self,
        layer: usize,
        fade_out: Option<SampleDuration>,
        ctx: &mut ProcessContext<'_>,
    ) -> AudioResult<()> {
        let (set, idx) = self.layer_mut(layer)?;
        let state = &mut set.layers[idx];
        let fade = fade_out.unwrap_or(state.config.fade_out).samples();
        if let LayerSlot::Active(sound) = &mut state.slot {
            stop_instance(sound, fade, ctx);
        } else {
            state.slot = LayerSlot::Stopped;
        }
        Ok(())
    }

    /// Let a layer finish its current iteration
    pub fn stop_looping_layer(&mut self, layer: usize, ctx: &mut ProcessContext<'_>) -> AudioResult<()> {
        let (set, idx) = self.layer_mut(layer)?;
        let state = &mut set.layers[idx];
        if let LayerSlot::Active(sound) = &mut state.slot {
            stop_looping_instance(sound, ctx);
        } else {
            state.slot = LayerSlot::Stopped;
        }
        Ok(())
    }

    /// Stop the playing set and cancel any delayed one
    pub fn stop_current_sound_loop_set(&mut self, fade_out: Option<SampleDuration>, ctx: &mut ProcessContext<'_>) {
        if let Some(pending) = self.pending.take() {
            log::debug!("[SoundLoop:{}] Delayed '{}' cancelled", self.handle.name, pending.descriptor.name);
        }
        let Some(mut set) = self.current.take() else {
            return;
        };
        let fade = fade_out.unwrap_or(set.fade_out).samples();
        set.stop_all(fade, ctx);
        post_set_event(&set.descriptor, AudioEventKind::Stopped, &self.handle, ctx);
        self.fading_out.push(set);
    }

    /// Let the base loop and every layer finish their current iteration
    pub fn stop_looping_current_sound_loop_set(&mut self, ctx: &mut ProcessContext<'_>) {
        let Some(set) = self.current.as_mut() else {
            return;
        };
        stop_looping_instance(&mut set.base, ctx);
        for layer in &mut set.layers {
            if let LayerSlot::Active(sound) = &mut layer.slot {
                stop_looping_instance(sound, ctx);
            } else {
                layer.slot = LayerSlot::Stopped;
            }
        }
    }

    /// Reposition the base loop; layers move by the same delta
    pub fn jump_to_time_current_sound_loop_set(&mut self, time: SampleDuration, ctx: &mut ProcessContext<'_>) {
        let Some(set) = self.current.as_mut() else {
            return;
        };
        let length = set.length();
        if length == 0 {
            return;
        }
        let old = set.base.position() as i64;
        let new = time.samples() % length;
        let delta = new as i64 - old;
        seek_loop_sound(&mut set.base, new, ctx);

        for layer in &mut set.layers {
            match &mut layer.slot {
                LayerSlot::Active(sound) if sound.length() > 0 => {
                    let moved = (sound.position() as i64 + delta).rem_euclid(sound.length() as i64) as u64;
                    seek_loop_sound(sound, moved, ctx);
                }
                LayerSlot::Queued { start_at, .. } => {
                    *start_at = ctx.now + samples_to_next_boundary(new, set.beat_grid);
                }
                _ => {}
            }
        }
        log::debug!("[SoundLoop:{}] Jumped to sample {}", self.handle.name, new);
    }

    /// Stop or wind down whatever `context` started
    pub fn clear_context(&mut self, context: &Context, ctx: &mut ProcessContext<'_>) {
        if self.pending.as_ref().and_then(|p| p.context.as_ref()) == Some(context) {
            self.pending = None;
        }
        let Some(set) = self.current.as_ref() else {
            return;
        };
        if set.context.as_ref() != Some(context) {
            return;
        }
        match set.descriptor.mode_end_action {
            ModeEndAction::Stop => self.stop_current_sound_loop_set(None, ctx),
            ModeEndAction::StopLooping => self.stop_looping_current_sound_loop_set(ctx),
        }
    }

    pub fn process(&mut self, samples: u64, ctx: &mut ProcessContext<'_>) {
        for set in &mut self.fading_out {
            set.advance(samples, &self.handle, ctx);
        }
        self.fading_out.retain(|s| !s.is_finished());

        let Some(mut set) = self.current.take() else {
            return;
        };

        // Delayed set switches exactly at the base loop end
        if self.pending.is_some() {
            let left = set.samples_to_loop_end();
            if left <= samples {
                set.advance(left, &self.handle, ctx);
                set.stop_all(0, ctx);
                post_set_event(&set.descriptor, AudioEventKind::Stopped, &self.handle, ctx);
                self.fading_out.push(set);

                if let Some(pending) = self.pending.take() {
                    let switch_at = ctx.now + left;
                    let result =
                        self.start_set(pending.descriptor, pending.context, &pending.settings, switch_at, 0, ctx);
                    match result {
                        Ok(_) => {
                            if let Some(next) = self.current.as_mut() {
                                let rest = samples - left;
                                let (loops, _) = next.advance_from(switch_at, rest, &self.handle, ctx);
                                for _ in 0..loops {
                                    post_set_event(&next.descriptor, AudioEventKind::Looping, &self.handle, ctx);
                                }
                            }
                        }
                        Err(err) => log::warn!("[SoundLoop:{}] Delayed set failed: {}", self.handle.name, err),
                    }
                }
                return;
            }
        }

        let (loops, finished) = set.advance(samples, &self.handle, ctx);
        if finished {
            set.stop_all(0, ctx);
            post_set_event(&set.descriptor, AudioEventKind::Stopped, &self.handle, ctx);
            self.fading_out.push(set);
            return;
        }
        for _ in 0..loops {
            post_set_event(&set.descriptor, AudioEventKind::Looping, &self.handle, ctx);
        }
        self.current = Some(set);
    }

    // Queries

    pub fn current_set(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.descriptor.name.as_str())
    }

    pub fn has_pending_set(&self) -> bool {
        self.pending.is_some()
    }

    pub fn layer_status(&self, layer: usize) -> Option<LayerStatus> {
        let set = self.current.as_ref()?;
        set.layers.get(layer.checked_sub(1)?).map(LayerState::status)
    }

    /// Position of a layer's playing instance
    pub fn layer_position(&self, layer: usize) -> Option<u64> {
        let set = self.current.as_ref()?;
        match &set.layers.get(layer.checked_sub(1)?)?.slot {
            LayerSlot::Active(sound) => Some(sound.position()),
            _ => None,
        }
    }

    pub fn base_position(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.base.position())
    }

    pub fn beat_grid(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.beat_grid)
    }

    /// `[delayed set?, playing set?, fading sets…]`
    pub fn get_status(&self) -> Vec<SoundLoopSetStatus> {
        let mut status = Vec::new();
        if let Some(pending) = &self.pending {
            let remaining = self.current.as_ref().map(ActiveLoopSet::samples_to_loop_end);
            status.push(SoundLoopSetStatus {
                status: LoopSetState::Delayed,
                name: pending.descriptor.name.clone(),
                sound: pending.descriptor.sound.clone(),
                sound_id: None,
                tempo: pending.descriptor.tempo.0,
                position: 0,
                length: 0,
                start_delay_samples_remaining: remaining,
                stop_loop_samples_remaining: None,
                layers: Vec::new(),
            });
        }
        if let Some(set) = &self.current {
            status.push(set.status(LoopSetState::Playing));
        }
        status.extend(self.fading_out.iter().map(|s| s.status(LoopSetState::Stopping)));
        status
    }
}

impl ActiveLoopSet {
    /// Advance a set that started at `start` inside the current tick
    fn advance_from(
        &mut self,
        start: u64,
        samples: u64,
        track: &TrackHandle,
        ctx: &mut ProcessContext<'_>,
    ) -> (u32, bool) {
        let now = ctx.now;
        ctx.now = start;
        let result = self.advance(samples, track, ctx);
        ctx.now = now;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducking::DuckingEngine;
    use crate::events::EventQueue;
    use crate::mixer::{MixerLink, create_mixer_link};

    const SR: u32 = 1000;

    struct Harness {
        events: EventQueue,
        ducking: DuckingEngine,
        mixer: MixerLink,
        sounds: SoundLibrary,
        now: u64,
    }

    impl Harness {
        fn new() -> Self {
            let (mixer, _endpoint) = create_mixer_link(256);
            let mut sounds = SoundLibrary::new();
            for (name, len) in [("kick", 2000), ("kick2", 2000), ("hihat", 2000), ("snare", 1000)] {
                sounds.insert(name.into(), Arc::new(SoundDescriptor::new(name, "loops", SampleDuration(len))));
            }
            sounds.insert(
                "stream".into(),
                Arc::new(SoundDescriptor::new("stream", "loops", SampleDuration(2000)).with_streaming(true)),
            );
            Self {
                events: EventQueue::new(256),
                ducking: DuckingEngine::new(),
                mixer,
                sounds,
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

        fn tick(&mut self, controller: &mut SoundLoopController, samples: u64) {
            controller.process(samples, &mut self.ctx());
            self.now += samples;
        }

        fn names(&mut self) -> Vec<String> {
            self.events.drain().into_iter().map(|e| e.name).collect()
        }
    }

    fn beat(name: &str, sound: &str) -> Arc<SoundLoopSetDescriptor> {
        Arc::new(
            SoundLoopSetDescriptor::new(name, "loops", sound)
                .with_tempo(120.0)
                .with_layer(LoopLayerDescriptor::new("hihat"))
                .with_layer(LoopLayerDescriptor::new("snare")),
        )
    }

    fn controller() -> SoundLoopController {
        SoundLoopController::new(TrackHandle::new(0, "loops"))
    }

    #[test]
    fn test_play_set_posts_played_and_status() {
        let mut h = Harness::new();
        let mut c = controller();
        let id = c
            .play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        assert!(id.is_some());
        assert_eq!(h.names(), vec!["basic_played"]);
        assert_eq!(c.beat_grid(), Some(500));

        let status = c.get_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].status, LoopSetState::Playing);
        assert_eq!(status[0].length, 2000);
        assert_eq!(status[0].tempo, 120.0);
        assert_eq!(status[0].layers.len(), 2);
        assert!(status[0].layers.iter().all(|l| l.status == LayerStatus::Stopped));
    }

    #[test]
    fn test_initial_layers_start_with_base() {
        let mut h = Harness::new();
        let mut c = controller();
        let set = Arc::new(
            SoundLoopSetDescriptor::new("full", "loops", "kick")
                .with_layer(LoopLayerDescriptor::new("hihat").with_initial_state(LayerInitialState::Play)),
        );
        c.play_sound_loop_set(set, None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        assert_eq!(c.layer_status(1), Some(LayerStatus::Playing));
        h.tick(&mut c, 300);
        assert_eq!(c.layer_position(1), Some(300));
    }

    #[test]
    fn test_quantized_layer_waits_for_next_beat() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.tick(&mut c, 200);

        c.play_layer(1, None, LayerTiming::Quantized, None, &mut h.ctx()).unwrap();
        assert_eq!(c.layer_status(1), Some(LayerStatus::Queued));

        h.tick(&mut c, 200);
        assert_eq!(c.layer_status(1), Some(LayerStatus::Queued));

        h.tick(&mut c, 200);
        assert_eq!(c.layer_status(1), Some(LayerStatus::Playing));
        assert_eq!(c.base_position(), Some(600));
        assert_eq!(c.layer_position(1), Some(600));
    }

    #[test]
    fn test_immediate_layer_keeps_beat_phase() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.tick(&mut c, 1200);

        c.play_layer(2, None, LayerTiming::Immediate, Some(0.8), &mut h.ctx()).unwrap();
        let base = c.base_position().unwrap();
        let layer = c.layer_position(2).unwrap();
        assert_eq!(layer, 200);
        assert_eq!(layer % 500, base % 500);
    }

    #[test]
    fn test_layer_index_is_one_based() {
        let mut h = Harness::new();
        let mut c = controller();
        assert!(c.play_layer(1, None, LayerTiming::Immediate, None, &mut h.ctx()).is_err());

        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        assert!(matches!(
            c.play_layer(0, None, LayerTiming::Immediate, None, &mut h.ctx()),
            Err(AudioError::InvalidSoundRequest(_))
        ));
        assert!(c.stop_layer(3, None, &mut h.ctx()).is_err());
    }

    #[test]
    fn test_stop_layer_fades_out() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        c.play_layer(1, None, LayerTiming::Immediate, None, &mut h.ctx()).unwrap();

        c.stop_layer(1, Some(SampleDuration(100)), &mut h.ctx()).unwrap();
        assert_eq!(c.layer_status(1), Some(LayerStatus::FadingOut));
        h.tick(&mut c, 100);
        assert_eq!(c.layer_status(1), Some(LayerStatus::Stopped));
    }

    #[test]
    fn test_loop_end_switch_is_sample_accurate() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("a", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.tick(&mut c, 500);
        h.names();

        let delayed = c
            .play_sound_loop_set(beat("b", "kick2"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        assert_eq!(delayed, None);
        let status = c.get_status();
        assert_eq!(status[0].status, LoopSetState::Delayed);
        assert_eq!(status[1].status, LoopSetState::Playing);
        assert_eq!(status[0].start_delay_samples_remaining, Some(1500));
        assert_eq!(status[0].start_delay_samples_remaining, status[1].stop_loop_samples_remaining);

        h.tick(&mut c, 1600);
        assert_eq!(h.names(), vec!["a_stopped", "b_played"]);
        assert_eq!(c.current_set(), Some("b"));
        assert_eq!(c.base_position(), Some(100));
        assert!(!c.has_pending_set());
    }

    #[test]
    fn test_looping_event_each_iteration() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.names();
        h.tick(&mut c, 2000);
        assert_eq!(h.names(), vec!["basic_looping"]);
        assert_eq!(c.base_position(), Some(0));
    }

    #[test]
    fn test_switch_now_synchronized() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("a", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.tick(&mut c, 700);
        h.names();

        let settings = SoundLoopPlaySettings {
            timing: Some(LoopSetTiming::Now),
            synchronize: Some(true),
            fade_out: Some(0.1),
            ..Default::default()
        };
        let id = c
            .play_sound_loop_set(beat("b", "kick2"), None, settings, &mut h.ctx())
            .unwrap();
        assert!(id.is_some());
        assert_eq!(h.names(), vec!["a_stopped", "b_played"]);
        assert_eq!(c.base_position(), Some(700));

        let status = c.get_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[1].status, LoopSetState::Stopping);

        h.tick(&mut c, 100);
        assert_eq!(c.get_status().len(), 1);
    }

    #[test]
    fn test_stop_current_cancels_delayed_set() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("a", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        c.play_sound_loop_set(beat("b", "kick2"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.names();

        c.stop_current_sound_loop_set(None, &mut h.ctx());
        assert!(!c.has_pending_set());
        assert_eq!(c.current_set(), None);
        assert_eq!(h.names(), vec!["a_stopped"]);
    }

    #[test]
    fn test_jump_shifts_layers_by_delta() {
        let mut h = Harness::new();
        let mut c = controller();
        c.play_sound_loop_set(beat("basic", "kick"), None, SoundLoopPlaySettings::default(), &mut h.ctx())
            .unwrap();
        h.tick(&mut c, 200);
        c.play_layer(2, None, LayerTiming::Immediate, None, &mut h.ctx()).unwrap();

        c.jump_to_time_current_sound_loop_set(SampleDuration(1700), &mut h.ctx());
        assert_eq!(c.base_position(), Some(1700));
        assert_eq!(c.layer_position(2), Some(700));

        // Backwards
        c.jump_to_time_current_sound_loop_set(SampleDuration(100), &mut h.ctx());
        assert_eq!(c.layer_position(2), Some(100));
    }

    #[test]
    fn test_clear_context_stops_looping() {
        let mut h = Harness::new();
        let mut c = controller();
        let mode = Context::from("attract");
        c.play_sound_loop_set(
            beat("basic", "kick"),
            Some(mode.clone()),
            SoundLoopPlaySettings::default(),
            &mut h.ctx(),
        )
        .unwrap();
        h.tick(&mut c, 500);
        h.names();

        c.clear_context(&mode, &mut h.ctx());
        assert_eq!(c.current_set(), Some("basic"));
        h.tick(&mut c, 1500);
        assert_eq!(h.names(), vec!["basic_stopped"]);
        assert_eq!(c.current_set(), None);

        // Idempotent
        c.clear_context(&mode, &mut h.ctx());
        assert!(h.names().is_empty());
    }

    #[test]
    fn test_streaming_sound_rejected() {
        let h = Harness::new();
        let set = SoundLoopSetDescriptor::new("bad", "loops", "kick").with_layer(LoopLayerDescriptor::new("stream"));
        assert!(matches!(
            set.validate(&h.sounds),
            Err(AudioError::InvalidLoopSound { ref sound, .. }) if sound == "stream"
        ));
        let missing = SoundLoopSetDescriptor::new("bad", "loops", "nope");
        assert!(matches!(missing.validate(&h.sounds), Err(AudioError::UnknownSound(_))));
    }

    #[test]
    fn test_loop_set_config() {
        let config: SoundLoopSetConfig = serde_json::from_str(
            r#"{
                "sound": "kick",
                "tempo": 130,
                "layers": [{"sound": "hihat", "initial_state": "play", "volume": 0.4}],
                "timing": "now",
                "fade_out": "250ms"
            }"#,
        )
        .unwrap();
        let set = SoundLoopSetDescriptor::from_config("beat", &config, "loops", 1000).unwrap();
        assert_eq!(set.tempo, Tempo(130.0));
        assert_eq!(set.timing, LoopSetTiming::Now);
        assert_eq!(set.fade_out, SampleDuration(250));
        assert_eq!(set.layers[0].initial_state, LayerInitialState::Play);
        assert_eq!(set.track, "loops");
    }
}
