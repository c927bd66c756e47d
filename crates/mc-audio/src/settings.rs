//! Playback settings resolution
//!
//! Every playback setting resolves through the same chain:
//!
//! ```text
//!   explicit override  >  instance settings  >  sound descriptor  >  track defaults
//! ```
//!
//! Explicit overrides come from the play request, instance settings from the
//! owning asset (sound pool, playlist), and track defaults from the track's
//! `sound_defaults` config.

use crate::sound::{DEFAULT_SOUND_VOLUME, ModeEndAction, SoundDescriptor};
use mc_core::SampleDuration;
use serde::{Deserialize, Serialize};

/// Queue wait override
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTimeout {
    /// Wait for a free slot forever
    Unlimited,
    /// Wait at most this many seconds (0 = play now or drop)
    Seconds(f64),
}

/// Optional playback settings; unset fields defer to the next layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettingsOverride {
    pub volume: Option<f32>,
    pub priority: Option<i32>,
    pub loops: Option<i32>,
    pub max_queue_time: Option<QueueTimeout>,
    /// Seconds
    pub start_at: Option<f64>,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
    pub about_to_finish_time: Option<f64>,
    pub events_when_played: Option<Vec<String>>,
    pub events_when_stopped: Option<Vec<String>>,
    pub events_when_looping: Option<Vec<String>>,
    pub events_when_about_to_finish: Option<Vec<String>>,
    pub key: Option<String>,
    pub mode_end_action: Option<ModeEndAction>,
}

impl PlaybackSettingsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_loops(mut self, loops: i32) -> Self {
        self.loops = Some(loops);
        self
    }

    pub fn with_max_queue_time(mut self, timeout: QueueTimeout) -> Self {
        self.max_queue_time = Some(timeout);
        self
    }

    pub fn with_fade_in(mut self, secs: f64) -> Self {
        self.fade_in = Some(secs);
        self
    }

    pub fn with_fade_out(mut self, secs: f64) -> Self {
        self.fade_out = Some(secs);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Fill unset fields from `lower`
    pub fn layered(&self, lower: &Self) -> Self {
        Self {
            volume: self.volume.or(lower.volume),
            priority: self.priority.or(lower.priority),
            loops: self.loops.or(lower.loops),
            max_queue_time: self.max_queue_time.or(lower.max_queue_time),
            start_at: self.start_at.or(lower.start_at),
            fade_in: self.fade_in.or(lower.fade_in),
            fade_out: self.fade_out.or(lower.fade_out),
            about_to_finish_time: self.about_to_finish_time.or(lower.about_to_finish_time),
            events_when_played: self
                .events_when_played
                .clone()
                .or_else(|| lower.events_when_played.clone()),
            events_when_stopped: self
                .events_when_stopped
                .clone()
                .or_else(|| lower.events_when_stopped.clone()),
            events_when_looping: self
                .events_when_looping
                .clone()
                .or_else(|| lower.events_when_looping.clone()),
            events_when_about_to_finish: self
                .events_when_about_to_finish
                .clone()
                .or_else(|| lower.events_when_about_to_finish.clone()),
            key: self.key.clone().or_else(|| lower.key.clone()),
            mode_end_action: self.mode_end_action.or(lower.mode_end_action),
        }
    }
}

/// Track-level defaults for sounds that do not set their own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDefaults {
    pub volume: f32,
    pub priority: i32,
    /// Seconds
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Default for SoundDefaults {
    fn default() -> Self {
        Self {
            volume: DEFAULT_SOUND_VOLUME,
            priority: 0,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }
}

/// Fully resolved settings of one sound instance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    pub volume: f32,
    pub priority: i32,
    pub loops: i32,
    pub max_queue_time: Option<SampleDuration>,
    pub start_at: SampleDuration,
    pub fade_in: SampleDuration,
    pub fade_out: SampleDuration,
    pub about_to_finish_time: Option<SampleDuration>,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_looping: Vec<String>,
    pub events_when_about_to_finish: Vec<String>,
    pub key: Option<String>,
    pub mode_end_action: ModeEndAction,
}

/// Resolve settings through the override chain
pub fn resolve_settings(
    explicit: &PlaybackSettingsOverride,
    instance: &PlaybackSettingsOverride,
    descriptor: &SoundDescriptor,
    defaults: &SoundDefaults,
    sample_rate: u32,
) -> ResolvedSettings {
    let layered = explicit.layered(instance);
    let samples = |secs: f64| SampleDuration::from_seconds(secs, sample_rate);

    let max_queue_time = match layered.max_queue_time {
        Some(QueueTimeout::Unlimited) => None,
        Some(QueueTimeout::Seconds(secs)) => Some(samples(secs)),
        None => descriptor.max_queue_time,
    };

    ResolvedSettings {
        volume: layered
            .volume
            .or(descriptor.volume)
            .unwrap_or(defaults.volume)
            .clamp(0.0, 1.0),
        priority: layered
            .priority
            .or(descriptor.priority)
            .unwrap_or(defaults.priority),
        loops: layered.loops.unwrap_or(descriptor.loops).max(-1),
        max_queue_time,
        start_at: layered
            .start_at
            .map(samples)
            .unwrap_or(descriptor.start_at),
        fade_in: layered
            .fade_in
            .map(samples)
            .or(descriptor.fade_in)
            .unwrap_or_else(|| samples(defaults.fade_in)),
        fade_out: layered
            .fade_out
            .map(samples)
            .or(descriptor.fade_out)
            .unwrap_or_else(|| samples(defaults.fade_out)),
        about_to_finish_time: layered
            .about_to_finish_time
            .map(samples)
            .or(descriptor.about_to_finish_time),
        events_when_played: layered
            .events_when_played
            .unwrap_or_else(|| descriptor.events_when_played.clone()),
        events_when_stopped: layered
            .events_when_stopped
            .unwrap_or_else(|| descriptor.events_when_stopped.clone()),
        events_when_looping: layered
            .events_when_looping
            .unwrap_or_else(|| descriptor.events_when_looping.clone()),
        events_when_about_to_finish: layered
            .events_when_about_to_finish
            .unwrap_or_else(|| descriptor.events_when_about_to_finish.clone()),
        key: layered.key.or_else(|| descriptor.key.clone()),
        mode_end_action: layered.mode_end_action.unwrap_or(descriptor.mode_end_action),
    }
}
