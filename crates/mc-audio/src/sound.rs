//! Sound descriptors
//!
//! A [`SoundDescriptor`] is the validated, immutable description of one
//! sound asset: which track it plays on, its default playback settings,
//! markers, lifecycle event names and an optional ducking envelope. The
//! decoded buffer itself lives with the asset loader; the engine only needs
//! the buffer length in samples.

use crate::{AudioError, AudioResult};
use mc_core::{GainValue, SampleDuration, TimeValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Default sound volume when neither the sound nor the track sets one
pub const DEFAULT_SOUND_VOLUME: f32 = 0.5;

/// Shortest ducking attack or release
pub const MINIMUM_DUCKING_DURATION_MS: f64 = 10.0;

/// Registered sounds by name
pub type SoundLibrary = HashMap<String, Arc<SoundDescriptor>>;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// What to do when a sound hits its `simultaneous_limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealingMethod {
    /// Ignore the new request
    Skip,
    /// Stop the oldest playing instance of the sound
    #[default]
    Oldest,
    /// Stop the most recently started instance of the sound
    Newest,
}

/// What to do with a playing sound when its owning context ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeEndAction {
    /// Stop right away (using the sound's fade out)
    Stop,
    /// Let the current loop finish, then stop
    #[default]
    StopLooping,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DUCKING ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Ducking settings attached to a sound
///
/// ```text
///  gain
///  1.0 ─────┐                       ┌──────
///           │╲                     ╱
///           │ ╲                   ╱
///  atten    │  ╲_________________╱
///           │  │                 │  │
///         delay attack      release_point  release
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DuckingEnvelope {
    /// Track whose gain is reduced
    pub target_track: String,
    pub delay: SampleDuration,
    pub attack: SampleDuration,
    /// Gain applied to the target track while fully ducked
    pub attenuation: f32,
    /// Release starts this far before the sound's natural end
    pub release_point: SampleDuration,
    pub release: SampleDuration,
}

impl DuckingEnvelope {
    /// Build an envelope, clamping attack and release to the minimum duration
    ///
    /// Returns `None` for an attenuation of 1.0, which would not change the
    /// target's gain.
    pub fn new(
        target_track: impl Into<String>,
        delay: SampleDuration,
        attack: SampleDuration,
        attenuation: f32,
        release_point: SampleDuration,
        release: SampleDuration,
        sample_rate: u32,
    ) -> Option<Self> {
        let attenuation = if attenuation.is_finite() {
            attenuation.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if attenuation >= 1.0 {
            return None;
        }

        let floor =
            SampleDuration::from_ms(MINIMUM_DUCKING_DURATION_MS, sample_rate).at_least(SampleDuration(1));

        Some(Self {
            target_track: target_track.into(),
            delay,
            attack: attack.at_least(floor),
            attenuation,
            release_point,
            release: release.at_least(floor),
        })
    }

    /// Build from config values
    pub fn from_config(config: &DuckingConfig, sample_rate: u32) -> AudioResult<Option<Self>> {
        Ok(Self::new(
            config.target.clone(),
            config.delay.to_samples(sample_rate)?,
            config.attack.to_samples(sample_rate)?,
            config.attenuation.to_gain()?,
            config.release_point.to_samples(sample_rate)?,
            config.release.to_samples(sample_rate)?,
            sample_rate,
        ))
    }

    /// Check the envelope fits inside a sound of the given length
    pub fn validate(&self, sound_length: SampleDuration) -> Result<(), String> {
        let length = sound_length.samples();
        if length == 0 {
            return Err("sound length is zero".into());
        }
        if self.attack.samples() > length {
            return Err("attack is longer than the sound".into());
        }
        if self.release_point.samples() >= length {
            return Err("release point is at or beyond the sound length".into());
        }
        if self.release_point.samples() + self.attack.samples() >= length {
            return Err("release point plus attack does not fit inside the sound".into());
        }
        Ok(())
    }
}

fn default_ducking_ramp() -> TimeValue {
    TimeValue::Text(format!("{MINIMUM_DUCKING_DURATION_MS}ms"))
}

fn default_zero_time() -> TimeValue {
    TimeValue::Seconds(0.0)
}

/// Ducking section of a sound config
///
/// `target`, `attenuation` and `release_point` have no defaults; a ducking
/// block missing any of them fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuckingConfig {
    pub target: String,
    #[serde(default = "default_zero_time")]
    pub delay: TimeValue,
    #[serde(default = "default_ducking_ramp")]
    pub attack: TimeValue,
    pub attenuation: GainValue,
    pub release_point: TimeValue,
    #[serde(default = "default_ducking_ramp")]
    pub release: TimeValue,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Position in a sound that posts events when playback crosses it
#[derive(Debug, Clone, PartialEq)]
pub struct SoundMarker {
    pub time: SampleDuration,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub time: TimeValue,
    #[serde(default)]
    pub events: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND DESCRIPTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated sound asset description
#[derive(Debug, Clone, PartialEq)]
pub struct SoundDescriptor {
    pub name: String,
    pub track: String,
    pub length: SampleDuration,
    /// `None` falls back to the track's sound defaults
    pub volume: Option<f32>,
    pub priority: Option<i32>,
    /// Extra repetitions after the first play; -1 loops forever
    pub loops: i32,
    /// `None` waits in the queue forever; zero means play now or drop
    pub max_queue_time: Option<SampleDuration>,
    pub simultaneous_limit: Option<u32>,
    pub stealing_method: StealingMethod,
    /// Streamed from disk rather than held in memory
    pub streaming: bool,
    pub start_at: SampleDuration,
    pub fade_in: Option<SampleDuration>,
    pub fade_out: Option<SampleDuration>,
    pub about_to_finish_time: Option<SampleDuration>,
    /// Sorted by time
    pub markers: Vec<SoundMarker>,
    pub ducking: Option<DuckingEnvelope>,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_looping: Vec<String>,
    pub events_when_about_to_finish: Vec<String>,
    pub mode_end_action: ModeEndAction,
    pub key: Option<String>,
}

impl SoundDescriptor {
    pub fn new(name: impl Into<String>, track: impl Into<String>, length: SampleDuration) -> Self {
        Self {
            name: name.into(),
            track: track.into(),
            length,
            volume: None,
            priority: None,
            loops: 0,
            max_queue_time: None,
            simultaneous_limit: None,
            stealing_method: StealingMethod::default(),
            streaming: false,
            start_at: SampleDuration::ZERO,
            fade_in: None,
            fade_out: None,
            about_to_finish_time: None,
            markers: Vec::new(),
            ducking: None,
            events_when_played: Vec::new(),
            events_when_stopped: Vec::new(),
            events_when_looping: Vec::new(),
            events_when_about_to_finish: Vec::new(),
            mode_end_action: ModeEndAction::default(),
            key: None,
        }
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
        self.loops = loops;
        self
    }

    pub fn with_max_queue_time(mut self, max_queue_time: Option<SampleDuration>) -> Self {
        self.max_queue_time = max_queue_time;
        self
    }

    pub fn with_simultaneous_limit(mut self, limit: u32, method: StealingMethod) -> Self {
        self.simultaneous_limit = Some(limit);
        self.stealing_method = method;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_start_at(mut self, start_at: SampleDuration) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_fades(mut self, fade_in: SampleDuration, fade_out: SampleDuration) -> Self {
        self.fade_in = Some(fade_in);
        self.fade_out = Some(fade_out);
        self
    }

    pub fn with_about_to_finish_time(mut self, lead: SampleDuration) -> Self {
        self.about_to_finish_time = Some(lead);
        self
    }

    pub fn with_marker(mut self, time: SampleDuration, events: Vec<String>) -> Self {
        self.markers.push(SoundMarker { time, events });
        self.markers.sort_by_key(|m| m.time);
        self
    }

    pub fn with_ducking(mut self, ducking: Option<DuckingEnvelope>) -> Self {
        self.ducking = ducking;
        self
    }

    pub fn with_mode_end_action(mut self, action: ModeEndAction) -> Self {
        self.mode_end_action = action;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Build from a config entry
    ///
    /// `default_track` is used when the entry names no track.
    pub fn from_config(
        name: &str,
        config: &SoundConfig,
        default_track: &str,
        sample_rate: u32,
    ) -> AudioResult<Self> {
        let length = config
            .length
            .as_ref()
            .ok_or_else(|| AudioError::InvalidConfig(format!("sound '{name}' has no length")))?
            .to_samples(sample_rate)?;

        let opt_samples = |value: &Option<TimeValue>| -> AudioResult<Option<SampleDuration>> {
            value
                .as_ref()
                .map(|v| v.to_samples(sample_rate).map_err(AudioError::from))
                .transpose()
        };

        let mut markers = config
            .markers
            .iter()
            .map(|m| {
                Ok(SoundMarker {
                    time: m.time.to_samples(sample_rate)?,
                    events: m.events.clone(),
                })
            })
            .collect::<AudioResult<Vec<_>>>()?;
        markers.sort_by_key(|m| m.time);

        let ducking = match &config.ducking {
            Some(ducking) => DuckingEnvelope::from_config(ducking, sample_rate)?,
            None => None,
        };

        let descriptor = Self {
            name: name.to_string(),
            track: config.track.clone().unwrap_or_else(|| default_track.to_string()),
            length,
            volume: config.volume.as_ref().map(|v| v.to_gain()).transpose()?,
            priority: config.priority,
            loops: config.loops,
            max_queue_time: opt_samples(&config.max_queue_time)?,
            simultaneous_limit: config.simultaneous_limit,
            stealing_method: config.stealing_method,
            streaming: config.streaming,
            start_at: opt_samples(&config.start_at)?.unwrap_or_default(),
            fade_in: opt_samples(&config.fade_in)?,
            fade_out: opt_samples(&config.fade_out)?,
            about_to_finish_time: opt_samples(&config.about_to_finish_time)?,
            markers,
            ducking,
            events_when_played: config.events_when_played.clone(),
            events_when_stopped: config.events_when_stopped.clone(),
            events_when_looping: config.events_when_looping.clone(),
            events_when_about_to_finish: config.events_when_about_to_finish.clone(),
            mode_end_action: config.mode_end_action,
            key: config.key.clone(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check internal consistency
    pub fn validate(&self) -> AudioResult<()> {
        if self.name.is_empty() {
            return Err(AudioError::InvalidConfig("sound name is empty".into()));
        }
        if self.loops < -1 {
            return Err(AudioError::InvalidConfig(format!(
                "sound '{}': loops must be -1 or greater (got {})",
                self.name, self.loops
            )));
        }
        if let Some(volume) = self.volume {
            if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
                return Err(AudioError::InvalidConfig(format!(
                    "sound '{}': volume {} is outside 0.0..=1.0",
                    self.name, volume
                )));
            }
        }
        if self.simultaneous_limit == Some(0) {
            return Err(AudioError::InvalidConfig(format!(
                "sound '{}': simultaneous_limit must be at least 1",
                self.name
            )));
        }
        if self.length.samples() > 0 && self.start_at >= self.length {
            return Err(AudioError::InvalidConfig(format!(
                "sound '{}': start_at is beyond the end of the sound",
                self.name
            )));
        }
        if let Some(ducking) = &self.ducking {
            ducking
                .validate(self.length)
                .map_err(|reason| AudioError::InvalidDucking {
                    sound: self.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Loops forever
    #[inline]
    pub fn loops_forever(&self) -> bool {
        self.loops < 0
    }
}

/// Sound section of a machine config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub track: Option<String>,
    /// Length of the decoded buffer
    pub length: Option<TimeValue>,
    pub volume: Option<GainValue>,
    pub priority: Option<i32>,
    pub loops: i32,
    pub max_queue_time: Option<TimeValue>,
    pub simultaneous_limit: Option<u32>,
    pub stealing_method: StealingMethod,
    pub streaming: bool,
    pub start_at: Option<TimeValue>,
    pub fade_in: Option<TimeValue>,
    pub fade_out: Option<TimeValue>,
    pub about_to_finish_time: Option<TimeValue>,
    pub markers: Vec<MarkerConfig>,
    pub ducking: Option<DuckingConfig>,
    pub events_when_played: Vec<String>,
    pub events_when_stopped: Vec<String>,
    pub events_when_looping: Vec<String>,
    pub events_when_about_to_finish: Vec<String>,
    pub mode_end_action: ModeEndAction,
    pub key: Option<String>,
}
