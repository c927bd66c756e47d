//! Sound system configuration
//!
//! The `sound_system:` section of a machine config plus the asset tables
//! (sounds, pools, playlists, loop sets). Loads from JSON or YAML and builds
//! a ready [`AudioEngine`].
//!
//! ```yaml
//! sound_system:
//!   buffer: 2048
//!   frequency: 44100
//!   master_volume: 0.5
//!   tracks:
//!     - name: sfx
//!       type: standard
//!       simultaneous_sounds: 8
//! sounds:
//!   beep: { length: 500ms, volume: -6 db }
//! ```

use crate::engine::{AudioEngine, EngineConfig};
use crate::events::DEFAULT_EVENT_QUEUE_CAPACITY;
use crate::mixer::DEFAULT_MIXER_QUEUE_CAPACITY;
use crate::playlist::{PlaylistConfig, PlaylistDescriptor};
use crate::pool::{SoundPoolConfig, SoundPoolDescriptor};
use crate::sound::{SoundConfig, SoundDescriptor};
use crate::sound_loop::{SoundLoopSetConfig, SoundLoopSetDescriptor};
use crate::track::{TrackConfig, TrackKind};
use crate::{AudioError, AudioResult};
use mc_core::DEFAULT_SAMPLE_RATE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default mixer buffer size (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 2048;

/// Name of the track created when the config lists none
pub const DEFAULT_TRACK_NAME: &str = "default";

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND SYSTEM
// ═══════════════════════════════════════════════════════════════════════════════

/// `buffer:` accepts a frame count or `auto`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BufferSize {
    Frames(i64),
    Text(String),
}

impl Default for BufferSize {
    fn default() -> Self {
        BufferSize::Frames(DEFAULT_BUFFER_SIZE as i64)
    }
}

impl BufferSize {
    /// Resolve to a power-of-two frame count; anything else falls back to the default
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Frames(frames) => match u32::try_from(*frames) {
                Ok(frames) if frames.is_power_of_two() => frames,
                _ => {
                    log::warn!(
                        "[SoundSystem] Buffer size {} is not a power of two, using {}",
                        frames,
                        DEFAULT_BUFFER_SIZE
                    );
                    DEFAULT_BUFFER_SIZE
                }
            },
            BufferSize::Text(text) if text.eq_ignore_ascii_case("auto") => DEFAULT_BUFFER_SIZE,
            BufferSize::Text(text) => {
                log::warn!(
                    "[SoundSystem] Invalid buffer size '{}', using {}",
                    text,
                    DEFAULT_BUFFER_SIZE
                );
                DEFAULT_BUFFER_SIZE
            }
        }
    }
}

/// One entry of `sound_system.tracks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub name: String,
    #[serde(rename = "type", default = "default_track_kind")]
    pub kind: String,
    #[serde(flatten)]
    pub config: TrackConfig,
}

fn default_track_kind() -> String {
    TrackKind::Standard.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundSystemSection {
    pub enabled: bool,
    pub buffer: BufferSize,
    /// Output sample rate (Hz)
    pub frequency: u32,
    pub channels: u8,
    pub master_volume: f32,
    pub tracks: Vec<TrackEntry>,
    pub event_queue_capacity: usize,
    pub mixer_queue_capacity: usize,
    /// Fixed seed for random selections (reproducible runs)
    pub rng_seed: Option<u64>,
}

impl Default for SoundSystemSection {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer: BufferSize::default(),
            frequency: DEFAULT_SAMPLE_RATE,
            channels: 1,
            master_volume: 0.5,
            tracks: Vec::new(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            mixer_queue_capacity: DEFAULT_MIXER_QUEUE_CAPACITY,
            rng_seed: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundSystemConfig {
    pub sound_system: SoundSystemSection,
    pub sounds: BTreeMap<String, SoundConfig>,
    pub sound_pools: BTreeMap<String, SoundPoolConfig>,
    pub playlists: BTreeMap<String, PlaylistConfig>,
    pub sound_loop_sets: BTreeMap<String, SoundLoopSetConfig>,
}

impl SoundSystemConfig {
    pub fn from_json(text: &str) -> AudioResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> AudioResult<Self> {
        Ok(serde_yml::from_str(text)?)
    }

    /// Engine settings derived from the `sound_system` section
    pub fn engine_config(&self) -> EngineConfig {
        let section = &self.sound_system;
        EngineConfig {
            sample_rate: section.frequency,
            master_volume: section.master_volume,
            event_queue_capacity: section.event_queue_capacity,
            mixer_queue_capacity: section.mixer_queue_capacity,
            rng_seed: section.rng_seed,
        }
    }

    /// Check the section before building an engine
    pub fn validate(&self) -> AudioResult<()> {
        let section = &self.sound_system;
        if !(1..=2).contains(&section.channels) {
            return Err(AudioError::InvalidConfig(format!(
                "channels must be 1 or 2 (got {})",
                section.channels
            )));
        }
        if !(0.0..=1.0).contains(&section.master_volume) {
            return Err(AudioError::InvalidConfig(format!(
                "master_volume must be between 0 and 1 (got {})",
                section.master_volume
            )));
        }
        Ok(())
    }
}

impl AudioEngine {
    /// Build an engine with every track and asset the config declares
    pub fn from_config(config: &SoundSystemConfig) -> AudioResult<Self> {
        if !config.sound_system.enabled {
            return Err(AudioError::Disabled);
        }
        config.validate()?;

        let section = &config.sound_system;
        let mut engine = AudioEngine::new(config.engine_config())?;
        log::info!(
            "[SoundSystem] Buffer {} frames, {} channel(s)",
            section.buffer.frames(),
            section.channels
        );

        if section.tracks.is_empty() {
            engine.add_track(DEFAULT_TRACK_NAME, TrackKind::Standard, TrackConfig::default())?;
        }
        for entry in &section.tracks {
            engine.create_track(&entry.name, &entry.kind, entry.config.clone())?;
        }

        let sample_rate = engine.sample_rate();
        for (name, sound) in &config.sounds {
            engine.register_sound(SoundDescriptor::from_config(name, sound, "", sample_rate)?)?;
        }
        for (name, pool) in &config.sound_pools {
            engine.register_sound_pool(SoundPoolDescriptor::from_config(name, pool)?)?;
        }
        for (name, playlist) in &config.playlists {
            engine.register_playlist(PlaylistDescriptor::from_config(name, playlist, "", sample_rate)?)?;
        }
        for (name, set) in &config.sound_loop_sets {
            engine.register_sound_loop_set(SoundLoopSetDescriptor::from_config(name, set, "", sample_rate)?)?;
        }

        log::info!(
            "[SoundSystem] Loaded {} track(s), {} sound(s), {} playlist(s), {} loop set(s)",
            engine.tracks().len(),
            config.sounds.len(),
            config.playlists.len(),
            config.sound_loop_sets.len()
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = SoundSystemConfig::from_json("{}").unwrap();
        let section = &config.sound_system;
        assert!(section.enabled);
        assert_eq!(section.buffer.frames(), 2048);
        assert_eq!(section.frequency, 44100);
        assert_eq!(section.channels, 1);
        assert_relative_eq!(section.master_volume, 0.5);

        let engine = AudioEngine::from_config(&config).unwrap();
        assert_eq!(engine.tracks().len(), 1);
        assert_eq!(engine.tracks()[0].name(), DEFAULT_TRACK_NAME);
        assert_relative_eq!(engine.tracks()[0].volume(), 0.5);
    }

    #[test]
    fn test_buffer_size_fallback() {
        assert_eq!(BufferSize::Frames(1024).frames(), 1024);
        assert_eq!(BufferSize::Frames(1000).frames(), DEFAULT_BUFFER_SIZE);
        assert_eq!(BufferSize::Frames(-4).frames(), DEFAULT_BUFFER_SIZE);
        assert_eq!(BufferSize::Text("auto".into()).frames(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_disabled() {
        let config = SoundSystemConfig::from_json(r#"{"sound_system": {"enabled": false}}"#).unwrap();
        assert!(matches!(AudioEngine::from_config(&config), Err(AudioError::Disabled)));
    }

    #[test]
    fn test_yaml_full_config() {
        let yaml = r#"
sound_system:
  frequency: 48000
  buffer: auto
  rng_seed: 3
  tracks:
    - name: music
      type: playlist
      volume: 0.6
    - name: sfx
      type: standard
      simultaneous_sounds: 4
    - name: loops
      type: sound_loop
sounds:
  beep:
    track: sfx
    length: 500ms
    volume: -6 db
  boop:
    track: sfx
    length: 1 sec
  song1:
    track: music
    length: 2s
  song2:
    track: music
    length: 2s
  drums:
    track: loops
    length: 2s
sound_pools:
  blips:
    sounds: [beep, boop|2]
playlists:
  attract:
    track: music
    sounds: [song1, song2]
    crossfade_time: 1s
sound_loop_sets:
  groove:
    track: loops
    sound: drums
    tempo: 120
"#;
        let config = SoundSystemConfig::from_yaml(yaml).unwrap();
        let engine = AudioEngine::from_config(&config).unwrap();
        assert_eq!(engine.sample_rate(), 48000);
        assert_eq!(engine.tracks().len(), 3);
        assert_eq!(engine.track("MUSIC").map(|t| t.kind()), Some(TrackKind::Playlist));

        let beep = engine.sound("beep").unwrap();
        assert_eq!(beep.length.samples(), 24000);
        assert_relative_eq!(beep.volume.unwrap(), 0.501, epsilon = 0.001);

        assert!(engine.has_sound_pool("blips"));
        assert_eq!(engine.playlist("attract").unwrap().crossfade_time.samples(), 48000);
        assert!(engine.sound_loop_set("groove").is_some());
    }

    #[test]
    fn test_asset_on_wrong_track_kind() {
        let json = r#"{
            "sound_system": {"tracks": [{"name": "sfx", "type": "standard"}, {"name": "music", "type": "standard"}]},
            "sounds": {"song": {"track": "music", "length": 1.0}},
            "playlists": {"attract": {"track": "music", "sounds": ["song"]}}
        }"#;
        let config = SoundSystemConfig::from_json(json).unwrap();
        assert!(matches!(
            AudioEngine::from_config(&config),
            Err(AudioError::WrongTrackKind { .. })
        ));
    }

    #[test]
    fn test_unimplemented_track_kind() {
        let json = r#"{"sound_system": {"tracks": [{"name": "pool", "type": "sound_pool"}]}}"#;
        let config = SoundSystemConfig::from_json(json).unwrap();
        assert!(matches!(
            AudioEngine::from_config(&config),
            Err(AudioError::TrackKindNotImplemented(_))
        ));
    }
}
