//! Sound pools
//!
//! A pool is played like a sound: each request picks one of its member
//! sounds with the pool's selection mode and plays it with the pool's
//! settings layered under the request's own overrides.

use crate::randomizer::{Randomizer, SelectionMode, WeightedSound};
use crate::settings::PlaybackSettingsOverride;
use crate::sound::SoundLibrary;
use crate::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SoundPoolDescriptor {
    pub name: String,
    /// Defaults to the chosen sound's track
    pub track: Option<String>,
    pub sounds: Vec<WeightedSound>,
    pub kind: SelectionMode,
    pub settings: PlaybackSettingsOverride,
}

impl SoundPoolDescriptor {
    pub fn new(name: impl Into<String>, sounds: Vec<WeightedSound>) -> Self {
        Self {
            name: name.into(),
            track: None,
            sounds,
            kind: SelectionMode::Random,
            settings: PlaybackSettingsOverride::default(),
        }
    }

    pub fn with_kind(mut self, kind: SelectionMode) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_settings(mut self, settings: PlaybackSettingsOverride) -> Self {
        self.settings = settings;
        self
    }

    pub fn from_config(name: &str, config: &SoundPoolConfig) -> AudioResult<Self> {
        let sounds = config
            .sounds
            .iter()
            .map(|entry| WeightedSound::parse(entry))
            .collect::<AudioResult<Vec<_>>>()?;
        Ok(Self {
            name: name.to_string(),
            track: config.track.clone(),
            sounds,
            kind: config.kind,
            settings: config.settings.clone(),
        })
    }

    pub fn validate(&self, sounds: &SoundLibrary) -> AudioResult<()> {
        if self.sounds.is_empty() {
            return Err(AudioError::InvalidConfig(format!("sound pool '{}' has no sounds", self.name)));
        }
        if sounds.contains_key(&self.name) {
            return Err(AudioError::InvalidConfig(format!(
                "sound pool '{}' has the same name as a sound",
                self.name
            )));
        }
        for entry in &self.sounds {
            if !sounds.contains_key(&entry.name) {
                return Err(AudioError::UnknownSound(format!(
                    "{} (in sound pool '{}')",
                    entry.name, self.name
                )));
            }
        }
        Ok(())
    }
}

fn default_pool_kind() -> SelectionMode {
    SelectionMode::Random
}

/// `sound_pools:` entry of a machine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundPoolConfig {
    #[serde(default)]
    pub track: Option<String>,
    /// `"name"` or `"name|weight"`
    pub sounds: Vec<String>,
    #[serde(default = "default_pool_kind", rename = "type")]
    pub kind: SelectionMode,
    #[serde(flatten)]
    pub settings: PlaybackSettingsOverride,
}

/// Pool with its selection state
#[derive(Debug, Clone)]
pub struct SoundPool {
    descriptor: Arc<SoundPoolDescriptor>,
    selector: Randomizer,
}

impl SoundPool {
    pub fn new(descriptor: SoundPoolDescriptor, seed: Option<u64>) -> Self {
        let selector = Randomizer::new(descriptor.sounds.clone(), descriptor.kind, true, seed);
        Self {
            descriptor: Arc::new(descriptor),
            selector,
        }
    }

    /// Pick the next member sound
    pub fn next_sound(&mut self) -> Option<String> {
        self.selector.next_sound()
    }

    pub fn descriptor(&self) -> &Arc<SoundPoolDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::SoundDescriptor;
    use mc_core::SampleDuration;

    #[test]
    fn test_pool_config_with_settings() {
        let config: SoundPoolConfig =
            serde_json::from_str(r#"{"sounds": ["a|3", "b"], "type": "random_force_next", "volume": 0.9, "priority": 4}"#)
                .unwrap();
        let desc = SoundPoolDescriptor::from_config("hits", &config).unwrap();
        assert_eq!(desc.kind, SelectionMode::RandomForceNext);
        assert_eq!(desc.settings.volume, Some(0.9));
        assert_eq!(desc.settings.priority, Some(4));
        assert_eq!(desc.sounds[0].weight, 3);
    }

    #[test]
    fn test_pool_validation_and_cycle() {
        let mut library = SoundLibrary::new();
        for name in ["a", "b"] {
            library.insert(name.into(), Arc::new(SoundDescriptor::new(name, "sfx", SampleDuration(10))));
        }
        let desc = SoundPoolDescriptor::new("hits", vec![WeightedSound::new("a", 1), WeightedSound::new("b", 1)])
            .with_kind(SelectionMode::Sequence);
        assert!(desc.validate(&library).is_ok());

        let mut pool = SoundPool::new(desc, Some(5));
        let picks: Vec<_> = (0..4).filter_map(|_| pool.next_sound()).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);

        let bad = SoundPoolDescriptor::new("a", vec![WeightedSound::new("a", 1)]);
        assert!(bad.validate(&library).is_err());
    }
}
