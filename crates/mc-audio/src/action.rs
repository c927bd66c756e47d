//! Player Actions
//!
//! Every request a sound/track/playlist/loop player can make, as one tagged
//! enum. Deserializes from config or show entries like
//!
//! ```text
//! { "action": "play_sound", "sound": "beep", "settings": { "volume": 0.8 } }
//! { "action": "play_layer", "track": "loops", "layer": 2, "timing": "quantized" }
//! ```
//!
//! and is executed by [`crate::AudioEngine::execute`]. Times are seconds.

use crate::instance::SoundInstanceId;
use crate::playlist::PlaylistPlaySettings;
use crate::settings::PlaybackSettingsOverride;
use crate::sound_loop::{LayerTiming, SoundLoopPlaySettings};
use crate::standard::PlayOutcome;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// ACTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    // Sounds
    PlaySound {
        /// Sound or sound pool name
        sound: String,
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        settings: PlaybackSettingsOverride,
    },
    StopSound {
        sound: String,
        #[serde(default)]
        fade_out: Option<f64>,
    },
    StopSoundLooping {
        sound: String,
    },
    StopKey {
        key: String,
        #[serde(default)]
        fade_out: Option<f64>,
    },

    // Tracks
    PlayTrack {
        track: String,
        #[serde(default)]
        fade: f64,
    },
    StopTrack {
        track: String,
        #[serde(default)]
        fade: f64,
    },
    PauseTrack {
        track: String,
        #[serde(default)]
        fade: f64,
    },
    ResumeTrack {
        track: String,
        #[serde(default)]
        fade: f64,
    },
    SetTrackVolume {
        track: String,
        volume: f32,
        #[serde(default)]
        fade: f64,
    },
    StopAllSounds {
        /// All tracks when omitted
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        fade: Option<f64>,
    },

    // Playlists
    PlayPlaylist {
        playlist: String,
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        settings: PlaylistPlaySettings,
    },
    AdvancePlaylist {
        track: String,
    },
    StopPlaylist {
        track: String,
        #[serde(default)]
        fade_out: Option<f64>,
    },
    SetPlaylistRepeat {
        track: String,
        repeat: bool,
    },

    // Sound loops
    PlaySoundLoopSet {
        sound_loop_set: String,
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        settings: SoundLoopPlaySettings,
    },
    StopSoundLoopSet {
        track: String,
        #[serde(default)]
        fade_out: Option<f64>,
    },
    StopLoopingSoundLoopSet {
        track: String,
    },
    PlayLayer {
        track: String,
        /// 1-based
        layer: usize,
        #[serde(default)]
        fade_in: Option<f64>,
        #[serde(default)]
        timing: LayerTiming,
        #[serde(default)]
        volume: Option<f32>,
    },
    StopLayer {
        track: String,
        layer: usize,
        #[serde(default)]
        fade_out: Option<f64>,
    },
    StopLoopingLayer {
        track: String,
        layer: usize,
    },
    JumpToTime {
        track: String,
        time: f64,
    },

    SetMasterVolume {
        volume: f32,
    },
}

impl Action {
    /// Snake-case action name as it appears in config
    pub fn display_name(&self) -> &'static str {
        match self {
            Action::PlaySound { .. } => "play_sound",
            Action::StopSound { .. } => "stop_sound",
            Action::StopSoundLooping { .. } => "stop_sound_looping",
            Action::StopKey { .. } => "stop_key",
            Action::PlayTrack { .. } => "play_track",
            Action::StopTrack { .. } => "stop_track",
            Action::PauseTrack { .. } => "pause_track",
            Action::ResumeTrack { .. } => "resume_track",
            Action::SetTrackVolume { .. } => "set_track_volume",
            Action::StopAllSounds { .. } => "stop_all_sounds",
            Action::PlayPlaylist { .. } => "play_playlist",
            Action::AdvancePlaylist { .. } => "advance_playlist",
            Action::StopPlaylist { .. } => "stop_playlist",
            Action::SetPlaylistRepeat { .. } => "set_playlist_repeat",
            Action::PlaySoundLoopSet { .. } => "play_sound_loop_set",
            Action::StopSoundLoopSet { .. } => "stop_sound_loop_set",
            Action::StopLoopingSoundLoopSet { .. } => "stop_looping_sound_loop_set",
            Action::PlayLayer { .. } => "play_layer",
            Action::StopLayer { .. } => "stop_layer",
            Action::StopLoopingLayer { .. } => "stop_looping_layer",
            Action::JumpToTime { .. } => "jump_to_time",
            Action::SetMasterVolume { .. } => "set_master_volume",
        }
    }

    /// Check if this action starts audio
    #[inline]
    pub fn is_play_action(&self) -> bool {
        matches!(
            self,
            Action::PlaySound { .. }
                | Action::PlayPlaylist { .. }
                | Action::PlaySoundLoopSet { .. }
                | Action::PlayLayer { .. }
        )
    }

    /// Check if this action stops audio
    #[inline]
    pub fn is_stop_action(&self) -> bool {
        matches!(
            self,
            Action::StopSound { .. }
                | Action::StopSoundLooping { .. }
                | Action::StopKey { .. }
                | Action::StopTrack { .. }
                | Action::StopAllSounds { .. }
                | Action::StopPlaylist { .. }
                | Action::StopSoundLoopSet { .. }
                | Action::StopLoopingSoundLoopSet { .. }
                | Action::StopLayer { .. }
                | Action::StopLoopingLayer { .. }
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// What an executed action did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// A standard-track play request
    Sound(PlayOutcome),
    /// A playlist or loop set started (`None` when deferred)
    Started(Option<SoundInstanceId>),
    /// Number of sounds affected by a stop
    Stopped(usize),
    Done,
}
