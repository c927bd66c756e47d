//! # mc-audio
//!
//! Real-time audio control for the media controller: tracks, ducking,
//! playlists and beat-synchronized sound loops, driven by config players and
//! shows through [`Action`]s.
//!
//! ## Architecture
//!
//! ```text
//!   Action ──▶ AudioEngine ──┬──▶ Track "sfx"    (StandardTrack: slots + queue)
//!                            ├──▶ Track "music"  (PlaylistController)
//!                            └──▶ Track "loops"  (SoundLoopController)
//!                                   │
//!          ┌────────────────────────┼───────────────────────┐
//!          ▼                        ▼                       ▼
//!     DuckingEngine            EventQueue ──▶ EventBus   MixerLink ──▶ native mixer
//!     (track gains)           (<sound>_played …)        (rtrb commands + gains)
//! ```
//!
//! ## Timing
//!
//! Everything is counted in samples at the engine sample rate. The owner
//! calls [`AudioEngine::process_tick`] from its control loop; no background
//! threads are started by this crate.

pub mod action;
pub mod config;
pub mod ducking;
pub mod engine;
pub mod events;
pub mod instance;
pub mod mixer;
pub mod playback;
pub mod playlist;
pub mod pool;
pub mod queue;
pub mod ramp;
pub mod randomizer;
pub mod settings;
pub mod sound;
pub mod sound_loop;
pub mod standard;
pub mod track;

pub use action::{Action, ActionOutcome};
pub use config::{SoundSystemConfig, SoundSystemSection, TrackEntry};
pub use ducking::DuckingEngine;
pub use engine::{AudioEngine, EngineConfig};
pub use events::{AudioEvent, AudioEventKind, EventBus};
pub use instance::{Context, SoundInstance, SoundInstanceId, SoundInstanceState};
pub use mixer::{GainSnapshot, MixerCommand, MixerEndpoint};
pub use playlist::{PlaylistDescriptor, PlaylistPlaySettings};
pub use pool::SoundPoolDescriptor;
pub use randomizer::{SelectionMode, WeightedSound};
pub use settings::{PlaybackSettingsOverride, QueueTimeout, SoundDefaults};
pub use sound::{DuckingEnvelope, ModeEndAction, SoundDescriptor, StealingMethod};
pub use sound_loop::{LayerTiming, LoopLayerDescriptor, LoopSetTiming, SoundLoopPlaySettings, SoundLoopSetDescriptor};
pub use standard::{PlayOutcome, StopTarget};
pub use track::{Track, TrackConfig, TrackId, TrackKind, TrackState};

use mc_core::McError;
use thiserror::Error;

/// Audio error types
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Duplicate track name: {0}")]
    DuplicateTrackName(String),

    #[error("Invalid track type: {0}")]
    InvalidTrackKind(String),

    #[error("Track type not implemented: {0}")]
    TrackKindNotImplemented(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Track '{track}' is not a {expected} track")]
    WrongTrackKind { track: String, expected: TrackKind },

    #[error("Unknown sound: {0}")]
    UnknownSound(String),

    #[error("Unknown playlist: {0}")]
    UnknownPlaylist(String),

    #[error("Unknown sound loop set: {0}")]
    UnknownSoundLoopSet(String),

    #[error("Invalid sound request: {0}")]
    InvalidSoundRequest(String),

    #[error("Sound loop set '{set}' cannot use sound '{sound}' (streaming or empty)")]
    InvalidLoopSound { set: String, sound: String },

    #[error("Invalid ducking on sound '{sound}': {reason}")]
    InvalidDucking { sound: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Sound system is disabled")]
    Disabled,

    #[error(transparent)]
    Core(#[from] McError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
