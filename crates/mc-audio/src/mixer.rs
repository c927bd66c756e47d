//! Mixer link
//!
//! The control thread never touches sample data. It hands the native mixer
//! a stream of [`MixerCommand`]s over a lock-free ring buffer and publishes
//! per-track gains once per tick in a shared [`GainSnapshot`].
//!
//! ```text
//! ┌──────────────────┐   rtrb ring buffer    ┌──────────────────┐
//! │  Control thread  │ ───── commands ─────▶ │   Mixer thread   │
//! │   (MixerLink)    │                       │ (MixerEndpoint)  │
//! │                  │ ── GainSnapshot ────▶ │                  │
//! └──────────────────┘   Arc<RwLock<..>>     └──────────────────┘
//! ```

use crate::instance::SoundInstanceId;
use crate::sound::SoundDescriptor;
use parking_lot::{Mutex, RwLock};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Default command queue capacity
pub const DEFAULT_MIXER_QUEUE_CAPACITY: usize = 4096;

/// Command sent to the native mixer
#[derive(Debug, Clone)]
pub enum MixerCommand {
    /// Start a sound instance
    Play {
        instance_id: SoundInstanceId,
        track: usize,
        sound: Arc<SoundDescriptor>,
        start_position: u64,
        volume: f32,
        loops: i32,
        fade_in: u64,
    },
    /// Stop an instance after fading out
    Stop {
        instance_id: SoundInstanceId,
        fade_out: u64,
    },
    /// Change an instance's volume
    SetVolume {
        instance_id: SoundInstanceId,
        volume: f32,
        fade: u64,
    },
    /// Change the remaining loop count (0 = finish the current loop)
    SetLoops {
        instance_id: SoundInstanceId,
        loops: i32,
    },
    /// Move the read position
    Seek {
        instance_id: SoundInstanceId,
        position: u64,
    },
    PauseTrack { track: usize },
    ResumeTrack { track: usize },
}

/// Gains the mixer applies this tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainSnapshot {
    /// Effective track gain (track volume × ducking × master), by track index
    pub track_gains: Vec<f32>,
    pub master_volume: f32,
    /// Engine sample clock at publish time
    pub clock: u64,
}

/// Control-thread side of the link
pub struct MixerLink {
    producer: Mutex<Producer<MixerCommand>>,
    snapshot: Arc<RwLock<GainSnapshot>>,
    dropped: AtomicU64,
    /// Set once a mixer has taken the endpoint
    attached: AtomicBool,
}

impl MixerLink {
    /// Queue a command; a full queue drops the command
    ///
    /// Drops are only counted while no mixer is attached. With a mixer
    /// attached they are logged on the 1st, 2nd, 4th, 8th ... drop.
    pub fn send(&self, command: MixerCommand) -> bool {
        match self.producer.lock().push(command) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(command)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if self.is_attached() && dropped.is_power_of_two() {
                    log::warn!(
                        "[MixerLink] Command queue full, dropping {:?} ({} dropped so far)",
                        command,
                        dropped
                    );
                }
                false
            }
        }
    }

    /// Mark the endpoint as handed to a mixer
    pub fn attach(&self) {
        self.attached.store(true, Ordering::Relaxed);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed)
    }

    /// Publish this tick's gains
    pub fn publish(&self, snapshot: GainSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    /// Commands lost to a full queue
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> GainSnapshot {
        self.snapshot.read().clone()
    }
}

impl std::fmt::Debug for MixerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerLink")
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

/// Mixer-thread side of the link
pub struct MixerEndpoint {
    consumer: Consumer<MixerCommand>,
    snapshot: Arc<RwLock<GainSnapshot>>,
}

impl MixerEndpoint {
    /// Next pending command
    pub fn pop(&mut self) -> Option<MixerCommand> {
        self.consumer.pop().ok()
    }

    /// Move every pending command into `out`
    pub fn drain_into(&mut self, out: &mut Vec<MixerCommand>) {
        while let Ok(command) = self.consumer.pop() {
            out.push(command);
        }
    }

    /// Number of pending commands
    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }

    /// Effective gain of a track (1.0 for unknown tracks)
    pub fn track_gain(&self, track: usize) -> f32 {
        self.snapshot.read().track_gains.get(track).copied().unwrap_or(1.0)
    }

    pub fn snapshot(&self) -> GainSnapshot {
        self.snapshot.read().clone()
    }
}

impl std::fmt::Debug for MixerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerEndpoint")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Create a linked control/mixer pair
pub fn create_mixer_link(capacity: usize) -> (MixerLink, MixerEndpoint) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let snapshot = Arc::new(RwLock::new(GainSnapshot {
        master_volume: 1.0,
        ..Default::default()
    }));

    (
        MixerLink {
            producer: Mutex::new(producer),
            snapshot: Arc::clone(&snapshot),
            dropped: AtomicU64::new(0),
            attached: AtomicBool::new(false),
        },
        MixerEndpoint { consumer, snapshot },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_flow_in_order() {
        let (link, mut endpoint) = create_mixer_link(8);
        link.send(MixerCommand::PauseTrack { track: 0 });
        link.send(MixerCommand::Stop {
            instance_id: 3,
            fade_out: 10,
        });
        assert_eq!(endpoint.pending(), 2);

        let mut out = Vec::new();
        endpoint.drain_into(&mut out);
        assert!(matches!(out[0], MixerCommand::PauseTrack { track: 0 }));
        assert!(matches!(out[1], MixerCommand::Stop { instance_id: 3, .. }));
        assert!(endpoint.pop().is_none());
    }

    #[test]
    fn test_full_queue_drops() {
        let (link, _endpoint) = create_mixer_link(1);
        link.attach();
        assert!(link.send(MixerCommand::PauseTrack { track: 0 }));
        assert!(!link.send(MixerCommand::ResumeTrack { track: 0 }));
        assert_eq!(link.dropped_count(), 1);
    }

    #[test]
    fn test_unattached_link_counts_drops() {
        let (link, _endpoint) = create_mixer_link(2);
        assert!(!link.is_attached());
        for track in 0..10 {
            link.send(MixerCommand::PauseTrack { track });
        }
        assert_eq!(link.dropped_count(), 8);

        link.attach();
        assert!(link.is_attached());
        assert!(!link.send(MixerCommand::ResumeTrack { track: 0 }));
        assert_eq!(link.dropped_count(), 9);
    }

    #[test]
    fn test_gain_snapshot_shared() {
        let (link, endpoint) = create_mixer_link(4);
        assert_eq!(endpoint.track_gain(0), 1.0);
        link.publish(GainSnapshot {
            track_gains: vec![0.25, 0.5],
            master_volume: 0.5,
            clock: 100,
        });
        assert_eq!(endpoint.track_gain(1), 0.5);
        assert_eq!(endpoint.snapshot().clock, 100);
    }
}
