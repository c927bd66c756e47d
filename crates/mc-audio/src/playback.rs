//! Playback plumbing shared by every track kind
//!
//! Starting, advancing and stopping a [`SoundInstance`] always touches the
//! same three collaborators: the mixer link, the ducking engine and the event
//! queue. These helpers keep that wiring (and the event naming) in one place.

use crate::ducking::DuckingEngine;
use crate::events::{AudioEvent, AudioEventKind, EventQueue};
use crate::instance::{AdvanceReport, SoundInstance, SoundInstanceState};
use crate::mixer::{MixerCommand, MixerLink};
use crate::sound::SoundLibrary;
use std::sync::Arc;

/// Engine services handed to tracks while they work
pub struct ProcessContext<'a> {
    /// Engine sample clock at the start of the current operation
    pub now: u64,
    pub sample_rate: u32,
    pub events: &'a mut EventQueue,
    pub ducking: &'a mut DuckingEngine,
    pub mixer: &'a MixerLink,
    pub sounds: &'a SoundLibrary,
}

impl ProcessContext<'_> {
    /// Queue an event
    #[inline]
    pub fn post(&mut self, event: AudioEvent) {
        self.events.push(event);
    }
}

/// Identity of the track that owns an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub index: usize,
    pub name: String,
}

impl TrackHandle {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Post `<sound>_<suffix>` followed by the instance's custom events of that kind
pub(crate) fn post_sound_event(
    instance: &SoundInstance,
    kind: AudioEventKind,
    track: &TrackHandle,
    ctx: &mut ProcessContext<'_>,
) {
    let settings = instance.settings();
    let (suffix, custom) = match kind {
        AudioEventKind::Played => ("played", &settings.events_when_played),
        AudioEventKind::Stopped => ("stopped", &settings.events_when_stopped),
        AudioEventKind::Looping => ("looping", &settings.events_when_looping),
        AudioEventKind::AboutToFinish => ("about_to_finish", &settings.events_when_about_to_finish),
        other => {
            log::warn!("[Playback] No sound event for kind {:?}", other);
            return;
        }
    };

    let names = std::iter::once(format!("{}_{}", instance.name(), suffix)).chain(custom.iter().cloned());
    for name in names {
        ctx.post(
            AudioEvent::new(name, kind)
                .with_track(track.name.clone())
                .with_instance(instance.id()),
        );
    }
}

/// Start an instance at engine sample `now` and post its played events
pub(crate) fn start_instance(
    instance: &mut SoundInstance,
    now: u64,
    track: &TrackHandle,
    ctx: &mut ProcessContext<'_>,
) {
    instance.start(now);
    ctx.mixer.send(MixerCommand::Play {
        instance_id: instance.id(),
        track: track.index,
        sound: Arc::clone(instance.descriptor()),
        start_position: instance.position(),
        volume: instance.settings().volume,
        loops: instance.loops_remaining(),
        fade_in: instance.settings().fade_in.samples(),
    });
    if let Some(envelope) = &instance.descriptor().ducking {
        ctx.ducking
            .attach(instance.id(), envelope.clone(), instance.samples_until_end());
    }
    log::debug!(
        "[Track:{}] Playing '{}' (instance {}, priority {})",
        track.name,
        instance.name(),
        instance.id(),
        instance.priority()
    );
    post_sound_event(instance, AudioEventKind::Played, track, ctx);
}

/// Advance an instance and post its looping, marker and about-to-finish events
pub(crate) fn advance_instance(
    instance: &mut SoundInstance,
    samples: u64,
    track: &TrackHandle,
    ctx: &mut ProcessContext<'_>,
) -> AdvanceReport {
    let report = instance.advance(samples);
    ctx.ducking.advance_instance(instance.id(), report.advanced);

    for _ in 0..report.loops {
        post_sound_event(instance, AudioEventKind::Looping, track, ctx);
    }
    for &marker_id in &report.markers {
        let Some(marker) = instance.descriptor().markers.get(marker_id) else {
            continue;
        };
        for name in &marker.events {
            ctx.post(
                AudioEvent::new(name.clone(), AudioEventKind::Marker)
                    .with_track(track.name.clone())
                    .with_instance(instance.id())
                    .with_marker(marker_id),
            );
        }
    }
    if report.about_to_finish {
        post_sound_event(instance, AudioEventKind::AboutToFinish, track, ctx);
    }
    if report.finished {
        ctx.ducking.release(instance.id());
    }
    report
}

/// Begin stopping an instance; returns false if it was already stopping
pub(crate) fn stop_instance(instance: &mut SoundInstance, fade_out: u64, ctx: &mut ProcessContext<'_>) -> bool {
    let was_playing = instance.state() == SoundInstanceState::Playing;
    if !instance.stop(fade_out) {
        return false;
    }
    if was_playing {
        ctx.mixer.send(MixerCommand::Stop {
            instance_id: instance.id(),
            fade_out,
        });
    }
    ctx.ducking.release(instance.id());
    true
}

/// Post the stopped events once per instance
pub(crate) fn notify_stopped(instance: &mut SoundInstance, track: &TrackHandle, ctx: &mut ProcessContext<'_>) {
    if instance.mark_stopped_notified() {
        post_sound_event(instance, AudioEventKind::Stopped, track, ctx);
    }
}

/// Let the current loop finish, then end
pub(crate) fn stop_looping_instance(instance: &mut SoundInstance, ctx: &mut ProcessContext<'_>) {
    instance.stop_looping();
    if instance.state().is_active() {
        ctx.mixer.send(MixerCommand::SetLoops {
            instance_id: instance.id(),
            loops: 0,
        });
    }
    ctx.ducking.set_end(instance.id(), instance.samples_until_end());
}
