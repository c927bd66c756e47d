//! Sound instances
//!
//! One playback of a [`SoundDescriptor`]. Instances move through
//!
//! ```text
//!   Queued ──start──▶ Playing ──stop(fade)──▶ Stopping ──fade done──▶ Finished
//!      │                 │                                              ▲
//!      └──── stop ───────┴──────────── natural end ─────────────────────┘
//! ```
//!
//! The control thread advances instances in samples; the report returned by
//! [`SoundInstance::advance`] tells the owning track which lifecycle events
//! to post.

use crate::ramp::GainRamp;
use crate::settings::ResolvedSettings;
use crate::sound::SoundDescriptor;
use mc_core::SampleDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════════
// IDS AND CONTEXTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique ID of a sound instance
pub type SoundInstanceId = u64;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique instance ID
pub fn generate_instance_id() -> SoundInstanceId {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Owner of a play request (a game mode, show, or other scope)
///
/// When a context ends, [`crate::AudioEngine::clear_context`] stops or
/// winds down everything it started.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context(pub String);

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Context {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Context {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundInstanceState {
    Queued,
    Playing,
    Stopping,
    Finished,
}

impl SoundInstanceState {
    /// Audible (playing or fading out)
    pub fn is_active(&self) -> bool {
        matches!(self, SoundInstanceState::Playing | SoundInstanceState::Stopping)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SoundInstanceState::Finished)
    }
}

/// What happened during one [`SoundInstance::advance`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceReport {
    /// Samples of sound that played
    pub advanced: u64,
    /// Loop wraps
    pub loops: u32,
    /// Marker indices crossed, in order
    pub markers: Vec<usize>,
    pub about_to_finish: bool,
    /// Finished (natural end or completed fade out)
    pub finished: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SoundInstance {
    id: SoundInstanceId,
    descriptor: Arc<SoundDescriptor>,
    settings: ResolvedSettings,
    state: SoundInstanceState,
    context: Option<Context>,
    position: u64,
    loops_remaining: i32,
    fade: GainRamp,
    played: u64,
    next_marker: usize,
    about_to_finish_sent: bool,
    stopped_notified: bool,
    started_at: Option<u64>,
}

impl SoundInstance {
    pub fn new(
        descriptor: Arc<SoundDescriptor>,
        settings: ResolvedSettings,
        context: Option<Context>,
    ) -> Self {
        let loops_remaining = settings.loops;
        let position = settings.start_at.samples();
        Self {
            id: generate_instance_id(),
            descriptor,
            settings,
            state: SoundInstanceState::Queued,
            context,
            position,
            loops_remaining,
            fade: GainRamp::new(1.0),
            played: 0,
            next_marker: 0,
            about_to_finish_sent: false,
            stopped_notified: false,
            started_at: None,
        }
    }

    /// Begin playback at engine sample `now`
    pub fn start(&mut self, now: u64) {
        let length = self.length();
        self.state = SoundInstanceState::Playing;
        self.started_at = Some(now);
        self.position = self.settings.start_at.samples().min(length);
        self.next_marker = self.first_marker_at_or_after(self.position);

        let fade_in = self.settings.fade_in.samples();
        if fade_in > 0 {
            self.fade.set(0.0);
            self.fade.ramp_to(1.0, fade_in);
        }
    }

    /// Advance playback by `samples`
    pub fn advance(&mut self, samples: u64) -> AdvanceReport {
        let mut report = AdvanceReport::default();

        match self.state {
            SoundInstanceState::Playing => {
                self.fade.update(samples);
                self.advance_playing(samples, &mut report);
            }
            SoundInstanceState::Stopping => {
                // Audio keeps running under the fade; lifecycle events are over
                let fade_done = self.fade.update(samples) || !self.fade.is_ramping();
                let length = self.length();
                if length == 0 {
                    self.state = SoundInstanceState::Finished;
                    report.finished = true;
                    return report;
                }
                let mut remaining = samples;
                while remaining > 0 {
                    let step = remaining.min(length - self.position);
                    self.position += step;
                    self.played += step;
                    report.advanced += step;
                    remaining -= step;
                    if self.position >= length {
                        if self.loops_remaining == 0 {
                            self.state = SoundInstanceState::Finished;
                            report.finished = true;
                            return report;
                        }
                        if self.loops_remaining > 0 {
                            self.loops_remaining -= 1;
                        }
                        self.position = 0;
                    }
                }
                if fade_done {
                    self.state = SoundInstanceState::Finished;
                    report.finished = true;
                }
            }
            SoundInstanceState::Queued | SoundInstanceState::Finished => {}
        }

        report
    }

    fn advance_playing(&mut self, samples: u64, report: &mut AdvanceReport) {
        let length = self.length();
        if length == 0 {
            self.state = SoundInstanceState::Finished;
            report.finished = true;
            self.check_about_to_finish(report);
            return;
        }

        let mut remaining = samples;
        while remaining > 0 {
            let step = remaining.min(length - self.position);
            let window_end = self.position + step;

            while let Some(marker) = self.descriptor.markers.get(self.next_marker) {
                if marker.time.samples() >= window_end {
                    break;
                }
                report.markers.push(self.next_marker);
                self.next_marker += 1;
            }

            self.position = window_end;
            self.played += step;
            report.advanced += step;
            remaining -= step;

            if self.position >= length {
                if self.loops_remaining == 0 {
                    self.state = SoundInstanceState::Finished;
                    report.finished = true;
                    break;
                }
                if self.loops_remaining > 0 {
                    self.loops_remaining -= 1;
                }
                self.position = 0;
                self.next_marker = 0;
                report.loops += 1;
            }
        }

        self.check_about_to_finish(report);
    }

    fn check_about_to_finish(&mut self, report: &mut AdvanceReport) {
        if self.about_to_finish_sent || self.loops_remaining != 0 {
            return;
        }
        let Some(lead) = self.settings.about_to_finish_time else {
            return;
        };
        let left = self.length().saturating_sub(self.position);
        if report.finished || left <= lead.samples() {
            self.about_to_finish_sent = true;
            report.about_to_finish = true;
        }
    }

    fn first_marker_at_or_after(&self, position: u64) -> usize {
        self.descriptor
            .markers
            .iter()
            .position(|m| m.time.samples() >= position)
            .unwrap_or(self.descriptor.markers.len())
    }

    /// Stop with a fade out; returns false if already stopping or finished
    ///
    /// Queued instances finish immediately. A zero fade still passes through
    /// `Stopping` and finishes on the next advance.
    pub fn stop(&mut self, fade_out: u64) -> bool {
        match self.state {
            SoundInstanceState::Queued => {
                self.state = SoundInstanceState::Finished;
                true
            }
            SoundInstanceState::Playing => {
                self.state = SoundInstanceState::Stopping;
                if fade_out == 0 {
                    self.fade.set(0.0);
                } else {
                    self.fade.ramp_to(0.0, fade_out);
                }
                true
            }
            SoundInstanceState::Stopping | SoundInstanceState::Finished => false,
        }
    }

    /// Finish the current loop then end
    pub fn stop_looping(&mut self) {
        self.loops_remaining = 0;
        self.settings.loops = 0;
    }

    /// Force the finished state
    pub fn finish(&mut self) {
        self.state = SoundInstanceState::Finished;
    }

    /// Jump to a position inside the sound
    pub fn seek(&mut self, position: u64) {
        let length = self.length();
        self.position = if length == 0 { 0 } else { position % length };
        self.next_marker = self.first_marker_at_or_after(self.position);
    }

    /// Replace the fade in; only meaningful before [`SoundInstance::start`]
    pub fn set_fade_in(&mut self, fade_in: SampleDuration) {
        self.settings.fade_in = fade_in;
    }

    /// Override the fade gain (used by controllers that own the fade)
    pub fn fade_to(&mut self, target: f32, samples: u64) {
        self.fade.ramp_to(target, samples);
    }

    /// Mark the stopped events as posted; true the first time only
    pub fn mark_stopped_notified(&mut self) -> bool {
        !std::mem::replace(&mut self.stopped_notified, true)
    }

    /// Samples until the natural end (`None` when looping forever)
    pub fn samples_until_end(&self) -> Option<u64> {
        if self.loops_remaining < 0 {
            return None;
        }
        let length = self.length();
        Some(length.saturating_sub(self.position) + length * self.loops_remaining as u64)
    }

    // Accessors

    #[inline]
    pub fn id(&self) -> SoundInstanceId {
        self.id
    }

    #[inline]
    pub fn descriptor(&self) -> &Arc<SoundDescriptor> {
        &self.descriptor
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[inline]
    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    #[inline]
    pub fn state(&self) -> SoundInstanceState {
        self.state
    }

    #[inline]
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    #[inline]
    pub fn key(&self) -> Option<&str> {
        self.settings.key.as_deref()
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.settings.priority
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.descriptor.length.samples()
    }

    #[inline]
    pub fn loops_remaining(&self) -> i32 {
        self.loops_remaining
    }

    /// Total samples played since start
    #[inline]
    pub fn played(&self) -> u64 {
        self.played
    }

    #[inline]
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Instance volume times the current fade
    #[inline]
    pub fn gain(&self) -> f32 {
        self.settings.volume * self.fade.current()
    }

    #[inline]
    pub fn fade_gain(&self) -> f32 {
        self.fade.current()
    }
}
