//! Lifecycle Events
//!
//! Events produced by the engine (sound played/stopped/looping, playlist
//! changes, volume notifications) are collected in a bounded [`EventQueue`]
//! while the engine works, then dispatched in generation order through the
//! [`EventBus`] once per `process_tick()`.
//!
//! ```text
//!   Track / Controller ──push──▶ EventQueue ──drain (tick)──▶ EventBus
//!                                                             ├── named handlers
//!                                                             └── subscribers (crossbeam)
//! ```

use crate::instance::SoundInstanceId;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEventKind {
    /// Sound, playlist or loop set started
    Played,
    /// Sound, playlist or loop set stopped
    Stopped,
    /// Sound or loop set wrapped to the start of a new loop
    Looping,
    /// Sound is within its lead time of the natural end
    AboutToFinish,
    /// Playback crossed a sound marker
    Marker,
    /// Playlist switched to a new sound
    SoundChanged,
    /// Playlist sound stopped as part of stopping the playlist
    SoundStopped,
    /// Track paused
    Paused,
    /// Track resumed
    Resumed,
    /// Master or track volume changed
    VolumeChanged,
}

/// Event posted to the trigger bus
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEvent {
    /// Trigger name (e.g. `beep_played`)
    pub name: String,
    /// Event kind
    pub kind: AudioEventKind,
    /// Track the event originated from
    pub track: Option<String>,
    /// Sound instance involved
    pub sound_instance: Option<SoundInstanceId>,
    /// Marker index (marker events)
    pub marker_id: Option<usize>,
    /// Value carried by volume notifications
    pub value: Option<f32>,
}

impl AudioEvent {
    /// Create an event
    pub fn new(name: impl Into<String>, kind: AudioEventKind) -> Self {
        Self {
            name: name.into(),
            kind,
            track: None,
            sound_instance: None,
            marker_id: None,
            value: None,
        }
    }

    pub fn with_track(mut self, track: impl Into<String>) -> Self {
        self.track = Some(track.into());
        self
    }

    pub fn with_instance(mut self, id: SoundInstanceId) -> Self {
        self.sound_instance = Some(id);
        self
    }

    pub fn with_marker(mut self, marker_id: usize) -> Self {
        self.marker_id = Some(marker_id);
        self
    }

    pub fn with_value(mut self, value: f32) -> Self {
        self.value = Some(value);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Default event queue capacity
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Bounded FIFO of events produced between dispatches
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<AudioEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event; returns false (and counts a drop) when full
    pub fn push(&mut self, event: AudioEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            log::warn!(
                "[EventQueue] Queue full ({}), dropping event '{}'",
                self.capacity,
                event.name
            );
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Take every queued event in generation order
    pub fn drain(&mut self) -> Vec<AudioEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events lost to overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for a registered named handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handle for a subscriber channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&AudioEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    sender: Sender<AudioEvent>,
}

#[derive(Default)]
struct BusState {
    handlers: HashMap<String, Vec<(HandlerId, Handler)>>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Trigger bus shared between the engine and its consumers
///
/// Cloning the bus shares the same handler and subscriber tables.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<RwLock<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` whenever an event named `name` is posted
    pub fn add_handler<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&AudioEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.write();
        let id = HandlerId(state.next_id);
        state.next_id += 1;
        state
            .handlers
            .entry(name.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a named handler
    pub fn remove_handler(&self, id: HandlerId) {
        let mut state = self.state.write();
        for handlers in state.handlers.values_mut() {
            handlers.retain(|(h, _)| *h != id);
        }
        state.handlers.retain(|_, handlers| !handlers.is_empty());
    }

    /// Receive every posted event on a channel
    pub fn subscribe(&self) -> (Receiver<AudioEvent>, SubscriberId) {
        let (tx, rx) = unbounded();
        let mut state = self.state.write();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state.subscribers.push(Subscriber { id, sender: tx });
        (rx, id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.state.write().subscribers.retain(|s| s.id != id);
    }

    /// Deliver an event to its named handlers and to all subscribers
    pub fn post(&self, event: &AudioEvent) {
        // Handlers run without the lock held so they may register handlers themselves
        let handlers: Vec<Handler> = {
            let state = self.state.read();
            for subscriber in &state.subscribers {
                // A closed receiver is not an error
                let _ = subscriber.sender.try_send(event.clone());
            }
            state
                .handlers
                .get(&event.name)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    pub fn handler_count(&self) -> usize {
        self.state.read().handlers.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_queue_preserves_order() {
        let mut queue = EventQueue::new(8);
        queue.push(AudioEvent::new("a_stopped", AudioEventKind::Stopped));
        queue.push(AudioEvent::new("b_played", AudioEventKind::Played));

        let drained = queue.drain();
        let names: Vec<_> = drained.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a_stopped", "b_played"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_bounded() {
        let mut queue = EventQueue::new(2);
        assert!(queue.push(AudioEvent::new("1", AudioEventKind::Played)));
        assert!(queue.push(AudioEvent::new("2", AudioEventKind::Played)));
        assert!(!queue.push(AudioEvent::new("3", AudioEventKind::Played)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[test]
    fn test_named_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.add_handler("beep_played", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.post(&AudioEvent::new("beep_played", AudioEventKind::Played));
        bus.post(&AudioEvent::new("beep_stopped", AudioEventKind::Stopped));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.remove_handler(id);
        bus.post(&AudioEvent::new("beep_played", AudioEventKind::Played));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_everything() {
        let bus = EventBus::new();
        let (rx1, _) = bus.subscribe();
        let (rx2, id2) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.post(&AudioEvent::new("x", AudioEventKind::Looping).with_instance(7));
        assert_eq!(rx1.try_recv().unwrap().sound_instance, Some(7));
        assert!(rx2.try_recv().is_ok());

        bus.unsubscribe(id2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_handler_may_register_handler() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.add_handler("first", move |_| {
            inner.add_handler("second", |_| {});
        });
        bus.post(&AudioEvent::new("first", AudioEventKind::Played));
        assert_eq!(bus.handler_count(), 2);
    }
}
