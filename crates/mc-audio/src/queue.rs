//! Priority queue of sound requests waiting for a free track slot
//!
//! Highest priority first; equal priorities are served in arrival order.

use crate::instance::SoundInstance;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A waiting sound request
#[derive(Debug)]
pub struct QueuedSoundRequest {
    pub instance: SoundInstance,
    /// Engine sample at which the request was queued
    pub enqueued_at: u64,
    sequence: u64,
}

impl QueuedSoundRequest {
    /// Waited longer than its `max_queue_time`
    pub fn is_expired(&self, now: u64) -> bool {
        match self.instance.settings().max_queue_time {
            Some(limit) => now.saturating_sub(self.enqueued_at) > limit.samples(),
            None => false,
        }
    }
}

impl PartialEq for QueuedSoundRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedSoundRequest {}

impl PartialOrd for QueuedSoundRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSoundRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instance
            .priority()
            .cmp(&other.instance.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Sound queue of one standard track
#[derive(Debug, Default)]
pub struct SoundQueue {
    heap: BinaryHeap<QueuedSoundRequest>,
    next_sequence: u64,
}

impl SoundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instance: SoundInstance, now: u64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedSoundRequest {
            instance,
            enqueued_at: now,
            sequence,
        });
    }

    /// Take the highest priority request
    pub fn pop(&mut self) -> Option<SoundInstance> {
        self.heap.pop().map(|r| r.instance)
    }

    pub fn peek(&self) -> Option<&QueuedSoundRequest> {
        self.heap.peek()
    }

    /// Remove and return every request matching `pred`
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<SoundInstance>
    where
        F: FnMut(&SoundInstance) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|r| pred(&r.instance));
        self.heap = kept.into();
        removed.into_iter().map(|r| r.instance).collect()
    }

    /// Remove requests that waited too long
    pub fn expire(&mut self, now: u64) -> Vec<SoundInstance> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|r| r.is_expired(now));
        self.heap = kept.into();
        expired.into_iter().map(|r| r.instance).collect()
    }

    /// Apply `f` to every queued instance
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut SoundInstance),
    {
        let mut requests = std::mem::take(&mut self.heap).into_vec();
        for request in &mut requests {
            f(&mut request.instance);
        }
        self.heap = requests.into();
    }

    pub fn contains_sound(&self, name: &str) -> bool {
        self.heap.iter().any(|r| r.instance.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedSoundRequest> {
        self.heap.iter()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) -> Vec<SoundInstance> {
        self.heap.drain().map(|r| r.instance).collect()
    }
}
