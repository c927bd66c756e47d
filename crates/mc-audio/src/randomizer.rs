//! Sound selection for playlists and sound pools
//!
//! | Mode                 | Behavior                                              |
//! |----------------------|-------------------------------------------------------|
//! | `sequence`           | In list order                                         |
//! | `random`             | Weighted roll, repeats allowed                        |
//! | `random_force_next`  | Weighted roll, never the same sound twice in a row    |
//! | `random_force_all`   | Weighted deck: every sound once before any repeats    |
//!
//! With `repeat` off, selection ends (returns `None`) once every sound has
//! been chosen at least once.

use crate::{AudioError, AudioResult};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Sequence,
    Random,
    RandomForceNext,
    RandomForceAll,
}

/// Sound name with a selection weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedSound {
    pub name: String,
    pub weight: u32,
}

impl WeightedSound {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }

    /// Parse `"name"` or `"name|weight"`
    pub fn parse(entry: &str) -> AudioResult<Self> {
        let (name, weight) = match entry.split_once('|') {
            Some((name, weight)) => {
                let weight: u32 = weight.trim().parse().map_err(|_| {
                    AudioError::InvalidConfig(format!("bad weight in sound entry '{entry}'"))
                })?;
                (name.trim(), weight)
            }
            None => (entry.trim(), 1),
        };
        if name.is_empty() {
            return Err(AudioError::InvalidConfig(format!("empty sound name in '{entry}'")));
        }
        if weight == 0 {
            return Err(AudioError::InvalidConfig(format!("weight must be at least 1 in '{entry}'")));
        }
        Ok(Self::new(name, weight))
    }
}

/// Selection state over a fixed list of weighted sounds
#[derive(Debug, Clone)]
pub struct Randomizer {
    items: Vec<WeightedSound>,
    mode: SelectionMode,
    repeat: bool,
    sent: Vec<bool>,
    index: usize,
    deck: Vec<usize>,
    last: Option<usize>,
    rng: ChaCha8Rng,
}

impl Randomizer {
    /// `seed` makes random modes reproducible
    pub fn new(items: Vec<WeightedSound>, mode: SelectionMode, repeat: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_os_rng(),
        };
        let sent = vec![false; items.len()];
        Self {
            items,
            mode,
            repeat,
            sent,
            index: 0,
            deck: Vec::new(),
            last: None,
            rng,
        }
    }

    /// Next sound name, or `None` when exhausted without repeat
    pub fn next_sound(&mut self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        if self.end_of_playlist() {
            if !self.repeat {
                return None;
            }
            self.reset();
        }

        let idx = match self.mode {
            SelectionMode::Sequence => {
                let idx = self.index.min(self.items.len() - 1);
                self.index += 1;
                idx
            }
            SelectionMode::Random => self.weighted_pick(|_| true),
            SelectionMode::RandomForceNext => {
                let last = self.last;
                let single = self.items.len() == 1;
                self.weighted_pick(|i| single || Some(i) != last)
            }
            SelectionMode::RandomForceAll => {
                if self.deck.is_empty() {
                    self.build_deck();
                }
                self.deck.pop()?
            }
        };

        self.sent[idx] = true;
        self.last = Some(idx);
        Some(self.items[idx].name.clone())
    }

    fn weighted_pick<F>(&mut self, allowed: F) -> usize
    where
        F: Fn(usize) -> bool,
    {
        let total: u64 = self
            .items
            .iter()
            .enumerate()
            .filter(|(i, _)| allowed(*i))
            .map(|(_, s)| s.weight as u64)
            .sum();
        if total == 0 {
            return self.rng.random_range(0..self.items.len());
        }

        let mut roll = self.rng.random_range(0..total);
        for (i, item) in self.items.iter().enumerate().filter(|(i, _)| allowed(*i)) {
            if roll < item.weight as u64 {
                return i;
            }
            roll -= item.weight as u64;
        }
        self.items.len() - 1
    }

    /// Weighted draw without replacement over the sounds not yet chosen
    fn build_deck(&mut self) {
        let mut remaining: Vec<usize> = (0..self.items.len()).filter(|&i| !self.sent[i]).collect();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let total: u64 = remaining.iter().map(|&i| self.items[i].weight as u64).sum();
            let mut roll = self.rng.random_range(0..total.max(1));
            let mut pick = remaining.len() - 1;
            for (slot, &i) in remaining.iter().enumerate() {
                let weight = self.items[i].weight as u64;
                if roll < weight {
                    pick = slot;
                    break;
                }
                roll -= weight;
            }
            order.push(remaining.swap_remove(pick));
        }

        // Never start a new round with the sound that ended the previous one
        if order.len() > 1 && order.first().copied() == self.last {
            let j = self.rng.random_range(1..order.len());
            order.swap(0, j);
        }

        // Popped from the back
        order.reverse();
        self.deck = order;
    }

    /// Every sound has been chosen at least once this round
    pub fn end_of_playlist(&self) -> bool {
        self.sent.iter().all(|&s| s)
    }

    /// Start a new round
    pub fn reset(&mut self) {
        self.sent.iter_mut().for_each(|s| *s = false);
        self.index = 0;
        self.deck.clear();
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn set_mode(&mut self, mode: SelectionMode) {
        if mode != self.mode {
            self.mode = mode;
            self.deck.clear();
            self.index = self.sent.iter().take_while(|&&s| s).count();
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn items(&self) -> &[WeightedSound] {
        &self.items
    }
}
