//! Timer projection: the client's local mirror of the joined room's timers.
//!
//! Rebuilt wholesale from the `all_timers` snapshot and patched field by
//! field afterwards. Mutators are crate-private: only the event router and
//! the optimistic note layer write here.

use std::collections::HashMap;

use serde::Serialize;

use crate::protocol::{TimerCreated, TimerId, TimerSnapshot};

/// One timer as last reported by the authority.
///
/// `count` is never advanced locally; it is the authority's value at the
/// last update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub timer_id: TimerId,
    pub count: f64,
    pub is_running: bool,
    pub note: String,
}

impl From<TimerSnapshot> for Timer {
    fn from(entry: TimerSnapshot) -> Self {
        Self {
            timer_id: entry.timer_id,
            count: entry.count,
            is_running: entry.is_running.unwrap_or(false),
            note: entry.note.unwrap_or_default(),
        }
    }
}

impl From<TimerCreated> for Timer {
    fn from(created: TimerCreated) -> Self {
        Self {
            timer_id: created.timer_id,
            count: created.count,
            is_running: false,
            note: created.note.unwrap_or_default(),
        }
    }
}

/// Mapping from timer id to timer, scoped to the joined room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerProjection {
    timers: HashMap<TimerId, Timer>,
}

impl TimerProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry with the given snapshot.
    pub(crate) fn replace_all(&mut self, timers: impl IntoIterator<Item = Timer>) {
        self.timers = timers
            .into_iter()
            .map(|timer| (timer.timer_id.clone(), timer))
            .collect();
    }

    /// Upsert a freshly created timer. An existing entry with the same id is
    /// overwritten.
    pub(crate) fn insert(&mut self, timer: Timer) -> Option<Timer> {
        self.timers.insert(timer.timer_id.clone(), timer)
    }

    /// Overwrite `count` only. Returns `false` if the timer is unknown.
    pub(crate) fn patch_count(&mut self, timer_id: &TimerId, count: f64) -> bool {
        match self.timers.get_mut(timer_id) {
            Some(timer) => {
                timer.count = count;
                true
            }
            None => false,
        }
    }

    /// Overwrite `is_running` only. Returns `false` if the timer is unknown.
    pub(crate) fn patch_status(&mut self, timer_id: &TimerId, is_running: bool) -> bool {
        match self.timers.get_mut(timer_id) {
            Some(timer) => {
                timer.is_running = is_running;
                true
            }
            None => false,
        }
    }

    /// Overwrite `note` only. Returns `false` if the timer is unknown.
    pub(crate) fn patch_note(&mut self, timer_id: &TimerId, note: impl Into<String>) -> bool {
        match self.timers.get_mut(timer_id) {
            Some(timer) => {
                timer.note = note.into();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, timer_id: &TimerId) -> Option<Timer> {
        self.timers.remove(timer_id)
    }

    pub(crate) fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn get(&self, timer_id: &TimerId) -> Option<&Timer> {
        self.timers.get(timer_id)
    }

    pub fn contains(&self, timer_id: &TimerId) -> bool {
        self.timers.contains_key(timer_id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Iterate in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.timers.values()
    }

    /// Timers ordered by id, for stable presentation.
    pub fn sorted(&self) -> Vec<&Timer> {
        let mut timers: Vec<&Timer> = self.timers.values().collect();
        timers.sort_by(|a, b| a.timer_id.cmp(&b.timer_id));
        timers
    }
}
