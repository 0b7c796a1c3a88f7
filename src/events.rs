use std::collections::VecDeque;

use bevy::log::warn;
use serde::Serialize;

const MAX_EVENTS: usize = 500;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RuntimeEvent {
    pub seq: u64,
    pub name: String,
    pub data: serde_json::Value,
    pub frame: u64,
    pub node_id: Option<String>,
}

/// Session lifecycle, navigation, broadcasts and room status changes, kept
/// for the control API and tests to inspect.
#[derive(Default, Debug)]
pub struct RuntimeEventLog {
    recent: VecDeque<RuntimeEvent>,
    next_seq: u64,
    pub frame: u64,
    pub dropped_events: u64,
    last_overflow_log_frame: u64,
}

impl RuntimeEventLog {
    pub fn emit(&mut self, name: impl Into<String>, data: serde_json::Value, node_id: Option<&str>) {
        self.recent.push_back(RuntimeEvent {
            seq: self.next_seq,
            name: name.into(),
            data,
            frame: self.frame,
            node_id: node_id.map(str::to_string),
        });
        self.next_seq += 1;
        if self.recent.len() > MAX_EVENTS {
            let excess = self.recent.len() - MAX_EVENTS;
            self.recent.drain(..excess);
            self.dropped_events = self.dropped_events.saturating_add(excess as u64);
            if self.frame.saturating_sub(self.last_overflow_log_frame) >= 60 {
                self.last_overflow_log_frame = self.frame;
                warn!(
                    "[GameQuest events] Dropped {} buffered events (total dropped: {})",
                    excess, self.dropped_events
                );
            }
        }
    }

    pub fn recent(&self) -> impl Iterator<Item = &RuntimeEvent> {
        self.recent.iter()
    }

    /// Events with a sequence number at or after `seq`.
    pub fn since(&self, seq: u64) -> Vec<RuntimeEvent> {
        self.recent.iter().filter(|e| e.seq >= seq).cloned().collect()
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RuntimeEvent> + 'a {
        self.recent.iter().filter(move |e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
