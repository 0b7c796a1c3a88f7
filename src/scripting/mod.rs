pub mod api;
pub(crate) mod js_compat;
pub mod sandbox;

use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_SCRIPT_MAX_OPERATIONS: u64 = 500_000;
pub const DEFAULT_SCRIPT_MAX_CALL_LEVELS: usize = 64;
const MAX_SCRIPT_ERRORS: usize = 100;

pub use api::{Broadcast, GameApi, PlayState, SharedPlayState};
pub use sandbox::{ScriptBindings, ScriptSandbox};

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ScriptError {
    pub node_id: String,
    pub error_message: String,
    pub frame: u64,
}

/// Most recent script faults, oldest dropped first.
#[derive(Default, Debug)]
pub struct ScriptErrors {
    entries: VecDeque<ScriptError>,
    total: u64,
}

impl ScriptErrors {
    pub fn push(&mut self, entry: ScriptError) {
        self.total += 1;
        self.entries.push_back(entry);
        while self.entries.len() > MAX_SCRIPT_ERRORS {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScriptError> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ScriptError> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Faults seen since the sandbox was created, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_buffer_keeps_the_newest_entries() {
        let mut errors = ScriptErrors::default();
        for frame in 0..(MAX_SCRIPT_ERRORS as u64 + 5) {
            errors.push(ScriptError {
                node_id: "n".into(),
                error_message: "boom".into(),
                frame,
            });
        }
        assert_eq!(errors.len(), MAX_SCRIPT_ERRORS);
        assert_eq!(errors.total(), MAX_SCRIPT_ERRORS as u64 + 5);
        assert_eq!(errors.entries().next().map(|e| e.frame), Some(5));
        assert_eq!(errors.last().map(|e| e.frame), Some(MAX_SCRIPT_ERRORS as u64 + 4));
    }
}
