use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Counts continuation hand-offs for one session and enforces the budget.
///
/// Clones share the same count, so a caller can hold one for diagnostics
/// while the controller owns the one it increments.
#[derive(Debug, Clone)]
pub struct SegmentCounter {
    switches: Arc<AtomicU32>,
    max_switches: u32,
}

impl SegmentCounter {
    pub fn new(max_switches: u32) -> Self {
        Self {
            switches: Arc::new(AtomicU32::new(0)),
            max_switches,
        }
    }

    pub fn switches(&self) -> u32 {
        self.switches.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u32 {
        self.max_switches
    }

    pub fn remaining(&self) -> u32 {
        self.max_switches.saturating_sub(self.switches())
    }

    pub fn is_exhausted(&self) -> bool {
        self.switches() >= self.max_switches
    }

    /// Only the continuation controller records hand-offs.
    pub(super) fn record_switch(&self) -> u32 {
        self.switches.fetch_add(1, Ordering::AcqRel) + 1
    }
}
