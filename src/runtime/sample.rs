//! Channel-level signal representation

use std::fmt;

/// A run-length encoded logic-level sample: one message per signal edge.
///
/// The value holds from `start_time` until the next sample on the same
/// channel arrives, so idle signals cost nothing on the wire. Consumers
/// that need the level at an arbitrary instant peek ahead to the next
/// sample to know when the current one ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Channel value from this timestamp onward.
    pub value: bool,
    /// Timestamp in nanoseconds when this value started.
    pub start_time: u64,
}

impl Sample {
    pub fn new(value: bool, start_time: u64) -> Self {
        Self { value, start_time }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sample[v={}, t={}]", self.value, self.start_time)
    }
}
