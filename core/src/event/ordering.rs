//! Event ordering primitives
//!
//! `EventTime` combines the business date a movement occurred on with the
//! instant it was recorded, giving a total order over movements even when
//! several happen on the same day. `SequenceGenerator` hands out the
//! per-node local sequence numbers that order events inside the log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Occurred/recorded timestamp pair
///
/// Ordered by occurred date first, then by recorded instant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    /// Business date the movement happened on
    pub occurred: NaiveDate,

    /// Instant the movement was entered on the originating device
    pub recorded: DateTime<Utc>,
}

impl EventTime {
    pub fn new(occurred: NaiveDate, recorded: DateTime<Utc>) -> Self {
        Self { occurred, recorded }
    }

    /// Check that `self` does not come after `later`
    ///
    /// Used wherever a sequence is assumed to be chronological already; a
    /// violation means the caller handed over causally inverted data.
    pub fn ensure_not_after(&self, later: &EventTime) -> Result<()> {
        if self > later {
            return Err(Error::Invariant(format!(
                "movement at {} is ordered before movement at {}",
                self, later
            )));
        }
        Ok(())
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.occurred
            .cmp(&other.occurred)
            .then_with(|| self.recorded.cmp(&other.recorded))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (recorded {})", self.occurred, self.recorded.to_rfc3339())
    }
}

/// Milliseconds since the UNIX epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Thread-safe local sequence allocator
///
/// Sequences are strictly increasing for the lifetime of the generator.
/// Observing a sequence from a peer moves the counter past it, so a node
/// never hands out a number it has already seen elsewhere.
#[derive(Debug)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Create a generator whose first sequence is `last + 1`
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Allocate the next sequence number
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a sequence seen on an imported event or reported by a peer
    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }

    /// Last allocated or observed sequence
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
