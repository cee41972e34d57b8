//! Replicated event log primitives
//!
//! - `ordering`: occurred/recorded time ordering and sequence allocation
//! - `envelope`: the `Event` envelope and its confirmation flags

pub mod envelope;
pub mod ordering;

pub use envelope::{Event, EventCategory};
pub use ordering::{now_millis, EventTime, SequenceGenerator};
