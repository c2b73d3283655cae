//! Wire-level view of the rebuild-notification protocol.
//!
//! - `event` - the closed `RebuildEvent` variant and its `{source, message}` record form
//! - `conformance` - checks an ordered record sequence against the session state machine

pub mod conformance;
pub mod event;

pub use conformance::{check, Burst, BurstOutcome, ConformanceReport};
pub use event::{LogRecord, LogSource, RebuildEvent};
