//! Fast Refresh rebuild-notification protocol.
//!
//! ```text
//! filesystem --> watcher --> RebuildOrchestrator --> ClientLogSink --> observers
//!                 (notify)     (sessions, Rebuilder)   (read/filter/wait)
//! ```
//!
//! - `watcher` - debounced change detection, classified into `ChangeSignal`s
//! - `orchestrator` - groups signals into sessions and emits lifecycle events
//! - `sink` - append-only client log with polling waits
//! - `protocol` - event/record codec and the conformance checker
//! - `guard` - stale-route guard against not-found revalidation loops
//! - `devloop` - wires the pieces together for one project

pub mod config;
pub mod devloop;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod output;
pub mod protocol;
pub mod rebuilder;
pub mod routes;
pub mod session;
pub mod sink;
pub mod watcher;

pub use config::RefreshConfig;
pub use devloop::DevLoop;
pub use error::ProtocolError;
pub use orchestrator::RebuildOrchestrator;
pub use protocol::{LogRecord, LogSource, RebuildEvent};
pub use rebuilder::{RebuildScope, Rebuilder};
pub use sink::{ClientLogSink, WaitOutcome};
