use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::protocol::event::RebuildEvent;
use crate::watcher::event::ChangeSignal;

/// Monotonic identifier of a change session, unique per orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no event yet.
    Open,
    /// At least one `Rebuilding` outstanding.
    Rebuilding,
    /// Terminal: exactly one `Done` was emitted.
    Done,
    /// An error was logged and no `Done` followed. Not terminal until closed.
    Failed,
    /// Closed by quiescence without any terminal event. Outcome unknown.
    Abandoned,
}

/// Events triggered by one external mutation (or one coalesced burst of them).
#[derive(Debug, Clone)]
pub struct ChangeSession {
    pub id: SessionId,
    pub triggers: Vec<ChangeSignal>,
    events: Vec<RebuildEvent>,
    state: SessionState,
    closed: bool,
    opened_at: Instant,
}

impl ChangeSession {
    pub fn new(id: SessionId, trigger: ChangeSignal) -> Self {
        Self {
            id,
            triggers: vec![trigger],
            events: Vec::new(),
            state: SessionState::Open,
            closed: false,
            opened_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn events(&self) -> &[RebuildEvent] {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Number of `Rebuilding` events so far. More than one means the burst was coalesced.
    pub fn rebuild_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, RebuildEvent::Rebuilding))
            .count()
    }

    /// Append an event, enforcing the per-session ordering rules.
    pub fn push(&mut self, event: RebuildEvent) -> Result<()> {
        if self.closed || self.state == SessionState::Done {
            return Err(match event {
                RebuildEvent::Done { .. } if self.state == SessionState::Done => {
                    ProtocolError::DuplicateDone {
                        index: self.events.len(),
                    }
                }
                _ => ProtocolError::AfterTerminal { session: self.id },
            });
        }

        match &event {
            RebuildEvent::Rebuilding => self.state = SessionState::Rebuilding,
            RebuildEvent::Done { .. } => {
                if self.rebuild_count() == 0 {
                    return Err(ProtocolError::OrphanDone {
                        index: self.events.len(),
                    });
                }
                self.state = SessionState::Done;
            }
            RebuildEvent::ErrorLogged { .. } => {
                if self.state != SessionState::Open {
                    self.state = SessionState::Failed;
                }
            }
        }
        self.events.push(event);
        Ok(())
    }

    /// Attach another signal to the running burst.
    pub fn join(&mut self, signal: ChangeSignal) {
        self.triggers.push(signal);
    }

    /// Close the session after quiescence. A session that never reached `Done`
    /// and never failed becomes `Abandoned`.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Open | SessionState::Rebuilding) {
            self.state = SessionState::Abandoned;
        }
        self.closed = true;
    }
}
