use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ProtocolError;
use crate::protocol::event::{LogRecord, RebuildEvent};
use crate::session::SessionId;

/// How a burst of `Rebuilding` events ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstOutcome {
    Done,
    /// No `Done` observed yet. Unknown outcome, not a failure.
    Pending,
}

/// One burst: every `Rebuilding` since the previous terminal event, closed by
/// at most one `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct Burst {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    pub rebuilds: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub outcome: BurstOutcome,
}

impl Burst {
    fn open(session: Option<SessionId>) -> Self {
        Self {
            session,
            rebuilds: 0,
            errors: 0,
            duration_ms: None,
            outcome: BurstOutcome::Pending,
        }
    }

    /// More than one `Rebuilding` was answered by a single `Done`.
    pub fn is_coalesced(&self) -> bool {
        self.rebuilds > 1
    }
}

/// Result of checking a record sequence against the protocol state machine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConformanceReport {
    pub bursts: Vec<Burst>,
    #[serde(serialize_with = "serialize_violations")]
    pub violations: Vec<ProtocolError>,
    /// Records that are not part of the protocol (ordinary console output).
    pub ignored: usize,
}

impl ConformanceReport {
    pub fn is_conformant(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.bursts
            .iter()
            .filter(|b| b.outcome == BurstOutcome::Done)
            .count()
    }

    pub fn pending(&self) -> usize {
        self.bursts.len() - self.completed()
    }

    pub fn coalesced(&self) -> usize {
        self.bursts.iter().filter(|b| b.is_coalesced()).count()
    }
}

fn serialize_violations<S>(violations: &[ProtocolError], s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.collect_seq(violations.iter().map(|v| v.to_string()))
}

/// Per-stream state: the burst in progress plus whether the last protocol event closed one.
#[derive(Default)]
struct Stream {
    current: Option<Burst>,
    last_was_done: bool,
    /// Session-tagged streams allow exactly one `Done` overall.
    finished: bool,
}

/// Check an ordered record sequence.
///
/// Records tagged with a session are checked per session; untagged records form
/// one anonymous timeline. Pairing rule: a `Done` closes every `Rebuilding`
/// since the previous `Done` on the same stream. A `Done` with nothing
/// outstanding is a violation (`DuplicateDone` right after another `Done`,
/// `OrphanDone` otherwise). A trailing burst without `Done` is pending.
pub fn check(records: &[LogRecord]) -> ConformanceReport {
    let mut report = ConformanceReport::default();
    let mut streams: BTreeMap<Option<SessionId>, Stream> = BTreeMap::new();
    // Bursts are reported in the order they opened.
    let mut order: Vec<(Option<SessionId>, usize)> = Vec::new();
    let mut closed: BTreeMap<(Option<SessionId>, usize), Burst> = BTreeMap::new();
    let mut burst_seq = 0usize;

    for (index, record) in records.iter().enumerate() {
        let event = match RebuildEvent::from_record(record) {
            Ok(Some(event)) => event,
            Ok(None) => {
                report.ignored += 1;
                continue;
            }
            Err(err) => {
                report.violations.push(err);
                continue;
            }
        };

        let key = record.session;
        let stream = streams.entry(key).or_default();

        match event {
            RebuildEvent::Rebuilding => {
                if stream.finished {
                    if let Some(session) = key {
                        report
                            .violations
                            .push(ProtocolError::AfterTerminal { session });
                    }
                    continue;
                }
                if stream.current.is_none() {
                    stream.current = Some(Burst::open(key));
                    order.push((key, burst_seq));
                    burst_seq += 1;
                }
                if let Some(burst) = stream.current.as_mut() {
                    burst.rebuilds += 1;
                }
                stream.last_was_done = false;
            }
            RebuildEvent::Done { duration_ms } => match stream.current.take() {
                Some(mut burst) if burst.rebuilds > 0 => {
                    burst.duration_ms = duration_ms;
                    burst.outcome = BurstOutcome::Done;
                    let seq = order
                        .iter()
                        .rev()
                        .find(|(k, _)| *k == key)
                        .map(|(_, seq)| *seq)
                        .unwrap_or_default();
                    closed.insert((key, seq), burst);
                    stream.last_was_done = true;
                    stream.finished = key.is_some();
                }
                other => {
                    stream.current = other;
                    report.violations.push(if stream.last_was_done {
                        ProtocolError::DuplicateDone { index }
                    } else {
                        ProtocolError::OrphanDone { index }
                    });
                }
            },
            RebuildEvent::ErrorLogged { .. } => {
                if stream.finished {
                    if let Some(session) = key {
                        report
                            .violations
                            .push(ProtocolError::AfterTerminal { session });
                    }
                    continue;
                }
                if let Some(burst) = stream.current.as_mut() {
                    burst.errors += 1;
                }
            }
        }
    }

    // Anything still open is pending.
    for (key, stream) in streams {
        if let Some(burst) = stream.current {
            let seq = order
                .iter()
                .rev()
                .find(|(k, _)| *k == key)
                .map(|(_, seq)| *seq)
                .unwrap_or_default();
            closed.insert((key, seq), burst);
        }
    }

    for (key, seq) in order {
        if let Some(burst) = closed.remove(&(key, seq)) {
            report.bursts.push(burst);
        }
    }
    report
}
