use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::session::SessionId;

/// Prefix shared by every lifecycle message.
pub const FAST_REFRESH_PREFIX: &str = "[Fast Refresh]";
/// Literal emitted when a rebuild starts.
pub const REBUILDING_MESSAGE: &str = "[Fast Refresh] rebuilding";
/// Prefix of the literal emitted when a rebuild finishes. Matched by prefix only.
pub const DONE_PREFIX: &str = "[Fast Refresh] done in ";

static DONE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Fast Refresh\] done in (\d+(?:\.\d+)?)\s*(ms|s)?$").expect("static regex")
});

/// One lifecycle event of a change session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildEvent {
    /// Work was detected and a rebuild pass started.
    Rebuilding,
    /// The burst finished. `duration_ms` is `None` when the message carried
    /// a duration we could not read.
    Done { duration_ms: Option<u64> },
    /// Side-channel failure report. Never terminal.
    ErrorLogged { message: String },
}

impl RebuildEvent {
    pub fn done(duration_ms: u64) -> Self {
        Self::Done {
            duration_ms: Some(duration_ms),
        }
    }

    /// Render the event as the record a client would see.
    pub fn to_record(&self, session: Option<SessionId>) -> LogRecord {
        let record = match self {
            Self::Rebuilding => LogRecord::log(REBUILDING_MESSAGE),
            Self::Done { duration_ms } => {
                let message = match duration_ms {
                    Some(ms) => format!("{DONE_PREFIX}{ms}ms"),
                    None => format!("{DONE_PREFIX}?"),
                };
                LogRecord::log(message)
            }
            Self::ErrorLogged { message } => LogRecord::error(message.clone()),
        };
        record.with_session(session)
    }

    /// Interpret a record as a lifecycle event.
    ///
    /// Returns `Ok(None)` for records that are not part of the protocol (ordinary
    /// console output). A `log` record that carries the Fast Refresh prefix but
    /// matches no literal is an error.
    pub fn from_record(record: &LogRecord) -> Result<Option<Self>> {
        match record.source {
            LogSource::Error => Ok(Some(Self::ErrorLogged {
                message: record.message.clone(),
            })),
            LogSource::Log => {
                let message = record.message.trim_end();
                if message == REBUILDING_MESSAGE {
                    return Ok(Some(Self::Rebuilding));
                }
                if message.starts_with(DONE_PREFIX) {
                    return Ok(Some(Self::Done {
                        duration_ms: parse_duration_ms(message),
                    }));
                }
                if message.starts_with(FAST_REFRESH_PREFIX) {
                    return Err(ProtocolError::UnknownMessage(record.message.clone()));
                }
                Ok(None)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Extract the duration from a done message. `"1.5s"` is read as 1500 ms and a
/// bare number as milliseconds.
fn parse_duration_ms(message: &str) -> Option<u64> {
    let caps = DONE_DURATION.captures(message)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let ms = match caps.get(2).map(|m| m.as_str()) {
        Some("s") => value * 1000.0,
        _ => value,
    };
    Some(ms.round() as u64)
}

/// Channel a record was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Log,
    Error,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("log"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A single client console record: `{ "source": "log" | "error", "message": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: LogSource,
    pub message: String,
    /// Owning change session, when the record came from the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

impl LogRecord {
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            source: LogSource::Log,
            message: message.into(),
            session: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            source: LogSource::Error,
            message: message.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }

    /// Decode a JSON-lines log. Blank lines are skipped; line numbers are 1-based.
    pub fn parse_lines(input: &str) -> Result<Vec<Self>> {
        let mut records = Vec::new();
        for (i, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<Self>(line).map_err(|e| {
                ProtocolError::MalformedRecord {
                    line: i + 1,
                    reason: e.to_string(),
                }
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_record_renders_duration_in_ms() {
        let record = RebuildEvent::done(42).to_record(None);
        assert_eq!(record.source, LogSource::Log);
        assert_eq!(record.message, "[Fast Refresh] done in 42ms");
    }

    #[test]
    fn test_from_record_recognises_literals() {
        let rebuilding = LogRecord::log("[Fast Refresh] rebuilding");
        assert_eq!(
            RebuildEvent::from_record(&rebuilding).unwrap(),
            Some(RebuildEvent::Rebuilding)
        );

        let done = LogRecord::log("[Fast Refresh] done in 1.5s");
        assert_eq!(
            RebuildEvent::from_record(&done).unwrap(),
            Some(RebuildEvent::done(1500))
        );
    }

    #[test]
    fn test_done_is_prefix_matched() {
        // Unreadable durations still count as done.
        let done = LogRecord::log("[Fast Refresh] done in a while");
        assert_eq!(
            RebuildEvent::from_record(&done).unwrap(),
            Some(RebuildEvent::Done { duration_ms: None })
        );
    }

    #[test]
    fn test_unrelated_log_is_not_an_event() {
        let record = LogRecord::log("hello from the page");
        assert_eq!(RebuildEvent::from_record(&record).unwrap(), None);
    }

    #[test]
    fn test_unknown_fast_refresh_message_is_rejected() {
        let record = LogRecord::log("[Fast Refresh] performing full reload");
        assert!(matches!(
            RebuildEvent::from_record(&record),
            Err(ProtocolError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_error_source_maps_to_error_logged() {
        let record = LogRecord::error("Module not found");
        assert_eq!(
            RebuildEvent::from_record(&record).unwrap(),
            Some(RebuildEvent::ErrorLogged {
                message: "Module not found".into()
            })
        );
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_string(&LogRecord::log("[Fast Refresh] rebuilding")).unwrap();
        assert_eq!(json, r#"{"source":"log","message":"[Fast Refresh] rebuilding"}"#);
    }

    #[test]
    fn test_parse_lines_reports_line_number() {
        let input = "{\"source\":\"log\",\"message\":\"a\"}\n\nnot json\n";
        match LogRecord::parse_lines(input) {
            Err(ProtocolError::MalformedRecord { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }
}
