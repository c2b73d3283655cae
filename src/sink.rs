use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};

use crate::config::SinkConfig;
use crate::protocol::event::{DONE_PREFIX, LogRecord, RebuildEvent};
use crate::session::SessionId;

/// Result of waiting on the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition held; carries the snapshot it held on.
    Satisfied(Vec<LogRecord>),
    /// The window elapsed. The underlying rebuild may still finish: treat as
    /// unknown outcome, not failure.
    TimedOut,
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }
}

/// Append-only, time-ordered view of client console records.
///
/// Cheap to clone; clones share the same buffer. Records are never removed.
#[derive(Clone)]
pub struct ClientLogSink {
    records: Arc<RwLock<Vec<LogRecord>>>,
    live: broadcast::Sender<LogRecord>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ClientLogSink {
    pub fn new(config: &SinkConfig) -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            live,
            wait_timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub async fn append(&self, record: LogRecord) {
        let mut records = self.records.write().await;
        records.push(record.clone());
        // No live subscribers is fine; the buffer keeps everything.
        let _ = self.live.send(record);
    }

    pub async fn append_event(&self, event: &RebuildEvent, session: Option<SessionId>) {
        self.append(event.to_record(session)).await;
    }

    /// Stream of records appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.live.subscribe()
    }

    pub async fn read_all(&self) -> Vec<LogRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn filter_by_prefix(&self, prefix: &str) -> Vec<LogRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.message.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn session_records(&self, session: SessionId) -> Vec<LogRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.session == Some(session))
            .cloned()
            .collect()
    }

    /// Poll until `condition` holds over the full record list, or the default
    /// wait window elapses.
    pub async fn wait_until<F>(&self, condition: F) -> WaitOutcome
    where
        F: Fn(&[LogRecord]) -> bool,
    {
        self.wait_until_within(self.wait_timeout, condition).await
    }

    /// Like `wait_until` with an explicit window.
    pub async fn wait_until_within<F>(&self, window: Duration, condition: F) -> WaitOutcome
    where
        F: Fn(&[LogRecord]) -> bool,
    {
        let poll = async {
            loop {
                {
                    let records = self.records.read().await;
                    if condition(&records) {
                        return records.clone();
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(window, poll).await {
            Ok(snapshot) => WaitOutcome::Satisfied(snapshot),
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    /// Wait for a `done` record at or after index `since`.
    pub async fn wait_for_done(&self, since: usize) -> WaitOutcome {
        self.wait_until(|records| {
            records
                .iter()
                .skip(since)
                .any(|r| r.message.starts_with(DONE_PREFIX))
        })
        .await
    }
}
