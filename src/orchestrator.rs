use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::protocol::event::RebuildEvent;
use crate::rebuilder::{RebuildScope, Rebuilder};
use crate::session::{ChangeSession, SessionId};
use crate::sink::ClientLogSink;
use crate::watcher::event::ChangeSignal;

/// Sequences change signals into sessions, runs rebuilds, and emits the
/// lifecycle events of each session into the client log sink.
///
/// Ordering guarantees:
/// - signals are handled strictly in arrival order, one session at a time;
/// - every signal joining a burst emits one `Rebuilding`;
/// - a burst ends with exactly one `Done`, emitted only once no queued signal
///   is left, so `Done` always follows every `Rebuilding` it answers;
/// - a failed pass emits `ErrorLogged` and no terminal event. The next pass,
///   in this session or a later one, runs with `RebuildScope::Full`.
pub struct RebuildOrchestrator<R: Rebuilder> {
    rebuilder: Arc<Mutex<R>>,
    sink: ClientLogSink,
    quiescence: Duration,
    next_id: u64,
    dirty: bool,
    closed_tx: Option<mpsc::UnboundedSender<ChangeSession>>,
}

impl<R: Rebuilder> RebuildOrchestrator<R> {
    pub fn new(rebuilder: R, sink: ClientLogSink, quiescence: Duration) -> Self {
        Self {
            rebuilder: Arc::new(Mutex::new(rebuilder)),
            sink,
            quiescence,
            next_id: 1,
            dirty: false,
            closed_tx: None,
        }
    }

    /// Receive every session as it closes.
    pub fn with_close_notifier(mut self, tx: mpsc::UnboundedSender<ChangeSession>) -> Self {
        self.closed_tx = Some(tx);
        self
    }

    /// Process signals until the sender side is dropped. Returns all closed sessions.
    ///
    /// A session closes right after its `Done`. Only a failed session waits out
    /// the quiescence window for a retry.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChangeSignal>) -> Vec<ChangeSession> {
        let mut history = Vec::new();

        while let Some(first) = rx.recv().await {
            let mut session = self.open(first.clone());
            let mut batch = vec![first];

            loop {
                if self.run_burst(&mut session, batch, &mut rx).await {
                    break;
                }
                // Failed pass: the session stays open for the quiescence window. A
                // change inside it retries within the same session.
                match tokio::time::timeout(self.quiescence, rx.recv()).await {
                    Ok(Some(signal)) => {
                        session.join(signal.clone());
                        batch = vec![signal];
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            session.close();
            self.finish(session, &mut history);
        }

        history
    }

    fn open(&mut self, trigger: ChangeSignal) -> ChangeSession {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        tracing::debug!(session = %id, ?trigger, "session opened");
        ChangeSession::new(id, trigger)
    }

    fn finish(&self, session: ChangeSession, history: &mut Vec<ChangeSession>) {
        tracing::debug!(
            session = %session.id,
            state = ?session.state(),
            rebuilds = session.rebuild_count(),
            "session closed"
        );
        if let Some(tx) = &self.closed_tx {
            let _ = tx.send(session.clone());
        }
        history.push(session);
    }

    /// One burst: emit `Rebuilding` per signal, rebuild until no work is queued,
    /// then emit `Done`. Returns false if a pass failed.
    async fn run_burst(
        &mut self,
        session: &mut ChangeSession,
        mut batch: Vec<ChangeSignal>,
        rx: &mut mpsc::Receiver<ChangeSignal>,
    ) -> bool {
        let started = Instant::now();
        for _ in &batch {
            self.emit(session, RebuildEvent::Rebuilding).await;
        }

        loop {
            // Coalesce anything already queued into this pass.
            while let Ok(signal) = rx.try_recv() {
                self.absorb(session, &mut batch, signal).await;
            }

            let scope = RebuildScope::for_batch(&batch, self.dirty);
            match self.rebuild(scope).await {
                Ok(()) => {
                    self.dirty = false;
                    batch.clear();
                    // Work that arrived mid-rebuild extends the burst.
                    if let Ok(signal) = rx.try_recv() {
                        self.absorb(session, &mut batch, signal).await;
                        continue;
                    }
                    let elapsed = started.elapsed().as_millis() as u64;
                    self.emit(session, RebuildEvent::done(elapsed)).await;
                    return true;
                }
                Err(err) => {
                    tracing::warn!(session = %session.id, error = %err, "rebuild failed");
                    self.dirty = true;
                    self.emit(
                        session,
                        RebuildEvent::ErrorLogged {
                            message: format!("{err:#}"),
                        },
                    )
                    .await;
                    return false;
                }
            }
        }
    }

    async fn absorb(
        &self,
        session: &mut ChangeSession,
        batch: &mut Vec<ChangeSignal>,
        signal: ChangeSignal,
    ) {
        tracing::debug!(session = %session.id, ?signal, "coalesced into running burst");
        session.join(signal.clone());
        batch.push(signal);
        self.emit(session, RebuildEvent::Rebuilding).await;
    }

    /// Validate against the session state machine, then publish.
    async fn emit(&self, session: &mut ChangeSession, event: RebuildEvent) {
        if let Err(err) = session.push(event.clone()) {
            tracing::error!(session = %session.id, %err, "dropping out-of-order event");
            return;
        }
        self.sink.append_event(&event, Some(session.id)).await;
    }

    /// Run the rebuilder on a blocking thread. Panics count as failures and a
    /// poisoned lock is recovered; the next pass is full anyway.
    async fn rebuild(&self, scope: RebuildScope) -> anyhow::Result<()> {
        let rebuilder = Arc::clone(&self.rebuilder);
        tokio::task::spawn_blocking(move || {
            let mut rebuilder = rebuilder.lock().unwrap_or_else(PoisonError::into_inner);
            std::panic::catch_unwind(AssertUnwindSafe(|| rebuilder.rebuild(&scope)))
                .map_err(|_| anyhow::anyhow!("rebuilder panicked"))?
        })
        .await
        .map_err(|e| anyhow::anyhow!("rebuild task join error: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::protocol::conformance::check;
    use crate::session::SessionState;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Scripted rebuilder: pops one result per pass and records the scopes it saw.
    struct Scripted {
        results: VecDeque<anyhow::Result<()>>,
        scopes: Arc<Mutex<Vec<RebuildScope>>>,
        delay: Duration,
    }

    impl Rebuilder for Scripted {
        fn rebuild(&mut self, scope: &RebuildScope) -> anyhow::Result<()> {
            self.scopes.lock().unwrap().push(scope.clone());
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn scripted(
        results: Vec<anyhow::Result<()>>,
        delay: Duration,
    ) -> (Scripted, Arc<Mutex<Vec<RebuildScope>>>) {
        let scopes = Arc::new(Mutex::new(Vec::new()));
        (
            Scripted {
                results: results.into(),
                scopes: Arc::clone(&scopes),
                delay,
            },
            scopes,
        )
    }

    fn sink() -> ClientLogSink {
        ClientLogSink::new(&SinkConfig::default())
    }

    fn edit(name: &str) -> ChangeSignal {
        ChangeSignal::SourceModified(PathBuf::from(format!("app/{name}.tsx")))
    }

    #[tokio::test]
    async fn test_single_edit_emits_rebuilding_then_done() {
        let (rebuilder, _) = scripted(vec![Ok(())], Duration::ZERO);
        let sink = sink();
        let orchestrator = RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_millis(10));

        let (tx, rx) = mpsc::channel(8);
        tx.send(edit("page")).await.unwrap();
        drop(tx);
        let sessions = orchestrator.run(rx).await;

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state(), SessionState::Done);
        let records = sink.read_all().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "[Fast Refresh] rebuilding");
        assert!(records[1].message.starts_with("[Fast Refresh] done in "));
        assert!(check(&records).is_conformant());
    }

    #[tokio::test]
    async fn test_queued_signals_coalesce_into_one_done() {
        let (rebuilder, scopes) = scripted(vec![], Duration::ZERO);
        let sink = sink();
        let orchestrator = RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_millis(10));

        let (tx, rx) = mpsc::channel(8);
        tx.send(edit("a")).await.unwrap();
        tx.send(edit("b")).await.unwrap();
        tx.send(edit("c")).await.unwrap();
        drop(tx);
        let sessions = orchestrator.run(rx).await;

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].rebuild_count(), 3);
        assert_eq!(sessions[0].triggers.len(), 3);
        assert_eq!(scopes.lock().unwrap().len(), 1);

        let report = check(&sink.read_all().await);
        assert!(report.is_conformant());
        assert_eq!(report.completed(), 1);
        assert_eq!(report.coalesced(), 1);
    }

    #[tokio::test]
    async fn test_change_during_rebuild_extends_burst() {
        let (rebuilder, scopes) = scripted(vec![], Duration::from_millis(200));
        let sink = sink();
        let orchestrator =
            RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_millis(10));

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(orchestrator.run(rx));
        tx.send(edit("a")).await.unwrap();
        // Land while the first pass is still sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(edit("b")).await.unwrap();
        assert!(sink.wait_for_done(0).await.is_satisfied());
        drop(tx);
        let sessions = handle.await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].rebuild_count(), 2);
        assert_eq!(scopes.lock().unwrap().len(), 2);
        let records = sink.read_all().await;
        let done: Vec<_> = records
            .iter()
            .filter(|r| r.message.starts_with("[Fast Refresh] done in "))
            .collect();
        assert_eq!(done.len(), 1);
        assert_eq!(records.last().unwrap(), done[0]);
    }

    #[tokio::test]
    async fn test_failure_leaves_session_open_then_recovers_with_full_rebuild() {
        let (rebuilder, scopes) = scripted(
            vec![Err(anyhow::anyhow!("Module not found: ./missing")), Ok(())],
            Duration::ZERO,
        );
        let sink = sink();
        let orchestrator = RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_millis(20));

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(orchestrator.run(rx));
        tx.send(edit("broken")).await.unwrap();
        // Outlast the quiescence window so the failed session closes.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(edit("fixed")).await.unwrap();
        drop(tx);
        let sessions = handle.await.unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].state(), SessionState::Failed);
        assert_eq!(sessions[1].state(), SessionState::Done);

        let scopes = scopes.lock().unwrap();
        assert!(matches!(scopes[0], RebuildScope::Incremental(_)));
        assert_eq!(scopes[1], RebuildScope::Full);

        let records = sink.read_all().await;
        let errors: Vec<_> = records
            .iter()
            .filter(|r| r.source == crate::protocol::event::LogSource::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Module not found"));

        let report = check(&records);
        assert!(report.is_conformant(), "{:?}", report.violations);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.pending(), 1);
    }

    #[tokio::test]
    async fn test_retry_inside_quiescence_reuses_failed_session() {
        let (rebuilder, scopes) = scripted(
            vec![Err(anyhow::anyhow!("syntax error")), Ok(())],
            Duration::ZERO,
        );
        let sink = sink();
        let orchestrator =
            RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_secs(5));

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(orchestrator.run(rx));
        tx.send(edit("broken")).await.unwrap();
        let failed = sink
            .wait_until(|r| r.iter().any(|r| r.message == "syntax error"))
            .await;
        assert!(failed.is_satisfied());

        tx.send(edit("fixed")).await.unwrap();
        assert!(sink.wait_for_done(0).await.is_satisfied());
        drop(tx);
        let sessions = handle.await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state(), SessionState::Done);
        assert_eq!(sessions[0].rebuild_count(), 2);
        assert_eq!(scopes.lock().unwrap()[1], RebuildScope::Full);

        let report = check(&sink.read_all().await);
        assert!(report.is_conformant(), "{:?}", report.violations);
        assert_eq!(report.bursts.len(), 1);
        assert_eq!(report.bursts[0].errors, 1);
    }

    #[tokio::test]
    async fn test_queued_failure_closes_on_shutdown() {
        let (rebuilder, _) = scripted(vec![Err(anyhow::anyhow!("syntax error"))], Duration::ZERO);
        let sink = sink();
        let orchestrator =
            RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_secs(5));

        let (tx, rx) = mpsc::channel(8);
        tx.send(edit("broken")).await.unwrap();
        tx.send(edit("still-broken")).await.unwrap();
        drop(tx);
        let sessions = orchestrator.run(rx).await;

        // Both signals were queued before the first pass, so they share a burst.
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state(), SessionState::Failed);
        assert_eq!(sessions[0].rebuild_count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_rebuilder_is_reported_as_failure() {
        struct Panics;
        impl Rebuilder for Panics {
            fn rebuild(&mut self, _: &RebuildScope) -> anyhow::Result<()> {
                panic!("bundler crashed");
            }
        }

        let sink = sink();
        let orchestrator = RebuildOrchestrator::new(Panics, sink.clone(), Duration::from_millis(10));
        let (tx, rx) = mpsc::channel(8);
        tx.send(edit("page")).await.unwrap();
        drop(tx);
        let sessions = orchestrator.run(rx).await;

        assert_eq!(sessions[0].state(), SessionState::Failed);
        let records = sink.read_all().await;
        assert!(records.iter().any(|r| r.message.contains("panicked")));
    }

    #[tokio::test]
    async fn test_sessions_are_numbered_in_arrival_order() {
        let (rebuilder, _) = scripted(vec![], Duration::ZERO);
        let sink = sink();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let orchestrator = RebuildOrchestrator::new(rebuilder, sink.clone(), Duration::from_millis(10))
            .with_close_notifier(closed_tx);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(orchestrator.run(rx));
        tx.send(edit("one")).await.unwrap();
        let first = closed_rx.recv().await.unwrap();
        tx.send(ChangeSignal::EnvChanged(PathBuf::from(".env"))).await.unwrap();
        let second = closed_rx.recv().await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(first.id, SessionId(1));
        assert_eq!(second.id, SessionId(2));
        assert_eq!(sink.session_records(SessionId(2)).await.len(), 2);
    }
}
