use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RefreshConfig;
use crate::guard::{Decision, StaleRouteGuard};
use crate::orchestrator::RebuildOrchestrator;
use crate::rebuilder::RouteRebuilder;
use crate::routes::{RouteLookup, RouteTable};
use crate::session::ChangeSession;
use crate::sink::ClientLogSink;
use crate::watcher::event::ChangeSignal;
use crate::watcher::{WatcherHandle, start_watcher};

/// A running change-detector → orchestrator → sink pipeline for one project.
///
/// Route lookups go through the stale-route guard and read the table the
/// orchestrator last swapped in.
pub struct DevLoop {
    root: PathBuf,
    sink: ClientLogSink,
    table: Arc<RwLock<RouteTable>>,
    guard: Arc<Mutex<StaleRouteGuard>>,
    closed_rx: mpsc::UnboundedReceiver<ChangeSession>,
    orchestrator: JoinHandle<Vec<ChangeSession>>,
    watcher: Option<WatcherHandle>,
}

impl DevLoop {
    /// Build the initial route table and start watching `root`.
    pub fn start(root: &Path, config: RefreshConfig) -> anyhow::Result<Self> {
        let (handle, rx) = start_watcher(root, &config)?;
        let mut dev = Self::with_signals(root, config, rx)?;
        dev.watcher = Some(handle);
        Ok(dev)
    }

    /// Same pipeline fed from an arbitrary signal source instead of the OS watcher.
    pub fn with_signals(
        root: &Path,
        config: RefreshConfig,
        signals: mpsc::Receiver<ChangeSignal>,
    ) -> anyhow::Result<Self> {
        let table = Arc::new(RwLock::new(RouteTable::build(root, &config)?));
        let guard = Arc::new(Mutex::new(StaleRouteGuard::new(config.sink.wait_timeout())));
        let sink = ClientLogSink::new(&config.sink);
        let quiescence = config.watch.quiescence();

        let rebuilder = RouteRebuilder::new(root, config, Arc::clone(&table), Arc::clone(&guard));
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let orchestrator = RebuildOrchestrator::new(rebuilder, sink.clone(), quiescence)
            .with_close_notifier(closed_tx);
        let orchestrator = tokio::spawn(orchestrator.run(signals));

        tracing::debug!(root = %root.display(), "dev loop started");
        Ok(Self {
            root: root.to_path_buf(),
            sink,
            table,
            guard,
            closed_rx,
            orchestrator,
            watcher: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sink(&self) -> &ClientLogSink {
        &self.sink
    }

    /// A user navigation: always exactly one request.
    pub fn navigate(&self, path: &str) -> RouteLookup {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .navigate(&table, path)
    }

    /// A background revalidation, suppressed for routes known missing.
    pub fn revalidate(&self, path: &str) -> Decision {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .revalidate(&table, path)
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request_count(path)
    }

    /// Wait for the next session to close. `None` once the pipeline has stopped.
    pub async fn next_closed_session(&mut self) -> Option<ChangeSession> {
        self.closed_rx.recv().await
    }

    /// Stop watching and wait for the orchestrator to drain. Returns every closed session.
    ///
    /// When built with `with_signals`, the caller must drop its sender first.
    pub async fn shutdown(mut self) -> anyhow::Result<Vec<ChangeSession>> {
        drop(self.watcher.take());
        Ok(self.orchestrator.await?)
    }
}
