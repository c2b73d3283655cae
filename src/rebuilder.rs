use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::config::RefreshConfig;
use crate::guard::StaleRouteGuard;
use crate::routes::RouteTable;
use crate::watcher::event::ChangeSignal;

/// How much work a rebuild pass must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildScope {
    /// Only the listed signals changed since the last good build.
    Incremental(Vec<ChangeSignal>),
    /// Rebuild everything: config change, directory move, or recovery after a
    /// failed session.
    Full,
}

impl RebuildScope {
    /// Pick the scope for a batch. `dirty` is set when the previous pass failed.
    pub fn for_batch(signals: &[ChangeSignal], dirty: bool) -> Self {
        if dirty || signals.iter().any(ChangeSignal::requires_full_rebuild) {
            Self::Full
        } else {
            Self::Incremental(signals.to_vec())
        }
    }
}

/// The work the orchestrator sequences. Runs on a blocking thread.
pub trait Rebuilder: Send + 'static {
    fn rebuild(&mut self, scope: &RebuildScope) -> anyhow::Result<()>;
}

/// Rebuilds the route table of a project and resets the stale-route guard
/// whenever the table is swapped.
pub struct RouteRebuilder {
    root: PathBuf,
    config: RefreshConfig,
    table: Arc<RwLock<RouteTable>>,
    guard: Arc<Mutex<StaleRouteGuard>>,
}

impl RouteRebuilder {
    pub fn new(
        root: &Path,
        config: RefreshConfig,
        table: Arc<RwLock<RouteTable>>,
        guard: Arc<Mutex<StaleRouteGuard>>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            table,
            guard,
        }
    }

    fn touches_routes(&self, signals: &[ChangeSignal]) -> bool {
        let app_dir = self.root.join(&self.config.app_dir);
        signals.iter().any(|s| s.path().starts_with(&app_dir))
    }
}

impl Rebuilder for RouteRebuilder {
    fn rebuild(&mut self, scope: &RebuildScope) -> anyhow::Result<()> {
        if let RebuildScope::Incremental(signals) = scope
            && !self.touches_routes(signals)
        {
            tracing::debug!("change outside app dir, route table untouched");
            return Ok(());
        }

        // Build without holding the lock; the swap is the only write.
        let table = RouteTable::build(&self.root, &self.config)?;
        tracing::debug!(routes = table.len(), full = matches!(scope, RebuildScope::Full), "route table rebuilt");
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteLookup;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_scope_escalates_on_dirty_or_structural_change() {
        let edit = ChangeSignal::SourceModified(PathBuf::from("app/page.tsx"));
        assert_eq!(
            RebuildScope::for_batch(std::slice::from_ref(&edit), false),
            RebuildScope::Incremental(vec![edit.clone()])
        );
        assert_eq!(
            RebuildScope::for_batch(std::slice::from_ref(&edit), true),
            RebuildScope::Full
        );
        let cfg = ChangeSignal::ConfigChanged(PathBuf::from("next.config.js"));
        assert_eq!(RebuildScope::for_batch(&[edit, cfg], false), RebuildScope::Full);
    }

    #[test]
    fn test_route_rebuilder_swaps_table_and_resets_guard() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(app.join("folder")).unwrap();
        fs::write(app.join("folder").join("page.tsx"), "x").unwrap();

        let table = Arc::new(RwLock::new(RouteTable::default()));
        let guard = Arc::new(Mutex::new(StaleRouteGuard::new(Duration::from_secs(5))));
        guard
            .lock()
            .unwrap()
            .navigate(&table.read().unwrap(), "/folder");
        assert!(guard.lock().unwrap().is_known_missing("/folder"));

        let mut rebuilder = RouteRebuilder::new(
            dir.path(),
            RefreshConfig::default(),
            Arc::clone(&table),
            Arc::clone(&guard),
        );
        rebuilder.rebuild(&RebuildScope::Full).unwrap();

        assert!(matches!(
            table.read().unwrap().resolve("/folder"),
            RouteLookup::Found { .. }
        ));
        assert!(!guard.lock().unwrap().is_known_missing("/folder"));
    }

    #[test]
    fn test_incremental_outside_app_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("page.tsx"), "x").unwrap();

        let table = Arc::new(RwLock::new(RouteTable::default()));
        let guard = Arc::new(Mutex::new(StaleRouteGuard::new(Duration::from_secs(5))));
        let mut rebuilder = RouteRebuilder::new(
            dir.path(),
            RefreshConfig::default(),
            Arc::clone(&table),
            guard,
        );
        let outside = ChangeSignal::EnvChanged(dir.path().join(".env"));
        rebuilder
            .rebuild(&RebuildScope::Incremental(vec![outside]))
            .unwrap();
        assert!(table.read().unwrap().is_empty());
    }
}
