pub mod event;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;

use crate::config::RefreshConfig;
use event::ChangeSignal;

/// Handle to a running watcher. Keeps the debouncer alive (dropping stops watching).
pub struct WatcherHandle {
    /// Keep alive: dropping the debouncer stops the OS watcher.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// The bridge task forwarding batches from the std channel to the tokio channel.
    _bridge_task: JoinHandle<()>,
}

/// File extensions that feed the client bundle.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "css", "json", "mdx"];

/// Directories never watched, regardless of .gitignore.
const HARD_EXCLUDES: &[&str] = &["node_modules", ".next", ".git"];

/// Build a Gitignore matcher from the project root's .gitignore file.
/// If no .gitignore exists, returns an empty matcher that matches nothing.
fn build_gitignore_matcher(project_root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(project_root);
    let gitignore_path = project_root.join(".gitignore");
    if gitignore_path.exists()
        && let Some(err) = builder.add(&gitignore_path)
    {
        tracing::warn!(%err, "ignoring unreadable .gitignore");
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Start a debounced file watcher on `watch_root`.
///
/// Returns a `WatcherHandle` (must be kept alive) and a tokio mpsc receiver
/// that yields classified `ChangeSignal`s in arrival order.
///
/// Each debounced batch is classified as a unit so that a directory rename,
/// which the OS reports as one vanished and one new path, becomes a single
/// `DirectoryRenamed` signal.
pub fn start_watcher(
    watch_root: &Path,
    config: &RefreshConfig,
) -> anyhow::Result<(WatcherHandle, tokio_mpsc::Receiver<ChangeSignal>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

    let mut debouncer = new_debouncer(config.watch.debounce(), move |res| {
        let _ = std_tx.send(res);
    })?;
    debouncer
        .watcher()
        .watch(watch_root, RecursiveMode::Recursive)?;

    let mut classifier = Classifier::new(watch_root, config.clone());
    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<ChangeSignal>(256);

    // Bridge: spawn_blocking to receive from std channel, classify, forward to tokio
    let bridge_task = tokio::task::spawn_blocking(move || {
        while let Ok(result) = std_rx.recv() {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    for signal in classifier.classify_batch(&paths) {
                        tracing::debug!(?signal, "change detected");
                        if tokio_tx.blocking_send(signal).is_err() {
                            return; // receiver dropped, shutdown
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "watcher error");
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            _debouncer: debouncer,
            _bridge_task: bridge_task,
        },
        tokio_rx,
    ))
}

/// Turns raw debounced paths into `ChangeSignal`s.
///
/// A vanished path leaves nothing on disk to inspect, so the classifier keeps
/// the set of directories it has seen and decides from that.
pub struct Classifier {
    root: PathBuf,
    gitignore: Gitignore,
    config: RefreshConfig,
    known_dirs: HashSet<PathBuf>,
}

impl Classifier {
    pub fn new(project_root: &Path, config: RefreshConfig) -> Self {
        let mut classifier = Self {
            root: project_root.to_path_buf(),
            gitignore: build_gitignore_matcher(project_root),
            config,
            known_dirs: HashSet::new(),
        };
        classifier.remember_tree(project_root);
        classifier
    }

    /// Record `dir` and every directory below it.
    fn remember_tree(&mut self, dir: &Path) {
        let walker = WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(false)
            .require_git(false)
            .filter_entry(|entry| {
                !HARD_EXCLUDES
                    .iter()
                    .any(|ex| entry.file_name() == std::ffi::OsStr::new(ex))
            })
            .build();
        for entry in walker.flatten() {
            if entry.file_type().is_some_and(|t| t.is_dir()) {
                self.known_dirs.insert(entry.into_path());
            }
        }
    }

    fn forget_tree(&mut self, dir: &Path) {
        self.known_dirs.retain(|known| !known.starts_with(dir));
    }

    fn is_known_dir(&self, path: &Path) -> bool {
        self.known_dirs.contains(path)
    }

    /// Classify one debounced batch, preserving the batch order.
    ///
    /// Filtering order:
    /// 1. Hardcoded exclusions (node_modules, .next, .git)
    /// 2. .gitignore rules and config exclusions
    /// 3. Env files, then config files
    /// 4. Directory rename pairing (vanished known directory + new sibling directory)
    /// 5. Source extension filter, then existence check (modified vs deleted)
    pub fn classify_batch(&mut self, paths: &[PathBuf]) -> Vec<ChangeSignal> {
        let signals = self.classify_paths(paths);

        for path in paths {
            if self.is_filtered(path) {
                continue;
            }
            if path.is_dir() {
                if !self.is_known_dir(path) {
                    self.remember_tree(path);
                }
            } else if !path.exists() {
                self.forget_tree(path);
            }
        }
        signals
    }

    fn classify_paths(&self, paths: &[PathBuf]) -> Vec<ChangeSignal> {
        let paths: Vec<&PathBuf> = paths.iter().filter(|p| !self.is_filtered(p)).collect();

        let vanished_dirs: Vec<&PathBuf> = paths
            .iter()
            .copied()
            .filter(|p| !p.exists() && self.is_known_dir(p) && !self.is_special(p))
            .collect();
        let new_dirs: Vec<&PathBuf> = paths.iter().copied().filter(|p| p.is_dir()).collect();

        // Pair each vanished directory with the first unclaimed new sibling.
        let mut renames: Vec<(&PathBuf, &PathBuf)> = Vec::new();
        for from in &vanished_dirs {
            if let Some(to) = new_dirs.iter().copied().find(|to| {
                to.parent() == from.parent() && !renames.iter().any(|(_, claimed)| claimed == to)
            }) {
                renames.push((*from, to));
            }
        }

        let mut signals = Vec::new();
        for path in &paths {
            if let Some(&(from, to)) = renames.iter().find(|(from, _)| from == path) {
                signals.push(ChangeSignal::DirectoryRenamed {
                    from: from.clone(),
                    to: to.clone(),
                });
                continue;
            }
            if renames.iter().any(|(_, to)| to == path) {
                continue;
            }
            if vanished_dirs.contains(path) {
                signals.push(ChangeSignal::DirectoryChanged((*path).clone()));
                continue;
            }
            if path.is_dir() {
                // A directory listed next to its own children is just a parent mtime bump.
                let has_children = paths.iter().any(|other| other != path && other.starts_with(path));
                if !has_children {
                    signals.push(ChangeSignal::DirectoryChanged((*path).clone()));
                }
                continue;
            }
            if let Some(signal) = self.classify_file(path) {
                signals.push(signal);
            }
        }
        signals
    }

    fn classify_file(&self, path: &Path) -> Option<ChangeSignal> {
        if self.is_env_file(path) {
            return Some(ChangeSignal::EnvChanged(path.to_path_buf()));
        }
        if self.is_config_file(path) {
            return Some(ChangeSignal::ConfigChanged(path.to_path_buf()));
        }
        if !has_source_extension(path) {
            return None;
        }
        if path.exists() {
            // notify-debouncer-mini doesn't distinguish create from modify.
            Some(ChangeSignal::SourceModified(path.to_path_buf()))
        } else {
            Some(ChangeSignal::SourceDeleted(path.to_path_buf()))
        }
    }

    fn is_filtered(&self, path: &Path) -> bool {
        if path
            .components()
            .any(|c| HARD_EXCLUDES.iter().any(|ex| c.as_os_str() == *ex))
        {
            return true;
        }
        // matched_path_or_any_parents panics outside the root.
        if path.starts_with(&self.root)
            && path != self.root
            && self
                .gitignore
                .matched_path_or_any_parents(path, path.is_dir())
                .is_ignore()
        {
            return true;
        }
        self.config.is_excluded(path)
    }

    fn is_special(&self, path: &Path) -> bool {
        self.is_env_file(path) || self.is_config_file(path)
    }

    fn is_env_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(".env") || self.config.watch.env_files.iter().any(|f| f == name)
    }

    fn is_config_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.config.watch.config_files.iter().any(|f| f == name))
    }
}

fn has_source_extension(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    SOURCE_EXTENSIONS.contains(&ext)
}
