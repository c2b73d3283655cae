use std::path::PathBuf;

/// Classified external mutation, as delivered to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// A source file was created or its content changed.
    SourceModified(PathBuf),
    /// A source file was deleted.
    SourceDeleted(PathBuf),
    /// An env file (`.env`, `.env.local`, ...) changed. Content is opaque here.
    EnvChanged(PathBuf),
    /// A framework/bundler config file changed. Triggers a full rebuild.
    ConfigChanged(PathBuf),
    /// A directory vanished and a sibling appeared in the same debounce batch.
    DirectoryRenamed { from: PathBuf, to: PathBuf },
    /// A directory appeared or vanished without a rename partner.
    DirectoryChanged(PathBuf),
}

impl ChangeSignal {
    /// Signals that invalidate more than one file force a full rebuild.
    pub fn requires_full_rebuild(&self) -> bool {
        matches!(
            self,
            Self::ConfigChanged(_) | Self::DirectoryRenamed { .. } | Self::DirectoryChanged(_)
        )
    }

    /// Primary path touched by the signal (the destination for renames).
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::SourceModified(p)
            | Self::SourceDeleted(p)
            | Self::EnvChanged(p)
            | Self::ConfigChanged(p)
            | Self::DirectoryChanged(p) => p,
            Self::DirectoryRenamed { to, .. } => to,
        }
    }
}
