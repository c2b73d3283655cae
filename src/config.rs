use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Config file name looked up at the project root.
pub const CONFIG_FILE: &str = "refresh.toml";

/// Configuration loaded from `refresh.toml` at the project root.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    /// Additional path patterns to exclude from watching and route discovery
    /// (beyond .gitignore, node_modules and .next).
    pub exclude: Option<Vec<String>>,
    /// Directory holding route folders, relative to the project root.
    pub app_dir: String,
    pub watch: WatchConfig,
    pub sink: SinkConfig,
}

/// Watcher and session timing.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window handed to the OS watcher.
    pub debounce_ms: u64,
    /// How long a failed session stays open for a retry. Successful sessions
    /// close when their `Done` is emitted.
    pub quiescence_ms: u64,
    /// File names treated as env files. Any name starting with `.env` also matches.
    pub env_files: Vec<String>,
    /// File names whose change forces a full rebuild.
    pub config_files: Vec<String>,
}

/// Observer polling bounds for the client log sink.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            exclude: None,
            app_dir: "app".to_string(),
            watch: WatchConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 75,
            quiescence_ms: 300,
            env_files: vec![
                ".env".to_string(),
                ".env.local".to_string(),
                ".env.development".to_string(),
            ],
            config_files: vec![
                "next.config.js".to_string(),
                "next.config.mjs".to_string(),
                "package.json".to_string(),
                "tsconfig.json".to_string(),
            ],
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5000,
            poll_interval_ms: 50,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

impl SinkConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl RefreshConfig {
    /// Load configuration from `refresh.toml` in the given root directory.
    ///
    /// Returns a default configuration if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), %err, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(path = %config_path.display(), %err, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// Returns true if `path` matches any exclusion pattern from config.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let patterns = match &self.exclude {
            Some(p) => p,
            None => return false,
        };

        let path_str = path.to_string_lossy();

        for pattern in patterns {
            let Ok(matcher) = glob::Pattern::new(pattern) else {
                continue;
            };
            if matcher.matches(&path_str) {
                return true;
            }
            // Also check if any component matches the pattern directly.
            if path
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .any(|s| matcher.matches(s))
            {
                return true;
            }
        }

        false
    }
}
