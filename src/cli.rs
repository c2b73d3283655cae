use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fast Refresh rebuild-notification tooling.
///
/// refresh-log watches a project, groups file changes into rebuild sessions,
/// and emits the ordered `[Fast Refresh]` lifecycle log a client would see.
/// Captured logs can be checked against the protocol state machine.
#[derive(Parser, Debug)]
#[command(
    name = "refresh-log",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a project and print lifecycle records as rebuild sessions run.
    Watch {
        /// Path to the project root to watch.
        path: PathBuf,

        /// Print records as JSON lines (readable by `check`).
        #[arg(long)]
        json: bool,

        /// Exit after the first session closes.
        #[arg(long)]
        once: bool,
    },

    /// Check a JSON-lines record log against the rebuild protocol.
    ///
    /// Exits with status 1 when the log contains protocol violations. Bursts
    /// still waiting for `done` are reported as pending, not as failures.
    Check {
        /// Path to a file with one `{"source": ..., "message": ...}` object per line.
        log: PathBuf,

        /// Output the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the routes discovered under the app directory, or resolve one.
    ///
    /// With `--resolve`, exits with status 1 if the route does not exist.
    Routes {
        /// Path to the project root.
        path: PathBuf,

        /// Request path to resolve (e.g. "/blog/post").
        #[arg(long)]
        resolve: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
