mod cli;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use refresh_log::output::{
    print_lookup, print_record, print_report, print_routes, print_session_closed,
};
use refresh_log::protocol::check;
use refresh_log::routes::{RouteLookup, RouteTable, normalize};
use refresh_log::{DevLoop, LogRecord, RefreshConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so stdout stays clean for JSON consumers.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Watch { path, json, once } => {
            let config = RefreshConfig::load(&path);
            let mut dev = DevLoop::start(&path, config)
                .with_context(|| format!("failed to watch {}", path.display()))?;
            let mut records = dev.sink().subscribe();
            eprintln!("Watching {}...", path.display());

            loop {
                tokio::select! {
                    biased;
                    session = dev.next_closed_session() => match session {
                        Some(session) => {
                            // Flush records emitted before the close notification.
                            while let Ok(record) = records.try_recv() {
                                if once && record.session.is_some_and(|id| id > session.id) {
                                    continue;
                                }
                                print_record(&record, json);
                            }
                            print_session_closed(&session);
                            if once {
                                break;
                            }
                        }
                        None => break,
                    },
                    record = records.recv() => match record {
                        Ok(record) => print_record(&record, json),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "record stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            if tokio::time::timeout(Duration::from_secs(2), dev.shutdown())
                .await
                .is_err()
            {
                tracing::warn!("orchestrator did not drain before exit");
            }
        }

        Commands::Check { log, json } => {
            let contents = std::fs::read_to_string(&log)
                .with_context(|| format!("failed to read {}", log.display()))?;
            let records = LogRecord::parse_lines(&contents)?;
            let report = check(&records);
            print_report(&report, json);
            if !report.is_conformant() {
                std::process::exit(1);
            }
        }

        Commands::Routes {
            path,
            resolve,
            json,
        } => {
            let config = RefreshConfig::load(&path);
            let table = RouteTable::build(&path, &config)?;
            match resolve {
                Some(route) => {
                    let route = normalize(&route);
                    let lookup = table.resolve(&route);
                    print_lookup(&route, &lookup, json);
                    if lookup == RouteLookup::NotFound {
                        std::process::exit(1);
                    }
                }
                None => print_routes(&table, json),
            }
        }
    }

    Ok(())
}
