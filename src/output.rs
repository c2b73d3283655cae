use serde::Serialize;

use crate::protocol::conformance::{BurstOutcome, ConformanceReport};
use crate::protocol::event::LogRecord;
use crate::routes::{RouteLookup, RouteTable};
use crate::session::ChangeSession;

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error serialising output: {}", e),
    }
}

/// Print one client record as it is appended.
///
/// - `json = true`: one compact JSON object per line (the format `check` reads back).
/// - `json = false`: `[source] message`.
pub fn print_record(record: &LogRecord, json: bool) {
    if json {
        print_json(record, false);
    } else {
        println!("{}", record);
    }
}

/// One-line summary of a closed session, written to stderr so stdout stays a clean record stream.
pub fn print_session_closed(session: &ChangeSession) {
    eprintln!(
        "session {} closed: {:?}, {} rebuild(s), {} trigger(s)",
        session.id,
        session.state(),
        session.rebuild_count(),
        session.triggers.len()
    );
}

/// Print a conformance report.
///
/// Human form is cargo-style: a summary line, one line per burst, then
/// violations. Violations also go to stderr so scripts can key on them.
pub fn print_report(report: &ConformanceReport, json: bool) {
    if json {
        print_json(report, true);
        return;
    }

    println!(
        "Checked {} burst(s): {} done, {} pending, {} coalesced, {} other record(s)",
        report.bursts.len(),
        report.completed(),
        report.pending(),
        report.coalesced(),
        report.ignored,
    );
    for burst in &report.bursts {
        let owner = burst
            .session
            .map(|s| format!("session {s}"))
            .unwrap_or_else(|| "untagged".to_string());
        let outcome = match (burst.outcome, burst.duration_ms) {
            (BurstOutcome::Done, Some(ms)) => format!("done in {ms}ms"),
            (BurstOutcome::Done, None) => "done".to_string(),
            (BurstOutcome::Pending, _) => "pending (unknown outcome)".to_string(),
        };
        println!(
            "  {}: {} rebuilding, {} error(s), {}",
            owner, burst.rebuilds, burst.errors, outcome
        );
    }

    if !report.is_conformant() {
        eprintln!("  {} violation(s):", report.violations.len());
        for violation in &report.violations {
            eprintln!("    {}", violation);
        }
    }
}

/// Print the route table, one `route -> file` per line.
pub fn print_routes(table: &RouteTable, json: bool) {
    if json {
        print_json(table, true);
        return;
    }
    println!("{} route(s)", table.len());
    for (route, file) in &table.routes {
        println!("  {} -> {}", route, file.display());
    }
}

#[derive(Serialize)]
struct LookupOutput<'a> {
    route: &'a str,
    #[serde(flatten)]
    lookup: &'a RouteLookup,
}

/// Print the result of resolving one route.
pub fn print_lookup(route: &str, lookup: &RouteLookup, json: bool) {
    if json {
        print_json(&LookupOutput { route, lookup }, false);
        return;
    }
    match lookup {
        RouteLookup::Found { file } => println!("{} -> {}", route, file.display()),
        RouteLookup::NotFound => println!("{} -> not found", route),
    }
}
