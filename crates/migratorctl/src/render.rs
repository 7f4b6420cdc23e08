//! Output rendering for migratorctl.

use migrator_core::{CredentialStatus, RunMode, RunTicket};

use crate::client::HealthResponse;

/// Print confirmation after starting a run.
pub fn print_run_started(ticket: &RunTicket) {
    print!("{}", format_run_started(ticket));
}

pub fn format_run_started(ticket: &RunTicket) -> String {
    format!(
        "Started run: {}\n  Mode:    {}\n  Started: {}\n",
        ticket.token,
        format_mode(ticket.mode),
        format_time(&ticket.started_at),
    )
}

/// Print output lines as they arrive.
pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Print the generator output attached to a failed start.
pub fn print_generation_output(output: &[String]) {
    if output.is_empty() {
        return;
    }
    eprintln!("script generation output:");
    for line in output {
        eprintln!("  {line}");
    }
}

pub fn print_status(addr: &str, health: &HealthResponse, credentials: &CredentialStatus) {
    print!("{}", format_status(addr, health, credentials));
}

pub fn format_status(addr: &str, health: &HealthResponse, credentials: &CredentialStatus) -> String {
    format!(
        "Daemon:  {} at {}{}\n  Streams: {}\nSource:  {}\nTarget:  {}\n",
        health.status,
        addr,
        if health.busy { " (starting a run)" } else { "" },
        health.streams,
        format_auth(credentials.source),
        format_auth(credentials.target),
    )
}

fn format_auth(ok: bool) -> &'static str {
    if ok {
        "authenticated"
    } else {
        "not authenticated"
    }
}

fn format_mode(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Bulk => "bulk (generated script)",
        RunMode::SingleRepo => "single repository",
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
