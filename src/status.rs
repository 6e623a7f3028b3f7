//! Rendering of service state for the `ps` and `status` commands.
use chrono::{DateTime, Utc};

use crate::registry::{ServiceSnapshot, ServiceState};

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const YELLOW_BOLD: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Colored one-word label for a lifecycle state.
fn state_label(state: &ServiceState) -> String {
    match state {
        ServiceState::Running => format!("{GREEN_BOLD}running{RESET}"),
        ServiceState::Pending => format!("{YELLOW_BOLD}pending{RESET}"),
        ServiceState::Exited { code: 0 } => format!("{GREEN_BOLD}exited(0){RESET}"),
        ServiceState::Exited { code } => format!("{RED_BOLD}exited({code}){RESET}"),
        ServiceState::Failed { .. } => format!("{RED_BOLD}failed{RESET}"),
        ServiceState::Stopped => format!("{YELLOW_BOLD}stopped{RESET}"),
    }
}

/// Compact `3s` / `2m10s` / `1h4m` rendering of time since a transition.
fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{hours}h{mins}m")
    } else if mins > 0 {
        format!("{mins}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Renders the `ps` table for all known services.
pub fn render_table(snapshots: &[ServiceSnapshot]) -> String {
    let now = Utc::now();
    let mut out = format!(
        "{:<20} {:>8} {:<12} {:>8} {:>6}  COMMAND\n",
        "NAME", "PID", "STATE", "SINCE", "RUNS"
    );
    for snap in snapshots {
        let pid = snap
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".into());
        // The ANSI escape codes would confuse width padding, so pad the
        // plain-text label and color it afterwards.
        let plain = strip_color(&state_label(&snap.state));
        let colored = state_label(&snap.state);
        let padding = 12usize.saturating_sub(plain.len());
        out.push_str(&format!(
            "{:<20} {:>8} {}{} {:>8} {:>6}  {}\n",
            snap.name,
            pid,
            colored,
            " ".repeat(padding),
            format_age(snap.since, now),
            snap.run_count,
            snap.definition.exec.display(),
        ));
    }
    out
}

/// Renders the detailed `status` view of one service.
pub fn render_detail(snap: &ServiceSnapshot) -> String {
    let now = Utc::now();
    let mut out = String::new();
    out.push_str(&format!("name:      {}\n", snap.name));
    out.push_str(&format!("state:     {}\n", state_label(&snap.state)));
    if let ServiceState::Failed { reason } = &snap.state {
        out.push_str(&format!("reason:    {reason}\n"));
    }
    if let Some(pid) = snap.pid {
        out.push_str(&format!("pid:       {pid}\n"));
    }
    out.push_str(&format!("since:     {} ago\n", format_age(snap.since, now)));
    out.push_str(&format!("runs:      {}\n", snap.run_count));
    out.push_str(&format!("command:   {}\n", snap.definition.exec.display()));
    if let Some(dir) = &snap.definition.working_dir {
        out.push_str(&format!("workdir:   {dir}\n"));
    }
    if let Some(log) = &snap.definition.log_file_path {
        out.push_str(&format!("log file:  {log}\n"));
    }
    out
}

fn strip_color(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_escape = false;
    for ch in input.chars() {
        match ch {
            '\x1b' => in_escape = true,
            'm' if in_escape => in_escape = false,
            _ if in_escape => {}
            _ => out.push(ch),
        }
    }
    out
}
