use checkin_relay::core::{
    ClientEvent, ConnectionState, DisplaySink, HistoryEntry, format_remaining,
};
use chrono::{DateTime, Utc};
use console::style;

/// Renders the event stream as plain terminal lines.
pub struct TerminalSink {
    /// Entries shown per snapshot.
    limit: usize,
}

impl TerminalSink {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl DisplaySink for TerminalSink {
    fn on_event(&self, event: &ClientEvent) {
        if let Some(line) = render_event(event) {
            println!("{line}");
        }
    }

    fn on_snapshot(&self, entries: &[HistoryEntry]) {
        if entries.is_empty() {
            return;
        }
        let now = Utc::now();
        println!("{}", style("── who's working on what ──").dim());
        for entry in entries.iter().take(self.limit) {
            println!("  {}", render_entry(entry, now));
        }
    }
}

pub fn render_event(event: &ClientEvent) -> Option<String> {
    let line = match event {
        ClientEvent::ConnectionChanged { state, detail } => {
            let marker = match state {
                ConnectionState::Open => style("●").green().bold(),
                ConnectionState::Connecting | ConnectionState::Closing => style("●").yellow(),
                ConnectionState::Disconnected => style("●").red(),
            };
            match detail {
                Some(detail) => format!("{marker} {state} {}", style(detail).dim()),
                None => format!("{marker} {state}"),
            }
        }
        ClientEvent::HistoryReady { received } => {
            format!("{} {received} recent check-ins", style("↺").cyan())
        }
        ClientEvent::OnlineCountChanged { count } => {
            format!("{} {count} online", style("◆").cyan())
        }
        ClientEvent::CooldownTick { remaining } if remaining.is_zero() => {
            format!("{} ready to check in again", style("✓").green().bold())
        }
        ClientEvent::CooldownTick { .. } | ClientEvent::CheckInReceived { .. } => return None,
        ClientEvent::RelayNotice { message } => {
            format!("{} relay: {}", style("!").yellow().bold(), style(message).yellow())
        }
        ClientEvent::AuthenticationFailed { reason } => format!(
            "{} authentication failed: {reason} (fix credentials, then reconnect)",
            style("✗").red().bold()
        ),
    };
    Some(line)
}

pub fn render_entry(entry: &HistoryEntry, now: DateTime<Utc>) -> String {
    let check_in = &entry.check_in;
    let mut line = format!(
        "[{}] {}",
        check_in.initials(),
        style(&check_in.identity).white().bold()
    );
    if !check_in.tags.is_empty() {
        line.push_str(&format!(" {}", style(check_in.tags.join(", ")).cyan()));
    }
    if !check_in.message.is_empty() {
        line.push_str(&format!(" {}", check_in.message));
    }
    if let Some(snippet) = &check_in.decorative_snippet {
        line.push_str(&format!(" {}", style(format!("`{snippet}`")).dim()));
    }
    line.push_str(&format!(" {}", style(relative_age(check_in.timestamp, now)).dim()));
    if entry.pending {
        line.push_str(&format!(" {}", style("(sending)").yellow()));
    }
    line
}

pub fn render_cooldown(remaining: std::time::Duration) -> String {
    format!(
        "{} cooling down, next check-in in {}",
        style("…").yellow(),
        format_remaining(remaining)
    )
}

fn relative_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - at).num_minutes();
    match minutes {
        i64::MIN..=0 => "just now".to_string(),
        1..=59 => format!("{minutes}m ago"),
        60..=1_439 => format!("{}h ago", minutes / 60),
        _ => format!("{}d ago", minutes / 1_440),
    }
}
