//! UI utilities for pretty printing

use chrono::{TimeZone, Utc};
use colored::Colorize;
use fieldsync_core::Event;

fn flag(set: bool) -> colored::ColoredString {
    if set {
        "✓".bright_green()
    } else {
        "·".dimmed()
    }
}

pub fn print_event_header() {
    println!();
    println!(
        "  {:<8} {:>6}  {:<8} {:<8} {:<17} {:<17} {:>3} {:>3} {:>3} {:>3}",
        "id".bright_cyan().bold(),
        "seq".bright_cyan().bold(),
        "sender".bright_cyan().bold(),
        "receiver".bright_cyan().bold(),
        "category".bright_cyan().bold(),
        "occurred".bright_cyan().bold(),
        "web".bright_cyan().bold(),
        "rcv".bright_cyan().bold(),
        "rpl".bright_cyan().bold(),
        "arc".bright_cyan().bold(),
    );
}

pub fn print_event_row(event: &Event) {
    let short = |s: String| s.chars().take(8).collect::<String>();
    let occurred = Utc
        .timestamp_millis_opt(event.occurred_time as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {:<8} {:>6}  {:<8} {:<8} {:<17} {:<17} {:>3} {:>3} {:>3} {:>3}",
        short(event.id.to_string()).bright_white(),
        event.local_sequence_number,
        short(event.sender_id.to_string()),
        event.receiver_id.map(|r| short(r.to_string())).unwrap_or_else(|| "-".to_string()),
        format!("{:?}", event.category),
        occurred,
        flag(event.online_web_synced),
        flag(event.receiver_synced),
        flag(event.local_replayed),
        flag(event.archived),
    );
}

pub fn print_error(msg: &str) {
    println!("{} {}", "✗".bright_red(), msg.red());
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".bright_green(), msg.bright_green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".bright_blue(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".bright_yellow(), msg.yellow());
}
