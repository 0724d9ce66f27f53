//! Plain-text rendering of the listener state.

use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use listener_core::ControllerUpdate;
use serde_json::Value;
use shared::domain::{CanonicalEvent, ChangeFilter, ConnectionStatus};

pub const HELP: &str = "\
commands:
  <enter> | toggle   start listening, or stop if already listening
  start              start listening
  stop               stop listening
  clear              drop every logged event (keeps listening)
  status             show connection status and event count
  list               show logged events, most recent first
  help               show this text
  quit               stop and exit";

pub fn status_line(status: ConnectionStatus) -> String {
    format!("Status: {status}")
}

pub fn events_header(count: usize) -> String {
    format!("Realtime Events ({count})")
}

pub fn write_status<W: Write>(
    out: &mut W,
    status: ConnectionStatus,
    event_count: usize,
    filter: &ChangeFilter,
) -> io::Result<()> {
    writeln!(out, "{}", status_line(status))?;
    writeln!(out, "Listening for: {filter}")?;
    writeln!(out, "{}", events_header(event_count))
}

pub fn write_event<W: Write>(out: &mut W, event: &CanonicalEvent) -> io::Result<()> {
    writeln!(
        out,
        "[{}] {} {}",
        local_time(event.observed_at()),
        event.kind(),
        event.qualified_table()
    )?;
    if let Some(after) = event.after() {
        writeln!(out, "New Record:")?;
        writeln!(out, "{}", pretty(after))?;
    }
    if let Some(before) = event.before() {
        writeln!(out, "Old Record:")?;
        writeln!(out, "{}", pretty(before))?;
    }
    Ok(())
}

pub fn write_event_list<'a, W, I>(out: &mut W, events: I) -> io::Result<()>
where
    W: Write,
    I: ExactSizeIterator<Item = &'a CanonicalEvent>,
{
    writeln!(out, "{}", events_header(events.len()))?;
    if events.len() == 0 {
        writeln!(out, "No events received yet.")?;
        writeln!(
            out,
            "Type \"start\" and make changes to your database to see real-time events here."
        )?;
        return Ok(());
    }
    for event in events {
        writeln!(out)?;
        write_event(out, event)?;
    }
    Ok(())
}

pub fn write_update<W: Write>(out: &mut W, update: &ControllerUpdate) -> io::Result<()> {
    match update {
        ControllerUpdate::StatusChanged(status) => writeln!(out, "{}", status_line(*status)),
        ControllerUpdate::EventLogged(event) => {
            writeln!(out)?;
            write_event(out, event)
        }
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
