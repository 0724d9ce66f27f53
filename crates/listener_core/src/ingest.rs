use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::domain::{CanonicalEvent, ChangeNotification, EventId};
use tracing::debug;

use crate::event_log::EventLog;

/// Event ids are `<observed micros>-<seq>`; `seq` never repeats within one
/// generator, so ids stay unique even when the clock does not advance.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    next_seq: u64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, observed_at: DateTime<Utc>) -> EventId {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        EventId(format!("{}-{seq}", observed_at.timestamp_micros()))
    }
}

#[derive(Debug, Default)]
pub struct EventIngestor {
    ids: EventIdGenerator,
}

impl EventIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, raw: ChangeNotification) -> CanonicalEvent {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(
        &mut self,
        raw: ChangeNotification,
        observed_at: DateTime<Utc>,
    ) -> CanonicalEvent {
        let id = self.ids.next_id(observed_at);
        CanonicalEvent::new(
            id,
            observed_at,
            raw.event_kind.unwrap_or_default(),
            raw.schema_name.unwrap_or_default(),
            raw.table_name.unwrap_or_default(),
            present_record(raw.before),
            present_record(raw.after),
        )
    }

    /// Normalizes `raw`, puts it at the head of `log`, and hands back a copy
    /// for presentation.
    pub fn ingest(&mut self, raw: ChangeNotification, log: &mut EventLog) -> CanonicalEvent {
        let event = self.normalize(raw);
        debug!(
            event_id = %event.id(),
            kind = event.kind(),
            table = %event.qualified_table(),
            "listener: change ingested"
        );
        log.insert(event.clone());
        event
    }
}

// Inserts arrive with an empty old record; treat that like no record at all.
fn present_record(record: Option<Value>) -> Option<Value> {
    match record {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(other) => Some(other),
    }
}

#[cfg(test)]
#[path = "tests/ingest_tests.rs"]
mod tests;
