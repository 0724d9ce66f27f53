//! Subscription lifecycle and bounded event log for a change-stream listener.

pub mod controller;
pub mod event_log;
pub mod ingest;
pub mod transport;

pub use controller::{ConnectionController, ControllerUpdate};
pub use event_log::{EventLog, EVENT_LOG_CAPACITY};
pub use ingest::{EventIdGenerator, EventIngestor};
pub use transport::{ChangeSink, ChangeTransport, InboundMessage, TransportMessage};
