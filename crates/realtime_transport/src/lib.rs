//! Websocket `ChangeTransport` for Realtime (Phoenix channel) endpoints.

use std::time::Duration;

use listener_core::transport::{ChangeSink, ChangeTransport};
use shared::{
    domain::{ChangeFilter, SubscriptionId},
    error::ProtocolError,
    protocol::{channel_topic, PhoenixFrame},
};
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};
use tracing::{debug, info};
use url::Url;

mod endpoint;
mod session;

pub use endpoint::realtime_endpoint;

pub const DEFAULT_CHANNEL: &str = "postgres_changes";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid realtime url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("realtime url must use http, https, ws or wss (got {0})")]
    UnsupportedScheme(String),
    #[error("no tokio runtime available to drive the realtime socket")]
    NoRuntime,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub url: String,
    pub api_key: String,
    pub channel: String,
    pub heartbeat_interval: Duration,
}

impl RealtimeSettings {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            channel: DEFAULT_CHANNEL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

pub struct RealtimeTransport {
    settings: RealtimeSettings,
    runtime: Handle,
}

impl RealtimeTransport {
    pub fn new(settings: RealtimeSettings, runtime: Handle) -> Self {
        Self { settings, runtime }
    }

    /// Binds to the runtime the caller is running inside.
    pub fn from_current(settings: RealtimeSettings) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::new(settings, runtime))
    }

    pub fn settings(&self) -> &RealtimeSettings {
        &self.settings
    }

    pub fn endpoint(&self) -> Result<Url, TransportError> {
        realtime_endpoint(&self.settings.url, &self.settings.api_key)
    }
}

/// One joined channel. Dropping it also closes the socket, but the controller
/// always releases it through `unsubscribe`.
#[derive(Debug)]
pub struct RealtimeSubscription {
    id: SubscriptionId,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RealtimeSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl ChangeTransport for RealtimeTransport {
    type Handle = RealtimeSubscription;

    fn subscribe_to_changes(
        &self,
        filter: &ChangeFilter,
        sink: ChangeSink,
    ) -> anyhow::Result<RealtimeSubscription> {
        let endpoint = self.endpoint()?;
        let topic = channel_topic(&self.settings.channel);
        let join = PhoenixFrame::join(
            &topic,
            filter,
            Some(&self.settings.api_key),
            session::JOIN_REF,
        )?;

        let id = sink.subscription_id();
        let (close_tx, close_rx) = oneshot::channel();
        let session = session::ChannelSession::new(
            endpoint,
            topic,
            join,
            self.settings.heartbeat_interval,
            sink,
        );
        info!(subscription = %id, channel = %self.settings.channel, "realtime: opening channel");
        let task = self.runtime.spawn(session.run(close_rx));

        Ok(RealtimeSubscription {
            id,
            close_tx: Some(close_tx),
            task,
        })
    }

    fn unsubscribe(&self, mut handle: RealtimeSubscription) {
        let signalled = handle
            .close_tx
            .take()
            .is_some_and(|close_tx| close_tx.send(()).is_ok());
        if signalled {
            debug!(subscription = %handle.id, "realtime: leave requested");
        } else {
            debug!(subscription = %handle.id, "realtime: channel task already finished");
            handle.task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
