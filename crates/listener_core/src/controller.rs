//! Connection controller: owns the one subscription slot, the connection
//! status, and the event log.

use crossbeam_channel::{unbounded, Receiver, Sender};
use shared::domain::{
    CanonicalEvent, ChangeFilter, ConnectionStatus, SubscriptionId, TransportStatus,
};
use tracing::{debug, info, warn};

use crate::{
    event_log::EventLog,
    ingest::EventIngestor,
    transport::{ChangeSink, ChangeTransport, InboundMessage, TransportMessage},
};

/// Observable effect of applying one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    StatusChanged(ConnectionStatus),
    EventLogged(CanonicalEvent),
}

struct ActiveSubscription<H> {
    id: SubscriptionId,
    handle: H,
}

/// Drives `Disconnected -> Connecting -> Connected` for a single
/// subscription at a time.
///
/// The handle slot is the only record of whether a subscription is live:
/// `start` with an occupied slot does nothing, and messages tagged with any
/// other subscription id are dropped. Dropping the controller releases the
/// slot.
pub struct ConnectionController<T: ChangeTransport> {
    transport: T,
    filter: ChangeFilter,
    status: ConnectionStatus,
    active: Option<ActiveSubscription<T::Handle>>,
    ingestor: EventIngestor,
    log: EventLog,
    inbox_tx: Sender<TransportMessage>,
    inbox_rx: Receiver<TransportMessage>,
}

impl<T: ChangeTransport> ConnectionController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_filter(transport, ChangeFilter::all())
    }

    pub fn with_filter(transport: T, filter: ChangeFilter) -> Self {
        Self::with_log(transport, filter, EventLog::new())
    }

    pub fn with_log(transport: T, filter: ChangeFilter, log: EventLog) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            transport,
            filter,
            status: ConnectionStatus::Disconnected,
            active: None,
            ingestor: EventIngestor::new(),
            log,
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn start(&mut self) {
        if let Some(active) = &self.active {
            debug!(
                subscription = %active.id,
                status = %self.status,
                "listener: start ignored, subscription already active"
            );
            return;
        }

        let id = SubscriptionId::new();
        info!(subscription = %id, filter = %self.filter, "listener: subscribe requested");
        let sink = ChangeSink::new(id, self.inbox_tx.clone());

        // Status only moves once the handle is in the slot, so a failing or
        // panicking transport can never leave us parked in Connecting.
        match self.transport.subscribe_to_changes(&self.filter, sink) {
            Ok(handle) => {
                self.active = Some(ActiveSubscription { id, handle });
                self.status = ConnectionStatus::Connecting;
            }
            Err(err) => {
                warn!(subscription = %id, error = %err, "listener: subscribe failed");
                self.status = ConnectionStatus::Disconnected;
            }
        }
    }

    pub fn stop(&mut self) {
        if self.release() {
            info!("listener: subscription stopped");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    /// Empties the event log. The subscription, if any, keeps running.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Releases any live subscription. Also run on drop.
    pub fn teardown(&mut self) {
        if self.release() {
            info!("listener: subscription released on teardown");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn handle_message(&mut self, message: TransportMessage) -> Option<ControllerUpdate> {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.id == message.subscription);
        if !is_current {
            debug!(
                subscription = %message.subscription,
                "listener: dropping message for inactive subscription"
            );
            return None;
        }

        match message.kind {
            InboundMessage::NotificationReceived(raw) => Some(ControllerUpdate::EventLogged(
                self.ingestor.ingest(raw, &mut self.log),
            )),
            InboundMessage::StatusChanged(status) => self.apply_transport_status(status),
        }
    }

    /// Applies every queued message, in arrival order.
    pub fn drain(&mut self) -> Vec<ControllerUpdate> {
        let mut updates = Vec::new();
        while let Ok(message) = self.inbox_rx.try_recv() {
            if let Some(update) = self.handle_message(message) {
                updates.push(update);
            }
        }
        updates
    }

    /// Receiving end of the transport callbacks, for hosts that block on it.
    pub fn inbox(&self) -> Receiver<TransportMessage> {
        self.inbox_rx.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn events(&self) -> impl ExactSizeIterator<Item = &CanonicalEvent> + '_ {
        self.log.iter()
    }

    pub fn event_count(&self) -> usize {
        self.log.len()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn apply_transport_status(&mut self, status: TransportStatus) -> Option<ControllerUpdate> {
        match status {
            TransportStatus::Subscribed => {
                if self.status != ConnectionStatus::Connecting {
                    return None;
                }
                self.status = ConnectionStatus::Connected;
                info!(subscription = ?self.subscription_id(), "listener: subscribed");
                Some(ControllerUpdate::StatusChanged(self.status))
            }
            TransportStatus::ChannelError | TransportStatus::Closed => {
                warn!(
                    subscription = ?self.subscription_id(),
                    %status,
                    "listener: channel lost, subscription released"
                );
                self.release();
                self.status = ConnectionStatus::Disconnected;
                Some(ControllerUpdate::StatusChanged(self.status))
            }
            TransportStatus::TimedOut => {
                debug!(%status, "listener: transport status has no transition");
                None
            }
        }
    }

    fn release(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                debug!(subscription = %active.id, "listener: unsubscribing");
                self.transport.unsubscribe(active.handle);
                true
            }
            None => false,
        }
    }
}

impl<T: ChangeTransport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
