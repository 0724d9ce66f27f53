//! Seam between the controller and whatever actually holds the socket.

use crossbeam_channel::Sender;
use shared::domain::{ChangeFilter, ChangeNotification, SubscriptionId, TransportStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    NotificationReceived(ChangeNotification),
    StatusChanged(TransportStatus),
}

/// An inbound message tagged with the subscription that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub subscription: SubscriptionId,
    pub kind: InboundMessage,
}

/// Callback pair handed to the transport on subscribe.
///
/// Both callbacks only enqueue; the controller applies them later on its own
/// thread. They return `false` once the controller is gone so the transport
/// can wind down.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    subscription: SubscriptionId,
    tx: Sender<TransportMessage>,
}

impl ChangeSink {
    pub fn new(subscription: SubscriptionId, tx: Sender<TransportMessage>) -> Self {
        Self { subscription, tx }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn notify(&self, raw: ChangeNotification) -> bool {
        self.send(InboundMessage::NotificationReceived(raw))
    }

    pub fn status(&self, status: TransportStatus) -> bool {
        self.send(InboundMessage::StatusChanged(status))
    }

    fn send(&self, kind: InboundMessage) -> bool {
        self.tx
            .send(TransportMessage {
                subscription: self.subscription,
                kind,
            })
            .is_ok()
    }
}

pub trait ChangeTransport {
    /// Live registration; releasing it is the only way to free transport
    /// resources.
    type Handle;

    /// Must return promptly. Connection progress is reported through `sink`.
    fn subscribe_to_changes(
        &self,
        filter: &ChangeFilter,
        sink: ChangeSink,
    ) -> anyhow::Result<Self::Handle>;

    fn unsubscribe(&self, handle: Self::Handle);
}
