use std::{ops::ControlFlow, time::Duration};

use futures::{SinkExt, StreamExt};
use listener_core::transport::ChangeSink;
use shared::{
    domain::TransportStatus,
    protocol::{ChannelFrame, PhoenixFrame},
};
use tokio::{
    sync::oneshot,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub(crate) const JOIN_REF: &str = "1";

struct RefCounter(u64);

impl RefCounter {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

/// Socket lifecycle for one channel subscription: connect, join, pump
/// frames into the sink, leave on request.
pub(crate) struct ChannelSession {
    endpoint: Url,
    topic: String,
    join: PhoenixFrame,
    heartbeat_interval: Duration,
    sink: ChangeSink,
}

impl ChannelSession {
    pub(crate) fn new(
        endpoint: Url,
        topic: String,
        join: PhoenixFrame,
        heartbeat_interval: Duration,
        sink: ChangeSink,
    ) -> Self {
        Self {
            endpoint,
            topic,
            join,
            heartbeat_interval,
            sink,
        }
    }

    pub(crate) async fn run(self, mut close_rx: oneshot::Receiver<()>) {
        let subscription = self.sink.subscription_id();
        let connected = tokio::select! {
            _ = &mut close_rx => {
                debug!(%subscription, "realtime: released before socket opened");
                return;
            }
            result = connect_async(self.endpoint.as_str()) => result,
        };
        let ws_stream = match connected {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(%subscription, error = %err, "realtime: failed to connect websocket");
                self.sink.status(TransportStatus::ChannelError);
                return;
            }
        };
        let (mut writer, mut reader) = ws_stream.split();
        let mut refs = RefCounter(1);

        if let Err(err) = send_frame(&mut writer, &self.join).await {
            warn!(%subscription, error = %err, "realtime: failed to send join");
            self.sink.status(TransportStatus::ChannelError);
            return;
        }
        debug!(%subscription, topic = %self.topic, "realtime: join sent");

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut joined = false;

        loop {
            tokio::select! {
                _ = &mut close_rx => {
                    let leave = PhoenixFrame::leave(&self.topic, &refs.next());
                    if let Err(err) = send_frame(&mut writer, &leave).await {
                        debug!(%subscription, error = %err, "realtime: leave not delivered");
                    }
                    let _ = writer.close().await;
                    info!(%subscription, "realtime: channel left");
                    return;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = send_frame(&mut writer, &PhoenixFrame::heartbeat(&refs.next())).await {
                        warn!(%subscription, error = %err, "realtime: heartbeat failed");
                        self.sink.status(TransportStatus::ChannelError);
                        return;
                    }
                }
                incoming = reader.next() => {
                    let flow = match incoming {
                        Some(Ok(Message::Text(text))) => self.on_text(&text, &mut joined),
                        Some(Ok(Message::Close(_))) | None => {
                            info!(%subscription, "realtime: socket closed by server");
                            self.sink.status(TransportStatus::Closed);
                            ControlFlow::Break(())
                        }
                        Some(Ok(_)) => ControlFlow::Continue(()),
                        Some(Err(err)) => {
                            warn!(%subscription, error = %err, "realtime: websocket receive failed");
                            self.sink.status(TransportStatus::ChannelError);
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        let _ = writer.close().await;
                        return;
                    }
                }
            }
        }
    }

    fn on_text(&self, text: &str, joined: &mut bool) -> ControlFlow<()> {
        let frame = match PhoenixFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "realtime: ignoring undecodable frame");
                return ControlFlow::Continue(());
            }
        };
        if frame.topic != self.topic {
            debug!(topic = %frame.topic, event = %frame.event, "realtime: frame for other topic");
            return ControlFlow::Continue(());
        }

        let delivered = match frame.classify() {
            ChannelFrame::Reply { msg_ref, status } if !*joined && msg_ref.as_deref() == Some(JOIN_REF) => {
                if status == "ok" {
                    *joined = true;
                    info!(topic = %self.topic, "realtime: channel joined");
                    self.sink.status(TransportStatus::Subscribed)
                } else {
                    warn!(topic = %self.topic, %status, "realtime: join rejected");
                    self.sink.status(TransportStatus::ChannelError);
                    return ControlFlow::Break(());
                }
            }
            ChannelFrame::Reply { msg_ref, status } => {
                debug!(?msg_ref, %status, "realtime: reply");
                true
            }
            ChannelFrame::Change(change) => self.sink.notify(change),
            ChannelFrame::Error => {
                warn!(topic = %self.topic, "realtime: channel error");
                self.sink.status(TransportStatus::ChannelError);
                return ControlFlow::Break(());
            }
            ChannelFrame::Close => {
                info!(topic = %self.topic, "realtime: channel closed");
                self.sink.status(TransportStatus::Closed);
                return ControlFlow::Break(());
            }
            ChannelFrame::System { status, message } => {
                if status.as_deref() == Some("error") {
                    warn!(topic = %self.topic, ?message, "realtime: system error");
                    self.sink.status(TransportStatus::ChannelError);
                    return ControlFlow::Break(());
                }
                debug!(?status, ?message, "realtime: system message");
                true
            }
            ChannelFrame::Other(event) => {
                debug!(%event, "realtime: unhandled event");
                true
            }
        };

        if delivered {
            ControlFlow::Continue(())
        } else {
            debug!(topic = %self.topic, "realtime: listener gone, closing channel");
            ControlFlow::Break(())
        }
    }
}

async fn send_frame<S>(writer: &mut S, frame: &PhoenixFrame) -> anyhow::Result<()>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    writer.send(Message::Text(frame.encode()?)).await?;
    Ok(())
}
