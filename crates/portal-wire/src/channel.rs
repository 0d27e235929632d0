//! Channel abstraction: the duplex message pipe a [`Peer`](crate::Peer) sits on.
//!
//! A channel is split into an outbound [`MessageSink`] and an inbound stream
//! of [`WireMessage`]s. The sink must be a non-blocking, order-preserving
//! enqueue; the stream must yield every message from the other side exactly
//! once, in the order it was sent.

use crate::error::WireError;
use crate::message::WireMessage;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Outbound half of a channel.
pub trait MessageSink: Send + Sync + 'static {
    /// Enqueue `msg` for delivery. Must not block.
    fn send(&self, msg: WireMessage) -> Result<(), WireError>;
}

impl MessageSink for mpsc::UnboundedSender<WireMessage> {
    fn send(&self, msg: WireMessage) -> Result<(), WireError> {
        mpsc::UnboundedSender::send(self, msg).map_err(|_| WireError::ChannelClosed)
    }
}

/// One endpoint's view of a duplex channel.
pub struct Channel {
    sink: Arc<dyn MessageSink>,
    inbound: BoxStream<'static, WireMessage>,
}

impl Channel {
    /// Assemble a channel from an outbound sink and an inbound stream.
    pub fn new<S, I>(sink: S, inbound: I) -> Self
    where
        S: MessageSink,
        I: Stream<Item = WireMessage> + Send + 'static,
    {
        Self {
            sink: Arc::new(sink),
            inbound: inbound.boxed(),
        }
    }

    /// Split into the shared sink and the inbound stream.
    pub fn into_parts(self) -> (Arc<dyn MessageSink>, BoxStream<'static, WireMessage>) {
        (self.sink, self.inbound)
    }

    /// Mirror every outbound message into a monitor receiver.
    ///
    /// The returned channel behaves exactly like `self`; each message sent
    /// through it is also cloned into the receiver, in send order.
    pub fn tap(self) -> (Channel, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = TapSink {
            inner: self.sink,
            tap: tx,
        };
        (
            Channel {
                sink: Arc::new(sink),
                inbound: self.inbound,
            },
            rx,
        )
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

struct TapSink {
    inner: Arc<dyn MessageSink>,
    tap: mpsc::UnboundedSender<WireMessage>,
}

impl MessageSink for TapSink {
    fn send(&self, msg: WireMessage) -> Result<(), WireError> {
        // Monitor going away must not affect the real channel.
        let _ = self.tap.send(msg.clone());
        self.inner.send(msg)
    }
}

/// Create an in-process duplex channel. Whatever one end sends, the other
/// end receives.
pub fn pair() -> (Channel, Channel) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        Channel::new(left_tx, UnboundedReceiverStream::new(left_rx)),
        Channel::new(right_tx, UnboundedReceiverStream::new(right_rx)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, right) = pair();
        let (left_sink, _left_in) = left.into_parts();
        let (_right_sink, mut right_in) = right.into_parts();

        left_sink.send(WireMessage::Init { reply: true }).unwrap();
        left_sink.send(WireMessage::Init { reply: false }).unwrap();

        assert_eq!(
            right_in.next().await,
            Some(WireMessage::Init { reply: true })
        );
        assert_eq!(
            right_in.next().await,
            Some(WireMessage::Init { reply: false })
        );
    }

    #[tokio::test]
    async fn test_tap_mirrors_outbound() {
        let (left, right) = pair();
        let (left, mut monitor) = left.tap();
        let (sink, _) = left.into_parts();
        let (_, mut right_in) = right.into_parts();

        sink.send(WireMessage::err(3, "nope")).unwrap();

        assert_eq!(monitor.recv().await, Some(WireMessage::err(3, "nope")));
        assert_eq!(right_in.next().await, Some(WireMessage::err(3, "nope")));
    }

    #[tokio::test]
    async fn test_send_after_other_end_dropped() {
        let (left, right) = pair();
        drop(right);
        let (sink, _) = left.into_parts();
        let err = sink.send(WireMessage::Init { reply: true }).unwrap_err();
        assert!(matches!(err, WireError::ChannelClosed));
    }
}
