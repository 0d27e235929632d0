//! Peer: one endpoint of the portal protocol.
//!
//! A [`Peer`] wraps one [`Channel`]. On construction it announces itself with
//! `INIT{reply: true}` and spawns a receive loop. Until an `INIT` arrives from
//! the other side, every message it originates is held in an outbound queue;
//! the first `INIT` flips the connection to established and flushes the queue
//! in submission order. This makes `set`/`get` safe to call before the other
//! side exists.
//!
//! All mutable state lives in one [`PeerState`] behind a single mutex, held
//! only for the synchronous part of each handler. Sends happen under the lock
//! so queue flushes and new messages cannot interleave out of order.
//!
//! Incoming calls are run by the receive loop itself rather than on spawned
//! tasks: they are started in arrival order and then progress concurrently.

use crate::channel::{Channel, MessageSink};
use crate::config::PeerConfig;
use crate::error::{CallError, WireError};
use crate::message::WireMessage;
use crate::proxy::RemoteProxy;
use crate::registry::{LocalObject, LocalRegistry, Lookup, RemoteRegistry, SetOptions};

use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest call ID before the counter wraps back to 1 (2^53 - 1, the largest
/// integer every JSON consumer represents exactly).
pub const MAX_CALL_ID: u64 = (1 << 53) - 1;

type ReplySender = oneshot::Sender<Result<Value, CallError>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Value, CallError>>;

/// A local method invocation together with sending its `RETURN`.
type Invocation = BoxFuture<'static, ()>;

/// Mutable protocol state of one peer.
#[derive(Default)]
struct PeerState {
    call_counter: u64,
    connection_established: bool,
    outbound_queue: Vec<WireMessage>,
    local: LocalRegistry,
    remote: RemoteRegistry,
    pending_calls: HashMap<u64, ReplySender>,
}

impl PeerState {
    /// Advance the call counter, skipping IDs still awaiting a reply.
    fn next_call_id(&mut self) -> u64 {
        loop {
            self.call_counter = if self.call_counter >= MAX_CALL_ID {
                1
            } else {
                self.call_counter + 1
            };
            if !self.pending_calls.contains_key(&self.call_counter) {
                return self.call_counter;
            }
        }
    }
}

pub(crate) struct PeerShared {
    id: Uuid,
    config: PeerConfig,
    sink: Arc<dyn MessageSink>,
    state: Mutex<PeerState>,
}

impl PeerShared {
    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send straight to the channel, bypassing the queue.
    fn send_now(&self, msg: WireMessage) -> Result<(), WireError> {
        let kind = msg.kind();
        self.sink.send(msg).map_err(|e| {
            warn!(peer = %self.config.node_name, kind, "portal: send failed: {}", e);
            e
        })
    }

    /// The send gate: queue until the handshake completes, then send.
    fn post(&self, state: &mut PeerState, msg: WireMessage) -> Result<(), WireError> {
        if state.connection_established {
            self.send_now(msg)
        } else {
            debug!(peer = %self.config.node_name, kind = msg.kind(), "portal: queued until handshake");
            state.outbound_queue.push(msg);
            Ok(())
        }
    }

    pub(crate) fn call_timeout(&self) -> Option<Duration> {
        self.config.call_timeout()
    }

    /// Allocate an ID and send a `CALL`. For reply-expecting calls the
    /// correlation entry is in place before the message is released.
    pub(crate) fn start_call(
        &self,
        object: &str,
        method: &str,
        args: Vec<Value>,
        reply: bool,
    ) -> Result<(u64, Option<ReplyReceiver>), WireError> {
        let mut state = self.lock();
        let id = state.next_call_id();
        let rx = if reply {
            let (tx, rx) = oneshot::channel();
            state.pending_calls.insert(id, tx);
            Some(rx)
        } else {
            None
        };

        let msg = WireMessage::Call {
            object: object.to_string(),
            method: method.to_string(),
            id,
            args,
            reply,
        };
        if let Err(e) = self.post(&mut state, msg) {
            state.pending_calls.remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Drop the correlation entry for a call that gave up waiting.
    pub(crate) fn forget_call(&self, id: u64) {
        self.lock().pending_calls.remove(&id);
    }

    /// Apply one inbound message. A `CALL` yields the invocation for the
    /// receive loop to drive; everything else is handled in place.
    fn handle_message(self: &Arc<Self>, msg: WireMessage) -> Option<Invocation> {
        debug!(peer = %self.config.node_name, kind = msg.kind(), "portal: received");
        match msg {
            WireMessage::Init { reply } => {
                self.on_init(reply);
                None
            }
            WireMessage::Set {
                object,
                methods,
                void_methods,
            } => {
                self.on_set(object, methods, void_methods);
                None
            }
            WireMessage::Call {
                object,
                method,
                id,
                args,
                reply,
            } => self.on_call(object, method, id, args, reply),
            WireMessage::Return { id, result, error } => {
                self.on_return(id, result, error);
                None
            }
        }
    }

    fn on_init(&self, reply: bool) {
        let mut state = self.lock();
        let first = !state.connection_established;
        state.connection_established = true;

        let queued = std::mem::take(&mut state.outbound_queue);
        let flushed = queued.len();
        for msg in queued {
            let _ = self.send_now(msg);
        }
        if reply {
            let _ = self.send_now(WireMessage::Init { reply: false });
        }

        if first {
            info!(
                peer = %self.config.node_name,
                "portal: handshake complete, flushed {} queued message(s)",
                flushed
            );
        }
    }

    fn on_set(self: &Arc<Self>, object: String, methods: Vec<String>, void_methods: Vec<String>) {
        let proxy = RemoteProxy::new(
            object.clone(),
            methods,
            void_methods,
            Arc::downgrade(self),
        );
        let mut state = self.lock();
        match state.remote.resolve(proxy) {
            Some(waiters) => debug!(
                peer = %self.config.node_name,
                object = %object,
                waiters,
                "portal: remote object published"
            ),
            None => warn!(
                peer = %self.config.node_name,
                object = %object,
                "portal: ignoring re-publication of already resolved object"
            ),
        }
    }

    fn on_call(
        self: &Arc<Self>,
        object: String,
        method: String,
        id: u64,
        args: Vec<Value>,
        reply: bool,
    ) -> Option<Invocation> {
        let Some(entry) = self.lock().local.get(&object) else {
            debug!(
                peer = %self.config.node_name,
                object = %object,
                id,
                "portal: dropping call to unregistered object"
            );
            return None;
        };

        let shared = Arc::clone(self);
        let invocation = async move {
            let outcome = if entry.exposes(&method) {
                entry.object.invoke(&method, args).await
            } else {
                Err(format!("Unknown method: {object}.{method}"))
            };

            let response = match outcome {
                Ok(result) if reply => WireMessage::ok(id, result),
                Ok(_) => return,
                // Failures are reported even for void calls.
                Err(error) => {
                    debug!(
                        peer = %shared.config.node_name,
                        object = %object,
                        method = %method,
                        id,
                        "portal: call failed: {}",
                        error
                    );
                    WireMessage::err(id, error)
                }
            };
            let mut state = shared.lock();
            let _ = shared.post(&mut state, response);
        };
        Some(invocation.boxed())
    }

    fn on_return(&self, id: u64, result: Option<Value>, error: Option<String>) {
        let Some(tx) = self.lock().pending_calls.remove(&id) else {
            debug!(peer = %self.config.node_name, id, "portal: ignoring unknown return id");
            return;
        };
        // An empty error string counts as no error.
        let outcome = match error.filter(|e| !e.is_empty()) {
            Some(error) => Err(CallError::Remote(error)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }

    /// Fail every in-flight call once the inbound side is gone.
    fn on_closed(&self) {
        let pending: Vec<ReplySender> = self
            .lock()
            .pending_calls
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        info!(
            peer = %self.config.node_name,
            "portal: channel closed, failing {} pending call(s)",
            pending.len()
        );
        for tx in pending {
            let _ = tx.send(Err(CallError::Channel(WireError::ChannelClosed)));
        }
    }
}

/// One endpoint of the protocol. Cheap to clone.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
}

impl Peer {
    /// Attach a peer with default configuration.
    ///
    /// Must be called inside a tokio runtime; the receive loop is spawned.
    pub fn new(channel: Channel) -> Self {
        Self::with_config(channel, PeerConfig::default())
    }

    /// Attach a peer to `channel`, send the initiating `INIT` and start the
    /// receive loop.
    pub fn with_config(channel: Channel, config: PeerConfig) -> Self {
        let (sink, inbound) = channel.into_parts();
        let shared = Arc::new(PeerShared {
            id: Uuid::new_v4(),
            config,
            sink,
            state: Mutex::new(PeerState::default()),
        });
        debug!(peer = %shared.config.node_name, id = %shared.id, "portal: attaching");

        let _ = shared.send_now(WireMessage::Init { reply: true });
        tokio::spawn(receive_loop(Arc::clone(&shared), inbound));

        Self { shared }
    }

    /// Unique ID of this peer instance (log correlation only).
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    /// Whether an `INIT` has been received from the other side.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connection_established
    }

    /// Number of reply-expecting calls still awaiting a `RETURN`.
    pub fn pending_call_count(&self) -> usize {
        self.shared.lock().pending_calls.len()
    }

    /// Number of objects this peer exposes.
    pub fn local_count(&self) -> usize {
        self.shared.lock().local.len()
    }

    /// Number of remote objects resolved to proxies.
    pub fn remote_count(&self) -> usize {
        self.shared.lock().remote.resolved_count()
    }

    /// Expose `object` under `name` and publish its method inventory.
    ///
    /// Re-registering a name replaces the dispatch target for future calls.
    pub fn set(
        &self,
        name: &str,
        object: Arc<dyn LocalObject>,
        options: SetOptions,
    ) -> Result<(), WireError> {
        let mut state = self.shared.lock();
        let (methods, void_methods) = state.local.insert(name, object, &options);
        debug!(
            peer = %self.shared.config.node_name,
            object = name,
            methods = methods.len(),
            "portal: exposing object"
        );
        let msg = WireMessage::Set {
            object: name.to_string(),
            methods,
            void_methods,
        };
        self.shared.post(&mut state, msg)
    }

    /// The proxy for `name`, waiting until the other side publishes it.
    ///
    /// Every concurrent caller waiting on the same name is completed.
    pub async fn get(&self, name: &str) -> Result<RemoteProxy, WireError> {
        let lookup = self.shared.lock().remote.lookup_or_wait(name);
        match lookup {
            Lookup::Ready(proxy) => Ok(proxy),
            Lookup::Waiting(rx) => rx.await.map_err(|_| WireError::ChannelClosed),
        }
    }

    /// The proxy for `name` if it has already been published.
    pub fn try_get(&self, name: &str) -> Option<RemoteProxy> {
        self.shared.lock().remote.resolved(name)
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.shared.id)
            .field("node_name", &self.shared.config.node_name)
            .finish_non_exhaustive()
    }
}

/// Reads inbound messages and drives local method invocations.
///
/// Invocations run concurrently on this task, and `FuturesUnordered` polls
/// newly pushed futures in push order, so every method starts in the order its
/// `CALL` arrived.
async fn receive_loop(shared: Arc<PeerShared>, mut inbound: BoxStream<'static, WireMessage>) {
    let mut running: FuturesUnordered<Invocation> = FuturesUnordered::new();
    loop {
        tokio::select! {
            msg = inbound.next() => match msg {
                Some(msg) => {
                    if let Some(invocation) = shared.handle_message(msg) {
                        running.push(invocation);
                    }
                }
                None => break,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
        }
    }
    shared.on_closed();

    // Calls already started still get to send their RETURN.
    while running.next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::pair;
    use crate::registry::MethodTable;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn next(rx: &mut mpsc::UnboundedReceiver<WireMessage>) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for wire message")
            .expect("tap closed")
    }

    fn echo() -> Arc<dyn LocalObject> {
        Arc::new(
            MethodTable::new()
                .method("bar", |args| async move { Ok(json!({ "echo": args })) })
                .method("fail", |_| async { Err("it broke".to_string()) }),
        )
    }

    #[test]
    fn test_call_counter_wraps_to_one() {
        let mut state = PeerState {
            call_counter: MAX_CALL_ID - 1,
            ..Default::default()
        };
        assert_eq!(state.next_call_id(), MAX_CALL_ID);
        assert_eq!(state.next_call_id(), 1);
        assert_eq!(state.next_call_id(), 2);
    }

    #[test]
    fn test_call_counter_skips_outstanding_ids() {
        let (tx, _rx) = oneshot::channel();
        let mut state = PeerState {
            call_counter: MAX_CALL_ID,
            ..Default::default()
        };
        state.pending_calls.insert(1, tx);
        assert_eq!(state.next_call_id(), 2);
    }

    #[tokio::test]
    async fn test_init_sent_on_construction() {
        let (left, _right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn test_messages_queued_until_init() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        peer.set("foo", echo(), SetOptions::default()).unwrap();

        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });
        // Nothing else leaves before the other side says hello.
        tokio::task::yield_now().await;
        assert!(wire.try_recv().is_err());

        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: true }).unwrap();

        assert_eq!(
            next(&mut wire).await,
            WireMessage::Set {
                object: "foo".to_string(),
                methods: vec!["bar".to_string(), "fail".to_string()],
                void_methods: vec![],
            }
        );
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: false });
        assert!(peer.is_connected());
    }

    #[tokio::test]
    async fn test_init_without_reply_is_not_acknowledged() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });

        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();

        // Sequence a probe behind the INITs to know they were handled.
        peer.set("probe", echo(), SetOptions::default()).unwrap();
        assert!(matches!(next(&mut wire).await, WireMessage::Set { .. }));
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_object_dropped_silently() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let _peer = Peer::new(left);
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });

        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink
            .send(WireMessage::Call {
                object: "ghost".to_string(),
                method: "boo".to_string(),
                id: 1,
                args: vec![],
                reply: true,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_method_reported_as_error() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        peer.set("foo", echo(), SetOptions::default()).unwrap();
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });

        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        assert!(matches!(next(&mut wire).await, WireMessage::Set { .. }));

        right_sink
            .send(WireMessage::Call {
                object: "foo".to_string(),
                method: "nope".to_string(),
                id: 5,
                args: vec![],
                reply: false,
            })
            .unwrap();
        assert_eq!(
            next(&mut wire).await,
            WireMessage::err(5, "Unknown method: foo.nope")
        );
    }

    #[tokio::test]
    async fn test_void_call_failure_still_returns_error() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        peer.set("foo", echo(), SetOptions::void(["fail"])).unwrap();
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });

        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        assert_eq!(
            next(&mut wire).await,
            WireMessage::Set {
                object: "foo".to_string(),
                methods: vec!["bar".to_string(), "fail".to_string()],
                void_methods: vec!["fail".to_string()],
            }
        );

        right_sink
            .send(WireMessage::Call {
                object: "foo".to_string(),
                method: "fail".to_string(),
                id: 9,
                args: vec![],
                reply: false,
            })
            .unwrap();
        assert_eq!(next(&mut wire).await, WireMessage::err(9, "it broke"));
    }

    #[tokio::test]
    async fn test_stale_return_ignored() {
        let (left, right) = pair();
        let peer = Peer::new(left);
        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink.send(WireMessage::ok(42, json!(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(peer.pending_call_count(), 0);
        assert!(peer.is_connected());
    }

    #[tokio::test]
    async fn test_channel_close_fails_pending_calls() {
        let (left, right) = pair();
        let peer = Peer::new(left);
        let (right_sink, right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink
            .send(WireMessage::Set {
                object: "foo".to_string(),
                methods: vec!["bar".to_string()],
                void_methods: vec![],
            })
            .unwrap();

        let foo = peer.get("foo").await.unwrap();
        let call = tokio::spawn(foo.call("bar", vec![]));
        assert_eq!(peer.pending_call_count(), 1);

        drop(right_sink);
        drop(right_in);
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Channel(WireError::ChannelClosed)));
        assert_eq!(peer.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_error_resolves_with_result() {
        let (left, right) = pair();
        let peer = Peer::new(left);
        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink
            .send(WireMessage::Set {
                object: "foo".to_string(),
                methods: vec!["bar".to_string()],
                void_methods: vec![],
            })
            .unwrap();

        let foo = peer.get("foo").await.unwrap();
        let call = foo.call("bar", vec![]);
        right_sink
            .send(WireMessage::Return {
                id: 1,
                result: Some(json!(7)),
                error: Some(String::new()),
            })
            .unwrap();
        assert_eq!(call.await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_call_issued_before_first_poll() {
        let (left, right) = pair();
        let (left, mut wire) = left.tap();
        let peer = Peer::new(left);
        assert_eq!(next(&mut wire).await, WireMessage::Init { reply: true });
        let (right_sink, _right_in) = right.into_parts();
        right_sink.send(WireMessage::Init { reply: false }).unwrap();
        right_sink
            .send(WireMessage::Set {
                object: "foo".to_string(),
                methods: vec!["bar".to_string(), "ping".to_string()],
                void_methods: vec!["ping".to_string()],
            })
            .unwrap();
        let foo = peer.get("foo").await.unwrap();

        // Neither future is ever polled.
        drop(foo.call("ping", vec![json!(1)]));
        let pending = foo.call("bar", vec![]);

        assert_eq!(
            next(&mut wire).await,
            WireMessage::Call {
                object: "foo".to_string(),
                method: "ping".to_string(),
                id: 1,
                args: vec![json!(1)],
                reply: false,
            }
        );
        assert!(matches!(
            next(&mut wire).await,
            WireMessage::Call { id: 2, reply: true, .. }
        ));
        assert_eq!(peer.pending_call_count(), 1);
        drop(pending);
    }
}
