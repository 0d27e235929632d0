//! Remote proxies: local handles whose methods run on the other side.

use crate::error::{CallError, WireError};
use crate::peer::{PeerShared, ReplyReceiver};

use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

struct ProxyInner {
    object: String,
    methods: Vec<String>,
    void_methods: HashSet<String>,
    peer: Weak<PeerShared>,
}

/// A proxy for an object published by the remote peer.
///
/// Cloning is cheap; every clone refers to the same proxy, and repeated
/// [`Peer::get`](crate::Peer::get) calls for one name return clones of the
/// same proxy.
#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ProxyInner>,
}

impl RemoteProxy {
    pub(crate) fn new(
        object: String,
        methods: Vec<String>,
        void_methods: Vec<String>,
        peer: Weak<PeerShared>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                object,
                methods,
                void_methods: void_methods.into_iter().collect(),
                peer,
            }),
        }
    }

    /// Public name of the remote object.
    pub fn name(&self) -> &str {
        &self.inner.object
    }

    /// Method names the remote side advertised.
    pub fn methods(&self) -> &[String] {
        &self.inner.methods
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.inner.methods.iter().any(|m| m == method)
    }

    /// Whether calls to `method` are fire-and-forget.
    pub fn is_void(&self, method: &str) -> bool {
        self.inner.void_methods.contains(method)
    }

    /// Whether two handles refer to the same proxy.
    pub fn ptr_eq(&self, other: &RemoteProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invoke `method` on the remote object.
    ///
    /// The `CALL` is issued here, before the returned future is polled: the
    /// call ID is taken and the request passes the send gate immediately, so
    /// IDs and wire order follow invocation order and a void call that is
    /// never awaited is still delivered. The future only waits for the
    /// outcome. Void methods complete with `Value::Null`; other methods wait
    /// for the matching `RETURN`, bounded by the peer's configured call
    /// timeout.
    pub fn call(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, CallError>> + Send + 'static {
        let issued = self.issue(method, args);
        let inner = Arc::clone(&self.inner);
        let method = method.to_string();

        async move {
            let (id, rx, deadline) = match issued {
                Issued::Done(outcome) => return outcome,
                Issued::Awaiting { id, rx, deadline } => (id, rx, deadline),
            };

            let outcome = match deadline {
                Some(after) => match tokio::time::timeout(after, rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        if let Some(peer) = inner.peer.upgrade() {
                            peer.forget_call(id);
                        }
                        debug!(id, object = %inner.object, method = %method, "portal: call timed out");
                        return Err(CallError::Timeout { id, after });
                    }
                },
                None => rx.await,
            };

            outcome.unwrap_or(Err(CallError::Channel(WireError::ChannelClosed)))
        }
    }

    fn issue(&self, method: &str, args: Vec<Value>) -> Issued {
        if !self.has_method(method) {
            return Issued::Done(Err(CallError::UnknownMethod {
                object: self.inner.object.clone(),
                method: method.to_string(),
            }));
        }
        let Some(peer) = self.inner.peer.upgrade() else {
            return Issued::Done(Err(WireError::ChannelClosed.into()));
        };

        let reply = !self.is_void(method);
        match peer.start_call(&self.inner.object, method, args, reply) {
            Ok((id, Some(rx))) => Issued::Awaiting {
                id,
                rx,
                deadline: peer.call_timeout(),
            },
            Ok((_, None)) => Issued::Done(Ok(Value::Null)),
            Err(e) => Issued::Done(Err(e.into())),
        }
    }
}

/// State of a call once its `CALL` has been handed to the send gate.
enum Issued {
    Done(Result<Value, CallError>),
    Awaiting {
        id: u64,
        rx: ReplyReceiver,
        deadline: Option<Duration>,
    },
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("object", &self.inner.object)
            .field("methods", &self.inner.methods)
            .field("void", &self.inner.void_methods)
            .finish()
    }
}
