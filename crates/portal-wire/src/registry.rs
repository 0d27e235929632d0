//! Object registries: what this peer exposes, and what the other side has
//! published to it.
//!
//! [`LocalRegistry`] maps public names to locally exposed objects together
//! with the method inventory that was advertised for them. [`RemoteRegistry`]
//! maps public names to either a resolved [`RemoteProxy`] or the list of
//! callers still waiting for that name to be published.

use crate::proxy::RemoteProxy;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// An object that can be exposed to the other side of a channel.
///
/// `methods` is the capability descriptor published in the `SET` message;
/// only names it returns are callable remotely.
#[async_trait]
pub trait LocalObject: Send + Sync + 'static {
    /// Names of the callable methods, in publication order.
    fn methods(&self) -> Vec<String>;

    /// Invoke `method` with positional `args`. A failure's text is what the
    /// remote caller sees.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, String>;
}

type Method = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// A [`LocalObject`] assembled from async closures.
///
/// ```ignore
/// let calc = MethodTable::new()
///     .method("add", |args| async move {
///         let a = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
///         let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(serde_json::json!(a + b))
///     });
/// peer.set("calc", Arc::new(calc), SetOptions::default())?;
/// ```
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: Vec<(String, Method)>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let name = name.into();
        let method: Method = Arc::new(move |args| f(args).boxed());
        if let Some(slot) = self.methods.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = method;
        } else {
            self.methods.push((name, method));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.methods.iter().map(|(n, _)| n))
            .finish()
    }
}

#[async_trait]
impl LocalObject for MethodTable {
    fn methods(&self) -> Vec<String> {
        self.methods.iter().map(|(n, _)| n.clone()).collect()
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, String> {
        let f = self
            .methods
            .iter()
            .find(|(n, _)| n == method)
            .map(|(_, f)| Arc::clone(f))
            .ok_or_else(|| format!("{method} is not a function"))?;
        f(args).await
    }
}

/// Options for [`Peer::set`](crate::Peer::set).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Methods whose callers neither request nor wait for a result.
    pub void: Vec<String>,
}

impl SetOptions {
    /// Mark the given methods as fire-and-forget.
    pub fn void<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            void: methods.into_iter().map(Into::into).collect(),
        }
    }
}

/// A registered local object and the inventory advertised for it.
#[derive(Clone)]
pub(crate) struct LocalEntry {
    pub object: Arc<dyn LocalObject>,
    pub methods: Vec<String>,
}

impl LocalEntry {
    pub fn exposes(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Objects this peer exposes, by public name.
#[derive(Default)]
pub(crate) struct LocalRegistry {
    objects: HashMap<String, LocalEntry>,
}

impl LocalRegistry {
    /// Register (or replace) `object` under `name`. Returns the method
    /// inventory and the void subset to publish.
    pub fn insert(
        &mut self,
        name: &str,
        object: Arc<dyn LocalObject>,
        options: &SetOptions,
    ) -> (Vec<String>, Vec<String>) {
        let mut methods: Vec<String> = Vec::new();
        for m in object.methods() {
            if !methods.contains(&m) {
                methods.push(m);
            }
        }
        let mut void_methods: Vec<String> = Vec::new();
        for m in &options.void {
            if methods.contains(m) && !void_methods.contains(m) {
                void_methods.push(m.clone());
            }
        }
        self.objects.insert(
            name.to_string(),
            LocalEntry {
                object,
                methods: methods.clone(),
            },
        );
        (methods, void_methods)
    }

    pub fn get(&self, name: &str) -> Option<LocalEntry> {
        self.objects.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

enum RemoteSlot {
    Pending(Vec<oneshot::Sender<RemoteProxy>>),
    Resolved(RemoteProxy),
}

/// Outcome of looking up a remote name.
pub(crate) enum Lookup {
    Ready(RemoteProxy),
    Waiting(oneshot::Receiver<RemoteProxy>),
}

/// Objects the other side has published, by public name.
#[derive(Default)]
pub(crate) struct RemoteRegistry {
    slots: HashMap<String, RemoteSlot>,
}

impl RemoteRegistry {
    /// The resolved proxy for `name`, if any.
    pub fn resolved(&self, name: &str) -> Option<RemoteProxy> {
        match self.slots.get(name) {
            Some(RemoteSlot::Resolved(proxy)) => Some(proxy.clone()),
            _ => None,
        }
    }

    /// Return the proxy for `name`, or enqueue a waiter for it.
    pub fn lookup_or_wait(&mut self, name: &str) -> Lookup {
        let slot = self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| RemoteSlot::Pending(Vec::new()));
        match slot {
            RemoteSlot::Resolved(proxy) => Lookup::Ready(proxy.clone()),
            RemoteSlot::Pending(waiters) => {
                waiters.retain(|w| !w.is_closed());
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Lookup::Waiting(rx)
            }
        }
    }

    /// Store `proxy` and complete every waiter, oldest first.
    ///
    /// Returns `None` if the name was already resolved (the existing proxy
    /// is kept), otherwise the number of waiters completed.
    pub fn resolve(&mut self, proxy: RemoteProxy) -> Option<usize> {
        let name = proxy.name().to_string();
        let previous = self
            .slots
            .insert(name.clone(), RemoteSlot::Resolved(proxy.clone()));
        match previous {
            Some(RemoteSlot::Resolved(existing)) => {
                self.slots.insert(name, RemoteSlot::Resolved(existing));
                None
            }
            Some(RemoteSlot::Pending(waiters)) => {
                let count = waiters.len();
                for waiter in waiters {
                    let _ = waiter.send(proxy.clone());
                }
                Some(count)
            }
            None => Some(0),
        }
    }

    pub fn resolved_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, RemoteSlot::Resolved(_)))
            .count()
    }
}
