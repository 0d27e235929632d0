//! Portal: bidirectional object RPC over a duplex message channel.
//!
//! Two [`Peer`]s, one at each end of a channel, expose named objects to each
//! other and call each other's methods through generated proxies.
//!
//! ## Architecture
//!
//! - **Peer**: protocol engine (handshake, send gate, dispatch, correlation)
//! - **LocalRegistry / RemoteRegistry**: exposed objects and resolved proxies
//! - **RemoteProxy**: callable handle for an object on the other side
//! - **WireMessage**: the four `INIT` / `SET` / `CALL` / `RETURN` messages
//! - **Channel**: sink + inbound stream; in-process [`channel::pair`] and
//!   length-framed JSON over TCP in [`tcp`]

pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod peer;
pub mod proxy;
pub mod registry;
pub mod tcp;

pub use channel::{Channel, MessageSink};
pub use config::{load_config, PeerConfig};
pub use error::{CallError, WireError};
pub use message::WireMessage;
pub use peer::Peer;
pub use proxy::RemoteProxy;
pub use registry::{LocalObject, MethodTable, SetOptions};
