//! Peer-transport seam — the asynchronous messaging substrate.
//!
//! Intentionally minimal. The transport moves opaque text between
//! identities and reports reachability; everything above it (correlation,
//! dispatch, retries) is a session concern. Implementations deliver inbound
//! messages by invoking the registered handler on whatever thread they own.

use std::collections::HashSet;
use std::sync::Arc;

/// One logged-in connection to the peer network for a single identity.
pub trait PeerTransport: Send + Sync {
    /// Open the connection and log in with the credentials this transport
    /// was created with. Safe to retry after a failure.
    fn connect(&self) -> bool;

    /// Close the connection. It can be re-opened with [`connect`](Self::connect).
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// The roster: identities currently reachable and authorized for this
    /// connection. Sending to anyone outside this set will be refused.
    fn visible_peers(&self) -> HashSet<String>;

    /// Hand a payload to the network. Returns false when the destination is
    /// unreachable or the transport declines the send.
    fn send(&self, destination: &str, payload: &str) -> bool;

    /// Register the handler invoked for every inbound message. Called by the
    /// session before connecting.
    fn set_inbound(&self, handler: Arc<dyn InboundHandler>);
}

/// Callback target for inbound messages, invoked on arbitrary
/// transport-owned threads.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, from: &str, payload: &str);
}

/// Builds one transport per identity. Injected into the connection registry
/// so the concrete substrate stays out of this crate.
pub trait TransportFactory: Send + Sync {
    fn open(&self, identity: &str, secret: &str) -> Arc<dyn PeerTransport>;
}
