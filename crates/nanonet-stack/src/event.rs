use crate::conn::Connection;
use crate::error::Error;

/// Connection lifecycle notifications, delivered in order at the end of
/// each `Manager::poll` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The connection object exists; buffers may be configured.
    Open,
    /// A listener produced this connection for a remote peer.
    Accept,
    /// The TCP handshake completed (client side) or the UDP path is ready.
    Connect,
    /// `n` new bytes were appended to the receive buffer.
    Read(usize),
    /// `n` bytes were acknowledged and dropped from the send buffer.
    Write(usize),
    /// Fatal condition; `Close` follows within the same tick.
    Error(Error),
    /// Last event a connection ever sees.
    Close,
}

/// Per-connection callback. Handlers run with full mutable access to their
/// connection but never to the manager; queueing data and requesting close
/// are the only side effects, and both take effect in the current tick.
pub type EventHandler = Box<dyn FnMut(&mut Connection, &Event)>;
