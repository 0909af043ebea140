use thiserror::Error;

/// Connection-fatal conditions. Each is delivered once through
/// `Event::Error` and is followed by `Event::Close` in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("buffer limit exceeded")]
    OutOfMemory,
    #[error("connection reset by peer")]
    PeerReset,
    #[error("retransmission limit reached")]
    RetransmitTimeout,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("peer did not answer arp")]
    ArpTimeout,
    #[error("keepalive probes unanswered")]
    KeepaliveTimeout,
    #[error("network interface is down")]
    NetworkDown,
    #[error("connection table is full")]
    TableFull,
    #[error("port already in use")]
    PortInUse,
    #[error("connection is not writable")]
    NotWritable,
}
