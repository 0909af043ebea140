use crate::buffer::IoBuf;
use crate::error::Error;
use crate::event::EventHandler;
use crate::tcp::TcpSocket;
use core::net::SocketAddrV4;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

/// Stable connection handle. Ids are never reused within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Udp,
}

pub(crate) enum Transport {
    Listener(Proto),
    Tcp(TcpSocket),
    /// Datagrams queued by `send`, one wire datagram each.
    Udp { tx: VecDeque<Vec<u8>> },
}

impl Transport {
    pub(crate) fn proto(&self) -> Proto {
        match self {
            Transport::Listener(p) => *p,
            Transport::Tcp(_) => Proto::Tcp,
            Transport::Udp { .. } => Proto::Udp,
        }
    }
}

/// One connection (or listener). Handlers receive `&mut Connection` and may
/// queue data, consume received bytes and request close; everything else
/// goes through the manager.
pub struct Connection {
    pub(crate) id: ConnId,
    pub(crate) local: SocketAddrV4,
    pub(crate) peer: SocketAddrV4,
    pub(crate) transport: Transport,
    pub(crate) recv: IoBuf,
    pub(crate) send: IoBuf,
    pub(crate) handler: Option<EventHandler>,
    /// Accepted connections borrow their listener's handler.
    pub(crate) handler_owner: Option<ConnId>,
    pub(crate) is_client: bool,
    pub(crate) is_accepted: bool,
    pub(crate) close_requested: bool,
    pub(crate) fin_sent: bool,
    pub(crate) is_closing: bool,
    /// Free slot for embedder state, carried across events.
    pub user_data: Option<Box<dyn Any>>,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.peer
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.transport, Transport::Listener(_))
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    pub fn is_accepted(&self) -> bool {
        self.is_accepted
    }

    pub fn proto(&self) -> Proto {
        self.transport.proto()
    }

    /// Bytes received and not yet consumed.
    pub fn recv_data(&self) -> &[u8] {
        self.recv.as_slice()
    }

    /// Drop `n` bytes from the front of the receive buffer.
    pub fn consume_recv(&mut self, n: usize) -> usize {
        self.recv.consume(n)
    }

    /// Bytes queued and not yet handed to the transport.
    pub fn send_queued(&self) -> usize {
        self.send.len()
    }

    /// Queue data for transmission. For TCP this is a byte stream; for UDP
    /// each call becomes exactly one datagram.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.close_requested || self.is_closing {
            return Err(Error::NotWritable);
        }
        match &mut self.transport {
            Transport::Listener(_) => Err(Error::NotWritable),
            Transport::Tcp(_) => self.send.append(data),
            Transport::Udp { tx } => {
                if data.len() > self.send.remaining() {
                    return Err(Error::OutOfMemory);
                }
                // the IoBuf tracks the byte budget across queued datagrams
                self.send.append(data)?;
                tx.push_back(data.to_vec());
                Ok(())
            }
        }
    }

    /// Request an orderly close once queued data has drained.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_is_requested(&self) -> bool {
        self.close_requested
    }
}
