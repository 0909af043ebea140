//! Embeddable, single-threaded networking engine with a built-in TCP/IP
//! stack.
//!
//! The engine runs entirely inside [`Manager::poll`]: the embedder supplies
//! a [`nanonet_driver::LinkDriver`] that moves raw Ethernet frames and a
//! millisecond clock reading, and receives connection lifecycle events
//! through per-connection handlers. Nothing blocks and nothing spawns;
//! [`Manager::next_deadline`] tells the embedder how long it may sleep.
//!
//! ```no_run
//! use nanonet_stack::{EngineConfig, Event, Manager, Proto};
//! use std::net::SocketAddrV4;
//!
//! let driver = Box::new(nanonet_driver::QueueDriver::new());
//! let mut mgr = Manager::new(driver, EngineConfig::default());
//! mgr.listen(
//!     Proto::Tcp,
//!     8080,
//!     Box::new(|conn, event| {
//!         if let Event::Read(_) = event {
//!             let data = conn.recv_data().to_vec();
//!             let _ = conn.send(&data);
//!             conn.consume_recv(data.len());
//!         }
//!     }),
//! )
//! .unwrap();
//! loop {
//!     let now = 0; // read a monotonic clock here
//!     mgr.poll(now);
//! }
//! ```
#![forbid(unsafe_code)]

pub mod arp;
pub mod buffer;
pub mod conn;
pub mod dhcp;
pub mod error;
pub mod event;
pub mod interface;
pub mod mgr;
pub mod tcp;

/// Engine clock reading. Any monotonic millisecond source works; the
/// engine never reads time itself.
pub type Millis = u64;

pub use buffer::IoBuf;
pub use conn::{ConnId, Connection, Proto};
pub use error::Error;
pub use event::{Event, EventHandler};
pub use interface::{Interface, InterfaceConfig, IpConfig, LinkState, StaticAddr};
pub use mgr::{EngineConfig, Manager};
