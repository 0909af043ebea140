//! Link-layer driver boundary.
//!
//! A driver moves whole Ethernet frames between the stack and some medium.
//! Frames are `Vec<u8>` without preamble or FCS. Drivers are polled from the
//! engine tick; anything captured in interrupt or callback context must be
//! queued driver-side and surfaced through `poll_receive`.
#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub trait LinkDriver {
    /// Queue one frame for transmission. Returns false when the device
    /// cannot take the frame right now; the caller decides whether to drop
    /// or retry.
    fn transmit(&mut self, frame: &[u8]) -> bool;

    /// Take one received frame, if any is pending.
    fn poll_receive(&mut self) -> Option<Vec<u8>>;

    /// Carrier state. Drivers without link detection report true.
    fn link_up(&mut self) -> bool {
        true
    }
}

impl<T: LinkDriver + ?Sized> LinkDriver for Box<T> {
    fn transmit(&mut self, frame: &[u8]) -> bool {
        (**self).transmit(frame)
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        (**self).poll_receive()
    }

    fn link_up(&mut self) -> bool {
        (**self).link_up()
    }
}

impl<T: LinkDriver> LinkDriver for Rc<RefCell<T>> {
    fn transmit(&mut self, frame: &[u8]) -> bool {
        self.borrow_mut().transmit(frame)
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.borrow_mut().poll_receive()
    }

    fn link_up(&mut self) -> bool {
        self.borrow_mut().link_up()
    }
}

impl<T: LinkDriver + ?Sized> LinkDriver for &mut T {
    fn transmit(&mut self, frame: &[u8]) -> bool {
        (**self).transmit(frame)
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        (**self).poll_receive()
    }

    fn link_up(&mut self) -> bool {
        (**self).link_up()
    }
}

/// In-memory driver fed by the embedder or a test script.
#[derive(Default)]
pub struct QueueDriver {
    rx: VecDeque<Vec<u8>>,
    tx: VecDeque<Vec<u8>>,
    link: bool,
    /// When set, `transmit` reports the device as busy.
    pub tx_full: bool,
}

impl QueueDriver {
    pub fn new() -> Self {
        Self {
            link: true,
            ..Self::default()
        }
    }

    pub fn push_rx_frame(&mut self, frame: Vec<u8>) {
        self.rx.push_back(frame);
    }

    pub fn drain_tx_frames(&mut self) -> Vec<Vec<u8>> {
        self.tx.drain(..).collect()
    }

    pub fn set_link(&mut self, up: bool) {
        self.link = up;
    }
}

impl LinkDriver for QueueDriver {
    fn transmit(&mut self, frame: &[u8]) -> bool {
        if self.tx_full {
            return false;
        }
        self.tx.push_back(frame.to_vec());
        true
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.rx.pop_front()
    }

    fn link_up(&mut self) -> bool {
        self.link
    }
}

#[derive(Default)]
struct PipeShared {
    a_to_b: VecDeque<Vec<u8>>,
    b_to_a: VecDeque<Vec<u8>>,
}

/// One endpoint of a crossed in-memory frame pipe. Two stacks, one on each
/// endpoint, see each other's transmissions as received frames.
pub struct PipeDriver {
    shared: Rc<RefCell<PipeShared>>,
    is_a: bool,
}

impl PipeDriver {
    pub fn pair() -> (Self, Self) {
        let shared = Rc::new(RefCell::new(PipeShared::default()));
        (
            Self {
                shared: Rc::clone(&shared),
                is_a: true,
            },
            Self { shared, is_a: false },
        )
    }
}

impl LinkDriver for PipeDriver {
    fn transmit(&mut self, frame: &[u8]) -> bool {
        let mut shared = self.shared.borrow_mut();
        let queue = if self.is_a {
            &mut shared.a_to_b
        } else {
            &mut shared.b_to_a
        };
        queue.push_back(frame.to_vec());
        true
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        let mut shared = self.shared.borrow_mut();
        let queue = if self.is_a {
            &mut shared.b_to_a
        } else {
            &mut shared.a_to_b
        };
        queue.pop_front()
    }
}
