//! Hand-off from foreign threads to the thread that owns a machine's memory.
//!
//! Serial and network receivers run on their own threads but must not touch
//! an [AddressSpace] directly. They push writes into a bounded queue, and
//! the CPU thread drains it between instructions.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::PortError;
use crate::space::AddressSpace;

/// A byte destined for one address of the owning thread's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWrite {
    pub addr: u32,
    pub value: u8,
}

struct PortRing {
    buffer: VecDeque<PortWrite>,
    capacity: usize,
    closed: bool,
}

struct Shared {
    ring: Mutex<PortRing>,
    space_freed: Condvar,
}

/// Producer side; `Send` and cloneable, one per foreign thread.
#[derive(Clone)]
pub struct InboundSender {
    shared: Arc<Shared>,
}

impl InboundSender {
    /// Queues a write, blocking while the queue is full.
    pub fn send(&self, addr: u32, value: u8) -> Result<(), PortError> {
        let mut ring = self.shared.ring.lock().map_err(|_| PortError::Disconnected)?;
        loop {
            if ring.closed {
                return Err(PortError::Disconnected);
            }
            if ring.buffer.len() < ring.capacity {
                ring.buffer.push_back(PortWrite { addr, value });
                return Ok(());
            }
            ring = self
                .shared
                .space_freed
                .wait(ring)
                .map_err(|_| PortError::Disconnected)?;
        }
    }

    /// Queues a write if there is room.
    pub fn try_send(&self, addr: u32, value: u8) -> Result<(), PortError> {
        let mut ring = self.shared.ring.lock().map_err(|_| PortError::Disconnected)?;
        if ring.closed {
            return Err(PortError::Disconnected);
        }
        if ring.buffer.len() >= ring.capacity {
            return Err(PortError::Full);
        }
        ring.buffer.push_back(PortWrite { addr, value });
        Ok(())
    }
}

impl std::fmt::Debug for InboundSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundSender").finish_non_exhaustive()
    }
}

/// Consumer side, kept by the thread owning the memory. Dropping it makes
/// every sender fail with [PortError::Disconnected].
pub struct InboundQueue {
    shared: Arc<Shared>,
}

/// Creates a queue holding at most `capacity` pending writes (at least one).
pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundQueue) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        ring: Mutex::new(PortRing {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
        }),
        space_freed: Condvar::new(),
    });
    (
        InboundSender {
            shared: shared.clone(),
        },
        InboundQueue { shared },
    )
}

impl InboundQueue {
    /// Applies every pending write to `space`, in arrival order, and returns
    /// how many were applied. Never blocks on producers.
    pub fn drain_into(&self, space: &AddressSpace) -> usize {
        self.drain_up_to(space, usize::MAX)
    }

    /// Like [InboundQueue::drain_into], but stops after `limit` writes so a
    /// flood of input cannot starve the CPU loop.
    pub fn drain_up_to(&self, space: &AddressSpace, limit: usize) -> usize {
        let batch: Vec<PortWrite> = match self.shared.ring.lock() {
            Ok(mut ring) => {
                let count = ring.buffer.len().min(limit);
                ring.buffer.drain(..count).collect()
            }
            Err(_) => return 0,
        };
        if batch.is_empty() {
            if Arc::strong_count(&self.shared) == 1 {
                log::trace!("inbound queue for `{}` has no senders left", space.label());
            }
            return 0;
        }
        self.shared.space_freed.notify_all();
        // Listeners run without the ring locked.
        for PortWrite { addr, value } in &batch {
            space.write(*addr, *value);
        }
        batch.len()
    }

    /// Removes and returns the next pending write without applying it.
    pub fn try_next(&self) -> Option<PortWrite> {
        let next = self.shared.ring.lock().ok()?.buffer.pop_front();
        if next.is_some() {
            self.shared.space_freed.notify_all();
        }
        next
    }

    pub fn len(&self) -> usize {
        self.shared.ring.lock().map_or(0, |ring| ring.buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InboundQueue {
    fn drop(&mut self) {
        if let Ok(mut ring) = self.shared.ring.lock() {
            ring.closed = true;
            ring.buffer.clear();
        }
        self.shared.space_freed.notify_all();
    }
}

impl std::fmt::Debug for InboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundQueue")
            .field("pending", &self.len())
            .finish()
    }
}
