use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read hook: receives the address and the value seen so far and returns the
/// value the next listener (or the caller) will see.
pub type ReadListener = dyn Fn(u32, u8) -> u8;

/// Write hook: receives the address, the attempted value and the value that
/// was stored before the write.
pub type WriteListener = dyn Fn(u32, u8, u8);

/// Unique identifier for a registered listener, used to remove it again.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Creates a new [ListenerId] that is different from any other created so
    /// far.
    pub fn create() -> ListenerId {
        static NEXT_TAG: AtomicU64 = AtomicU64::new(0);
        ListenerId(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }
}

/// Copy-on-write listener list.
///
/// Dispatch works on a snapshot taken when it starts, so adding or removing
/// a listener from inside a listener only affects later calls.
pub(crate) struct ListenerList<L: ?Sized> {
    entries: RefCell<Rc<Vec<(ListenerId, Rc<L>)>>>,
}

impl<L: ?Sized> ListenerList<L> {
    pub fn new() -> Self {
        ListenerList {
            entries: RefCell::new(Rc::new(Vec::new())),
        }
    }

    pub fn push(&self, id: ListenerId, listener: Rc<L>) {
        let mut entries = self.entries.borrow_mut();
        Rc::make_mut(&mut entries).push((id, listener));
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|(e, _)| *e == id) {
            Some(index) => {
                Rc::make_mut(&mut entries).remove(index);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Listeners in dispatch order: most recently registered first.
    pub fn snapshot(&self) -> Snapshot<L> {
        Snapshot(self.entries.borrow().clone())
    }
}

pub(crate) struct Snapshot<L: ?Sized>(Rc<Vec<(ListenerId, Rc<L>)>>);

impl<L: ?Sized> Snapshot<L> {
    pub fn iter(&self) -> impl Iterator<Item = &Rc<L>> {
        self.0.iter().rev().map(|(_, l)| l)
    }
}

impl ListenerList<ReadListener> {
    pub fn apply(&self, addr: u32, value: u8) -> u8 {
        if self.is_empty() {
            return value;
        }
        self.snapshot()
            .iter()
            .fold(value, |value, listener| listener(addr, value))
    }
}

impl ListenerList<WriteListener> {
    pub fn notify(&self, addr: u32, attempted: u8, prior: u8) {
        if self.is_empty() {
            return;
        }
        for listener in self.snapshot().iter() {
            listener(addr, attempted, prior);
        }
    }
}
