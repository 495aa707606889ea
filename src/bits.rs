//! Single-bit and bit-field views of one memory cell, used to bit-bang
//! serial protocols (I2C lines, PLL programming) out of byte registers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::ConfigError;
use crate::space::{AddressSpace, ListenerId};

/// Serializes read-modify-writes on one cell.
///
/// The lock belongs to the backing cell an address resolves to, so views
/// reached through a banked or paged alias share it with views on the flat
/// store. An RMW requested while another is in progress on the same cell
/// (from a listener the outer write triggered) is queued and applied once
/// the outer one has finished.
pub(crate) struct CellLock {
    busy: Cell<bool>,
    pending: RefCell<VecDeque<FieldWrite>>,
}

/// A queued RMW, applied through the view that requested it.
struct FieldWrite {
    space: AddressSpace,
    addr: u32,
    shift: u8,
    mask: u8,
    value: u8,
}

impl FieldWrite {
    fn apply(&self) {
        let cell = self.space.read(self.addr);
        let field = (self.value << self.shift) & self.mask;
        self.space.write(self.addr, (cell & !self.mask) | field);
    }
}

struct LockGuard<'a>(&'a CellLock);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.0.pending.borrow_mut().clear();
        self.0.busy.set(false);
    }
}

impl CellLock {
    pub(crate) fn new() -> Self {
        CellLock {
            busy: Cell::new(false),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    fn acquire(&self) -> Option<LockGuard<'_>> {
        if self.busy.replace(true) {
            None
        } else {
            Some(LockGuard(self))
        }
    }

    fn defer(&self, op: FieldWrite) {
        self.pending.borrow_mut().push_back(op);
    }

    fn next_pending(&self) -> Option<FieldWrite> {
        self.pending.borrow_mut().pop_front()
    }
}

type EdgeListener = dyn Fn(u8, u8);

struct EdgeListeners {
    entries: RefCell<Rc<Vec<(ListenerId, Rc<EdgeListener>)>>>,
}

impl EdgeListeners {
    fn notify(&self, new: u8, old: u8) {
        let entries = self.entries.borrow().clone();
        for (_, listener) in entries.iter().rev() {
            listener(new, old);
        }
    }
}

/// A bit or bit field of one cell, readable and writable on its own.
///
/// The view stores nothing itself. Its listeners fire only when a write to
/// the cell changes this field, so a decoder watching one wire is never
/// woken by writes to neighbouring bits. Edges are reported for writes made
/// through the space the view was created on.
///
/// A listener that drives another view should hold it through a [Weak]
/// reference: the space owns the listener, so an `Rc<BitView>` captured
/// there keeps the space alive through its own hook.
///
/// [Weak]: std::rc::Weak
pub struct BitView {
    space: AddressSpace,
    addr: u32,
    shift: u8,
    width: u8,
    mask: u8,
    listeners: Rc<EdgeListeners>,
    hook: ListenerId,
}

impl BitView {
    /// Creates a view of `width` bits starting at bit `shift` of the cell at
    /// `addr`.
    pub fn new(
        space: &AddressSpace,
        addr: u32,
        shift: u8,
        width: u8,
    ) -> Result<Self, ConfigError> {
        if width == 0 || u32::from(shift) + u32::from(width) > 8 {
            return Err(ConfigError::InvalidBitField { shift, width });
        }
        if addr >= space.size() {
            return Err(ConfigError::AddressOutOfRange {
                space: space.label().to_string(),
                addr,
                size: space.size(),
            });
        }
        let mask = (((1u16 << width) - 1) as u8) << shift;
        let listeners = Rc::new(EdgeListeners {
            entries: RefCell::new(Rc::new(Vec::new())),
        });
        let edges = listeners.clone();
        let hook = space.add_write_listener(addr, move |_, attempted, prior| {
            let (new, old) = ((attempted & mask) >> shift, (prior & mask) >> shift);
            if new != old {
                edges.notify(new, old);
            }
        });
        Ok(BitView {
            space: space.clone(),
            addr,
            shift,
            width,
            mask,
            listeners,
            hook,
        })
    }

    /// Creates a single-bit view.
    pub fn bit(space: &AddressSpace, addr: u32, bit: u8) -> Result<Self, ConfigError> {
        Self::new(space, addr, bit, 1)
    }

    pub fn address(&self) -> u32 {
        self.addr
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Reads the cell (running its read listeners) and extracts the field.
    pub fn get(&self) -> u8 {
        (self.space.read(self.addr) & self.mask) >> self.shift
    }

    pub fn is_set(&self) -> bool {
        self.get() != 0
    }

    /// Replaces the field with `value`, leaving the other bits of the cell
    /// as a read of the cell reports them.
    pub fn set(&self, value: u8) {
        let op = FieldWrite {
            space: self.space.clone(),
            addr: self.addr,
            shift: self.shift,
            mask: self.mask,
            value,
        };
        // Resolved on every call: a bank switch moves the backing cell.
        let (target, local) = self.space.resolve(self.addr);
        let lock = target.cell_lock(local);
        let Some(_guard) = lock.acquire() else {
            lock.defer(op);
            return;
        };
        op.apply();
        while let Some(op) = lock.next_pending() {
            op.apply();
        }
    }

    pub fn set_bit(&self, on: bool) {
        self.set(u8::from(on));
    }

    pub fn toggle(&self) {
        let field = self.get();
        self.set(!field);
    }

    /// Registers a listener called with `(new, old)` field values whenever a
    /// write to the cell changes this field. The most recently added
    /// listener runs first.
    pub fn add_listener(&self, listener: impl Fn(u8, u8) + 'static) -> ListenerId {
        let id = ListenerId::create();
        let listener: Rc<EdgeListener> = Rc::new(listener);
        let mut entries = self.listeners.entries.borrow_mut();
        Rc::make_mut(&mut entries).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut entries = self.listeners.entries.borrow_mut();
        match entries.iter().position(|(e, _)| *e == id) {
            Some(index) => {
                Rc::make_mut(&mut entries).remove(index);
                true
            }
            None => false,
        }
    }
}

impl Drop for BitView {
    fn drop(&mut self) {
        self.space.remove_listener(self.hook);
    }
}

impl AddressSpace {
    /// Convenience for [BitView::new].
    pub fn bit_view(&self, addr: u32, shift: u8, width: u8) -> Result<BitView, ConfigError> {
        BitView::new(self, addr, shift, width)
    }
}
