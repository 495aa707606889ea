//! Byte-addressable memory with listener hooks, read-only protection and
//! address translation.
//!
//! Every access a CPU core or peripheral makes goes through an
//! [AddressSpace]. A space is one of three closed variants:
//!
//! - flat: a plain array of cells
//! - banked: a window onto one of several private banks, plus a shared region
//! - paged: its own cells, with whole pages redirected to other spaces
//!
//! Translation never nests more than one level deep: a banked or paged space
//! always resolves to a flat space.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::bits::CellLock;
use crate::error::ConfigError;
use crate::machine::{Machine, RunFlag};

mod banked;
mod listeners;
mod paged;

#[cfg(test)]
mod tests;

pub use banked::{BankResetPolicy, BankedBuilder};
pub use listeners::{ListenerId, ReadListener, WriteListener};

use banked::BankMap;
use listeners::ListenerList;
use paged::PageMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct CellFlags: u8 {
        const READ_ONLY = 0b00000001;
        const READ_HOOKED = 0b00000010;
        const WRITE_HOOKED = 0b00000100;
    }
}

struct LocalHooks {
    read: ListenerList<ReadListener>,
    write: ListenerList<WriteListener>,
}

#[derive(Clone, Copy)]
enum ListenerSlot {
    GlobalRead,
    GlobalWrite,
    LocalRead(u32),
    LocalWrite(u32),
}

pub(crate) enum Mapping {
    Flat,
    Banked(BankMap),
    Paged(PageMap),
}

/// Where an access lands once translation has been applied.
pub(crate) enum Target {
    Local(u32),
    Remote(AddressSpace, u32),
}

pub(crate) struct SpaceInner {
    label: String,
    size: u32,
    cells: Box<[Cell<u8>]>,
    flags: Box<[Cell<CellFlags>]>,
    names: RefCell<HashMap<u32, String>>,
    global_read: ListenerList<ReadListener>,
    global_write: ListenerList<WriteListener>,
    local: RefCell<HashMap<u32, Rc<LocalHooks>>>,
    slots: RefCell<HashMap<ListenerId, ListenerSlot>>,
    cell_locks: RefCell<HashMap<u32, Weak<CellLock>>>,
    run: RunFlag,
    mapping: Mapping,
}

/// A handle to a simulated address space.
///
/// Handles are cheap to clone and all clones refer to the same memory.
/// Handles are deliberately not `Send`: one thread (normally the CPU thread)
/// owns a machine's memory, and other threads hand data over through
/// [crate::port].
#[derive(Clone)]
pub struct AddressSpace {
    inner: Rc<SpaceInner>,
}

impl AddressSpace {
    /// Creates a flat address space of `size` zeroed cells.
    pub fn new(
        label: impl Into<String>,
        size: u32,
        machine: &Machine,
    ) -> Result<Self, ConfigError> {
        let label = label.into();
        if size == 0 {
            return Err(ConfigError::ZeroSize(label));
        }
        log::debug!("address space `{}`: {:#X} bytes", label, size);
        Ok(Self::with_mapping(label, size, size, machine.run_flag(), Mapping::Flat))
    }

    /// Creates a flat space holding `bytes`, every cell marked read-only.
    pub fn rom(
        label: impl Into<String>,
        bytes: &[u8],
        machine: &Machine,
    ) -> Result<Self, ConfigError> {
        let size = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let space = Self::new(label, size, machine)?;
        space.load(0, bytes)?;
        space.mark_read_only(..)?;
        Ok(space)
    }

    pub(crate) fn with_mapping(
        label: String,
        size: u32,
        storage: u32,
        run: RunFlag,
        mapping: Mapping,
    ) -> Self {
        AddressSpace {
            inner: Rc::new(SpaceInner {
                label,
                size,
                cells: (0..storage).map(|_| Cell::new(0)).collect(),
                flags: (0..size).map(|_| Cell::new(CellFlags::empty())).collect(),
                names: RefCell::new(HashMap::new()),
                global_read: ListenerList::new(),
                global_write: ListenerList::new(),
                local: RefCell::new(HashMap::new()),
                slots: RefCell::new(HashMap::new()),
                cell_locks: RefCell::new(HashMap::new()),
                run,
                mapping,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    /// Returns true if both handles refer to the same space.
    pub fn same_space(&self, other: &AddressSpace) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true for banked and paged spaces.
    pub fn is_delegating(&self) -> bool {
        !matches!(self.inner.mapping, Mapping::Flat)
    }

    pub(crate) fn mapping(&self) -> &Mapping {
        &self.inner.mapping
    }

    pub(crate) fn downgrade(&self) -> Weak<SpaceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SpaceInner>) -> Option<AddressSpace> {
        weak.upgrade().map(|inner| AddressSpace { inner })
    }

    #[inline]
    pub(crate) fn target(&self, addr: u32) -> Target {
        match &self.inner.mapping {
            Mapping::Flat => Target::Local(addr),
            Mapping::Banked(banks) => banks.target(addr),
            Mapping::Paged(pages) => pages.target(addr),
        }
    }

    /// Returns the concrete space and local address an access to `addr`
    /// ends up in.
    pub fn resolve(&self, addr: u32) -> (AddressSpace, u32) {
        match self.target(addr) {
            Target::Local(local) => (self.clone(), local),
            Target::Remote(space, local) => (space, local),
        }
    }

    /// Reads a byte, running local then global read listeners.
    ///
    /// Each listener may replace the value seen by the next one. For a
    /// delegating space, the target's own listeners run first.
    pub fn read(&self, addr: u32) -> u8 {
        let inner = &*self.inner;
        let value = match self.target(addr) {
            Target::Local(local) => inner.cells[local as usize].get(),
            Target::Remote(space, local) => space.read(local),
        };
        inner.dispatch_read(addr, value)
    }

    /// Writes a byte.
    ///
    /// A cell marked read-only keeps its content while the machine is
    /// running, but write listeners always see the attempted value together
    /// with the value stored before the write.
    pub fn write(&self, addr: u32, value: u8) {
        let inner = &*self.inner;
        let flags = inner.flags[addr as usize].get();
        let protected = flags.contains(CellFlags::READ_ONLY) && inner.run.is_running();
        match self.target(addr) {
            Target::Local(local) => {
                let cell = &inner.cells[local as usize];
                let prior = cell.get();
                if protected {
                    inner.trace_protected(addr, value);
                } else {
                    cell.set(value);
                }
                inner.dispatch_write(addr, value, prior, flags);
            }
            Target::Remote(space, local) => {
                let prior = space.stored(local);
                inner.dispatch_write(addr, value, prior, flags);
                if protected {
                    inner.trace_protected(addr, value);
                } else {
                    space.write(local, value);
                }
            }
        }
    }

    /// Returns what a read would produce from storage, without running any
    /// listener.
    pub fn peek(&self, addr: u32) -> u8 {
        match self.target(addr) {
            Target::Local(local) => self.inner.cells[local as usize].get(),
            Target::Remote(space, local) => space.peek(local),
        }
    }

    fn stored(&self, addr: u32) -> u8 {
        match self.target(addr) {
            Target::Local(local) => self.inner.cells[local as usize].get(),
            Target::Remote(space, local) => space.stored(local),
        }
    }

    fn store(&self, addr: u32, value: u8) {
        match self.target(addr) {
            Target::Local(local) => self.inner.cells[local as usize].set(value),
            Target::Remote(space, local) => space.store(local, value),
        }
    }

    /// Copies `bytes` into memory starting at `start`, bypassing listeners
    /// and read-only protection. Meant for machine assembly (ROM images,
    /// initial RAM content).
    pub fn load(&self, start: u32, bytes: &[u8]) -> Result<(), ConfigError> {
        let (start, end) = self.bounds(start, bytes.len())?;
        for (addr, &byte) in (start..end).zip(bytes) {
            self.store(addr, byte);
        }
        Ok(())
    }

    /// Returns the bytes currently visible at every address, without running
    /// listeners. Presentation code on the owning thread uses this to hand a
    /// frame's worth of memory to another thread.
    pub fn contents(&self) -> Vec<u8> {
        (0..self.inner.size).map(|addr| self.peek(addr)).collect()
    }

    pub(crate) fn raw_cells(&self) -> &[Cell<u8>] {
        &self.inner.cells
    }

    fn bounds(&self, start: u32, len: usize) -> Result<(u32, u32), ConfigError> {
        let size = self.inner.size;
        let len32 = u32::try_from(len).ok();
        match len32.and_then(|len| start.checked_add(len)) {
            Some(end) if end <= size => Ok((start, end)),
            _ => Err(ConfigError::RangeOutOfBounds {
                space: self.inner.label.clone(),
                base: start,
                len: len32.unwrap_or(u32::MAX),
                size,
            }),
        }
    }

    fn normalize<R: RangeBounds<u32>>(&self, range: R) -> Result<(u32, u32), ConfigError> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.inner.size,
        };
        if start > end || end > self.inner.size {
            return Err(ConfigError::RangeOutOfBounds {
                space: self.inner.label.clone(),
                base: start,
                len: end.saturating_sub(start),
                size: self.inner.size,
            });
        }
        Ok((start, end))
    }

    /// Marks a range of cells read-only. Protection only applies while the
    /// machine is running; content written during setup is kept.
    pub fn mark_read_only<R: RangeBounds<u32>>(&self, range: R) -> Result<(), ConfigError> {
        let (start, end) = self.normalize(range)?;
        for addr in start..end {
            self.inner.update_flags(addr, |f| f | CellFlags::READ_ONLY);
        }
        Ok(())
    }

    pub fn clear_read_only<R: RangeBounds<u32>>(&self, range: R) -> Result<(), ConfigError> {
        let (start, end) = self.normalize(range)?;
        for addr in start..end {
            self.inner.update_flags(addr, |f| f - CellFlags::READ_ONLY);
        }
        Ok(())
    }

    /// Replaces every read-only flag: exactly the listed addresses end up
    /// protected. Addresses outside the space are ignored.
    pub(crate) fn replace_read_only(&self, protected: &[u32]) {
        for cell in self.inner.flags.iter() {
            cell.set(cell.get() - CellFlags::READ_ONLY);
        }
        for &addr in protected {
            if let Some(cell) = self.inner.flags.get(addr as usize) {
                cell.set(cell.get() | CellFlags::READ_ONLY);
            }
        }
    }

    pub fn is_read_only(&self, addr: u32) -> bool {
        self.inner.flags[addr as usize].get().contains(CellFlags::READ_ONLY)
    }

    /// Returns the diagnostic name of an address: a name given with
    /// [AddressSpace::set_name], one given on the space this address
    /// resolves to, or a hex label.
    pub fn name(&self, addr: u32) -> String {
        if let Some(name) = self.inner.names.borrow().get(&addr) {
            return name.clone();
        }
        if let Target::Remote(space, local) = self.target(addr) {
            if let Some(name) = space.inner.names.borrow().get(&local) {
                return name.clone();
            }
        }
        let digits = hex_digits(self.inner.size - 1).max(4);
        format!("0x{:0width$X}", addr, width = digits)
    }

    pub fn set_name(&self, addr: u32, name: impl Into<String>) {
        assert!(addr < self.inner.size, "address {addr:#X} out of range");
        self.inner.names.borrow_mut().insert(addr, name.into());
    }

    pub fn add_global_read_listener(&self, listener: impl Fn(u32, u8) -> u8 + 'static) -> ListenerId {
        let id = ListenerId::create();
        self.inner.global_read.push(id, Rc::new(listener));
        self.inner.slots.borrow_mut().insert(id, ListenerSlot::GlobalRead);
        id
    }

    pub fn add_global_write_listener(&self, listener: impl Fn(u32, u8, u8) + 'static) -> ListenerId {
        let id = ListenerId::create();
        self.inner.global_write.push(id, Rc::new(listener));
        self.inner.slots.borrow_mut().insert(id, ListenerSlot::GlobalWrite);
        id
    }

    /// Attaches a read listener to one address (a memory-mapped register).
    pub fn add_read_listener(
        &self,
        addr: u32,
        listener: impl Fn(u32, u8) -> u8 + 'static,
    ) -> ListenerId {
        let id = ListenerId::create();
        self.inner.hooks_at(addr).read.push(id, Rc::new(listener));
        self.inner.update_flags(addr, |f| f | CellFlags::READ_HOOKED);
        self.inner.slots.borrow_mut().insert(id, ListenerSlot::LocalRead(addr));
        id
    }

    /// Attaches a write listener to one address.
    pub fn add_write_listener(
        &self,
        addr: u32,
        listener: impl Fn(u32, u8, u8) + 'static,
    ) -> ListenerId {
        let id = ListenerId::create();
        self.inner.hooks_at(addr).write.push(id, Rc::new(listener));
        self.inner.update_flags(addr, |f| f | CellFlags::WRITE_HOOKED);
        self.inner.slots.borrow_mut().insert(id, ListenerSlot::LocalWrite(addr));
        id
    }

    /// Removes a listener registered on this space. Returns false if the id
    /// is unknown here.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let slot = match self.inner.slots.borrow_mut().remove(&id) {
            Some(slot) => slot,
            None => return false,
        };
        match slot {
            ListenerSlot::GlobalRead => self.inner.global_read.remove(id),
            ListenerSlot::GlobalWrite => self.inner.global_write.remove(id),
            ListenerSlot::LocalRead(addr) => {
                let hooks = self.inner.local.borrow().get(&addr).cloned();
                let removed = hooks.as_ref().is_some_and(|h| h.read.remove(id));
                if hooks.is_some_and(|h| h.read.is_empty()) {
                    self.inner.update_flags(addr, |f| f - CellFlags::READ_HOOKED);
                }
                removed
            }
            ListenerSlot::LocalWrite(addr) => {
                let hooks = self.inner.local.borrow().get(&addr).cloned();
                let removed = hooks.as_ref().is_some_and(|h| h.write.remove(id));
                if hooks.is_some_and(|h| h.write.is_empty()) {
                    self.inner.update_flags(addr, |f| f - CellFlags::WRITE_HOOKED);
                }
                removed
            }
        }
    }

    /// Returns the lock shared by every bit view over one cell.
    pub(crate) fn cell_lock(&self, addr: u32) -> Rc<CellLock> {
        let mut locks = self.inner.cell_locks.borrow_mut();
        if let Some(lock) = locks.get(&addr).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Rc::new(CellLock::new());
        locks.insert(addr, Rc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    pub(crate) fn cell_lock_count(&self) -> usize {
        self.inner.cell_locks.borrow().len()
    }
}

impl SpaceInner {
    #[inline]
    fn dispatch_read(&self, addr: u32, value: u8) -> u8 {
        let flags = self.flags[addr as usize].get();
        let value = if flags.contains(CellFlags::READ_HOOKED) {
            match self.local_hooks(addr) {
                Some(hooks) => hooks.read.apply(addr, value),
                None => value,
            }
        } else {
            value
        };
        self.global_read.apply(addr, value)
    }

    #[inline]
    fn dispatch_write(&self, addr: u32, attempted: u8, prior: u8, flags: CellFlags) {
        if flags.contains(CellFlags::WRITE_HOOKED) {
            if let Some(hooks) = self.local_hooks(addr) {
                hooks.write.notify(addr, attempted, prior);
            }
        }
        self.global_write.notify(addr, attempted, prior);
    }

    fn local_hooks(&self, addr: u32) -> Option<Rc<LocalHooks>> {
        self.local.borrow().get(&addr).cloned()
    }

    fn hooks_at(&self, addr: u32) -> Rc<LocalHooks> {
        assert!(addr < self.size, "address {addr:#X} out of range");
        self.local
            .borrow_mut()
            .entry(addr)
            .or_insert_with(|| {
                Rc::new(LocalHooks {
                    read: ListenerList::new(),
                    write: ListenerList::new(),
                })
            })
            .clone()
    }

    fn update_flags(&self, addr: u32, f: impl FnOnce(CellFlags) -> CellFlags) {
        let cell = &self.flags[addr as usize];
        cell.set(f(cell.get()));
    }

    fn trace_protected(&self, addr: u32, value: u8) {
        if crate::debug_flags::trace_rom_writes() {
            log::trace!(
                "`{}`: write {:#04X} to read-only {:#06X} suppressed",
                self.label,
                value,
                addr
            );
        }
    }
}

fn hex_digits(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(4).max(1)
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.mapping {
            Mapping::Flat => "flat",
            Mapping::Banked(_) => "banked",
            Mapping::Paged(_) => "paged",
        };
        f.debug_struct("AddressSpace")
            .field("label", &self.inner.label)
            .field("size", &format_args!("{:#X}", self.inner.size))
            .field("kind", &kind)
            .finish()
    }
}
