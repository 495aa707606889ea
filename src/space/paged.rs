use std::cell::RefCell;

use super::{AddressSpace, Mapping, Target};
use crate::error::ConfigError;
use crate::machine::Machine;

#[derive(Clone)]
struct PageEntry {
    target: AddressSpace,
    offset: u32,
}

/// Page table of a paged space. Unset pages fall back to the space's own
/// cells.
pub(crate) struct PageMap {
    page_size: u32,
    entries: RefCell<Box<[Option<PageEntry>]>>,
}

impl PageMap {
    #[inline]
    pub(crate) fn target(&self, addr: u32) -> Target {
        let entries = self.entries.borrow();
        match &entries[(addr / self.page_size) as usize] {
            None => Target::Local(addr),
            Some(entry) => Target::Remote(
                entry.target.clone(),
                (addr % self.page_size) + entry.offset,
            ),
        }
    }
}

impl AddressSpace {
    /// Creates a space of `size` bytes whose pages can be redirected to
    /// other spaces with [AddressSpace::map_memory].
    pub fn paged(
        label: impl Into<String>,
        size: u32,
        page_size: u32,
        machine: &Machine,
    ) -> Result<Self, ConfigError> {
        let label = label.into();
        if size == 0 {
            return Err(ConfigError::ZeroSize(label));
        }
        if page_size == 0 || size % page_size != 0 {
            return Err(ConfigError::InvalidPageSize { page_size, size });
        }
        let pages = (size / page_size) as usize;
        log::debug!(
            "paged space `{}`: {} pages of {:#X} bytes",
            label,
            pages,
            page_size
        );
        let map = PageMap {
            page_size,
            entries: RefCell::new(vec![None; pages].into_boxed_slice()),
        };
        Ok(Self::with_mapping(
            label,
            size,
            size,
            machine.run_flag(),
            Mapping::Paged(map),
        ))
    }

    pub fn page_size(&self) -> Option<u32> {
        match self.mapping() {
            Mapping::Paged(map) => Some(map.page_size),
            _ => None,
        }
    }

    /// Redirects `[base, base + size)` of this space to `[offset, offset +
    /// size)` of `target`, page by page.
    ///
    /// `base` and `size` must be multiples of the page size and both ranges
    /// must fit their spaces. The target must be a flat space other than
    /// this one. Everything is checked before any page changes, so a failed
    /// call leaves the table untouched.
    #[doc(alias = "map_page")]
    pub fn map_memory(
        &self,
        target: &AddressSpace,
        base: u32,
        offset: u32,
        size: u32,
    ) -> Result<(), ConfigError> {
        let map = match self.mapping() {
            Mapping::Paged(map) => map,
            _ => return Err(ConfigError::NotPaged(self.label().to_string())),
        };
        let page_size = map.page_size;
        if base % page_size != 0 {
            return Err(ConfigError::Misaligned {
                what: "base address",
                value: base,
                page_size,
            });
        }
        if size % page_size != 0 {
            return Err(ConfigError::Misaligned {
                what: "size",
                value: size,
                page_size,
            });
        }
        if size == 0 {
            return Err(ConfigError::EmptyMapping);
        }
        if base.checked_add(size).map_or(true, |end| end > self.size()) {
            return Err(ConfigError::RangeOutOfBounds {
                space: self.label().to_string(),
                base,
                len: size,
                size: self.size(),
            });
        }
        if target.same_space(self) {
            return Err(ConfigError::SelfMapping(self.label().to_string()));
        }
        if target.is_delegating() {
            return Err(ConfigError::NestedDelegation(target.label().to_string()));
        }
        if offset.checked_add(size).map_or(true, |end| end > target.size()) {
            return Err(ConfigError::TargetOutOfBounds {
                target: target.label().to_string(),
                offset,
                len: size,
                size: target.size(),
            });
        }

        let first = (base / page_size) as usize;
        let mut entries = map.entries.borrow_mut();
        for (i, entry) in entries[first..first + (size / page_size) as usize]
            .iter_mut()
            .enumerate()
        {
            let page_offset = offset + i as u32 * page_size;
            if crate::debug_flags::trace_mapping() {
                log::trace!(
                    "`{}`: page {:#06X} -> `{}` {:#06X}",
                    self.label(),
                    base + i as u32 * page_size,
                    target.label(),
                    page_offset
                );
            }
            *entry = Some(PageEntry {
                target: target.clone(),
                offset: page_offset,
            });
        }
        log::debug!(
            "`{}`: mapped {:#06X}..{:#06X} to `{}` at {:#06X}",
            self.label(),
            base,
            base + size,
            target.label(),
            offset
        );
        Ok(())
    }
}
