use std::cell::Cell;

use super::{AddressSpace, Mapping, Target};
use crate::error::ConfigError;
use crate::machine::Machine;

//===========================================================================//

/// What a machine reset does to a banked space's selected bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BankResetPolicy {
    /// Return to the uninitialized state; the next bank select re-enables
    /// the MMU.
    #[default]
    Uninitialize,
    /// Keep whatever bank was last selected.
    KeepBank,
}

//===========================================================================//

/// Configures a banked address space: a window of `page_count` pages that
/// shows one of `bank_count` private banks, except for an optional shared
/// run of pages whose content is the same whatever bank is selected.
#[derive(Debug, Clone)]
pub struct BankedBuilder {
    label: String,
    bank_count: u32,
    page_size: u32,
    page_count: u32,
    shared: Option<(u32, u32)>,
    reset_policy: BankResetPolicy,
}

impl BankedBuilder {
    /// Starts from a single bank of 64 pages of 1kB.
    pub fn new(label: impl Into<String>) -> Self {
        BankedBuilder {
            label: label.into(),
            bank_count: 1,
            page_size: 0x400,
            page_count: 64,
            shared: None,
            reset_policy: BankResetPolicy::default(),
        }
    }

    pub fn bank_count(mut self, count: u32) -> Self {
        self.bank_count = count;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    pub fn page_count(mut self, count: u32) -> Self {
        self.page_count = count;
        self
    }

    /// Makes `count` pages starting at page `start` bank-independent. A
    /// count of zero removes the shared region.
    pub fn shared_region(mut self, start: u32, count: u32) -> Self {
        self.shared = if count == 0 { None } else { Some((start, count)) };
        self
    }

    pub fn reset_policy(mut self, policy: BankResetPolicy) -> Self {
        self.reset_policy = policy;
        self
    }

    pub fn build(self, machine: &Machine) -> Result<AddressSpace, ConfigError> {
        if self.bank_count == 0 {
            return Err(ConfigError::InvalidBankCount);
        }
        if self.page_count == 0 {
            return Err(ConfigError::InvalidPageCount);
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidPageSize {
                page_size: 0,
                size: 0,
            });
        }
        let size = self.page_count.checked_mul(self.page_size).ok_or(
            ConfigError::WindowTooLarge {
                pages: self.page_count,
                page_size: self.page_size,
            },
        )?;
        let (shared_start, shared_end) = match self.shared {
            Some((start, count)) => {
                let end = start.saturating_add(count);
                if end > self.page_count {
                    return Err(ConfigError::SharedRegionOutOfRange {
                        start,
                        end,
                        page_count: self.page_count,
                    });
                }
                (start * self.page_size, end * self.page_size)
            }
            None => (0, 0),
        };

        let banks = (0..self.bank_count)
            .map(|n| AddressSpace::new(format!("{} bank {}", self.label, n), size, machine))
            .collect::<Result<Vec<_>, _>>()?;
        let shared = if shared_end > shared_start {
            Some(AddressSpace::new(
                format!("{} shared", self.label),
                shared_end - shared_start,
                machine,
            )?)
        } else {
            None
        };

        log::debug!(
            "banked space `{}`: {} banks of {} x {:#X} pages, shared {:#06X}..{:#06X}, reset {:?}",
            self.label,
            self.bank_count,
            self.page_count,
            self.page_size,
            shared_start,
            shared_end,
            self.reset_policy
        );

        let map = BankMap {
            banks,
            shared,
            shared_start,
            shared_end,
            page_size: self.page_size,
            selected: Cell::new(None),
            policy: self.reset_policy,
        };
        let space = AddressSpace::with_mapping(
            self.label,
            size,
            0,
            machine.run_flag(),
            Mapping::Banked(map),
        );

        if self.reset_policy == BankResetPolicy::Uninitialize {
            let weak = space.downgrade();
            machine.on_reset_while(move || {
                let Some(space) = AddressSpace::upgrade(&weak) else {
                    return false;
                };
                if let Mapping::Banked(map) = space.mapping() {
                    map.selected.set(None);
                    log::debug!("`{}`: bank select cleared by reset", space.label());
                }
                true
            });
        }
        Ok(space)
    }
}

//===========================================================================//

pub(crate) struct BankMap {
    banks: Vec<AddressSpace>,
    shared: Option<AddressSpace>,
    shared_start: u32,
    shared_end: u32,
    page_size: u32,
    selected: Cell<Option<usize>>,
    policy: BankResetPolicy,
}

impl BankMap {
    #[inline]
    pub(crate) fn target(&self, addr: u32) -> Target {
        if let Some(shared) = &self.shared {
            if addr >= self.shared_start && addr < self.shared_end {
                return Target::Remote(shared.clone(), addr - self.shared_start);
            }
        }
        // Until the first select the hardware decodes bank 0.
        let bank = self.selected.get().unwrap_or(0);
        Target::Remote(self.banks[bank].clone(), addr)
    }

    pub(crate) fn banks(&self) -> &[AddressSpace] {
        &self.banks
    }

    pub(crate) fn shared(&self) -> Option<&AddressSpace> {
        self.shared.as_ref()
    }

    /// First address of the shared window, if there is one.
    pub(crate) fn shared_start(&self) -> Option<u32> {
        self.shared.as_ref().map(|_| self.shared_start)
    }

    pub(crate) fn selected(&self) -> Option<usize> {
        self.selected.get()
    }

    pub(crate) fn restore_selected(&self, bank: Option<usize>) {
        self.selected.set(bank);
    }
}

//===========================================================================//

impl AddressSpace {
    fn bank_map(&self) -> Result<&BankMap, ConfigError> {
        match self.mapping() {
            Mapping::Banked(map) => Ok(map),
            _ => Err(ConfigError::NotBanked(self.label().to_string())),
        }
    }

    /// Returns the selected bank, or `None` while no bank has been selected
    /// since construction or the last reset.
    pub fn bank(&self) -> Option<usize> {
        self.bank_map().ok().and_then(BankMap::selected)
    }

    /// Selects the bank visible through the window. Bank numbers wrap
    /// modulo the bank count, as a bank register with more select lines
    /// than installed banks would.
    ///
    /// The first select after construction or reset also marks the MMU
    /// initialized: there is no separate enable line.
    pub fn set_bank(&self, bank: usize) -> Result<(), ConfigError> {
        let map = self.bank_map()?;
        let bank = bank % map.banks.len();
        let previous = map.selected.replace(Some(bank));
        if previous.is_none() {
            log::debug!("`{}`: MMU initialized with bank {}", self.label(), bank);
        } else if crate::debug_flags::trace_banks() {
            log::trace!("`{}`: bank {:?} -> {}", self.label(), previous, bank);
        }
        Ok(())
    }

    /// Returns true once a bank has been selected. Always false for
    /// spaces that are not banked.
    pub fn is_initialized(&self) -> bool {
        self.bank().is_some()
    }

    pub fn bank_count(&self) -> usize {
        self.bank_map().map_or(0, |map| map.banks.len())
    }

    /// Returns the private store behind bank `n`, for loading its content.
    pub fn bank_space(&self, n: usize) -> Option<AddressSpace> {
        self.bank_map().ok()?.banks.get(n).cloned()
    }

    /// Returns the bank-independent store behind the shared region.
    pub fn shared_space(&self) -> Option<AddressSpace> {
        self.bank_map().ok()?.shared.clone()
    }

    pub fn bank_reset_policy(&self) -> Option<BankResetPolicy> {
        self.bank_map().ok().map(|map| map.policy)
    }

    pub fn bank_page_size(&self) -> Option<u32> {
        self.bank_map().ok().map(|map| map.page_size)
    }
}
