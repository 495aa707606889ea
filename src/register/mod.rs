//! Named, width-bound CPU and peripheral registers.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::ConfigError;
use crate::machine::Machine;
use crate::space::AddressSpace;


/// Classification of a register, for debuggers and register dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFamily {
    Accumulator,
    Index,
    ProgramCounter,
    StackPointer,
    Flags,
    Control,
    Status,
    Data,
    Address,
    General,
}

impl fmt::Display for RegisterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterFamily::Accumulator => "accumulator",
            RegisterFamily::Index => "index",
            RegisterFamily::ProgramCounter => "program counter",
            RegisterFamily::StackPointer => "stack pointer",
            RegisterFamily::Flags => "flags",
            RegisterFamily::Control => "control",
            RegisterFamily::Status => "status",
            RegisterFamily::Data => "data",
            RegisterFamily::Address => "address",
            RegisterFamily::General => "general",
        };
        f.write_str(name)
    }
}

/// A register as seen by CPU cores, peripherals and debuggers.
///
/// Values are masked to the register's width on both read and write.
pub trait Register {
    fn name(&self) -> &str;
    fn family(&self) -> RegisterFamily;
    /// Width in bits, 1 to 32.
    fn width(&self) -> u32;
    fn reset_value(&self) -> u32;
    fn value(&self) -> u32;
    fn set_value(&self, value: u32);

    fn reset(&self) {
        self.set_value(self.reset_value());
    }

    fn mask(&self) -> u32 {
        width_mask(self.width())
    }
}

pub(crate) fn width_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

fn check_width(name: &str, width: u32) -> Result<(), ConfigError> {
    if width == 0 || width > 32 {
        return Err(ConfigError::InvalidWidth {
            name: name.to_string(),
            width,
        });
    }
    Ok(())
}

//===========================================================================//

/// A register holding its own value.
#[derive(Debug)]
pub struct ScalarRegister {
    name: String,
    family: RegisterFamily,
    width: u32,
    reset_value: u32,
    value: Cell<u32>,
}

impl ScalarRegister {
    pub fn new(
        name: impl Into<String>,
        family: RegisterFamily,
        width: u32,
        reset_value: u32,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_width(&name, width)?;
        let reset_value = reset_value & width_mask(width);
        Ok(ScalarRegister {
            name,
            family,
            width,
            reset_value,
            value: Cell::new(reset_value),
        })
    }
}

impl Register for ScalarRegister {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> RegisterFamily {
        self.family
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn reset_value(&self) -> u32 {
        self.reset_value
    }

    fn value(&self) -> u32 {
        self.value.get()
    }

    fn set_value(&self, value: u32) {
        self.value.set(value & width_mask(self.width));
    }
}

//===========================================================================//

/// A register whose value lives in memory, e.g. a peripheral register that
/// is also visible on the bus.
///
/// Registers wider than a byte occupy consecutive cells, least significant
/// byte first. Accesses go through the space's listeners and protection.
pub struct MemoryRegister {
    name: String,
    family: RegisterFamily,
    width: u32,
    reset_value: u32,
    space: AddressSpace,
    addr: u32,
}

impl MemoryRegister {
    pub fn new(
        name: impl Into<String>,
        family: RegisterFamily,
        width: u32,
        reset_value: u32,
        space: &AddressSpace,
        addr: u32,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_width(&name, width)?;
        let cells = width.div_ceil(8);
        if addr.checked_add(cells).map_or(true, |end| end > space.size()) {
            return Err(ConfigError::AddressOutOfRange {
                space: space.label().to_string(),
                addr,
                size: space.size(),
            });
        }
        Ok(MemoryRegister {
            name,
            family,
            width,
            reset_value: reset_value & width_mask(width),
            space: space.clone(),
            addr,
        })
    }

    pub fn address(&self) -> u32 {
        self.addr
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    fn cells(&self) -> u32 {
        self.width.div_ceil(8)
    }
}

impl Register for MemoryRegister {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> RegisterFamily {
        self.family
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn reset_value(&self) -> u32 {
        self.reset_value
    }

    fn value(&self) -> u32 {
        let value = (0..self.cells()).fold(0u32, |acc, i| {
            acc | (u32::from(self.space.read(self.addr + i)) << (8 * i))
        });
        value & width_mask(self.width)
    }

    fn set_value(&self, value: u32) {
        let value = value & width_mask(self.width);
        for i in 0..self.cells() {
            self.space.write(self.addr + i, (value >> (8 * i)) as u8);
        }
    }
}

impl fmt::Debug for MemoryRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegister")
            .field("name", &self.name)
            .field("space", &self.space.label())
            .field("addr", &format_args!("{:#06X}", self.addr))
            .field("width", &self.width)
            .finish()
    }
}

//===========================================================================//

/// A register made of two narrower ones, such as a 16-bit pair built from
/// two 8-bit halves that stay individually addressable.
pub struct CompositeRegister {
    name: String,
    low: Rc<dyn Register>,
    high: Rc<dyn Register>,
}

impl CompositeRegister {
    pub fn new(
        name: impl Into<String>,
        low: Rc<dyn Register>,
        high: Rc<dyn Register>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_width(&name, low.width() + high.width())?;
        Ok(CompositeRegister { name, low, high })
    }

    pub fn low(&self) -> &Rc<dyn Register> {
        &self.low
    }

    pub fn high(&self) -> &Rc<dyn Register> {
        &self.high
    }
}

impl Register for CompositeRegister {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> RegisterFamily {
        self.low.family()
    }

    fn width(&self) -> u32 {
        self.low.width() + self.high.width()
    }

    fn reset_value(&self) -> u32 {
        self.low.reset_value() | (self.high.reset_value() << self.low.width())
    }

    fn value(&self) -> u32 {
        self.low.value() | (self.high.value() << self.low.width())
    }

    fn set_value(&self, value: u32) {
        self.low.set_value(value & self.low.mask());
        self.high.set_value(value >> self.low.width());
    }

    fn reset(&self) {
        self.low.reset();
        self.high.reset();
    }
}

impl fmt::Debug for CompositeRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRegister")
            .field("name", &self.name)
            .field("low", &self.low.name())
            .field("high", &self.high.name())
            .finish()
    }
}

//===========================================================================//

/// The registers of one CPU or peripheral, in display order.
#[derive(Default)]
pub struct RegisterFile {
    registers: Vec<Rc<dyn Register>>,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            registers: Vec::new(),
        }
    }

    /// Adds a register; names must be unique within the file.
    pub fn add(&mut self, register: Rc<dyn Register>) -> Result<(), ConfigError> {
        if self.get(register.name()).is_some() {
            return Err(ConfigError::DuplicateRegister(register.name().to_string()));
        }
        self.registers.push(register);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn Register>> {
        self.registers.iter().find(|r| r.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn Register>> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn reset_all(&self) {
        for register in &self.registers {
            register.reset();
        }
    }

    /// Resets every register of this file on each machine reset. Registers
    /// added afterwards are not included.
    pub fn attach(&self, machine: &Machine) {
        let registers: Vec<Weak<dyn Register>> =
            self.registers.iter().map(Rc::downgrade).collect();
        machine.on_reset_while(move || {
            let mut alive = false;
            for register in registers.iter().filter_map(Weak::upgrade) {
                register.reset();
                alive = true;
            }
            alive
        });
    }

    /// One `NAME=value` line per register, hex-padded to its width.
    pub fn dump(&self) -> String {
        self.registers
            .iter()
            .map(|r| {
                let digits = r.width().div_ceil(4) as usize;
                format!("{}={:0width$X} ({})", r.name(), r.value(), r.family(), width = digits)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
