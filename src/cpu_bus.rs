//! Trait representing the minimal bus interface CPU cores are written against.

use crate::space::AddressSpace;

pub trait CpuBus {
    fn read_u8(&mut self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, value: u8);
    fn read_u16(&mut self, addr: u32) -> u16 {
        let lo = self.read_u8(addr) as u16;
        let hi = self.read_u8(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }
    fn write_u16(&mut self, addr: u32, value: u16) {
        self.write_u8(addr, (value & 0xFF) as u8);
        self.write_u8(addr.wrapping_add(1), (value >> 8) as u8);
    }
    /// Big-endian variant for 68k-style cores.
    fn read_u16_be(&mut self, addr: u32) -> u16 {
        let hi = self.read_u8(addr) as u16;
        let lo = self.read_u8(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }
    fn write_u16_be(&mut self, addr: u32, value: u16) {
        self.write_u8(addr, (value >> 8) as u8);
        self.write_u8(addr.wrapping_add(1), (value & 0xFF) as u8);
    }
}

/// Addresses wrap at the space size, as on an address bus whose upper lines
/// are not decoded.
impl CpuBus for AddressSpace {
    fn read_u8(&mut self, addr: u32) -> u8 {
        self.read(addr % self.size())
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        self.write(addr % self.size(), value)
    }
}
