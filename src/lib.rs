//! Memory and bus core for retro-computing machine emulators.
//!
//! CPU cores and peripherals talk to memory exclusively through
//! [AddressSpace]: flat RAM/ROM, bank-switched windows and page-mapped
//! compositions all look the same to them. Peripherals hook individual
//! addresses with listeners, protocol decoders watch single bits through
//! [BitView]s, and CPU state lives in [Register]s.
//!
//! ```
//! use retro_membus::{AddressSpace, BankedBuilder, Machine};
//!
//! let machine = Machine::new("demo");
//! let mmu = BankedBuilder::new("mmu")
//!     .bank_count(16)
//!     .page_size(1024)
//!     .page_count(64)
//!     .shared_region(48, 16)
//!     .build(&machine)
//!     .unwrap();
//!
//! mmu.set_bank(0).unwrap();
//! mmu.write(0xF000, 0x55);
//! mmu.set_bank(5).unwrap();
//! assert_eq!(mmu.read(0xF000), 0x55);
//! ```

pub mod bits;
pub mod cpu_bus;
pub mod debug_flags;
pub mod error;
pub mod machine;
pub mod port;
pub mod register;
pub mod snapshot;
pub mod space;

pub use bits::BitView;
pub use cpu_bus::CpuBus;
pub use error::{ConfigError, PortError, SnapshotError};
pub use machine::{Machine, RunFlag};
pub use port::{inbound_channel, InboundQueue, InboundSender, PortWrite};
pub use register::{
    CompositeRegister, MemoryRegister, Register, RegisterFamily, RegisterFile, ScalarRegister,
};
pub use snapshot::SpaceSnapshot;
pub use space::{AddressSpace, BankResetPolicy, BankedBuilder, ListenerId};
