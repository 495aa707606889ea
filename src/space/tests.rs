use super::*;
use std::cell::Cell;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn flat(size: u32) -> (Machine, AddressSpace) {
    init_logging();
    let machine = Machine::new("test");
    let space = AddressSpace::new("ram", size, &machine).unwrap();
    (machine, space)
}

fn mmu(machine: &Machine, policy: BankResetPolicy) -> AddressSpace {
    BankedBuilder::new("mmu")
        .bank_count(16)
        .page_size(1024)
        .page_count(64)
        .shared_region(48, 16)
        .reset_policy(policy)
        .build(machine)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let (_machine, space) = flat(0x10000);
        for (addr, value) in [(0x0000u32, 0x00u32), (0x1234, 0xAB), (0xFFFF, 0x1FF)] {
            space.write(addr, (value & 0xFF) as u8);
            assert_eq!(u32::from(space.read(addr)), value & 0xFF);
        }
    }

    #[test]
    fn test_zero_size_rejected() {
        let machine = Machine::new("test");
        assert_eq!(
            AddressSpace::new("empty", 0, &machine).err(),
            Some(ConfigError::ZeroSize("empty".to_string()))
        );
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_read_panics() {
        let (_machine, space) = flat(0x100);
        space.read(0x100);
    }

    #[test]
    fn test_read_listener_ordering() {
        let (_machine, space) = flat(0x100);
        space.write(0x10, 1);
        // L1 doubles, L2 adds ten; L2 was added last so it runs first.
        space.add_read_listener(0x10, |_, v| v.wrapping_mul(2));
        space.add_read_listener(0x10, |_, v| v.wrapping_add(10));
        assert_eq!(space.read(0x10), 22);
        assert_eq!(space.peek(0x10), 1);
        assert_eq!(space.read(0x11), 0);
    }

    #[test]
    fn test_global_listeners_run_after_local() {
        let (_machine, space) = flat(0x100);
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["global-1", "global-2"] {
            let order = order.clone();
            space.add_global_read_listener(move |_, v| {
                order.borrow_mut().push(tag);
                v
            });
        }
        for tag in ["local-1", "local-2"] {
            let order = order.clone();
            space.add_read_listener(0x20, move |_, v| {
                order.borrow_mut().push(tag);
                v
            });
        }
        space.read(0x20);
        assert_eq!(
            *order.borrow(),
            vec!["local-2", "local-1", "global-2", "global-1"]
        );
    }

    #[test]
    fn test_write_listeners_see_attempt_and_prior() {
        let (_machine, space) = flat(0x100);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        space.add_write_listener(0x40, move |addr, attempted, prior| {
            log.borrow_mut().push((addr, attempted, prior))
        });
        let log = seen.clone();
        space.add_global_write_listener(move |addr, attempted, prior| {
            log.borrow_mut().push((addr | 0x1000, attempted, prior))
        });
        space.write(0x40, 0x11);
        space.write(0x40, 0x22);
        space.write(0x41, 0x33);
        assert_eq!(
            *seen.borrow(),
            vec![
                (0x40, 0x11, 0x00),
                (0x1040, 0x11, 0x00),
                (0x40, 0x22, 0x11),
                (0x1040, 0x22, 0x11),
                (0x1041, 0x33, 0x00),
            ]
        );
    }

    #[test]
    fn test_read_only_while_live() {
        let (machine, space) = flat(0x10000);
        space.write(0x0010, 0x42);
        space.mark_read_only(0x0000..0x1000).unwrap();

        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        space.add_write_listener(0x0010, move |addr, attempted, prior| {
            s.set(Some((addr, attempted, prior)))
        });

        machine.start();
        space.write(0x0010, 0x99);
        assert_eq!(space.read(0x0010), 0x42);
        assert_eq!(seen.get(), Some((0x0010, 0x99, 0x42)));

        // Unprotected neighbours still take writes.
        space.write(0x1000, 0x99);
        assert_eq!(space.read(0x1000), 0x99);
    }

    #[test]
    fn test_read_only_not_enforced_during_setup() {
        let (machine, space) = flat(0x100);
        space.mark_read_only(..).unwrap();
        space.mark_read_only(0x00..0x10).unwrap();
        space.write(0x05, 0xAA);
        assert_eq!(space.read(0x05), 0xAA);
        machine.start();
        space.write(0x05, 0xBB);
        assert_eq!(space.read(0x05), 0xAA);
        machine.stop();
        space.write(0x05, 0xCC);
        assert_eq!(space.read(0x05), 0xCC);
    }

    #[test]
    fn test_mark_read_only_range_checked() {
        let (_machine, space) = flat(0x100);
        assert!(space.mark_read_only(0x80..0x101).is_err());
        assert!(!space.is_read_only(0x80));
        space.mark_read_only(0xF0..=0xFF).unwrap();
        assert!(space.is_read_only(0xFF));
        space.clear_read_only(0xF0..0xF8).unwrap();
        assert!(!space.is_read_only(0xF7));
        assert!(space.is_read_only(0xF8));
    }

    #[test]
    fn test_rom_constructor() {
        let machine = Machine::new("test");
        let rom = AddressSpace::rom("basic", &[0xA9, 0x00, 0x60], &machine).unwrap();
        assert_eq!(rom.size(), 3);
        machine.start();
        rom.write(0, 0xFF);
        assert_eq!(rom.read(0), 0xA9);
    }

    #[test]
    fn test_remove_listener() {
        let (_machine, space) = flat(0x100);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let id = space.add_write_listener(0x10, move |_, _, _| h.set(h.get() + 1));
        let h = hits.clone();
        let global = space.add_global_write_listener(move |_, _, _| h.set(h.get() + 10));
        space.write(0x10, 1);
        assert_eq!(hits.get(), 11);
        assert!(space.remove_listener(id));
        assert!(space.remove_listener(global));
        assert!(!space.remove_listener(id));
        space.write(0x10, 2);
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits() {
        let (_machine, space) = flat(0x100);
        let hits = Rc::new(Cell::new(0));
        let inner_space = space.clone();
        let h = hits.clone();
        space.add_global_write_listener(move |_, _, _| {
            let h = h.clone();
            inner_space.add_global_write_listener(move |_, _, _| h.set(h.get() + 1));
        });
        space.write(0, 0);
        assert_eq!(hits.get(), 0);
        space.write(0, 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_listener_writes_other_register() {
        // A peripheral that latches a status byte when its data register is
        // written.
        let (_machine, space) = flat(0x100);
        let status = space.clone();
        space.add_write_listener(0x80, move |_, value, _| status.write(0x81, value | 0x80));
        space.write(0x80, 0x05);
        assert_eq!(space.read(0x81), 0x85);
    }

    #[test]
    fn test_names() {
        let (_machine, space) = flat(0x10000);
        assert_eq!(space.name(0x00FF), "0x00FF");
        space.set_name(0xD000, "VIC_CTRL");
        assert_eq!(space.name(0xD000), "VIC_CTRL");

        let machine = Machine::new("big");
        let big = AddressSpace::new("big", 0x100000, &machine).unwrap();
        assert_eq!(big.name(0x42), "0x00042");
    }

    #[test]
    fn test_load_and_contents() {
        let (_machine, space) = flat(0x8);
        space.load(2, &[1, 2, 3]).unwrap();
        assert_eq!(space.contents(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
        assert!(matches!(
            space.load(6, &[1, 2, 3]),
            Err(ConfigError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_flat_resolves_to_itself() {
        let (_machine, space) = flat(0x100);
        let (target, local) = space.resolve(0x42);
        assert!(target.same_space(&space));
        assert_eq!(local, 0x42);
        assert!(!space.is_delegating());
    }

    // ---- banked ----------------------------------------------------------

    #[test]
    fn test_bank_isolation() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.bank_space(1).unwrap().load(0x0000, &[0x5E]).unwrap();
        space.set_bank(0).unwrap();
        space.write(0x0000, 0xAA);
        space.set_bank(1).unwrap();
        assert_eq!(space.read(0x0000), 0x5E);
        space.set_bank(0).unwrap();
        assert_eq!(space.read(0x0000), 0xAA);
    }

    #[test]
    fn test_shared_window() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.set_bank(0).unwrap();
        space.write(0xF000, 0x55);
        space.set_bank(5).unwrap();
        assert_eq!(space.read(0xF000), 0x55);
        let (target, local) = space.resolve(0xF000);
        assert!(target.same_space(&space.shared_space().unwrap()));
        assert_eq!(local, 0x3000);
        // The page just below the shared region is still banked.
        space.write(0xBFFF, 0x01);
        space.set_bank(6).unwrap();
        assert_eq!(space.read(0xBFFF), 0x00);
    }

    #[test]
    fn test_bank_state_machine() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        assert_eq!(space.bank(), None);
        assert!(!space.is_initialized());
        // Uninitialized decodes as bank 0.
        space.write(0x0100, 0x12);
        assert_eq!(space.bank_space(0).unwrap().read(0x0100), 0x12);

        space.set_bank(3).unwrap();
        assert_eq!(space.bank(), Some(3));
        assert!(space.is_initialized());
        space.set_bank(19).unwrap();
        assert_eq!(space.bank(), Some(3));
    }

    #[test]
    fn test_reset_uninitializes_bank() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.set_bank(7).unwrap();
        machine.reset();
        assert_eq!(space.bank(), None);
    }

    #[test]
    fn test_reset_keeps_bank() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::KeepBank);
        space.set_bank(7).unwrap();
        machine.reset();
        assert_eq!(space.bank(), Some(7));
        assert_eq!(space.bank_reset_policy(), Some(BankResetPolicy::KeepBank));
    }

    #[test]
    fn test_dropped_banked_space_leaves_no_reset_hook() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        assert_eq!(machine.reset_hook_count(), 1);
        machine.reset();
        assert_eq!(machine.reset_hook_count(), 1);
        drop(space);
        machine.reset();
        assert_eq!(machine.reset_hook_count(), 0);
    }

    #[test]
    fn test_banked_write_runs_outer_listeners_first() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.set_bank(2).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        space.add_global_write_listener(move |addr, attempted, prior| {
            log.borrow_mut().push(("fabric", addr, attempted, prior))
        });
        let log = order.clone();
        space
            .bank_space(2)
            .unwrap()
            .add_global_write_listener(move |addr, attempted, prior| {
                log.borrow_mut().push(("bank", addr, attempted, prior))
            });
        space.write(0x0123, 0x44);
        space.write(0x0123, 0x45);
        assert_eq!(
            *order.borrow(),
            vec![
                ("fabric", 0x0123, 0x44, 0x00),
                ("bank", 0x0123, 0x44, 0x00),
                ("fabric", 0x0123, 0x45, 0x44),
                ("bank", 0x0123, 0x45, 0x44),
            ]
        );
    }

    #[test]
    fn test_banked_read_applies_target_then_outer_listeners() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        let bank0 = space.bank_space(0).unwrap();
        bank0.load(0x10, &[0x01]).unwrap();
        bank0.add_read_listener(0x10, |_, v| v + 1);
        space.add_read_listener(0x10, |_, v| v * 10);
        assert_eq!(space.read(0x10), 20);
        space.set_bank(1).unwrap();
        assert_eq!(space.read(0x10), 0);
    }

    #[test]
    fn test_banked_read_only_protects_every_bank() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.mark_read_only(0x0000..0x0400).unwrap();
        machine.start();
        space.set_bank(4).unwrap();
        space.write(0x0010, 0x99);
        assert_eq!(space.read(0x0010), 0x00);
        space.write(0x0400, 0x99);
        assert_eq!(space.read(0x0400), 0x99);
    }

    #[test]
    fn test_banked_names_fall_through() {
        let machine = Machine::new("test");
        let space = mmu(&machine, BankResetPolicy::Uninitialize);
        space.shared_space().unwrap().set_name(0x0000, "IO_BASE");
        assert_eq!(space.name(0xC000), "IO_BASE");
        assert_eq!(space.name(0x0000), "0x0000");
    }

    #[test]
    fn test_banked_config_errors() {
        let machine = Machine::new("test");
        assert_eq!(
            BankedBuilder::new("x").bank_count(0).build(&machine).err(),
            Some(ConfigError::InvalidBankCount)
        );
        assert_eq!(
            BankedBuilder::new("x").page_count(0).build(&machine).err(),
            Some(ConfigError::InvalidPageCount)
        );
        assert!(BankedBuilder::new("x").page_size(0).build(&machine).is_err());
        assert_eq!(
            BankedBuilder::new("x")
                .page_count(64)
                .shared_region(60, 8)
                .build(&machine)
                .err(),
            Some(ConfigError::SharedRegionOutOfRange {
                start: 60,
                end: 68,
                page_count: 64
            })
        );
    }

    #[test]
    fn test_bank_ops_on_flat_space() {
        let (_machine, space) = flat(0x100);
        assert_eq!(
            space.set_bank(1),
            Err(ConfigError::NotBanked("ram".to_string()))
        );
        assert_eq!(space.bank(), None);
        assert_eq!(space.bank_count(), 0);
        assert!(space.bank_space(0).is_none());
    }

    // ---- paged -----------------------------------------------------------

    #[test]
    fn test_page_mapping() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x10000, 0x1000, &machine).unwrap();
        let rom = AddressSpace::rom("kernal", &[0xEE; 0x2000], &machine).unwrap();
        rom.load(0x1FFF, &[0x7F]).unwrap();

        space.map_memory(&rom, 0xE000, 0x0000, 0x2000).unwrap();
        assert_eq!(space.read(0xE000), 0xEE);
        assert_eq!(space.read(0xFFFF), 0x7F);
        let (target, local) = space.resolve(0xF001);
        assert!(target.same_space(&rom));
        assert_eq!(local, 0x1001);

        // Unmapped pages use the space's own cells.
        space.write(0x1234, 0x56);
        assert_eq!(space.read(0x1234), 0x56);
        let (target, _) = space.resolve(0x1234);
        assert!(target.same_space(&space));
    }

    #[test]
    fn test_page_mapping_with_offset() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x4000, 0x1000, &machine).unwrap();
        let ram = AddressSpace::new("ext", 0x8000, &machine).unwrap();
        space.map_memory(&ram, 0x1000, 0x5000, 0x2000).unwrap();
        space.write(0x2010, 0xAB);
        assert_eq!(ram.read(0x6010), 0xAB);
        assert_eq!(space.resolve(0x1FFF).1, 0x5FFF);
    }

    #[test]
    fn test_page_map_atomicity() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x10000, 0x4000, &machine).unwrap();
        space.load(0x0000, &[0x3C]).unwrap();
        let target = AddressSpace::new("overlay", 0x10000, &machine).unwrap();
        target.load(0x0000, &[0xC3]).unwrap();

        assert_eq!(
            space.map_memory(&target, 0x0000, 0, 0x2000),
            Err(ConfigError::Misaligned {
                what: "size",
                value: 0x2000,
                page_size: 0x4000
            })
        );
        assert_eq!(space.read(0x0000), 0x3C);

        // A range that runs off the end of the target installs nothing
        // either, not even the pages that would have fit.
        assert!(matches!(
            space.map_memory(&target, 0x0000, 0xC000, 0x8000),
            Err(ConfigError::TargetOutOfBounds { .. })
        ));
        assert_eq!(space.read(0x0000), 0x3C);
    }

    #[test]
    fn test_page_map_validation() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x10000, 0x1000, &machine).unwrap();
        let ram = AddressSpace::new("ram", 0x10000, &machine).unwrap();
        let other = AddressSpace::paged("other", 0x10000, 0x1000, &machine).unwrap();

        assert!(matches!(
            space.map_memory(&ram, 0x0800, 0, 0x1000),
            Err(ConfigError::Misaligned { what: "base address", .. })
        ));
        assert_eq!(space.map_memory(&ram, 0, 0, 0), Err(ConfigError::EmptyMapping));
        assert!(matches!(
            space.map_memory(&ram, 0xF000, 0, 0x2000),
            Err(ConfigError::RangeOutOfBounds { .. })
        ));
        assert_eq!(
            space.map_memory(&space, 0, 0, 0x1000),
            Err(ConfigError::SelfMapping("cpu".to_string()))
        );
        assert_eq!(
            space.map_memory(&other, 0, 0, 0x1000),
            Err(ConfigError::NestedDelegation("other".to_string()))
        );
        assert_eq!(
            ram.map_memory(&space, 0, 0, 0x1000),
            Err(ConfigError::NotPaged("ram".to_string()))
        );
    }

    #[test]
    fn test_paged_size_must_be_page_multiple() {
        let machine = Machine::new("test");
        assert_eq!(
            AddressSpace::paged("cpu", 0x1800, 0x1000, &machine).err(),
            Some(ConfigError::InvalidPageSize {
                page_size: 0x1000,
                size: 0x1800
            })
        );
        assert!(AddressSpace::paged("cpu", 0x1000, 0, &machine).is_err());
    }

    #[test]
    fn test_paged_rom_protected_while_running() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x2000, 0x1000, &machine).unwrap();
        let rom = AddressSpace::rom("rom", &[0x11; 0x1000], &machine).unwrap();
        space.map_memory(&rom, 0x1000, 0, 0x1000).unwrap();

        let attempts = Rc::new(Cell::new(0));
        let a = attempts.clone();
        rom.add_global_write_listener(move |_, _, _| a.set(a.get() + 1));

        machine.start();
        space.write(0x1000, 0x22);
        assert_eq!(space.read(0x1000), 0x11);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_remap_replaces_pages() {
        let machine = Machine::new("test");
        let space = AddressSpace::paged("cpu", 0x2000, 0x1000, &machine).unwrap();
        let a = AddressSpace::new("a", 0x1000, &machine).unwrap();
        let b = AddressSpace::new("b", 0x1000, &machine).unwrap();
        a.load(0, &[0xAA]).unwrap();
        b.load(0, &[0xBB]).unwrap();
        space.map_memory(&a, 0, 0, 0x1000).unwrap();
        assert_eq!(space.read(0), 0xAA);
        space.map_memory(&b, 0, 0, 0x1000).unwrap();
        assert_eq!(space.read(0), 0xBB);
        assert_eq!(space.page_size(), Some(0x1000));
    }
}
