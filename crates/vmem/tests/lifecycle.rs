use region::{Allocation, Protection};
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;
use vmem::platform::{Reservation, Unsupported};
use vmem::{
    AddressSpace, FaultResolution, HandlerSet, Platform, RegionKind, Resolved, Strategy,
    VirtualMemory, VmemConfig, VmemError, VmemMapping,
};

const MB: usize = 1024 * 1024;

fn mapped(config: VmemConfig) -> AddressSpace {
    let mut space = AddressSpace::new(config);
    space.reserve();
    space.init_mappings().unwrap();
    space
}

fn host_ptr(space: &AddressSpace, addr: u32) -> *const u8 {
    match space.resolve(addr) {
        Resolved::Memory(ptr) => ptr.as_ptr(),
        other => panic!("{:#010X} resolved to {:?}", addr, other),
    }
}

/// Reserves fine but cannot create views
struct BrokenViews {
    reserved: Option<Allocation>,
    destroyed: Rc<Cell<bool>>,
}

impl VirtualMemory for BrokenViews {
    fn reserve(&mut self, _: usize, _: usize, _: usize) -> Result<Reservation, VmemError> {
        let mut allocation = region::alloc(4096, Protection::NONE)?;
        let base = NonNull::new(allocation.as_mut_ptr::<u8>()).ok_or(VmemError::NotMapped)?;
        self.reserved = Some(allocation);
        Ok(Reservation {
            base,
            size: 4096,
            context: None,
            context_size: 0,
        })
    }

    fn create_mappings(&mut self, _: &[VmemMapping]) -> Result<(), VmemError> {
        Err(VmemError::Unsupported)
    }

    fn ondemand_page(&mut self, _: NonNull<u8>, _: usize) -> Result<(), VmemError> {
        Err(VmemError::Unsupported)
    }

    fn destroy(&mut self) {
        self.reserved = None;
        self.destroyed.set(true);
    }
}

#[test]
fn standard_areas_are_mapped_under_either_strategy() {
    for disable_aliasing in [false, true] {
        let mut space = mapped(VmemConfig {
            disable_aliasing,
            ..VmemConfig::default()
        });
        if disable_aliasing {
            assert_eq!(space.strategy(), Some(Strategy::Flat));
            assert!(space.virtual_base().is_none());
        }

        // Main RAM mirrors over 0x0C..=0x0F
        space.write32(0x0C00_0010, 0xCAFE_F00D);
        assert_eq!(space.read32(0x0F00_0010), 0xCAFE_F00D);

        // VRAM at 0x04, mirrored onto 0x06; 8 MB wraps inside the page
        space.write32(0x0400_0000, 0x1122_3344);
        assert_eq!(space.read32(0x0600_0000), 0x1122_3344);
        assert_eq!(space.read32(0x0480_0000), 0x1122_3344);

        // No extended RAM on a Dreamcast
        assert_eq!(space.read32(0x0A00_0000), 0xFFFF_FFFF);
        assert!(space.backing(RegionKind::Eram).is_none());

        let ram = space.backing(RegionKind::Ram).unwrap();
        assert_eq!(ram.size(), 16 * MB);
        assert_eq!(unsafe { ram.as_ptr().add(0x10).cast::<u32>().read() }, 0xCAFE_F00D);
        assert!(space.backing(RegionKind::Aram).is_some());
    }
}

#[test]
fn naomi2_maps_extended_ram() {
    let mut space = mapped(VmemConfig {
        platform: Platform::Naomi2,
        disable_aliasing: true,
        ..VmemConfig::default()
    });

    assert_eq!(space.backing(RegionKind::Eram).unwrap().size(), 32 * MB);
    space.write32(0x0B00_0000, 0x0BAD_CAFE);
    assert_eq!(space.read32(0x0A00_0000), 0);
    assert_eq!(space.read32(0x0B00_0000), 0x0BAD_CAFE);
    // 32 MB main RAM spans two pages
    space.write8(0x0D00_0000, 0x42);
    assert_eq!(space.read8(0x0F00_0000), 0x42);
    assert_eq!(space.read8(0x0C00_0000), 0);
}

#[cfg(unix)]
#[test]
fn aliased_views_share_pages() {
    let mut space = mapped(VmemConfig::default());
    let Some(base) = space.virtual_base() else {
        // Host refused shared memory; the flat case is covered elsewhere
        return;
    };
    assert_eq!(space.strategy(), Some(Strategy::Aliased));

    space.write32(0x0C00_0100, 0xA5A5_5A5A);
    unsafe {
        assert_eq!(
            base.as_ptr().add(0x0E00_0100).cast::<u32>().read(),
            0xA5A5_5A5A
        );
        base.as_ptr().add(0x0680_0200).cast::<u32>().write(0x600D_F00D);
    }
    assert_eq!(space.read32(0x0400_0200), 0x600D_F00D);
    let aram = space.backing(RegionKind::Aram).unwrap();
    assert_eq!(aram.as_ptr(), unsafe { base.as_ptr().add(0x0080_0000) });
}

#[test]
fn vram_protection_round_trip() {
    for disable_aliasing in [false, true] {
        let mut space = mapped(VmemConfig {
            disable_aliasing,
            ..VmemConfig::default()
        });

        let ptr = host_ptr(&space, 0x0400_1234);
        assert_eq!(space.get_vram_offset(ptr), Some(0x1234));
        assert_eq!(space.get_vram_offset(host_ptr(&space, 0x0600_1234)), Some(0x1234));
        assert_eq!(space.get_vram_offset(host_ptr(&space, 0x0C00_1234)), None);
        assert_eq!(space.handle_fault(ptr), FaultResolution::VramWrite(0x1234));

        space.protect_vram(0x1000, 0x1000).unwrap();
        assert_eq!(space.read32(0x0400_1234), 0);
        space.unprotect_vram(0x1000, 0x1000).unwrap();
        space.write32(0x0400_1234, 7);
        assert_eq!(space.read32(0x0400_1234), 7);
    }
}

#[test]
fn vram_window_moves_to_another_thread() {
    let space = mapped(VmemConfig {
        disable_aliasing: true,
        ..VmemConfig::default()
    });
    let window = space.vram_window().unwrap();

    std::thread::spawn(move || {
        window.protect(0, 0x2000)?;
        window.unprotect(0, 0x2000)
    })
    .join()
    .unwrap()
    .unwrap();
}

#[test]
fn protection_needs_mapped_memory() {
    let space = AddressSpace::new(VmemConfig::default());
    assert!(matches!(
        space.protect_vram(0, 0x1000),
        Err(VmemError::NotMapped)
    ));
    assert!(space.vram_window().is_none());
    assert_eq!(space.get_vram_offset(std::ptr::null()), None);
}

#[test]
fn unsupported_host_falls_back_to_flat() {
    let mut space = AddressSpace::with_virtual_memory(VmemConfig::default(), Box::new(Unsupported));
    assert!(!space.reserve());
    space.init_mappings().unwrap();
    assert_eq!(space.strategy(), Some(Strategy::Flat));

    space.write16(0x0C00_0002, 0xBEEF);
    assert_eq!(space.read16(0x0D00_0002), 0xBEEF);
}

#[test]
fn failed_views_release_the_reservation() {
    let destroyed = Rc::new(Cell::new(false));
    let vm = BrokenViews {
        reserved: None,
        destroyed: destroyed.clone(),
    };
    let mut space = AddressSpace::with_virtual_memory(VmemConfig::default(), Box::new(vm));

    assert!(space.reserve());
    space.init_mappings().unwrap();
    assert!(destroyed.get());
    assert_eq!(space.strategy(), Some(Strategy::Flat));
}

#[test]
fn release_resets_everything() {
    let mut space = mapped(VmemConfig::default());
    let id = space.register_handler(HandlerSet::new().read32(|_| 1));
    space.map_handler(id, 0x1F, 0x1F);
    assert_eq!(space.handler_count(), 2);

    space.release();
    assert_eq!(space.strategy(), None);
    assert_eq!(space.handler_count(), 1);
    assert!(space.backing(RegionKind::Ram).is_none());
    assert_eq!(space.read32(0x0C00_0000), 0xFFFF_FFFF);
    assert_eq!(space.read32(0x1F00_0000), 0xFFFF_FFFF);

    // And can be mapped again
    space.reserve();
    space.init_mappings().unwrap();
    assert_eq!(space.read32(0x0C00_0000), 0);
}

#[test]
fn term_drops_the_unmapped_handler() {
    let mut space = mapped(VmemConfig::default());
    space.term();
    assert_eq!(space.handler_count(), 0);
    space.init();
    assert_eq!(space.handler_count(), 1);
}

#[test]
fn context_block_is_provided() {
    for disable_aliasing in [false, true] {
        let mut space = mapped(VmemConfig {
            disable_aliasing,
            context_block_size: 0x4000,
            ..VmemConfig::default()
        });
        let context = space.context_block().unwrap();

        if space.strategy() == Some(Strategy::Aliased) {
            assert!(context.as_ptr() < space.virtual_base().unwrap().as_ptr());
            assert_eq!(
                space.handle_fault(context.as_ptr()),
                FaultResolution::ContextCommitted
            );
        } else {
            assert_eq!(space.handle_fault(context.as_ptr()), FaultResolution::Unhandled);
        }
        unsafe {
            context.as_ptr().write(0x5A);
            assert_eq!(context.as_ptr().read(), 0x5A);
        }
    }
}

#[test]
#[should_panic(expected = "without a preceding reserve")]
fn init_mappings_needs_reserve() {
    let mut space = AddressSpace::new(VmemConfig::default());
    let _ = space.init_mappings();
}

#[test]
#[should_panic(expected = "already reserved")]
fn double_reserve_panics() {
    let mut space = AddressSpace::new(VmemConfig {
        disable_aliasing: true,
        ..VmemConfig::default()
    });
    space.reserve();
    space.reserve();
}
