//! The guest address space an emulated SH4 sees.
//!
//! An `AddressSpace` owns the page directory, the handler table and the
//! backing memory for every RAM block. Its lifecycle is
//! `new` (directory reset, unmapped handler registered) → `reserve` →
//! `init_mappings` → `release`, after which it can be reserved again.
//!
//! Backing memory comes from one of two strategies:
//! - **aliased**: one host reservation mirroring the guest's 512 MB physical
//!   window, where every mirror of a block is a view of the same physical
//!   pages.
//! - **flat**: one ordinary allocation per block. Used when the host cannot
//!   alias or aliasing is turned off.
//!
//! The page directory is wired the same way under both strategies, so the
//! fast path does not care which one is active.

use crate::directory::PageDirectory;
use crate::error::VmemError;
use crate::flat::FlatBuffers;
use crate::handler::{HandlerId, HandlerRegistry, HandlerSet};
use crate::layout::{BackingRegion, MemoryLayout, Platform, RegionKind};
use crate::platform::{self, Reservation, VirtualMemory};
use oxidicast_hw::memory_map::{self, PAGE_SHIFT, PHYSICAL_PAGES, PHYSICAL_SPACE_SIZE};
use std::fmt;
use std::ptr::NonNull;
use tracing::{debug, info, instrument, warn};

/// Configuration for an address space
#[derive(Debug, Clone, Default)]
pub struct VmemConfig {
    /// Board whose memory sizes to reproduce
    pub platform: Platform,
    /// Use flat buffers even where the host supports aliasing
    pub disable_aliasing: bool,
    /// Size of the CPU context block to set aside (0 for none)
    pub context_block_size: usize,
}

/// Which backing strategy `init_mappings` settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Aliased,
    Flat,
}

/// Outcome of [`AddressSpace::handle_fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// A write hit protected VRAM at this offset; the renderer must invalidate and unprotect
    VramWrite(u32),
    /// The faulting context block page has been committed; retry the access
    ContextCommitted,
    /// Not a fault this address space knows about
    Unhandled,
}

enum Backing {
    Aliased(Reservation),
    Flat(FlatBuffers),
}

struct Regions {
    ram: Option<BackingRegion>,
    vram: Option<BackingRegion>,
    aram: Option<BackingRegion>,
    eram: Option<BackingRegion>,
    context: Option<NonNull<u8>>,
}

impl Regions {
    fn get(&self, kind: RegionKind) -> Option<BackingRegion> {
        match kind {
            RegionKind::Ram => self.ram,
            RegionKind::Vram => self.vram,
            RegionKind::Aram => self.aram,
            RegionKind::Eram => self.eram,
        }
    }
}

enum Lifecycle {
    Released,
    /// `None` when the host reservation failed or was skipped
    Reserved(Option<Reservation>),
    Mapped {
        backing: Backing,
        regions: Regions,
    },
}

pub struct AddressSpace {
    pub(crate) directory: PageDirectory,
    pub(crate) handlers: HandlerRegistry,
    config: VmemConfig,
    layout: MemoryLayout,
    vm: Box<dyn VirtualMemory>,
    lifecycle: Lifecycle,
}

impl AddressSpace {
    /// Create an address space using the host's virtual memory capability
    pub fn new(config: VmemConfig) -> Self {
        Self::with_virtual_memory(config, platform::host())
    }

    /// Create an address space on top of a specific virtual memory capability
    pub fn with_virtual_memory(config: VmemConfig, vm: Box<dyn VirtualMemory>) -> Self {
        let layout = MemoryLayout::for_platform(config.platform);
        let mut space = Self {
            directory: PageDirectory::new(),
            handlers: HandlerRegistry::new(),
            config,
            layout,
            vm,
            lifecycle: Lifecycle::Released,
        };
        space.init();
        space
    }

    pub fn config(&self) -> &VmemConfig {
        &self.config
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Point every page at the unmapped handler, which becomes the only handler
    pub fn init(&mut self) {
        self.directory.reset();
        self.handlers.clear();
        let unmapped = self.handlers.register(HandlerSet::new());
        debug_assert_eq!(unmapped, HandlerId::UNMAPPED);
    }

    /// Release backing memory and drop every handler, including the unmapped
    /// one. No access may be made until the next `init`.
    pub fn term(&mut self) {
        self.release_backing();
        self.handlers.clear();
    }

    // --------------------------------------------------------------------------------------------
    // Handlers and mappings
    // --------------------------------------------------------------------------------------------

    pub fn register_handler(&mut self, set: HandlerSet) -> HandlerId {
        self.handlers.register(set)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    /// Route pages `start..=end` to a registered handler
    pub fn map_handler(&mut self, id: HandlerId, start: u32, end: u32) {
        assert!(self.handlers.contains(id), "{} is not registered", id);
        self.directory.map_handler(id, start, end);
    }

    /// Back pages `start..=end` with a block wrapping every `mask + 1` bytes.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `mask + 1` bytes until the
    /// pages are remapped or the address space is released.
    pub unsafe fn map_block(&mut self, base: *mut u8, start: u32, end: u32, mask: u32) {
        // SAFETY: forwarded from the caller.
        unsafe { self.directory.map_block(base, start, end, mask) };
    }

    /// Repeat a `block_size` byte block over pages `start..=end`.
    ///
    /// # Safety
    ///
    /// Same contract as [`AddressSpace::map_block`] with `mask = block_size - 1`.
    pub unsafe fn map_block_mirror(&mut self, base: *mut u8, start: u32, end: u32, block_size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.directory.map_block_mirror(base, start, end, block_size) };
    }

    /// Make `size` pages at `new_region` resolve exactly like the pages at `source`
    pub fn mirror_mapping(&mut self, new_region: u32, source: u32, size: u32) {
        self.directory.mirror_mapping(new_region, source, size);
    }

    /// Copy the physical window (P0) onto the privileged P1, P2 and P3 regions
    pub fn mirror_privileged_regions(&mut self) {
        for region in [
            memory_map::privileged::P1,
            memory_map::privileged::P2,
            memory_map::privileged::P3,
        ] {
            self.mirror_mapping(region >> PAGE_SHIFT, 0, PHYSICAL_PAGES);
        }
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Try to reserve the aliased host region. Returns whether aliasing is in use;
    /// on `false` the next `init_mappings` allocates flat buffers instead.
    #[instrument(level = "debug", skip(self))]
    pub fn reserve(&mut self) -> bool {
        assert!(
            matches!(self.lifecycle, Lifecycle::Released),
            "reserve called while memory is already reserved"
        );

        if self.config.disable_aliasing {
            info!("Virtual memory aliasing disabled, using flat buffers");
            self.lifecycle = Lifecycle::Reserved(None);
            return false;
        }

        match self.vm.reserve(
            self.layout.virtual_size(),
            self.layout.physical_size(),
            self.config.context_block_size,
        ) {
            Ok(reservation) => {
                info!(
                    "Reserved aliased address space at {:p} ({}MB physical)",
                    reservation.base.as_ptr(),
                    self.layout.physical_size() / (1024 * 1024)
                );
                self.lifecycle = Lifecycle::Reserved(Some(reservation));
                true
            }
            Err(e) => {
                warn!(
                    "Virtual memory aliasing unavailable, falling back to flat buffers: {}",
                    e
                );
                self.lifecycle = Lifecycle::Reserved(None);
                false
            }
        }
    }

    /// Create the backing memory and map RAM, VRAM and extended RAM into the
    /// directory.
    ///
    /// A failure to create the aliased views falls back to flat buffers; only
    /// a failure to allocate those is returned.
    #[instrument(level = "debug", skip(self))]
    pub fn init_mappings(&mut self) -> Result<(), VmemError> {
        let reservation = match std::mem::replace(&mut self.lifecycle, Lifecycle::Released) {
            Lifecycle::Reserved(reservation) => reservation,
            other => {
                self.lifecycle = other;
                panic!("init_mappings called without a preceding reserve");
            }
        };

        let aliased = reservation.and_then(|reservation| self.create_views(reservation));
        let (backing, regions) = match aliased {
            Some(mapped) => mapped,
            None => self.allocate_flat()?,
        };

        self.map_standard_areas(&regions);
        self.lifecycle = Lifecycle::Mapped { backing, regions };
        Ok(())
    }

    fn create_views(&mut self, reservation: Reservation) -> Option<(Backing, Regions)> {
        let table = self.layout.mappings();
        debug!("Creating {} host mappings", table.len());
        if let Err(e) = self.vm.create_mappings(&table) {
            warn!(
                "Failed to create aliased mappings, falling back to flat buffers: {}",
                e
            );
            self.vm.destroy();
            return None;
        }

        let layout = self.layout;
        let region = |kind: RegionKind| {
            let size = layout.size_of(kind);
            // SAFETY: every primary window lies inside the reserved virtual region.
            let ptr = unsafe { reservation.base.add(layout.virtual_offset(kind)) };
            (size > 0).then(|| BackingRegion::new(ptr, size))
        };
        let regions = Regions {
            ram: region(RegionKind::Ram),
            vram: region(RegionKind::Vram),
            aram: region(RegionKind::Aram),
            eram: region(RegionKind::Eram),
            context: reservation.context,
        };
        Some((Backing::Aliased(reservation), regions))
    }

    fn allocate_flat(&mut self) -> Result<(Backing, Regions), VmemError> {
        info!("=== Allocating Flat Backing Memory ===");
        let mut buffers = FlatBuffers::allocate(&self.layout, self.config.context_block_size)?;
        let regions = Regions {
            ram: buffers.region(RegionKind::Ram, &self.layout),
            vram: buffers.region(RegionKind::Vram, &self.layout),
            aram: buffers.region(RegionKind::Aram, &self.layout),
            eram: buffers.region(RegionKind::Eram, &self.layout),
            context: buffers.context(),
        };
        Ok((Backing::Flat(buffers), regions))
    }

    fn map_standard_areas(&mut self, regions: &Regions) {
        let page = |addr: u32| addr >> PAGE_SHIFT;

        if let Some(ram) = regions.ram {
            debug!(
                "  Mapping main RAM over {:#010X} - {:#010X} ({}MB)",
                memory_map::ram::BASE,
                memory_map::ram::END,
                ram.size() / (1024 * 1024)
            );
            // SAFETY: the block is owned by `self` and outlives the mapping.
            unsafe {
                self.directory.map_block_mirror(
                    ram.as_ptr(),
                    page(memory_map::ram::BASE),
                    page(memory_map::ram::END) - 1,
                    ram.size(),
                )
            };
        }

        if let Some(vram) = regions.vram {
            debug!(
                "  Mapping VRAM at {:#010X}, mirrored at {:#010X} ({}MB)",
                memory_map::vram::BASE_64,
                memory_map::vram::MIRROR_64,
                vram.size() / (1024 * 1024)
            );
            let vram_page = page(memory_map::vram::BASE_64);
            // SAFETY: as above.
            unsafe {
                self.directory
                    .map_block_mirror(vram.as_ptr(), vram_page, vram_page, vram.size())
            };
            self.directory
                .mirror_mapping(page(memory_map::vram::MIRROR_64), vram_page, 1);
        }

        if let Some(eram) = regions.eram {
            debug!(
                "  Mapping extended RAM over {:#010X} - {:#010X} ({}MB)",
                memory_map::eram::BASE,
                memory_map::eram::END,
                eram.size() / (1024 * 1024)
            );
            // SAFETY: as above.
            unsafe {
                self.directory.map_block_mirror(
                    eram.as_ptr(),
                    page(memory_map::eram::BASE),
                    page(memory_map::eram::END) - 1,
                    eram.size(),
                )
            };
        }

        debug!(
            "  Sound RAM left to the area 0 handler ({}KB)",
            self.layout.aram_size / 1024
        );
    }

    /// Tear down the backing memory and reset the directory and handler table
    #[instrument(level = "debug", skip(self))]
    pub fn release(&mut self) {
        self.release_backing();
        self.init();
    }

    fn release_backing(&mut self) {
        // Directory entries point into the backing memory; drop them first.
        self.directory.reset();
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Released) {
            Lifecycle::Mapped {
                backing: Backing::Aliased(_),
                ..
            }
            | Lifecycle::Reserved(Some(_)) => self.vm.destroy(),
            Lifecycle::Mapped {
                backing: Backing::Flat(buffers),
                ..
            } => drop(buffers),
            Lifecycle::Reserved(None) | Lifecycle::Released => {}
        }
    }

    // --------------------------------------------------------------------------------------------
    // Backing memory
    // --------------------------------------------------------------------------------------------

    /// Strategy in use, once `init_mappings` has run
    pub fn strategy(&self) -> Option<Strategy> {
        match &self.lifecycle {
            Lifecycle::Mapped {
                backing: Backing::Aliased(_),
                ..
            } => Some(Strategy::Aliased),
            Lifecycle::Mapped {
                backing: Backing::Flat(_),
                ..
            } => Some(Strategy::Flat),
            _ => None,
        }
    }

    pub fn backing(&self, kind: RegionKind) -> Option<BackingRegion> {
        match &self.lifecycle {
            Lifecycle::Mapped { regions, .. } => regions.get(kind),
            _ => None,
        }
    }

    /// Start of the aliased virtual region; `base + guest_addr` is the host
    /// address of any RAM-backed guest address below 512 MB
    pub fn virtual_base(&self) -> Option<NonNull<u8>> {
        match &self.lifecycle {
            Lifecycle::Mapped {
                backing: Backing::Aliased(reservation),
                ..
            } => Some(reservation.base),
            _ => None,
        }
    }

    pub fn context_block(&self) -> Option<NonNull<u8>> {
        match &self.lifecycle {
            Lifecycle::Mapped { regions, .. } => regions.context,
            _ => None,
        }
    }

    // --------------------------------------------------------------------------------------------
    // VRAM write tracking
    // --------------------------------------------------------------------------------------------

    /// Handle for protecting VRAM from another thread
    pub fn vram_window(&self) -> Option<VramWindow> {
        match &self.lifecycle {
            Lifecycle::Mapped { backing, regions } => {
                let vram = regions.vram?;
                Some(match backing {
                    Backing::Aliased(reservation) => VramWindow {
                        origin: reservation.base,
                        vram_size: vram.size(),
                        aliased: true,
                    },
                    Backing::Flat(_) => VramWindow {
                        origin: NonNull::new(vram.as_ptr())?,
                        vram_size: vram.size(),
                        aliased: false,
                    },
                })
            }
            _ => None,
        }
    }

    /// Make a VRAM byte range read-only so that writes to it fault
    pub fn protect_vram(&self, addr: u32, size: u32) -> Result<(), VmemError> {
        self.vram_window()
            .ok_or(VmemError::NotMapped)?
            .protect(addr, size)
    }

    /// Make a VRAM byte range writable again
    pub fn unprotect_vram(&self, addr: u32, size: u32) -> Result<(), VmemError> {
        self.vram_window()
            .ok_or(VmemError::NotMapped)?
            .unprotect(addr, size)
    }

    /// VRAM offset of a faulting host address, if it lies in protectable VRAM
    pub fn get_vram_offset(&self, ptr: *const u8) -> Option<u32> {
        self.vram_window()?.offset_of(ptr)
    }

    /// Classify a host access fault and commit context block pages on demand
    pub fn handle_fault(&mut self, ptr: *const u8) -> FaultResolution {
        if let Some(offset) = self.get_vram_offset(ptr) {
            return FaultResolution::VramWrite(offset);
        }

        let context = match &self.lifecycle {
            Lifecycle::Mapped {
                backing: Backing::Aliased(reservation),
                ..
            } => reservation.context.map(|c| (c, reservation.context_size)),
            _ => None,
        };
        if let Some((context, context_size)) = context
            && (context.as_ptr() as usize..context.as_ptr() as usize + context_size)
                .contains(&(ptr as usize))
        {
            let page = platform::page_size();
            let page_start = (ptr as usize) & !(page - 1);
            let Some(page_ptr) = NonNull::new(page_start as *mut u8) else {
                return FaultResolution::Unhandled;
            };
            return match self.vm.ondemand_page(page_ptr, page) {
                Ok(()) => {
                    debug!("Committed context page at {:#X}", page_start);
                    FaultResolution::ContextCommitted
                }
                Err(e) => {
                    warn!("Failed to commit context page at {:#X}: {}", page_start, e);
                    FaultResolution::Unhandled
                }
            };
        }

        FaultResolution::Unhandled
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.release_backing();
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("config", &self.config)
            .field("strategy", &self.strategy())
            .field("handlers", &self.handlers)
            .field("directory", &self.directory)
            .finish()
    }
}

/// VRAM protection handle, usable from a renderer thread.
///
/// Only valid while the address space that produced it stays mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VramWindow {
    /// Virtual region base when aliased, VRAM itself when flat
    origin: NonNull<u8>,
    vram_size: usize,
    aliased: bool,
}

// SAFETY: the handle only changes host page protection, which the host serialises.
unsafe impl Send for VramWindow {}
// SAFETY: as above; the handle holds no mutable state.
unsafe impl Sync for VramWindow {}

impl VramWindow {
    pub fn protect(&self, addr: u32, size: u32) -> Result<(), VmemError> {
        for ptr in self.targets(addr, size).into_iter().flatten() {
            // SAFETY: `targets` keeps the range inside VRAM.
            unsafe { platform::region_lock(ptr, size as usize)? };
        }
        Ok(())
    }

    pub fn unprotect(&self, addr: u32, size: u32) -> Result<(), VmemError> {
        for ptr in self.targets(addr, size).into_iter().flatten() {
            // SAFETY: `targets` keeps the range inside VRAM.
            unsafe { platform::region_unlock(ptr, size as usize)? };
        }
        Ok(())
    }

    /// VRAM offset of `ptr`, or `None` if it is not protectable VRAM
    pub fn offset_of(&self, ptr: *const u8) -> Option<u32> {
        let offset = (ptr as usize).checked_sub(self.origin.as_ptr() as usize)?;
        if self.aliased {
            if offset >= PHYSICAL_SPACE_SIZE
                || (offset >> PAGE_SHIFT) as u32 != memory_map::vram::BASE_64 >> PAGE_SHIFT
            {
                return None;
            }
            Some((offset & (self.vram_size - 1)) as u32)
        } else {
            (offset < self.vram_size).then_some(offset as u32)
        }
    }

    /// Host ranges backing a VRAM byte range. Only the 64-bit window is
    /// protected; with 8 MB of VRAM it holds two copies.
    fn targets(&self, addr: u32, size: u32) -> [Option<*mut u8>; 2] {
        let addr = addr as usize & (self.vram_size - 1);
        assert!(
            addr + size as usize <= self.vram_size,
            "VRAM range {:#X}+{:#X} runs past the end of VRAM",
            addr,
            size
        );

        let origin = self.origin.as_ptr();
        if !self.aliased {
            // SAFETY: in bounds per the assertion above.
            return [Some(unsafe { origin.add(addr) }), None];
        }

        let window_offset = memory_map::vram::BASE_64 as usize + addr;
        // SAFETY: the VRAM window lies inside the reserved region.
        let primary = unsafe { origin.add(window_offset) };
        let wrap = (self.vram_size < memory_map::vram::WINDOW_SIZE as usize)
            // SAFETY: the second copy still lies inside the 16 MB window.
            .then(|| unsafe { primary.add(self.vram_size) });
        [Some(primary), wrap]
    }
}
