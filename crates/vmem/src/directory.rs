//! Page directory: one entry per 16 MB page of the 32-bit guest address space.
//!
//! Each entry either points at a backing block, together with the shift that
//! folds an address into the block, or names the handler that services the
//! page. Entries are only written by the mapping functions below.

use crate::handler::HandlerId;
use oxidicast_hw::memory_map::{PAGE_COUNT, PAGE_SHIFT, PAGE_SIZE};
use std::fmt;
use std::ptr::NonNull;
use tracing::{debug, instrument};

/// Alignment required of every block base pointer
pub const BLOCK_ALIGN: usize = 32;

/// What a directory page resolves to
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PageEntry {
    /// Memory-backed page. `origin` is the guest address at block offset 0;
    /// the block offset of `addr` is `((addr - origin) << shift) >> shift`.
    Block {
        base: NonNull<u8>,
        origin: u32,
        shift: u32,
    },
    /// Page serviced by a registered handler
    Handler(HandlerId),
}

impl PageEntry {
    /// Offset into the block for a guest address, applying the block's wraparound
    #[inline(always)]
    pub fn block_offset(origin: u32, shift: u32, addr: u32) -> usize {
        ((addr.wrapping_sub(origin) << shift) >> shift) as usize
    }

    /// The same entry seen from a page `delta` bytes further on
    fn rebased(self, delta: u32) -> Self {
        match self {
            PageEntry::Block {
                base,
                origin,
                shift,
            } => PageEntry::Block {
                base,
                origin: origin.wrapping_add(delta),
                shift,
            },
            handler => handler,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, PageEntry::Block { .. })
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEntry::Block {
                base,
                origin,
                shift,
            } => write!(
                f,
                "Block {{ base: {:p}, origin: {:#010X}, mask: {:#X} }}",
                base.as_ptr(),
                origin,
                u32::MAX >> shift
            ),
            PageEntry::Handler(id) => write!(f, "Handler({})", id),
        }
    }
}

/// Shift that turns `mask` into a shift-left/shift-right pair.
///
/// `mask` must be of the form `0xFFFF_FFFF >> k`; the result is `k`.
pub fn find_mask(mask: u32) -> u32 {
    let shift = mask.leading_zeros();
    assert!(
        mask != 0 && u32::MAX >> shift == mask,
        "block mask {:#X} is not a contiguous low-bit mask",
        mask
    );
    shift
}

fn check_range(start: u32, end: u32) {
    assert!(
        (start as usize) < PAGE_COUNT,
        "start page {:#X} out of range",
        start
    );
    assert!((end as usize) < PAGE_COUNT, "end page {:#X} out of range", end);
    assert!(
        start <= end,
        "start page {:#X} is after end page {:#X}",
        start,
        end
    );
}

/// The 256-entry dispatch table
#[derive(Clone)]
pub struct PageDirectory {
    entries: [PageEntry; PAGE_COUNT],
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    /// A directory where every page belongs to the unmapped handler
    pub fn new() -> Self {
        Self {
            entries: [PageEntry::Handler(HandlerId::UNMAPPED); PAGE_COUNT],
        }
    }

    pub fn reset(&mut self) {
        self.entries = [PageEntry::Handler(HandlerId::UNMAPPED); PAGE_COUNT];
    }

    /// Entry for the page containing `addr`
    #[inline(always)]
    pub fn lookup(&self, addr: u32) -> PageEntry {
        self.entries[(addr >> PAGE_SHIFT) as usize]
    }

    /// Entry at a page index
    pub fn entry(&self, page: u32) -> PageEntry {
        assert!((page as usize) < PAGE_COUNT, "page {:#X} out of range", page);
        self.entries[page as usize]
    }

    /// All entries with their page index
    pub fn iter(&self) -> impl Iterator<Item = (u32, PageEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(page, entry)| (page as u32, *entry))
    }

    /// Point pages `start..=end` at a handler
    #[instrument(level = "debug", skip(self))]
    pub fn map_handler(&mut self, id: HandlerId, start: u32, end: u32) {
        check_range(start, end);
        for entry in &mut self.entries[start as usize..=end as usize] {
            *entry = PageEntry::Handler(id);
        }
    }

    /// Point pages `start..=end` at a block that wraps every `mask + 1` bytes.
    ///
    /// Offsets count from the first byte of page `start`, so any start page
    /// works for any mask.
    ///
    /// # Safety
    ///
    /// `base` must stay valid for reads and writes of `mask + 1` bytes for as
    /// long as any of these pages keep this mapping.
    #[instrument(level = "debug", skip(self))]
    pub unsafe fn map_block(&mut self, base: *mut u8, start: u32, end: u32, mask: u32) {
        check_range(start, end);
        let Some(base) = NonNull::new(base) else {
            panic!("block base pointer is null");
        };
        assert!(
            base.as_ptr() as usize % BLOCK_ALIGN == 0,
            "block base {:p} is not {}-byte aligned",
            base.as_ptr(),
            BLOCK_ALIGN
        );
        let shift = find_mask(mask);
        let origin = start << PAGE_SHIFT;

        for entry in &mut self.entries[start as usize..=end as usize] {
            *entry = PageEntry::Block {
                base,
                origin,
                shift,
            };
        }
        debug!(
            "Mapped block {:p} over pages {:#04X}..={:#04X} (mask {:#X})",
            base.as_ptr(),
            start,
            end,
            mask
        );
    }

    /// Repeat a block of `block_size` bytes over pages `start..=end`.
    ///
    /// Blocks smaller than a page repeat inside every page; larger blocks span
    /// `block_size / PAGE_SIZE` pages each and the range must hold whole copies.
    ///
    /// # Safety
    ///
    /// Same contract as [`PageDirectory::map_block`] with `mask = block_size - 1`.
    pub unsafe fn map_block_mirror(
        &mut self,
        base: *mut u8,
        start: u32,
        end: u32,
        block_size: usize,
    ) {
        check_range(start, end);
        assert!(
            block_size.is_power_of_two() && u32::try_from(block_size - 1).is_ok(),
            "block size {:#X} is not a power of two",
            block_size
        );
        if block_size > PAGE_SIZE {
            let pages_per_block = (block_size / PAGE_SIZE) as u32;
            assert!(
                (end - start + 1) % pages_per_block == 0,
                "pages {:#04X}..={:#04X} do not hold whole {:#X}-byte mirrors",
                start,
                end,
                block_size
            );
        }
        // SAFETY: forwarded from the caller.
        unsafe { self.map_block(base, start, end, (block_size - 1) as u32) };
    }

    /// Make `size` pages at `new_region` resolve like the pages at `source`.
    ///
    /// Block entries are rebased so that `addr` and
    /// `addr + (new_region - source) * PAGE_SIZE` hit the same byte. The two
    /// ranges must not overlap.
    #[instrument(level = "debug", skip(self))]
    pub fn mirror_mapping(&mut self, new_region: u32, source: u32, size: u32) {
        assert!(size > 0, "mirror of zero pages");
        check_range(source, source.saturating_add(size - 1));
        check_range(new_region, new_region.saturating_add(size - 1));
        assert!(
            new_region + size <= source || source + size <= new_region,
            "mirror {:#04X}+{:#X} overlaps its source {:#04X}",
            new_region,
            size,
            source
        );

        let delta = new_region.wrapping_sub(source) << PAGE_SHIFT;
        for i in 0..size as usize {
            let entry = self.entries[source as usize + i];
            self.entries[new_region as usize + i] = entry.rebased(delta);
        }
    }
}

impl fmt::Debug for PageDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mapped: Vec<_> = self
            .iter()
            .filter(|(_, entry)| *entry != PageEntry::Handler(HandlerId::UNMAPPED))
            .collect();
        f.debug_map().entries(mapped).finish()
    }
}
