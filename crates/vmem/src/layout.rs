//! Board memory layouts and the host mapping table derived from them.
//!
//! The physical backing object holds every RAM block back to back:
//!
//! ```text
//! [ main RAM | VRAM | sound RAM | extended RAM ]
//! ```
//!
//! The virtual region mirrors the guest's 512 MB physical window, with each
//! RAM window viewing its slice of the backing object as many times as it fits.

use clap::ValueEnum;
use oxidicast_hw::memory_map::{self, PHYSICAL_SPACE_SIZE};
use oxidicast_hw::specs;
use std::fmt;
use std::ptr::NonNull;

/// Board whose memory sizes the address space reproduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum Platform {
    #[default]
    Dreamcast,
    Naomi,
    Naomi2,
    Atomiswave,
}

/// The backing blocks an address space owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Ram,
    Vram,
    Aram,
    Eram,
}

impl RegionKind {
    pub fn name(self) -> &'static str {
        match self {
            RegionKind::Ram => "main RAM",
            RegionKind::Vram => "VRAM",
            RegionKind::Aram => "sound RAM",
            RegionKind::Eram => "extended RAM",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sizes of each backing block. Every non-zero size is a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub ram_size: usize,
    pub vram_size: usize,
    pub aram_size: usize,
    /// Zero on boards without extended RAM
    pub eram_size: usize,
}

impl MemoryLayout {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Dreamcast => Self {
                ram_size: specs::dreamcast::RAM_SIZE,
                vram_size: specs::dreamcast::VRAM_SIZE,
                aram_size: specs::dreamcast::ARAM_SIZE,
                eram_size: 0,
            },
            Platform::Naomi => Self {
                ram_size: specs::naomi::RAM_SIZE,
                vram_size: specs::naomi::VRAM_SIZE,
                aram_size: specs::naomi::ARAM_SIZE,
                eram_size: 0,
            },
            Platform::Naomi2 => Self {
                ram_size: specs::naomi2::RAM_SIZE,
                vram_size: specs::naomi2::VRAM_SIZE,
                aram_size: specs::naomi2::ARAM_SIZE,
                eram_size: specs::naomi2::ERAM_SIZE,
            },
            Platform::Atomiswave => Self {
                ram_size: specs::atomiswave::RAM_SIZE,
                vram_size: specs::atomiswave::VRAM_SIZE,
                aram_size: specs::atomiswave::ARAM_SIZE,
                eram_size: 0,
            },
        }
    }

    pub fn size_of(&self, kind: RegionKind) -> usize {
        match kind {
            RegionKind::Ram => self.ram_size,
            RegionKind::Vram => self.vram_size,
            RegionKind::Aram => self.aram_size,
            RegionKind::Eram => self.eram_size,
        }
    }

    /// Offset of a block inside the physical backing object
    pub fn physical_offset(&self, kind: RegionKind) -> usize {
        match kind {
            RegionKind::Ram => 0,
            RegionKind::Vram => self.ram_size,
            RegionKind::Aram => self.ram_size + self.vram_size,
            RegionKind::Eram => self.ram_size + self.vram_size + self.aram_size,
        }
    }

    /// Total size of the physical backing object
    pub fn physical_size(&self) -> usize {
        self.ram_size + self.vram_size + self.aram_size + self.eram_size
    }

    /// Size of the virtual region the aliasing strategy reserves
    pub fn virtual_size(&self) -> usize {
        PHYSICAL_SPACE_SIZE
    }

    /// Offset of a block's primary window inside the virtual region
    pub fn virtual_offset(&self, kind: RegionKind) -> usize {
        (match kind {
            RegionKind::Ram => memory_map::ram::BASE,
            RegionKind::Vram => memory_map::vram::BASE_64,
            RegionKind::Aram => memory_map::area0::aram::BASE,
            RegionKind::Eram => memory_map::eram::BASE,
        }) as usize
    }

    /// The fixed virtual mapping table for this layout
    pub fn mappings(&self) -> Vec<VmemMapping> {
        let hole = |start: u32, end: u32| VmemMapping::unmapped(start as usize, end as usize);
        let block = |start: u32, end: u32, kind: RegionKind| {
            let size = self.size_of(kind);
            if size == 0 {
                VmemMapping::unmapped(start as usize, end as usize)
            } else {
                VmemMapping {
                    start_address: start as usize,
                    end_address: end as usize,
                    memoffset: self.physical_offset(kind),
                    memsize: size,
                    mirrored: true,
                }
            }
        };

        vec![
            hole(0x0000_0000, memory_map::area0::aram::BASE),
            block(
                memory_map::area0::aram::BASE,
                memory_map::area0::aram::END,
                RegionKind::Aram,
            ),
            hole(memory_map::area0::aram::END, memory_map::vram::BASE_64),
            block(
                memory_map::vram::BASE_64,
                memory_map::vram::BASE_32,
                RegionKind::Vram,
            ),
            hole(memory_map::vram::BASE_32, memory_map::vram::MIRROR_64),
            block(
                memory_map::vram::MIRROR_64,
                memory_map::vram::MIRROR_32,
                RegionKind::Vram,
            ),
            hole(memory_map::vram::MIRROR_32, memory_map::eram::BASE),
            block(memory_map::eram::BASE, memory_map::eram::END, RegionKind::Eram),
            block(memory_map::ram::BASE, memory_map::ram::END, RegionKind::Ram),
            hole(memory_map::ram::END, PHYSICAL_SPACE_SIZE as u32),
        ]
    }
}

/// One entry of the host mapping table.
///
/// `start_address..end_address` is a range of the virtual region;
/// `memoffset..memoffset + memsize` the slice of the physical backing object
/// it shows. A mirrored mapping repeats the slice until the range is full.
/// Entries with `memsize == 0` stay inaccessible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmemMapping {
    pub start_address: usize,
    pub end_address: usize,
    pub memoffset: usize,
    pub memsize: usize,
    pub mirrored: bool,
}

impl VmemMapping {
    fn unmapped(start_address: usize, end_address: usize) -> Self {
        Self {
            start_address,
            end_address,
            memoffset: 0,
            memsize: 0,
            mirrored: false,
        }
    }

    pub fn len(&self) -> usize {
        self.end_address - self.start_address
    }

    pub fn is_empty(&self) -> bool {
        self.start_address == self.end_address
    }

    /// Virtual offsets at which the physical slice appears
    pub fn views(&self) -> impl Iterator<Item = usize> + '_ {
        let count = match (self.memsize, self.mirrored) {
            (0, _) => 0,
            (size, true) => self.len() / size,
            (_, false) => 1,
        };
        (0..count).map(move |i| self.start_address + i * self.memsize)
    }
}

/// A backing block as seen by the rest of the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingRegion {
    ptr: NonNull<u8>,
    size: usize,
}

impl BackingRegion {
    pub(crate) fn new(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wraparound mask for the block
    pub fn mask(&self) -> u32 {
        (self.size - 1) as u32
    }

    /// Whether `ptr` points into this block
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.ptr.as_ptr() as usize;
        (start..start + self.size).contains(&(ptr as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_blocks_are_back_to_back() {
        let layout = MemoryLayout::for_platform(Platform::Naomi2);
        assert_eq!(layout.physical_offset(RegionKind::Ram), 0);
        assert_eq!(layout.physical_offset(RegionKind::Vram), 32 << 20);
        assert_eq!(layout.physical_offset(RegionKind::Aram), 48 << 20);
        assert_eq!(layout.physical_offset(RegionKind::Eram), 56 << 20);
        assert_eq!(layout.physical_size(), 88 << 20);
    }

    #[test]
    fn mapping_table_tiles_the_physical_window() {
        for platform in [
            Platform::Dreamcast,
            Platform::Naomi,
            Platform::Naomi2,
            Platform::Atomiswave,
        ] {
            let table = MemoryLayout::for_platform(platform).mappings();
            assert_eq!(table[0].start_address, 0);
            assert_eq!(table.last().unwrap().end_address, PHYSICAL_SPACE_SIZE);
            for pair in table.windows(2) {
                assert_eq!(pair[0].end_address, pair[1].start_address);
            }
            for mapping in table.iter().filter(|m| m.memsize != 0) {
                assert_eq!(mapping.len() % mapping.memsize, 0, "{:?}", mapping);
            }
        }
    }

    #[test]
    fn dreamcast_ram_appears_four_times() {
        let table = MemoryLayout::for_platform(Platform::Dreamcast).mappings();
        let ram = table
            .iter()
            .find(|m| m.start_address == memory_map::ram::BASE as usize)
            .unwrap();
        let views: Vec<_> = ram.views().collect();
        assert_eq!(
            views,
            vec![0x0C00_0000, 0x0D00_0000, 0x0E00_0000, 0x0F00_0000]
        );
    }

    #[test]
    fn eram_window_is_a_hole_without_eram() {
        let table = MemoryLayout::for_platform(Platform::Dreamcast).mappings();
        let eram = table
            .iter()
            .find(|m| m.start_address == memory_map::eram::BASE as usize)
            .unwrap();
        assert_eq!(eram.memsize, 0);
        assert_eq!(eram.views().count(), 0);
    }
}
