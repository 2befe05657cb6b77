//! # References
//! - <https://segaretro.org/Dreamcast/Technical_specifications>
//! - SH7750 hardware manual, section 3 (address space) and 13 (bus state controller)

/// Bits of a guest address consumed by the page offset
pub const PAGE_SHIFT: u32 = 24;

/// Size of one directory page (16 MB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of directory pages covering the 32-bit address space
pub const PAGE_COUNT: usize = 256;

/// Size of the physical (P0 / U0) window that the host reservation covers.
///
/// The SH4 only decodes the low 29 bits on the external bus, so everything the
/// board exposes lives below this boundary.
pub const PHYSICAL_SPACE_SIZE: usize = 0x2000_0000;

/// Number of directory pages in the physical window
pub const PHYSICAL_PAGES: u32 = (PHYSICAL_SPACE_SIZE >> PAGE_SHIFT) as u32;

/// Area 0: boot ROM, flash, system bus registers and the sound RAM window
pub mod area0 {
    /// Area 0 base address
    pub const BASE: u32 = 0x0000_0000;

    /// Sound (AICA) RAM window inside area 0
    pub mod aram {
        /// Window start
        pub const BASE: u32 = 0x0080_0000;
        /// Window end (exclusive); the RAM repeats to fill it
        pub const END: u32 = 0x0100_0000;
    }
}

/// Area 1: video RAM
///
/// The 64-bit path exposes VRAM linearly; the 32-bit path interleaves the two
/// banks and is left to a handler.
pub mod vram {
    /// 64-bit access path
    pub const BASE_64: u32 = 0x0400_0000;
    /// 32-bit access path
    pub const BASE_32: u32 = 0x0500_0000;
    /// Mirror of the 64-bit access path
    pub const MIRROR_64: u32 = 0x0600_0000;
    /// Mirror of the 32-bit access path
    pub const MIRROR_32: u32 = 0x0700_0000;
    /// Size of each access window
    pub const WINDOW_SIZE: u32 = 0x0100_0000;
}

/// Area 2: extended (ELAN) RAM on Naomi 2 boards
pub mod eram {
    /// Window start
    pub const BASE: u32 = 0x0A00_0000;
    /// Window end (exclusive)
    pub const END: u32 = 0x0C00_0000;
}

/// Area 3: main system RAM and its mirrors
pub mod ram {
    /// Window start
    pub const BASE: u32 = 0x0C00_0000;
    /// Window end (exclusive)
    pub const END: u32 = 0x1000_0000;
}

/// Privileged regions that alias the physical window
pub mod privileged {
    /// P1: cached, privileged
    pub const P1: u32 = 0x8000_0000;
    /// P2: uncached, privileged
    pub const P2: u32 = 0xA000_0000;
    /// P3: cached, privileged, translated
    pub const P3: u32 = 0xC000_0000;
}
