//! Fallback backing store: one independent allocation per block.
//!
//! Used when the host cannot alias memory or aliasing is turned off. Every
//! block is a zero-filled, page-aligned `region` allocation, so the VRAM write
//! protection still works; only the cross-window aliasing is lost.

use crate::error::VmemError;
use crate::layout::{BackingRegion, MemoryLayout, RegionKind};
use region::{Allocation, Protection};
use std::ptr::NonNull;
use tracing::debug;

pub struct FlatBuffers {
    ram: Allocation,
    vram: Allocation,
    aram: Allocation,
    eram: Option<Allocation>,
    context: Option<Allocation>,
}

fn allocate(name: &'static str, size: usize) -> Result<Allocation, VmemError> {
    let allocation =
        region::alloc(size, Protection::READ_WRITE).map_err(|source| VmemError::Allocate {
            region: name,
            size,
            source,
        })?;
    debug!(
        "  Allocated {} at {:p} ({}KB)",
        name,
        allocation.as_ptr::<u8>(),
        size / 1024
    );
    Ok(allocation)
}

fn region_of(allocation: &mut Allocation, size: usize) -> Option<BackingRegion> {
    NonNull::new(allocation.as_mut_ptr::<u8>()).map(|ptr| BackingRegion::new(ptr, size))
}

impl FlatBuffers {
    pub fn allocate(layout: &MemoryLayout, context_size: usize) -> Result<Self, VmemError> {
        Ok(Self {
            ram: allocate(RegionKind::Ram.name(), layout.ram_size)?,
            vram: allocate(RegionKind::Vram.name(), layout.vram_size)?,
            aram: allocate(RegionKind::Aram.name(), layout.aram_size)?,
            eram: match layout.eram_size {
                0 => None,
                size => Some(allocate(RegionKind::Eram.name(), size)?),
            },
            context: match context_size {
                0 => None,
                size => Some(allocate("context block", size)?),
            },
        })
    }

    /// Block for `kind`, sized as the layout asked
    pub fn region(&mut self, kind: RegionKind, layout: &MemoryLayout) -> Option<BackingRegion> {
        let size = layout.size_of(kind);
        let allocation = match kind {
            RegionKind::Ram => Some(&mut self.ram),
            RegionKind::Vram => Some(&mut self.vram),
            RegionKind::Aram => Some(&mut self.aram),
            RegionKind::Eram => self.eram.as_mut(),
        }?;
        region_of(allocation, size)
    }

    pub fn context(&mut self) -> Option<NonNull<u8>> {
        self.context
            .as_mut()
            .and_then(|allocation| NonNull::new(allocation.as_mut_ptr::<u8>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Platform;

    #[test]
    fn buffers_are_zeroed_and_page_aligned() {
        let layout = MemoryLayout::for_platform(Platform::Dreamcast);
        let mut buffers = FlatBuffers::allocate(&layout, 0).unwrap();
        let vram = buffers.region(RegionKind::Vram, &layout).unwrap();

        assert_eq!(vram.size(), layout.vram_size);
        assert_eq!(vram.as_ptr() as usize % crate::platform::page_size(), 0);
        unsafe {
            assert_eq!(vram.as_ptr().add(vram.size() - 1).read(), 0);
        }
        assert!(buffers.region(RegionKind::Eram, &layout).is_none());
        assert!(buffers.context().is_none());
    }
}
