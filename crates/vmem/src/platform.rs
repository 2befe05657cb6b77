//! Host virtual-memory capability.
//!
//! The aliasing strategy needs four things from the host: a contiguous
//! reservation, the ability to show one physical block at several virtual
//! offsets, lazily committed pages, and teardown. Page protection is plain
//! `region` calls and works on any host allocation, so it lives outside the
//! trait.

use crate::error::VmemError;
use crate::layout::VmemMapping;
use region::Protection;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::SharedMemory;

/// A successful host reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Start of the virtual region mirroring the guest's physical window
    pub base: NonNull<u8>,
    /// Size of the virtual region
    pub size: usize,
    /// Lazily committed block placed directly below `base`, if one was asked for
    pub context: Option<NonNull<u8>>,
    pub context_size: usize,
}

pub trait VirtualMemory {
    /// Reserve `virtual_size` bytes of inaccessible address space backed by a
    /// `physical_size` byte shared object, plus a `context_size` byte block
    /// immediately below it.
    fn reserve(
        &mut self,
        virtual_size: usize,
        physical_size: usize,
        context_size: usize,
    ) -> Result<Reservation, VmemError>;

    /// Make each mapping's physical slice visible in the reserved region
    fn create_mappings(&mut self, mappings: &[VmemMapping]) -> Result<(), VmemError>;

    /// Commit read/write pages inside the context block
    fn ondemand_page(&mut self, addr: NonNull<u8>, size: usize) -> Result<(), VmemError>;

    /// Give everything back to the host. Safe to call when nothing is reserved.
    fn destroy(&mut self);
}

/// Host that cannot alias memory; every reservation fails
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl VirtualMemory for Unsupported {
    fn reserve(&mut self, _: usize, _: usize, _: usize) -> Result<Reservation, VmemError> {
        Err(VmemError::Unsupported)
    }

    fn create_mappings(&mut self, _: &[VmemMapping]) -> Result<(), VmemError> {
        Err(VmemError::Unsupported)
    }

    fn ondemand_page(&mut self, _: NonNull<u8>, _: usize) -> Result<(), VmemError> {
        Err(VmemError::Unsupported)
    }

    fn destroy(&mut self) {}
}

/// The best capability this host offers
#[cfg(unix)]
pub fn host() -> Box<dyn VirtualMemory> {
    Box::new(SharedMemory::new())
}

/// The best capability this host offers
#[cfg(not(unix))]
pub fn host() -> Box<dyn VirtualMemory> {
    Box::new(Unsupported)
}

/// Host page size
pub fn page_size() -> usize {
    region::page::size()
}

/// Make `size` bytes at `addr` read-only.
///
/// # Safety
///
/// The range must belong to memory this process owns and nothing may rely on
/// writing to it until it is unlocked.
pub unsafe fn region_lock(addr: *mut u8, size: usize) -> Result<(), VmemError> {
    // SAFETY: forwarded from the caller.
    unsafe { region::protect(addr, size, Protection::READ)? };
    Ok(())
}

/// Make `size` bytes at `addr` readable and writable again.
///
/// # Safety
///
/// The range must belong to memory this process owns.
pub unsafe fn region_unlock(addr: *mut u8, size: usize) -> Result<(), VmemError> {
    // SAFETY: forwarded from the caller.
    unsafe { region::protect(addr, size, Protection::READ_WRITE)? };
    Ok(())
}
