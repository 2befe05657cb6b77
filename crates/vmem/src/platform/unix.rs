//! POSIX shared memory backed aliasing.
//!
//! The physical blocks live in an anonymous shared memory object. The virtual
//! region starts out as a `PROT_NONE` anonymous mapping and each view is
//! mapped over it with `MAP_FIXED`, so every view of a block shares its pages.

use super::{Reservation, VirtualMemory};
use crate::error::VmemError;
use crate::layout::VmemMapping;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::c_void;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

static NEXT_OBJECT: AtomicUsize = AtomicUsize::new(0);

struct Mapped {
    fd: OwnedFd,
    /// Whole anonymous mapping, context block included
    start: NonNull<c_void>,
    len: usize,
    reservation: Reservation,
}

/// [`VirtualMemory`] over `shm_open` + `mmap`
#[derive(Default)]
pub struct SharedMemory {
    mapped: Option<Mapped>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_object(size: usize) -> Result<OwnedFd, VmemError> {
        let name = format!(
            "/vmem-{}-{}",
            std::process::id(),
            NEXT_OBJECT.fetch_add(1, Ordering::Relaxed)
        );
        let fail = |e: nix::Error| VmemError::Map {
            offset: 0,
            size,
            source: io::Error::from(e),
        };

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(fail)?;
        // The descriptor keeps the object alive; the name is not needed past this point.
        shm_unlink(name.as_str()).map_err(fail)?;
        ftruncate(&fd, size as nix::libc::off_t).map_err(fail)?;

        trace!("Created shared memory object {} ({:#X} bytes)", name, size);
        Ok(fd)
    }
}

impl VirtualMemory for SharedMemory {
    fn reserve(
        &mut self,
        virtual_size: usize,
        physical_size: usize,
        context_size: usize,
    ) -> Result<Reservation, VmemError> {
        assert!(self.mapped.is_none(), "host region already reserved");

        let fd = Self::open_object(physical_size)?;

        let page = super::page_size();
        let context_span = context_size.div_ceil(page) * page;
        let len = context_span + virtual_size;
        let length = NonZeroUsize::new(len).ok_or_else(|| VmemError::Reserve {
            size: len,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;

        // SAFETY: a fresh anonymous mapping at a host-chosen address aliases nothing.
        let start = unsafe {
            mmap_anonymous(None, length, ProtFlags::PROT_NONE, MapFlags::MAP_PRIVATE)
        }
        .map_err(|e| VmemError::Reserve {
            size: len,
            source: io::Error::from(e),
        })?;

        let context = NonNull::new(start.as_ptr().cast::<u8>());
        // SAFETY: `context_span` is within the mapping just created.
        let base = unsafe { start.cast::<u8>().add(context_span) };
        let reservation = Reservation {
            base,
            size: virtual_size,
            context: if context_size > 0 { context } else { None },
            context_size,
        };

        debug!(
            "Reserved {:#X} bytes at {:p} (context block {:#X} bytes)",
            len,
            start.as_ptr(),
            context_span
        );
        self.mapped = Some(Mapped {
            fd,
            start,
            len,
            reservation,
        });
        Ok(reservation)
    }

    fn create_mappings(&mut self, mappings: &[VmemMapping]) -> Result<(), VmemError> {
        let mapped = self.mapped.as_ref().ok_or(VmemError::NotMapped)?;
        let base = mapped.reservation.base;

        for mapping in mappings {
            assert!(
                mapping.end_address <= mapped.reservation.size,
                "mapping {:?} leaves the reserved region",
                mapping
            );
            let view_len = if mapping.mirrored {
                mapping.memsize
            } else {
                mapping.len().min(mapping.memsize)
            };
            for offset in mapping.views() {
                let fail = |source: io::Error| VmemError::Map {
                    offset,
                    size: view_len,
                    source,
                };
                let length = NonZeroUsize::new(view_len)
                    .ok_or_else(|| fail(io::Error::from(io::ErrorKind::InvalidInput)))?;
                let addr = NonZeroUsize::new(base.as_ptr() as usize + offset);

                // SAFETY: the target lies inside our own reservation, which MAP_FIXED replaces.
                unsafe {
                    mmap(
                        addr,
                        length,
                        ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                        MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                        &mapped.fd,
                        mapping.memoffset as nix::libc::off_t,
                    )
                }
                .map_err(|e| fail(io::Error::from(e)))?;

                trace!(
                    "  view {:#010X}..{:#010X} -> physical {:#X}",
                    offset,
                    offset + view_len,
                    mapping.memoffset
                );
            }
        }
        Ok(())
    }

    fn ondemand_page(&mut self, addr: NonNull<u8>, size: usize) -> Result<(), VmemError> {
        let mapped = self.mapped.as_ref().ok_or(VmemError::NotMapped)?;
        let context = mapped.reservation.context.ok_or(VmemError::NotMapped)?;
        let start = context.as_ptr() as usize;
        let end = start + mapped.reservation.context_size;
        assert!(
            (start..end).contains(&(addr.as_ptr() as usize)),
            "{:p} is outside the context block",
            addr.as_ptr()
        );

        // SAFETY: the range lies inside the context block this object reserved.
        unsafe { super::region_unlock(addr.as_ptr(), size) }
    }

    fn destroy(&mut self) {
        if let Some(mapped) = self.mapped.take() {
            // SAFETY: the mapping is ours and every pointer into it is dropped with the directory.
            if let Err(e) = unsafe { munmap(mapped.start, mapped.len) } {
                debug!("munmap of {:p} failed: {}", mapped.start.as_ptr(), e);
            }
            debug!("Released host region at {:p}", mapped.start.as_ptr());
        }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        self.destroy();
    }
}
