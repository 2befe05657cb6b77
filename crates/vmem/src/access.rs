//! Guest memory accessors.
//!
//! Every access looks up one directory entry. Memory-backed pages are read or
//! written in place; handler pages go through the page's callbacks. 64-bit
//! accesses to handler pages are split into two 32-bit calls, low word first.
//!
//! Block accesses need not be aligned. An access whose last byte would run
//! past the end of its block wraps around to the start of the block, like
//! every other address in a mirrored range.

use crate::address_space::AddressSpace;
use crate::directory::PageEntry;
use crate::handler::{HandlerId, HandlerRegistry};
use oxidicast_hw::memory_map::PAGE_SIZE;
use std::ptr::NonNull;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Access widths the guest bus supports
pub trait MemValue: sealed::Sealed + Copy + 'static {
    #[doc(hidden)]
    fn dispatch_read(handlers: &mut HandlerRegistry, id: HandlerId, addr: u32) -> Self;
    #[doc(hidden)]
    fn dispatch_write(handlers: &mut HandlerRegistry, id: HandlerId, addr: u32, value: Self);
}

macro_rules! impl_mem_value {
    ($ty:ty, $read:ident, $write:ident) => {
        impl MemValue for $ty {
            #[inline]
            fn dispatch_read(handlers: &mut HandlerRegistry, id: HandlerId, addr: u32) -> Self {
                (handlers.get_mut(id).$read)(addr)
            }

            #[inline]
            fn dispatch_write(
                handlers: &mut HandlerRegistry,
                id: HandlerId,
                addr: u32,
                value: Self,
            ) {
                (handlers.get_mut(id).$write)(addr, value)
            }
        }
    };
}

impl_mem_value!(u8, read8, write8);
impl_mem_value!(u16, read16, write16);
impl_mem_value!(u32, read32, write32);

impl MemValue for u64 {
    fn dispatch_read(handlers: &mut HandlerRegistry, id: HandlerId, addr: u32) -> Self {
        let handler = handlers.get_mut(id);
        let low = (handler.read32)(addr);
        let high = (handler.read32)(addr.wrapping_add(4));
        u64::from(low) | (u64::from(high) << 32)
    }

    fn dispatch_write(handlers: &mut HandlerRegistry, id: HandlerId, addr: u32, value: Self) {
        let handler = handlers.get_mut(id);
        (handler.write32)(addr, value as u32);
        (handler.write32)(addr.wrapping_add(4), (value >> 32) as u32);
    }
}

/// Where a guest address ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// Host address of the byte
    Memory(NonNull<u8>),
    /// Handler servicing the page
    Handler(HandlerId),
}

/// [`Resolved`] target plus how many bytes from it are contiguous in the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub target: Resolved,
    /// Bytes up to the block's next wraparound, capped at a page; 0 for handler pages
    pub size: usize,
}

/// Load a `T` at `offset` of a block wrapping at `mask`.
///
/// # Safety
///
/// `base` must be valid for `mask + 1` bytes and `offset <= mask`.
#[inline(always)]
unsafe fn block_read<T: MemValue>(base: NonNull<u8>, offset: usize, mask: usize) -> T {
    if offset + (size_of::<T>() - 1) <= mask {
        // SAFETY: the whole value lies inside the block.
        unsafe { base.as_ptr().add(offset).cast::<T>().read_unaligned() }
    } else {
        // SAFETY: forwarded from the caller.
        unsafe { block_read_wrapped(base, offset, mask) }
    }
}

#[cold]
unsafe fn block_read_wrapped<T: MemValue>(base: NonNull<u8>, offset: usize, mask: usize) -> T {
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes[..size_of::<T>()].iter_mut().enumerate() {
        // SAFETY: every index is masked into the block.
        *byte = unsafe { base.as_ptr().add((offset + i) & mask).read() };
    }
    // SAFETY: `bytes` holds at least `size_of::<T>()` initialised bytes.
    unsafe { bytes.as_ptr().cast::<T>().read_unaligned() }
}

/// Store a `T` at `offset` of a block wrapping at `mask`.
///
/// # Safety
///
/// Same as [`block_read`].
#[inline(always)]
unsafe fn block_write<T: MemValue>(base: NonNull<u8>, offset: usize, mask: usize, value: T) {
    if offset + (size_of::<T>() - 1) <= mask {
        // SAFETY: the whole value lies inside the block.
        unsafe { base.as_ptr().add(offset).cast::<T>().write_unaligned(value) }
    } else {
        // SAFETY: forwarded from the caller.
        unsafe { block_write_wrapped(base, offset, mask, value) }
    }
}

#[cold]
unsafe fn block_write_wrapped<T: MemValue>(base: NonNull<u8>, offset: usize, mask: usize, value: T) {
    let mut bytes = [0u8; 8];
    // SAFETY: `bytes` has room for any `MemValue`.
    unsafe { bytes.as_mut_ptr().cast::<T>().write_unaligned(value) };
    for (i, byte) in bytes[..size_of::<T>()].iter().enumerate() {
        // SAFETY: every index is masked into the block.
        unsafe { base.as_ptr().add((offset + i) & mask).write(*byte) };
    }
}

impl AddressSpace {
    /// Read a `T` from the guest address space
    #[inline(always)]
    pub fn readt<T: MemValue>(&mut self, addr: u32) -> T {
        match self.directory.lookup(addr) {
            PageEntry::Block {
                base,
                origin,
                shift,
            } => {
                let offset = PageEntry::block_offset(origin, shift, addr);
                // SAFETY: `map_block`'s contract keeps the whole masked block valid.
                unsafe { block_read(base, offset, (u32::MAX >> shift) as usize) }
            }
            PageEntry::Handler(id) => T::dispatch_read(&mut self.handlers, id, addr),
        }
    }

    /// Write a `T` to the guest address space
    #[inline(always)]
    pub fn writet<T: MemValue>(&mut self, addr: u32, value: T) {
        match self.directory.lookup(addr) {
            PageEntry::Block {
                base,
                origin,
                shift,
            } => {
                let offset = PageEntry::block_offset(origin, shift, addr);
                // SAFETY: as in `readt`.
                unsafe { block_write(base, offset, (u32::MAX >> shift) as usize, value) }
            }
            PageEntry::Handler(id) => T::dispatch_write(&mut self.handlers, id, addr, value),
        }
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        self.readt(addr)
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        self.readt(addr)
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        self.readt(addr)
    }

    pub fn read64(&mut self, addr: u32) -> u64 {
        self.readt(addr)
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        self.writet(addr, value)
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.writet(addr, value)
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.writet(addr, value)
    }

    pub fn write64(&mut self, addr: u32, value: u64) {
        self.writet(addr, value)
    }

    /// Byte read sign-extended to 32 bits, as `MOV.B` loads it
    pub fn read8_sx32(&mut self, addr: u32) -> u32 {
        self.read8(addr) as i8 as i32 as u32
    }

    /// Word read sign-extended to 32 bits, as `MOV.W` loads it
    pub fn read16_sx32(&mut self, addr: u32) -> u32 {
        self.read16(addr) as i16 as i32 as u32
    }

    /// Resolve an address without accessing it
    pub fn resolve(&self, addr: u32) -> Resolved {
        match self.directory.lookup(addr) {
            PageEntry::Block {
                base,
                origin,
                shift,
            } => {
                // SAFETY: the offset stays inside the mapped block.
                let ptr = unsafe { base.add(PageEntry::block_offset(origin, shift, addr)) };
                Resolved::Memory(ptr)
            }
            PageEntry::Handler(id) => Resolved::Handler(id),
        }
    }

    /// Like [`AddressSpace::resolve`], also reporting how far the host bytes run
    pub fn page_info(&self, addr: u32) -> PageInfo {
        let target = self.resolve(addr);
        let size = match self.directory.lookup(addr) {
            PageEntry::Block { origin, shift, .. } => {
                let block = ((u32::MAX >> shift) as usize + 1).min(PAGE_SIZE);
                block - PageEntry::block_offset(origin, shift, addr) % block
            }
            PageEntry::Handler(_) => 0,
        };
        PageInfo { target, size }
    }
}

#[cfg(test)]
mod tests {
    use crate::{AddressSpace, HandlerSet, Resolved, VmemConfig};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[repr(C, align(32))]
    struct Aligned([u8; 256]);

    #[test]
    fn block_reads_are_little_endian() {
        let mut block = Box::new(Aligned([0; 256]));
        block.0[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut space = AddressSpace::new(VmemConfig::default());
        unsafe { space.map_block(block.0.as_mut_ptr(), 0x30, 0x30, 0xFF) };

        assert_eq!(space.read8(0x3000_0001), 0x02);
        assert_eq!(space.read16(0x3000_0002), 0x0403);
        assert_eq!(space.read32(0x3000_0004), 0x0807_0605);
        assert_eq!(space.read64(0x3000_0000), 0x0807_0605_0403_0201);
        // Wraps every 256 bytes
        assert_eq!(space.read8(0x3000_0101), 0x02);
        assert_eq!(space.read8(0x30FF_FF01), 0x02);
    }

    #[test]
    fn sign_extension() {
        let mut block = Box::new(Aligned([0; 256]));
        block.0[0] = 0x80;
        block.0[2..4].copy_from_slice(&0x8001u16.to_le_bytes());
        block.0[4] = 0x7F;
        let mut space = AddressSpace::new(VmemConfig::default());
        unsafe { space.map_block(block.0.as_mut_ptr(), 0x30, 0x30, 0xFF) };

        assert_eq!(space.read8_sx32(0x3000_0000), 0xFFFF_FF80);
        assert_eq!(space.read16_sx32(0x3000_0002), 0xFFFF_8001);
        assert_eq!(space.read8_sx32(0x3000_0004), 0x7F);
    }

    #[test]
    fn misaligned_block_accesses_read_the_bytes_at_addr() {
        let mut block = Box::new(Aligned([0; 256]));
        for (i, byte) in block.0.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let mut space = AddressSpace::new(VmemConfig::default());
        unsafe { space.map_block(block.0.as_mut_ptr(), 0x30, 0x30, 0xFF) };

        assert_eq!(space.read16(0x3000_0001), 0x0201);
        assert_eq!(space.read32(0x3000_0013), 0x1615_1413);
        assert_eq!(space.read64(0x3000_0005), 0x0C0B_0A09_0807_0605);

        space.write32(0x3000_0021, 0xAABB_CCDD);
        assert_eq!(&block.0[0x20..0x26], &[0x20, 0xDD, 0xCC, 0xBB, 0xAA, 0x25]);
    }

    #[test]
    fn accesses_past_the_block_end_wrap() {
        let mut block = Box::new(Aligned([0; 256]));
        for (i, byte) in block.0.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let mut space = AddressSpace::new(VmemConfig::default());
        unsafe { space.map_block(block.0.as_mut_ptr(), 0x30, 0x30, 0xFF) };

        assert_eq!(space.read32(0x3000_00FE), 0x0100_FFFE);
        assert_eq!(space.read16(0x3000_01FF), 0x00FF);
        assert_eq!(space.read64(0x3000_00FC), 0x0302_0100_FFFE_FDFC);

        space.write64(0x3000_00FD, 0x1111_2222_3333_4444);
        assert_eq!(&block.0[0xFD..], &[0x44, 0x44, 0x33]);
        assert_eq!(&block.0[..6], &[0x33, 0x22, 0x22, 0x11, 0x11, 0x05]);
    }

    #[test]
    fn handler_write64_splits_low_word_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let mut space = AddressSpace::new(VmemConfig::default());
        let id = space.register_handler(
            HandlerSet::new().write32(move |addr, value| sink.borrow_mut().push((addr, value))),
        );
        space.map_handler(id, 0x20, 0x20);

        space.write64(0x2000_0010, 0x1122_3344_5566_7788);
        assert_eq!(
            *log.borrow(),
            vec![(0x2000_0010, 0x5566_7788), (0x2000_0014, 0x1122_3344)]
        );
    }

    #[test]
    fn page_info_reports_contiguous_bytes() {
        let mut block = Box::new(Aligned([0; 256]));
        let mut space = AddressSpace::new(VmemConfig::default());
        unsafe { space.map_block(block.0.as_mut_ptr(), 0x30, 0x30, 0xFF) };

        let info = space.page_info(0x3000_0110);
        assert_eq!(info.size, 0xF0);
        match info.target {
            Resolved::Memory(ptr) => {
                assert_eq!(ptr.as_ptr(), unsafe { block.0.as_mut_ptr().add(0x10) })
            }
            other => panic!("unexpected target {:?}", other),
        }

        let info = space.page_info(0x4000_0000);
        assert_eq!(info.size, 0);
        assert!(matches!(info.target, Resolved::Handler(_)));
    }
}
