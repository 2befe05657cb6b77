//! Memory-mapped I/O handler registry.
//!
//! A handler is a set of per-width read and write callbacks that backs one or
//! more directory pages. The registry is append-only: handlers are registered
//! while the machine is being wired up and live until the address space is
//! reset. Handler 0 is always the "unmapped" handler.

use std::fmt;
use tracing::{trace, warn};

/// Maximum number of handlers an address space can hold
pub const MAX_HANDLERS: usize = 32;

/// Value returned by reads that hit the unmapped handler, truncated to the access width
pub const UNMAPPED_READ_VALUE: u32 = 0xFFFF_FFFF;

/// Unmapped accesses logged at warn level per callback before dropping to trace
const UNMAPPED_WARN_LIMIT: u32 = 8;

pub type ReadFn<T> = Box<dyn FnMut(u32) -> T>;
pub type WriteFn<T> = Box<dyn FnMut(u32, T)>;

/// Index of a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u8);

impl HandlerId {
    /// The handler installed by `init`, backing every page nothing else claims
    pub const UNMAPPED: HandlerId = HandlerId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Callbacks supplied at registration time. Any of them may be left out.
///
/// ```
/// use vmem::HandlerSet;
///
/// let set = HandlerSet::new()
///     .read32(|addr| addr ^ 0xFFFF_FFFF)
///     .write32(|_addr, _value| {});
/// # let _ = set;
/// ```
#[derive(Default)]
pub struct HandlerSet {
    read8: Option<ReadFn<u8>>,
    read16: Option<ReadFn<u16>>,
    read32: Option<ReadFn<u32>>,
    write8: Option<WriteFn<u8>>,
    write16: Option<WriteFn<u16>>,
    write32: Option<WriteFn<u32>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read8(mut self, f: impl FnMut(u32) -> u8 + 'static) -> Self {
        self.read8 = Some(Box::new(f));
        self
    }

    pub fn read16(mut self, f: impl FnMut(u32) -> u16 + 'static) -> Self {
        self.read16 = Some(Box::new(f));
        self
    }

    pub fn read32(mut self, f: impl FnMut(u32) -> u32 + 'static) -> Self {
        self.read32 = Some(Box::new(f));
        self
    }

    pub fn write8(mut self, f: impl FnMut(u32, u8) + 'static) -> Self {
        self.write8 = Some(Box::new(f));
        self
    }

    pub fn write16(mut self, f: impl FnMut(u32, u16) + 'static) -> Self {
        self.write16 = Some(Box::new(f));
        self
    }

    pub fn write32(mut self, f: impl FnMut(u32, u32) + 'static) -> Self {
        self.write32 = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("read8", &self.read8.is_some())
            .field("read16", &self.read16.is_some())
            .field("read32", &self.read32.is_some())
            .field("write8", &self.write8.is_some())
            .field("write16", &self.write16.is_some())
            .field("write32", &self.write32.is_some())
            .finish()
    }
}

/// A registered handler with every callback filled in
pub(crate) struct Handler {
    pub(crate) read8: ReadFn<u8>,
    pub(crate) read16: ReadFn<u16>,
    pub(crate) read32: ReadFn<u32>,
    pub(crate) write8: WriteFn<u8>,
    pub(crate) write16: WriteFn<u16>,
    pub(crate) write32: WriteFn<u32>,
}

impl Handler {
    fn from_set(set: HandlerSet) -> Self {
        Self {
            read8: set
                .read8
                .unwrap_or_else(|| unmapped_read(8, UNMAPPED_READ_VALUE as u8)),
            read16: set
                .read16
                .unwrap_or_else(|| unmapped_read(16, UNMAPPED_READ_VALUE as u16)),
            read32: set
                .read32
                .unwrap_or_else(|| unmapped_read(32, UNMAPPED_READ_VALUE)),
            write8: set.write8.unwrap_or_else(|| unmapped_write(8)),
            write16: set.write16.unwrap_or_else(|| unmapped_write(16)),
            write32: set.write32.unwrap_or_else(|| unmapped_write(32)),
        }
    }
}

fn unmapped_read<T: Copy + 'static>(bits: u32, value: T) -> ReadFn<T> {
    let mut hits = 0u32;
    Box::new(move |addr| {
        hits = hits.saturating_add(1);
        if hits <= UNMAPPED_WARN_LIMIT {
            warn!("Read{} from {:#010X}, not mapped", bits, addr);
        } else {
            trace!("Read{} from {:#010X}, not mapped", bits, addr);
        }
        value
    })
}

fn unmapped_write<T>(bits: u32) -> WriteFn<T>
where
    T: Copy + fmt::LowerHex + 'static,
{
    let mut hits = 0u32;
    Box::new(move |addr, value: T| {
        hits = hits.saturating_add(1);
        if hits <= UNMAPPED_WARN_LIMIT {
            warn!(
                "Write{} to {:#010X}, value={:#x}, not mapped",
                bits, addr, value
            );
        } else {
            trace!(
                "Write{} to {:#010X}, value={:#x}, not mapped",
                bits, addr, value
            );
        }
    })
}

/// Append-only table of handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::with_capacity(MAX_HANDLERS),
        }
    }

    /// Register a handler, filling in missing callbacks with the unmapped defaults.
    ///
    /// Panics once `MAX_HANDLERS` handlers exist.
    pub fn register(&mut self, set: HandlerSet) -> HandlerId {
        assert!(
            self.handlers.len() < MAX_HANDLERS,
            "handler table full ({} handlers)",
            MAX_HANDLERS
        );
        let id = HandlerId(self.handlers.len() as u8);
        trace!("Registering {}: {:?}", id, set);
        self.handlers.push(Handler::from_set(set));
        id
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        id.index() < self.handlers.len()
    }

    pub(crate) fn get_mut(&mut self, id: HandlerId) -> &mut Handler {
        &mut self.handlers[id.index()]
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.handlers.len())
            .finish()
    }
}
