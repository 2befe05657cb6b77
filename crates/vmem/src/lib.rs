//! Guest address space for the SH4 in Dreamcast-family emulators.
//!
//! A 256-entry page directory routes every 32-bit guest access either to a
//! block of host memory or to a registered MMIO handler. RAM blocks are
//! backed by aliased host mappings where the host allows it and by plain
//! buffers otherwise.

pub mod access;
pub mod address_space;
pub mod args;
pub mod directory;
pub mod error;
pub mod flat;
pub mod handler;
pub mod layout;
pub mod platform;

// Re-export commonly used types
pub use access::{MemValue, PageInfo, Resolved};
pub use address_space::{AddressSpace, FaultResolution, Strategy, VmemConfig, VramWindow};
pub use args::{Args, Poke};
pub use directory::{PageDirectory, PageEntry};
pub use error::VmemError;
pub use handler::{HandlerId, HandlerRegistry, HandlerSet, MAX_HANDLERS, UNMAPPED_READ_VALUE};
pub use layout::{BackingRegion, MemoryLayout, Platform, RegionKind, VmemMapping};
pub use platform::VirtualMemory;
