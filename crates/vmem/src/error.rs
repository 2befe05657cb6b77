use std::io;
use thiserror::Error;

/// Host-side failures of the address space.
///
/// Misuse of the mapping API is a bug in the caller and panics instead.
#[derive(Debug, Error)]
pub enum VmemError {
    /// The host cannot alias physical pages into several virtual windows
    #[error("host virtual memory aliasing is not supported on this platform")]
    Unsupported,

    /// Reserving the contiguous virtual region failed
    #[error("failed to reserve {size:#X} bytes of address space")]
    Reserve {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// Creating the shared backing object or one of its views failed
    #[error("failed to map {size:#X} bytes at virtual offset {offset:#X}")]
    Map {
        offset: usize,
        size: usize,
        #[source]
        source: io::Error,
    },

    /// Allocating a flat backing buffer failed
    #[error("failed to allocate {size:#X} bytes for {region}")]
    Allocate {
        region: &'static str,
        size: usize,
        #[source]
        source: region::Error,
    },

    /// Changing the host page protection failed
    #[error("failed to change page protection")]
    Protect(#[from] region::Error),

    /// The operation needs backing memory but `init_mappings` has not run
    #[error("backing memory is not mapped")]
    NotMapped,
}
