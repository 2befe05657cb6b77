/// Sega Dreamcast
pub mod dreamcast {
    /// Main RAM (16 MB)
    pub const RAM_SIZE: usize = 16 * 1024 * 1024;
    /// Video RAM (8 MB)
    pub const VRAM_SIZE: usize = 8 * 1024 * 1024;
    /// Sound RAM (2 MB)
    pub const ARAM_SIZE: usize = 2 * 1024 * 1024;
}

/// Sega Naomi
pub mod naomi {
    /// Main RAM (32 MB)
    pub const RAM_SIZE: usize = 32 * 1024 * 1024;
    /// Video RAM (16 MB)
    pub const VRAM_SIZE: usize = 16 * 1024 * 1024;
    /// Sound RAM (8 MB)
    pub const ARAM_SIZE: usize = 8 * 1024 * 1024;
}

/// Sega Naomi 2
///
/// Same as Naomi plus the ELAN geometry processor's private RAM.
pub mod naomi2 {
    /// Main RAM (32 MB)
    pub const RAM_SIZE: usize = super::naomi::RAM_SIZE;
    /// Video RAM (16 MB)
    pub const VRAM_SIZE: usize = super::naomi::VRAM_SIZE;
    /// Sound RAM (8 MB)
    pub const ARAM_SIZE: usize = super::naomi::ARAM_SIZE;
    /// ELAN RAM (32 MB)
    pub const ERAM_SIZE: usize = 32 * 1024 * 1024;
}

/// Sammy Atomiswave
pub mod atomiswave {
    /// Main RAM (16 MB)
    pub const RAM_SIZE: usize = 16 * 1024 * 1024;
    /// Video RAM (8 MB)
    pub const VRAM_SIZE: usize = 8 * 1024 * 1024;
    /// Sound RAM (8 MB)
    pub const ARAM_SIZE: usize = 8 * 1024 * 1024;
}
