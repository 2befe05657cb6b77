//! Hardware constants for the Dreamcast family of boards.
//!
//! Nothing in here does anything; it only names the numbers that the
//! emulator crates share.

pub mod memory_map;
pub mod specs;
