//! Hardware constants for the emulated console.
//!
//! # References
//! - <https://www.3dbrew.org/wiki/Memory_layout>

pub mod memory_map;

/// Guest virtual address, as seen by emulated code.
pub type VAddr = u32;

/// Guest physical address in the emulated memory map.
pub type PAddr = u32;
