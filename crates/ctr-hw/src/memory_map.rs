//! Fixed physical and virtual windows of the guest memory map.
//!
//! # References
//! - <https://www.3dbrew.org/wiki/Memory_layout>

/// log2 of the guest page size.
pub const PAGE_BITS: u32 = 12;
/// Guest page size in bytes.
pub const PAGE_SIZE: u32 = 1 << PAGE_BITS;
/// `PAGE_SIZE - 1`, for extracting the in-page offset of an address.
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;
/// Flat page-table entry count covering the whole 32-bit address space.
pub const PAGE_TABLE_NUM_ENTRIES: usize = 1 << (32 - PAGE_BITS);

/// FCRAM - main system memory.
///
/// Reference: <https://www.3dbrew.org/wiki/Memory_layout#FCRAM>
pub mod fcram {
    /// FCRAM physical base address
    pub const PADDR: u32 = 0x2000_0000;
    /// FCRAM size on the original model (128 MB)
    pub const SIZE: u32 = 0x0800_0000;
    /// FCRAM size on the enhanced model (256 MB)
    pub const N3DS_SIZE: u32 = 0x1000_0000;
    /// End of original-model FCRAM (exclusive)
    pub const PADDR_END: u32 = PADDR + SIZE;
    /// End of enhanced-model FCRAM (exclusive)
    pub const N3DS_PADDR_END: u32 = PADDR + N3DS_SIZE;
}

/// VRAM - video memory, visible to both the CPU and the GPU.
///
/// Reference: <https://www.3dbrew.org/wiki/Memory_layout#VRAM>
pub mod vram {
    /// VRAM physical base address
    pub const PADDR: u32 = 0x1800_0000;
    /// VRAM size (6 MB)
    pub const SIZE: u32 = 0x0060_0000;
    /// End of physical VRAM (exclusive)
    pub const PADDR_END: u32 = PADDR + SIZE;
    /// Fixed virtual window mapping VRAM 1:1
    pub const VADDR: u32 = 0x1F00_0000;
    /// End of the virtual VRAM window (exclusive)
    pub const VADDR_END: u32 = VADDR + SIZE;
}

/// DSP RAM - audio DSP working memory, accessible from the CPU bus.
pub mod dsp_ram {
    /// DSP RAM physical base address
    pub const PADDR: u32 = 0x1FF0_0000;
    /// DSP RAM size (512 KB)
    pub const SIZE: u32 = 0x0008_0000;
    /// End of DSP RAM (exclusive)
    pub const PADDR_END: u32 = PADDR + SIZE;
}

/// Extra RAM present on the enhanced model only.
pub mod n3ds_extra_ram {
    /// Extra RAM physical base address
    pub const PADDR: u32 = 0x1F00_0000;
    /// Extra RAM size (4 MB)
    pub const SIZE: u32 = 0x0040_0000;
    /// End of extra RAM (exclusive)
    pub const PADDR_END: u32 = PADDR + SIZE;
}

/// Linear heap - virtual window aliasing FCRAM, used by older guest OS
/// versions.
pub mod linear_heap {
    /// Linear heap virtual base address
    pub const VADDR: u32 = 0x1400_0000;
    /// Linear heap window size (covers original-model FCRAM)
    pub const SIZE: u32 = 0x0800_0000;
    /// End of the linear heap window (exclusive)
    pub const VADDR_END: u32 = VADDR + SIZE;
}

/// New linear heap - virtual window aliasing FCRAM, used by newer guest OS
/// versions. Covers the whole enhanced-model FCRAM.
pub mod new_linear_heap {
    /// New linear heap virtual base address
    pub const VADDR: u32 = 0x3000_0000;
    /// New linear heap window size (covers enhanced-model FCRAM)
    pub const SIZE: u32 = 0x1000_0000;
    /// End of the new linear heap window (exclusive)
    pub const VADDR_END: u32 = VADDR + SIZE;
}
