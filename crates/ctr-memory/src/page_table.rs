use std::sync::{Arc, RwLock};

use ctr_hw::memory_map::PAGE_TABLE_NUM_ENTRIES;

use crate::region::PagePointer;

/// Attribute of a guest page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Page is unmapped; reads return zero, writes are dropped.
    Unmapped,
    /// Page is mapped to ordinary memory; the pointer slot is set and every
    /// access goes through the fast path.
    Memory,
    /// Page is mapped to memory currently tracked by the rasterizer cache.
    /// The pointer slot is cleared so accesses fall through to the flush
    /// path.
    RasterizerCachedMemory,
    /// Reserved for MMIO-like pages with per-access hooks. Never produced by
    /// the current mapping surface.
    Special,
}

/// Flat per-process page table: one `(pointer, attribute)` pair per guest
/// page across the whole 32-bit address space.
///
/// Invariants, enforced at access time:
/// - `Memory` entries carry a pointer.
/// - `RasterizerCachedMemory` and `Unmapped` entries carry `None`.
pub struct PageTable {
    pub(crate) pointers: Box<[Option<PagePointer>]>,
    pub(crate) attributes: Box<[PageType]>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            pointers: vec![None; PAGE_TABLE_NUM_ENTRIES].into_boxed_slice(),
            attributes: vec![PageType::Unmapped; PAGE_TABLE_NUM_ENTRIES].into_boxed_slice(),
        }
    }

    /// Convenience constructor for the shared form every consumer uses.
    pub fn new_shared() -> SharedPageTable {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn pointer(&self, page_index: usize) -> Option<PagePointer> {
        self.pointers[page_index]
    }

    pub fn attribute(&self, page_index: usize) -> PageType {
        self.attributes[page_index]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A page table as handed around between the kernel and the memory system.
///
/// The kernel owns the `Arc`; the memory system registry holds `Weak`
/// references and the rasterizer-cache fan-out write-locks tables one at a
/// time.
pub type SharedPageTable = Arc<RwLock<PageTable>>;
