use ctr_hw::memory_map::{fcram, linear_heap, new_linear_heap, vram};
use ctr_hw::{PAddr, VAddr};

use crate::region::{BackingRegion, PagePointer};

/// How a flush request should synchronize the rasterizer cache with guest
/// memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Write GPU-side contents back to backing memory.
    Flush,
    /// Drop GPU-side contents, preparing for a CPU write.
    Invalidate,
    /// Both.
    FlushAndInvalidate,
}

/// The three flush entry points the rasterizer exposes over physical ranges.
///
/// Injected into [`MemorySystem`](crate::MemorySystem) at startup; the
/// rasterizer in turn calls back through
/// [`rasterizer_mark_region_cached`](crate::MemorySystem::rasterizer_mark_region_cached),
/// so both sides only ever see this narrow seam. Calls block the invoking
/// thread until the rasterizer has synchronized.
pub trait RasterizerInterface: Send + Sync {
    fn flush_region(&self, start: PAddr, size: u32);
    fn invalidate_region(&self, start: PAddr, size: u32);
    fn flush_and_invalidate_region(&self, start: PAddr, size: u32);
}

/// All virtual addresses aliasing `addr` in the cacheable windows, linear
/// heap before new linear heap.
///
/// VRAM has exactly one alias. FCRAM below the original-model end is visible
/// through both heap windows; the enhanced-model tail only through the new
/// one. Anything else is not reachable by the rasterizer; some games ask for
/// textures past the end of VRAM, so this logs instead of panicking.
pub(crate) fn physical_to_virtual_for_rasterizer(addr: PAddr) -> Vec<VAddr> {
    if (vram::PADDR..vram::PADDR_END).contains(&addr) {
        return vec![addr - vram::PADDR + vram::VADDR];
    }
    if (fcram::PADDR..fcram::PADDR_END).contains(&addr) {
        return vec![
            addr - fcram::PADDR + linear_heap::VADDR,
            addr - fcram::PADDR + new_linear_heap::VADDR,
        ];
    }
    if (fcram::PADDR_END..fcram::N3DS_PADDR_END).contains(&addr) {
        return vec![addr - fcram::PADDR + new_linear_heap::VADDR];
    }
    tracing::error!("invalid physical address for rasterizer: {addr:#010X}");
    Vec::new()
}

/// Backing-store pointer for a virtual address inside one of the cacheable
/// windows. Calling this outside those windows is a programming error.
pub(crate) fn pointer_for_rasterizer_cache(addr: VAddr) -> PagePointer {
    if (linear_heap::VADDR..linear_heap::VADDR_END).contains(&addr) {
        return PagePointer::new(BackingRegion::Fcram, addr - linear_heap::VADDR);
    }
    if (new_linear_heap::VADDR..new_linear_heap::VADDR_END).contains(&addr) {
        return PagePointer::new(BackingRegion::Fcram, addr - new_linear_heap::VADDR);
    }
    if (vram::VADDR..vram::VADDR_END).contains(&addr) {
        return PagePointer::new(BackingRegion::Vram, addr - vram::VADDR);
    }
    unreachable!("rasterizer cache pointer requested outside cacheable windows: {addr:#010X}");
}

/// Calls `dispatch` with the physical image of every non-empty overlap
/// between `[start, start + size)` and a cacheable window.
///
/// The two heap windows alias overlapping FCRAM ranges; each is dispatched
/// independently when both contain part of the input range.
pub(crate) fn for_each_cached_window_overlap(
    start: VAddr,
    size: u64,
    mut dispatch: impl FnMut(PAddr, u32),
) {
    let start = u64::from(start);
    let end = start + size;

    let mut check_region = |region_start: VAddr, region_end: VAddr, paddr_region_start: PAddr| {
        let region_start = u64::from(region_start);
        let region_end = u64::from(region_end);
        if start >= region_end || end <= region_start {
            // No overlap with region
            return;
        }

        let overlap_start = start.max(region_start);
        let overlap_end = end.min(region_end);
        let physical_start = paddr_region_start + (overlap_start - region_start) as PAddr;
        let overlap_size = (overlap_end - overlap_start) as u32;
        dispatch(physical_start, overlap_size);
    };

    check_region(linear_heap::VADDR, linear_heap::VADDR_END, fcram::PADDR);
    check_region(
        new_linear_heap::VADDR,
        new_linear_heap::VADDR_END,
        fcram::PADDR,
    );
    check_region(vram::VADDR, vram::VADDR_END, vram::PADDR);
}
