use ctr_hw::memory_map::{linear_heap, new_linear_heap, vram, PAGE_SIZE};
use ctr_hw::VAddr;

/// Per-page "tracked by the rasterizer" bitmaps for the three cacheable
/// virtual windows.
///
/// Consulted at map time so that a page mapped into a fresh table after the
/// rasterizer already started tracking it inherits the cached attribute.
pub(crate) struct RasterizerCacheMarker {
    vram: Box<[bool]>,
    linear_heap: Box<[bool]>,
    new_linear_heap: Box<[bool]>,
}

impl RasterizerCacheMarker {
    pub fn new() -> Self {
        Self {
            vram: vec![false; (vram::SIZE / PAGE_SIZE) as usize].into_boxed_slice(),
            linear_heap: vec![false; (linear_heap::SIZE / PAGE_SIZE) as usize].into_boxed_slice(),
            new_linear_heap: vec![false; (new_linear_heap::SIZE / PAGE_SIZE) as usize]
                .into_boxed_slice(),
        }
    }

    /// Records the cached bit for the page containing `addr`. Addresses
    /// outside the cacheable windows are ignored.
    pub fn mark(&mut self, addr: VAddr, cached: bool) {
        if let Some((window, index)) = Self::locate(addr) {
            self.window_mut(window)[index] = cached;
        }
    }

    /// Whether the page containing `addr` is currently tracked. Addresses
    /// outside the cacheable windows are never tracked.
    pub fn is_cached(&self, addr: VAddr) -> bool {
        match Self::locate(addr) {
            Some((window, index)) => self.window(window)[index],
            None => false,
        }
    }

    fn locate(addr: VAddr) -> Option<(Window, usize)> {
        if (vram::VADDR..vram::VADDR_END).contains(&addr) {
            return Some((Window::Vram, ((addr - vram::VADDR) / PAGE_SIZE) as usize));
        }
        if (linear_heap::VADDR..linear_heap::VADDR_END).contains(&addr) {
            return Some((
                Window::LinearHeap,
                ((addr - linear_heap::VADDR) / PAGE_SIZE) as usize,
            ));
        }
        if (new_linear_heap::VADDR..new_linear_heap::VADDR_END).contains(&addr) {
            return Some((
                Window::NewLinearHeap,
                ((addr - new_linear_heap::VADDR) / PAGE_SIZE) as usize,
            ));
        }
        None
    }

    fn window(&self, window: Window) -> &[bool] {
        match window {
            Window::Vram => &self.vram,
            Window::LinearHeap => &self.linear_heap,
            Window::NewLinearHeap => &self.new_linear_heap,
        }
    }

    fn window_mut(&mut self, window: Window) -> &mut [bool] {
        match window {
            Window::Vram => &mut self.vram,
            Window::LinearHeap => &mut self.linear_heap,
            Window::NewLinearHeap => &mut self.new_linear_heap,
        }
    }
}

#[derive(Clone, Copy)]
enum Window {
    Vram,
    LinearHeap,
    NewLinearHeap,
}
