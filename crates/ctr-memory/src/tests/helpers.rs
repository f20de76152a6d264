use std::sync::{Arc, Mutex};

use ctr_hw::memory_map::PAGE_SIZE;
use ctr_hw::{PAddr, VAddr};

use crate::{MemorySystem, RasterizerInterface, SharedPageTable};

/// Every call the memory system makes into the rasterizer, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushEvent {
    Flush(PAddr, u32),
    Invalidate(PAddr, u32),
    FlushAndInvalidate(PAddr, u32),
}

#[derive(Default)]
pub struct RecordingRasterizer {
    events: Mutex<Vec<FlushEvent>>,
}

impl RecordingRasterizer {
    pub fn take(&self) -> Vec<FlushEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl RasterizerInterface for RecordingRasterizer {
    fn flush_region(&self, start: PAddr, size: u32) {
        self.events.lock().unwrap().push(FlushEvent::Flush(start, size));
    }

    fn invalidate_region(&self, start: PAddr, size: u32) {
        self.events
            .lock()
            .unwrap()
            .push(FlushEvent::Invalidate(start, size));
    }

    fn flush_and_invalidate_region(&self, start: PAddr, size: u32) {
        self.events
            .lock()
            .unwrap()
            .push(FlushEvent::FlushAndInvalidate(start, size));
    }
}

/// A memory system with a recording rasterizer already injected.
pub fn system_with_rasterizer() -> (MemorySystem, Arc<RecordingRasterizer>) {
    let system = MemorySystem::new();
    let rasterizer = Arc::new(RecordingRasterizer::default());
    system.set_rasterizer(rasterizer.clone());
    (system, rasterizer)
}

/// Maps `num_pages` pages at `vaddr` onto FCRAM starting at `fcram_offset`
/// and makes the table current.
pub fn map_fcram(
    system: &MemorySystem,
    table: &SharedPageTable,
    vaddr: VAddr,
    fcram_offset: u32,
    num_pages: u32,
) {
    system.map_memory_region(
        table,
        vaddr,
        num_pages * PAGE_SIZE,
        Some(system.fcram_pointer(fcram_offset)),
    );
    system.set_current_page_table(Some(table.clone()));
}
