use std::sync::Arc;

use crate::region::MemoryRegion;

/// Seam to the audio DSP, which owns the DSP RAM buffer.
///
/// The memory system resolves guest physical addresses in the DSP window
/// against the region returned here. Injected once via
/// [`set_dsp`](crate::MemorySystem::set_dsp); resolving a DSP-backed access
/// before injection is a programming error.
pub trait DspInterface: Send + Sync {
    /// The byte storage backing the DSP address range.
    fn dsp_memory(&self) -> Arc<MemoryRegion>;
}
