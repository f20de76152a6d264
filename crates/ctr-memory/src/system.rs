use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use thiserror::Error;
use tracing::{debug, error};

use ctr_hw::memory_map::{
    dsp_ram, fcram, n3ds_extra_ram, vram, PAGE_BITS, PAGE_MASK, PAGE_SIZE, PAGE_TABLE_NUM_ENTRIES,
};
use ctr_hw::{PAddr, VAddr};

use crate::dsp::DspInterface;
use crate::marker::RasterizerCacheMarker;
use crate::page_table::{PageTable, PageType, SharedPageTable};
use crate::rasterizer::{
    for_each_cached_window_overlap, physical_to_virtual_for_rasterizer,
    pointer_for_rasterizer_cache, FlushMode, RasterizerInterface,
};
use crate::region::{BackingRegion, MemoryRegion, PagePointer};

/// Errors from the fallible physical byte-access surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// No physical window backs the address.
    #[error("no physical memory window backs {paddr:#010X}")]
    InvalidPhysicalAddress { paddr: PAddr },
    /// The access starts inside a window but runs past its end.
    #[error("physical access at {paddr:#010X} (len {len}) runs past the end of its window")]
    OutOfRange { paddr: PAddr, len: usize },
}

/// State touched by the rasterizer-cache protocol: the per-window marker
/// bitmaps and the registry of live page tables the mark fan-out must keep
/// consistent.
///
/// Guarded by one mutex because `rasterizer_mark_region_cached` runs on the
/// rasterizer thread. Lock order: this mutex strictly before any page-table
/// lock; never held across a call into the rasterizer.
struct CacheState {
    marker: RasterizerCacheMarker,
    page_tables: Vec<Weak<RwLock<PageTable>>>,
}

/// The guest memory subsystem.
///
/// Owns the backing stores and the rasterizer-cache marker, holds non-owning
/// references to the kernel's page tables and to the injected rasterizer/DSP
/// seams, and exposes typed access, block transfer, mapping, and
/// physical/virtual translation.
///
/// CPU-side entry points assume the caller serializes them (the kernel's
/// global HLE lock); `rasterizer_mark_region_cached` may additionally be
/// called from the rasterizer thread at any time.
pub struct MemorySystem {
    fcram: Arc<MemoryRegion>,
    vram: Arc<MemoryRegion>,
    n3ds_extra_ram: Arc<MemoryRegion>,
    dsp_ram: OnceLock<Arc<MemoryRegion>>,
    rasterizer: OnceLock<Arc<dyn RasterizerInterface>>,
    current_page_table: RwLock<Option<SharedPageTable>>,
    cache: Mutex<CacheState>,
}

impl MemorySystem {
    /// Creates the subsystem with zero-initialized, enhanced-model-sized
    /// backing stores.
    pub fn new() -> Self {
        Self {
            fcram: Arc::new(MemoryRegion::new(fcram::N3DS_SIZE as usize)),
            vram: Arc::new(MemoryRegion::new(vram::SIZE as usize)),
            n3ds_extra_ram: Arc::new(MemoryRegion::new(n3ds_extra_ram::SIZE as usize)),
            dsp_ram: OnceLock::new(),
            rasterizer: OnceLock::new(),
            current_page_table: RwLock::new(None),
            cache: Mutex::new(CacheState {
                marker: RasterizerCacheMarker::new(),
                page_tables: Vec::new(),
            }),
        }
    }

    /// Injects the rasterizer flush seam. Must be called once at startup;
    /// until then flush dispatch is a no-op (headless operation).
    pub fn set_rasterizer(&self, rasterizer: Arc<dyn RasterizerInterface>) {
        if self.rasterizer.set(rasterizer).is_err() {
            panic!("rasterizer injected twice");
        }
    }

    /// Injects the DSP seam, borrowing its externally-owned RAM buffer.
    pub fn set_dsp(&self, dsp: &dyn DspInterface) {
        let memory = dsp.dsp_memory();
        assert_eq!(
            memory.len(),
            dsp_ram::SIZE as usize,
            "DSP memory has the wrong size"
        );
        if self.dsp_ram.set(memory).is_err() {
            panic!("DSP memory injected twice");
        }
    }

    fn backing(&self, region: BackingRegion) -> &Arc<MemoryRegion> {
        match region {
            BackingRegion::Fcram => &self.fcram,
            BackingRegion::Vram => &self.vram,
            BackingRegion::N3dsExtraRam => &self.n3ds_extra_ram,
            BackingRegion::DspRam => self
                .dsp_ram
                .get()
                .expect("DSP memory accessed before injection"),
        }
    }

    // ------------------------------------------------------------------
    // Page tables and mapping

    /// Switches the table used by the typed accessors, on guest-process
    /// context switch. The previous table is simply forgotten.
    pub fn set_current_page_table(&self, table: Option<SharedPageTable>) {
        *self.current_page_table.write().unwrap() = table;
    }

    pub fn get_current_page_table(&self) -> Option<SharedPageTable> {
        self.current_page_table.read().unwrap().clone()
    }

    /// Admits a table to the rasterizer-cache fan-out. The kernel must
    /// unregister it before dropping its owning `Arc`; registering the same
    /// table twice is undefined.
    pub fn register_page_table(&self, table: &SharedPageTable) {
        self.cache
            .lock()
            .unwrap()
            .page_tables
            .push(Arc::downgrade(table));
    }

    pub fn unregister_page_table(&self, table: &SharedPageTable) {
        let target = Arc::downgrade(table);
        self.cache
            .lock()
            .unwrap()
            .page_tables
            .retain(|entry| !Weak::ptr_eq(entry, &target));
    }

    /// Maps `size` bytes of backing memory at `base`, overwriting whatever
    /// the range previously held. `base` and `size` must be page-aligned.
    /// A `None` target maps the range with no backing; touching it later is
    /// an invariant violation.
    pub fn map_memory_region(
        &self,
        table: &SharedPageTable,
        base: VAddr,
        size: u32,
        target: Option<PagePointer>,
    ) {
        assert_eq!(size & PAGE_MASK, 0, "non-page aligned size: {size:#010X}");
        assert_eq!(base & PAGE_MASK, 0, "non-page aligned base: {base:#010X}");
        self.map_pages(
            table,
            base / PAGE_SIZE,
            size / PAGE_SIZE,
            target,
            PageType::Memory,
        );
    }

    /// Returns every page in the range to the unmapped state. `base` and
    /// `size` must be page-aligned.
    pub fn unmap_region(&self, table: &SharedPageTable, base: VAddr, size: u32) {
        assert_eq!(size & PAGE_MASK, 0, "non-page aligned size: {size:#010X}");
        assert_eq!(base & PAGE_MASK, 0, "non-page aligned base: {base:#010X}");
        self.map_pages(
            table,
            base / PAGE_SIZE,
            size / PAGE_SIZE,
            None,
            PageType::Unmapped,
        );
    }

    fn map_pages(
        &self,
        table: &SharedPageTable,
        mut base: u32,
        num_pages: u32,
        mut target: Option<PagePointer>,
        page_type: PageType,
    ) {
        debug!(
            "mapping {target:?} onto {:#010X}-{:#010X}",
            u64::from(base) << PAGE_BITS,
            (u64::from(base) + u64::from(num_pages)) << PAGE_BITS,
        );

        // Evict any rasterizer-cached content overlapping the range before
        // the entries change underneath it.
        self.flush_virtual_range(
            base << PAGE_BITS,
            u64::from(num_pages) << PAGE_BITS,
            FlushMode::FlushAndInvalidate,
        );

        let state = self.cache.lock().unwrap();
        let mut table = table.write().unwrap();

        let end = base + num_pages;
        while base != end {
            assert!(
                (base as usize) < PAGE_TABLE_NUM_ENTRIES,
                "out of range mapping at {:#010X}",
                u64::from(base) << PAGE_BITS,
            );

            let index = base as usize;
            table.attributes[index] = page_type;
            table.pointers[index] = target;

            // A page the rasterizer already tracks inherits the cached
            // attribute so the slow path stays active.
            if page_type == PageType::Memory && state.marker.is_cached(base << PAGE_BITS) {
                table.attributes[index] = PageType::RasterizerCachedMemory;
                table.pointers[index] = None;
            }

            base += 1;
            if let Some(pointer) = target.as_mut() {
                *pointer = pointer.offset_by(PAGE_SIZE);
            }
        }
    }

    fn current_table(&self) -> SharedPageTable {
        self.current_page_table
            .read()
            .unwrap()
            .as_ref()
            .expect("memory access with no active page table")
            .clone()
    }

    // ------------------------------------------------------------------
    // Typed access

    #[inline]
    pub fn read8(&self, addr: VAddr) -> u8 {
        self.read_single::<1>(addr)[0]
    }

    #[inline]
    pub fn read16(&self, addr: VAddr) -> u16 {
        u16::from_le_bytes(self.read_single(addr))
    }

    #[inline]
    pub fn read32(&self, addr: VAddr) -> u32 {
        u32::from_le_bytes(self.read_single(addr))
    }

    #[inline]
    pub fn read64(&self, addr: VAddr) -> u64 {
        u64::from_le_bytes(self.read_single(addr))
    }

    #[inline]
    pub fn write8(&self, addr: VAddr, data: u8) {
        self.write_single(addr, [data]);
    }

    #[inline]
    pub fn write16(&self, addr: VAddr, data: u16) {
        self.write_single(addr, data.to_le_bytes());
    }

    #[inline]
    pub fn write32(&self, addr: VAddr, data: u32) {
        self.write_single(addr, data.to_le_bytes());
    }

    #[inline]
    pub fn write64(&self, addr: VAddr, data: u64) {
        self.write_single(addr, data.to_le_bytes());
    }

    /// Single-word read. The access must not cross a page boundary; the
    /// block interface handles straddling ranges.
    fn read_single<const N: usize>(&self, vaddr: VAddr) -> [u8; N] {
        let table = self.current_table();
        let index = (vaddr >> PAGE_BITS) as usize;
        let (pointer, attribute) = {
            let table = table.read().unwrap();
            (table.pointers[index], table.attributes[index])
        };

        let mut value = [0u8; N];
        if let Some(pointer) = pointer {
            // Fast path: one copy out of the backing store.
            let offset = pointer.offset as usize + (vaddr & PAGE_MASK) as usize;
            self.backing(pointer.region).read(offset, &mut value);
            return value;
        }

        match attribute {
            PageType::Unmapped => {
                error!("unmapped read{} @ {vaddr:#010X}", N * 8);
                value
            }
            PageType::Memory => {
                panic!("mapped memory page without a pointer @ {vaddr:#010X}")
            }
            PageType::RasterizerCachedMemory => {
                self.flush_virtual_range(vaddr, N as u64, FlushMode::Flush);
                let pointer = pointer_for_rasterizer_cache(vaddr);
                self.backing(pointer.region)
                    .read(pointer.offset as usize, &mut value);
                value
            }
            PageType::Special => unreachable!("unexpected page attribute @ {vaddr:#010X}"),
        }
    }

    /// Single-word write; see [`MemorySystem::read_single`].
    fn write_single<const N: usize>(&self, vaddr: VAddr, data: [u8; N]) {
        let table = self.current_table();
        let index = (vaddr >> PAGE_BITS) as usize;
        let (pointer, attribute) = {
            let table = table.read().unwrap();
            (table.pointers[index], table.attributes[index])
        };

        if let Some(pointer) = pointer {
            // Fast path: one copy into the backing store.
            let offset = pointer.offset as usize + (vaddr & PAGE_MASK) as usize;
            self.backing(pointer.region).write(offset, &data);
            return;
        }

        match attribute {
            PageType::Unmapped => {
                let mut wide = [0u8; 8];
                wide[..N].copy_from_slice(&data);
                error!(
                    "unmapped write{} {:#010X} @ {vaddr:#010X}",
                    N * 8,
                    u64::from_le_bytes(wide),
                );
            }
            PageType::Memory => {
                panic!("mapped memory page without a pointer @ {vaddr:#010X}")
            }
            PageType::RasterizerCachedMemory => {
                self.flush_virtual_range(vaddr, N as u64, FlushMode::Invalidate);
                let pointer = pointer_for_rasterizer_cache(vaddr);
                self.backing(pointer.region)
                    .write(pointer.offset as usize, &data);
            }
            PageType::Special => unreachable!("unexpected page attribute @ {vaddr:#010X}"),
        }
    }

    // ------------------------------------------------------------------
    // Block transfer

    /// Reads `dest.len()` bytes from `src_addr` in `table`'s address space.
    /// Unmapped stretches zero-fill the destination.
    pub fn read_block(&self, table: &SharedPageTable, src_addr: VAddr, dest: &mut [u8]) {
        let size = dest.len();
        let mut written = 0;
        for_each_page(src_addr, size, |current_vaddr, page_index, page_offset, copy_amount| {
            let chunk = &mut dest[written..written + copy_amount];
            let (pointer, attribute) = page_entry(table, page_index);
            match attribute {
                PageType::Unmapped => {
                    error!(
                        "unmapped read_block @ {current_vaddr:#010X} \
                         (start address = {src_addr:#010X}, size = {size})",
                    );
                    chunk.fill(0);
                }
                PageType::Memory => {
                    let pointer = pointer.expect("mapped memory page without a pointer");
                    self.backing(pointer.region)
                        .read(pointer.offset as usize + page_offset, chunk);
                }
                PageType::RasterizerCachedMemory => {
                    self.flush_virtual_range(current_vaddr, copy_amount as u64, FlushMode::Flush);
                    let pointer = pointer_for_rasterizer_cache(current_vaddr);
                    self.backing(pointer.region).read(pointer.offset as usize, chunk);
                }
                PageType::Special => {
                    unreachable!("unexpected page attribute @ {current_vaddr:#010X}")
                }
            }
            written += copy_amount;
        });
    }

    /// Writes `src` to `dest_addr` in `table`'s address space. Bytes
    /// targeting unmapped stretches are discarded.
    pub fn write_block(&self, table: &SharedPageTable, dest_addr: VAddr, src: &[u8]) {
        let size = src.len();
        let mut consumed = 0;
        for_each_page(dest_addr, size, |current_vaddr, page_index, page_offset, copy_amount| {
            let chunk = &src[consumed..consumed + copy_amount];
            let (pointer, attribute) = page_entry(table, page_index);
            match attribute {
                PageType::Unmapped => {
                    error!(
                        "unmapped write_block @ {current_vaddr:#010X} \
                         (start address = {dest_addr:#010X}, size = {size})",
                    );
                }
                PageType::Memory => {
                    let pointer = pointer.expect("mapped memory page without a pointer");
                    self.backing(pointer.region)
                        .write(pointer.offset as usize + page_offset, chunk);
                }
                PageType::RasterizerCachedMemory => {
                    self.flush_virtual_range(
                        current_vaddr,
                        copy_amount as u64,
                        FlushMode::Invalidate,
                    );
                    let pointer = pointer_for_rasterizer_cache(current_vaddr);
                    self.backing(pointer.region).write(pointer.offset as usize, chunk);
                }
                PageType::Special => {
                    unreachable!("unexpected page attribute @ {current_vaddr:#010X}")
                }
            }
            consumed += copy_amount;
        });
    }

    /// Zeroes `size` bytes at `dest_addr` in `table`'s address space.
    pub fn zero_block(&self, table: &SharedPageTable, dest_addr: VAddr, size: usize) {
        for_each_page(dest_addr, size, |current_vaddr, page_index, page_offset, copy_amount| {
            let (pointer, attribute) = page_entry(table, page_index);
            match attribute {
                PageType::Unmapped => {
                    error!(
                        "unmapped zero_block @ {current_vaddr:#010X} \
                         (start address = {dest_addr:#010X}, size = {size})",
                    );
                }
                PageType::Memory => {
                    let pointer = pointer.expect("mapped memory page without a pointer");
                    self.backing(pointer.region)
                        .fill(pointer.offset as usize + page_offset, copy_amount, 0);
                }
                PageType::RasterizerCachedMemory => {
                    self.flush_virtual_range(
                        current_vaddr,
                        copy_amount as u64,
                        FlushMode::Invalidate,
                    );
                    let pointer = pointer_for_rasterizer_cache(current_vaddr);
                    self.backing(pointer.region)
                        .fill(pointer.offset as usize, copy_amount, 0);
                }
                PageType::Special => {
                    unreachable!("unexpected page attribute @ {current_vaddr:#010X}")
                }
            }
        });
    }

    /// Copies within one address space. Overlapping ranges are undefined.
    pub fn copy_block(
        &self,
        table: &SharedPageTable,
        dest_addr: VAddr,
        src_addr: VAddr,
        size: usize,
    ) {
        self.copy_block_between(table, table, dest_addr, src_addr, size);
    }

    /// Copies between two address spaces, one source page at a time: each
    /// chunk is read byte-exact (flushing cached source pages first) and
    /// then routed through [`MemorySystem::write_block`], which performs the
    /// destination-side invalidation. Unmapped source stretches zero the
    /// destination.
    pub fn copy_block_between(
        &self,
        dest_table: &SharedPageTable,
        src_table: &SharedPageTable,
        mut dest_addr: VAddr,
        src_addr: VAddr,
        size: usize,
    ) {
        let mut buffer = [0u8; PAGE_SIZE as usize];
        for_each_page(src_addr, size, |current_vaddr, page_index, page_offset, copy_amount| {
            let (pointer, attribute) = page_entry(src_table, page_index);
            match attribute {
                PageType::Unmapped => {
                    error!(
                        "unmapped copy_block @ {current_vaddr:#010X} \
                         (start address = {src_addr:#010X}, size = {size})",
                    );
                    self.zero_block(dest_table, dest_addr, copy_amount);
                }
                PageType::Memory => {
                    let pointer = pointer.expect("mapped memory page without a pointer");
                    let chunk = &mut buffer[..copy_amount];
                    self.backing(pointer.region)
                        .read(pointer.offset as usize + page_offset, chunk);
                    self.write_block(dest_table, dest_addr, chunk);
                }
                PageType::RasterizerCachedMemory => {
                    self.flush_virtual_range(current_vaddr, copy_amount as u64, FlushMode::Flush);
                    let pointer = pointer_for_rasterizer_cache(current_vaddr);
                    let chunk = &mut buffer[..copy_amount];
                    self.backing(pointer.region).read(pointer.offset as usize, chunk);
                    self.write_block(dest_table, dest_addr, chunk);
                }
                PageType::Special => {
                    unreachable!("unexpected page attribute @ {current_vaddr:#010X}")
                }
            }
            dest_addr = dest_addr.wrapping_add(copy_amount as VAddr);
        });
    }

    // ------------------------------------------------------------------
    // Translation

    /// Resolves a virtual address against the current table: the fast-path
    /// page pointer if one is set, the rasterizer backing pointer for cached
    /// pages, `None` (with an error log) otherwise.
    pub fn get_pointer(&self, vaddr: VAddr) -> Option<PagePointer> {
        let table = self.current_table();
        let index = (vaddr >> PAGE_BITS) as usize;
        let (pointer, attribute) = {
            let table = table.read().unwrap();
            (table.pointers[index], table.attributes[index])
        };

        if let Some(pointer) = pointer {
            return Some(pointer.offset_by(vaddr & PAGE_MASK));
        }
        if attribute == PageType::RasterizerCachedMemory {
            return Some(pointer_for_rasterizer_cache(vaddr));
        }

        error!("unknown get_pointer @ {vaddr:#010X}");
        None
    }

    /// Reads a NUL-terminated string of at most `max_length` bytes through
    /// the fast path only; the first page without a direct pointer ends the
    /// read.
    pub fn read_cstring(&self, vaddr: VAddr, max_length: u32) -> String {
        let table = self.current_table();
        let mut result = Vec::new();
        let mut vaddr = vaddr;
        for _ in 0..max_length {
            let index = (vaddr >> PAGE_BITS) as usize;
            let pointer = table.read().unwrap().pointers[index];
            let Some(pointer) = pointer else { break };

            let mut byte = [0u8];
            let offset = pointer.offset as usize + (vaddr & PAGE_MASK) as usize;
            self.backing(pointer.region).read(offset, &mut byte);
            if byte[0] == 0 {
                break;
            }
            result.push(byte[0]);
            vaddr = vaddr.wrapping_add(1);
        }
        String::from_utf8_lossy(&result).into_owned()
    }

    /// Dispatches a physical address to the backing store whose window
    /// contains it. Out-of-range addresses log and return `None`.
    pub fn get_physical_pointer(&self, address: PAddr) -> Option<PagePointer> {
        if (vram::PADDR..vram::PADDR_END).contains(&address) {
            return Some(PagePointer::new(BackingRegion::Vram, address - vram::PADDR));
        }
        if (dsp_ram::PADDR..dsp_ram::PADDR_END).contains(&address) {
            return Some(PagePointer::new(BackingRegion::DspRam, address - dsp_ram::PADDR));
        }
        if (fcram::PADDR..fcram::N3DS_PADDR_END).contains(&address) {
            return Some(PagePointer::new(BackingRegion::Fcram, address - fcram::PADDR));
        }
        if (n3ds_extra_ram::PADDR..n3ds_extra_ram::PADDR_END).contains(&address) {
            return Some(PagePointer::new(
                BackingRegion::N3dsExtraRam,
                address - n3ds_extra_ram::PADDR,
            ));
        }
        error!("unknown get_physical_pointer @ {address:#010X}");
        None
    }

    pub fn is_valid_physical_address(&self, paddr: PAddr) -> bool {
        self.get_physical_pointer(paddr).is_some()
    }

    /// Copies guest physical memory into `dst`. The range must lie inside a
    /// single physical window.
    pub fn read_physical(&self, paddr: PAddr, dst: &mut [u8]) -> Result<(), MemoryError> {
        let pointer = self
            .get_physical_pointer(paddr)
            .ok_or(MemoryError::InvalidPhysicalAddress { paddr })?;
        self.backing(pointer.region)
            .try_read(pointer.offset as usize, dst)
            .map_err(|_| MemoryError::OutOfRange { paddr, len: dst.len() })
    }

    /// Copies `src` into guest physical memory. The range must lie inside a
    /// single physical window.
    pub fn write_physical(&self, paddr: PAddr, src: &[u8]) -> Result<(), MemoryError> {
        let pointer = self
            .get_physical_pointer(paddr)
            .ok_or(MemoryError::InvalidPhysicalAddress { paddr })?;
        self.backing(pointer.region)
            .try_write(pointer.offset as usize, src)
            .map_err(|_| MemoryError::OutOfRange { paddr, len: src.len() })
    }

    /// Backing pointer for a byte offset into FCRAM; the inverse of
    /// [`MemorySystem::fcram_offset`].
    pub fn fcram_pointer(&self, offset: u32) -> PagePointer {
        debug_assert!(offset <= fcram::N3DS_SIZE);
        PagePointer::new(BackingRegion::Fcram, offset)
    }

    /// FCRAM byte offset of a pointer previously derived from FCRAM.
    pub fn fcram_offset(&self, pointer: PagePointer) -> u32 {
        debug_assert_eq!(pointer.region, BackingRegion::Fcram);
        debug_assert!(pointer.offset <= fcram::N3DS_SIZE);
        pointer.offset
    }

    // ------------------------------------------------------------------
    // Rasterizer coupling

    /// Records `cached` for every page of the physical range and rewrites
    /// the matching entry in every registered table, for every virtual alias
    /// of each page.
    ///
    /// May be called from the rasterizer thread, including re-entrantly
    /// while a flush dispatched by this subsystem is in flight.
    pub fn rasterizer_mark_region_cached(&self, start: PAddr, size: u32, cached: bool) {
        if start == 0 {
            return;
        }

        let first_page = u64::from(start) >> PAGE_BITS;
        let last_page = (u64::from(start) + u64::from(size) - 1) >> PAGE_BITS;
        let num_pages = last_page - first_page + 1;

        let mut state = self.cache.lock().unwrap();
        let mut paddr = start;
        for _ in 0..num_pages {
            for vaddr in physical_to_virtual_for_rasterizer(paddr) {
                state.marker.mark(vaddr, cached);
                let index = (vaddr >> PAGE_BITS) as usize;
                for table in &state.page_tables {
                    let Some(table) = table.upgrade() else { continue };
                    let mut table = table.write().unwrap();
                    let page_type = table.attributes[index];

                    if cached {
                        match page_type {
                            // A process need not have this region mapped; a
                            // system module may lack a VRAM mapping.
                            PageType::Unmapped => {}
                            PageType::Memory => {
                                table.attributes[index] = PageType::RasterizerCachedMemory;
                                table.pointers[index] = None;
                            }
                            _ => unreachable!(
                                "marking cached over {page_type:?} @ {vaddr:#010X}"
                            ),
                        }
                    } else {
                        match page_type {
                            PageType::Unmapped => {}
                            PageType::RasterizerCachedMemory => {
                                table.attributes[index] = PageType::Memory;
                                table.pointers[index] =
                                    Some(pointer_for_rasterizer_cache(vaddr & !PAGE_MASK));
                            }
                            _ => unreachable!(
                                "marking uncached over {page_type:?} @ {vaddr:#010X}"
                            ),
                        }
                    }
                }
            }
            paddr = paddr.wrapping_add(PAGE_SIZE);
        }
    }

    pub fn rasterizer_flush_region(&self, start: PAddr, size: u32) {
        if let Some(rasterizer) = self.rasterizer.get() {
            rasterizer.flush_region(start, size);
        }
    }

    pub fn rasterizer_invalidate_region(&self, start: PAddr, size: u32) {
        if let Some(rasterizer) = self.rasterizer.get() {
            rasterizer.invalidate_region(start, size);
        }
    }

    pub fn rasterizer_flush_and_invalidate_region(&self, start: PAddr, size: u32) {
        if let Some(rasterizer) = self.rasterizer.get() {
            rasterizer.flush_and_invalidate_region(start, size);
        }
    }

    /// Translates each cacheable-window overlap of the virtual range to its
    /// physical image and forwards it to the rasterizer entry matching
    /// `mode`. Both heap windows are dispatched when both contain part of
    /// the range.
    pub fn rasterizer_flush_virtual_region(&self, start: VAddr, size: u32, mode: FlushMode) {
        self.flush_virtual_range(start, u64::from(size), mode);
    }

    fn flush_virtual_range(&self, start: VAddr, size: u64, mode: FlushMode) {
        let Some(rasterizer) = self.rasterizer.get() else {
            return;
        };
        // No locks are held here: the rasterizer may call back into
        // `rasterizer_mark_region_cached` before returning.
        for_each_cached_window_overlap(start, size, |paddr, len| match mode {
            FlushMode::Flush => rasterizer.flush_region(paddr, len),
            FlushMode::Invalidate => rasterizer.invalidate_region(paddr, len),
            FlushMode::FlushAndInvalidate => rasterizer.flush_and_invalidate_region(paddr, len),
        });
    }
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `vaddr` resolves in `table`, either directly or through the
/// rasterizer cache.
pub fn is_valid_virtual_address(table: &SharedPageTable, vaddr: VAddr) -> bool {
    let table = table.read().unwrap();
    let index = (vaddr >> PAGE_BITS) as usize;
    table.pointers[index].is_some()
        || table.attributes[index] == PageType::RasterizerCachedMemory
}

fn page_entry(table: &SharedPageTable, page_index: usize) -> (Option<PagePointer>, PageType) {
    let table = table.read().unwrap();
    (table.pointers[page_index], table.attributes[page_index])
}

/// Walks `[addr, addr + size)` one page at a time, calling
/// `f(current_vaddr, page_index, page_offset, copy_amount)` with each step
/// clipped to the containing page.
fn for_each_page(addr: VAddr, size: usize, mut f: impl FnMut(VAddr, usize, usize, usize)) {
    let mut remaining = size;
    let mut page_index = (addr >> PAGE_BITS) as usize;
    let mut page_offset = (addr & PAGE_MASK) as usize;

    while remaining > 0 {
        let copy_amount = (PAGE_SIZE as usize - page_offset).min(remaining);
        let current_vaddr = ((page_index << PAGE_BITS) + page_offset) as VAddr;
        f(current_vaddr, page_index, page_offset, copy_amount);

        page_index += 1;
        page_offset = 0;
        remaining -= copy_amount;
    }
}
