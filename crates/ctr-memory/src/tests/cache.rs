use ctr_hw::memory_map::{fcram, linear_heap, new_linear_heap, vram, PAGE_BITS, PAGE_SIZE};

use super::helpers::{system_with_rasterizer, FlushEvent};
use crate::{BackingRegion, MemorySystem, PageTable, PageType};

#[test]
fn mark_transition_round_trips_attribute_and_pointer() {
    let (system, rasterizer) = system_with_rasterizer();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        vram::VADDR,
        PAGE_SIZE,
        Some(crate::PagePointer::new(BackingRegion::Vram, 0)),
    );
    system.register_page_table(&table);
    rasterizer.take();

    let index = (vram::VADDR >> PAGE_BITS) as usize;
    let before = {
        let table = table.read().unwrap();
        (table.pointer(index), table.attribute(index))
    };

    system.rasterizer_mark_region_cached(vram::PADDR, PAGE_SIZE, true);
    {
        let table = table.read().unwrap();
        assert_eq!(table.attribute(index), PageType::RasterizerCachedMemory);
        assert_eq!(table.pointer(index), None);
    }

    system.rasterizer_mark_region_cached(vram::PADDR, PAGE_SIZE, false);
    let after = {
        let table = table.read().unwrap();
        (table.pointer(index), table.attribute(index))
    };
    assert_eq!(before, after);
}

#[test]
fn cached_read_flushes_exactly_once_with_the_physical_range() {
    let (system, rasterizer) = system_with_rasterizer();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        vram::VADDR,
        PAGE_SIZE,
        Some(crate::PagePointer::new(BackingRegion::Vram, 0)),
    );
    system.set_current_page_table(Some(table.clone()));
    system.register_page_table(&table);
    rasterizer.take();

    system
        .write_physical(vram::PADDR, &0x0BAD_F00Du32.to_le_bytes())
        .unwrap();
    system.rasterizer_mark_region_cached(vram::PADDR, PAGE_SIZE, true);

    assert_eq!(system.read32(vram::VADDR), 0x0BAD_F00D);
    assert_eq!(rasterizer.take(), vec![FlushEvent::Flush(vram::PADDR, 4)]);
}

#[test]
fn cached_write_invalidates_and_lands_in_backing_memory() {
    let (system, rasterizer) = system_with_rasterizer();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        vram::VADDR,
        PAGE_SIZE,
        Some(crate::PagePointer::new(BackingRegion::Vram, 0)),
    );
    system.set_current_page_table(Some(table.clone()));
    system.register_page_table(&table);
    system.rasterizer_mark_region_cached(vram::PADDR, PAGE_SIZE, true);
    rasterizer.take();

    system.write32(vram::VADDR + 8, 0x5151_5151);

    assert_eq!(
        rasterizer.take(),
        vec![FlushEvent::Invalidate(vram::PADDR + 8, 4)]
    );
    let mut bytes = [0u8; 4];
    system.read_physical(vram::PADDR + 8, &mut bytes).unwrap();
    assert_eq!(u32::from_le_bytes(bytes), 0x5151_5151);
}

#[test]
fn marking_fans_out_to_every_registered_table_and_alias() {
    let system = MemorySystem::new();
    let table_1 = PageTable::new_shared();
    let table_2 = PageTable::new_shared();
    system.map_memory_region(
        &table_1,
        linear_heap::VADDR,
        PAGE_SIZE,
        Some(system.fcram_pointer(0)),
    );
    system.map_memory_region(
        &table_2,
        new_linear_heap::VADDR,
        PAGE_SIZE,
        Some(system.fcram_pointer(0)),
    );
    system.register_page_table(&table_1);
    system.register_page_table(&table_2);

    system.rasterizer_mark_region_cached(fcram::PADDR, PAGE_SIZE, true);

    let index_1 = (linear_heap::VADDR >> PAGE_BITS) as usize;
    let index_2 = (new_linear_heap::VADDR >> PAGE_BITS) as usize;
    assert_eq!(
        table_1.read().unwrap().attribute(index_1),
        PageType::RasterizerCachedMemory
    );
    assert_eq!(
        table_2.read().unwrap().attribute(index_2),
        PageType::RasterizerCachedMemory
    );
}

#[test]
fn unregistered_tables_are_left_alone() {
    let system = MemorySystem::new();
    let registered = PageTable::new_shared();
    let bystander = PageTable::new_shared();
    for table in [&registered, &bystander] {
        system.map_memory_region(
            table,
            linear_heap::VADDR,
            PAGE_SIZE,
            Some(system.fcram_pointer(0)),
        );
    }
    system.register_page_table(&registered);
    system.register_page_table(&bystander);
    system.unregister_page_table(&bystander);

    system.rasterizer_mark_region_cached(fcram::PADDR, PAGE_SIZE, true);

    let index = (linear_heap::VADDR >> PAGE_BITS) as usize;
    assert_eq!(
        registered.read().unwrap().attribute(index),
        PageType::RasterizerCachedMemory
    );
    assert_eq!(bystander.read().unwrap().attribute(index), PageType::Memory);
}

#[test]
fn mark_with_zero_start_is_a_no_op() {
    let system = MemorySystem::new();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        linear_heap::VADDR,
        PAGE_SIZE,
        Some(system.fcram_pointer(0)),
    );
    system.register_page_table(&table);

    system.rasterizer_mark_region_cached(0, PAGE_SIZE, true);

    let index = (linear_heap::VADDR >> PAGE_BITS) as usize;
    assert_eq!(table.read().unwrap().attribute(index), PageType::Memory);
}

#[test]
fn unmarking_restores_the_heap_alias_pointer() {
    let system = MemorySystem::new();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        new_linear_heap::VADDR + 0x3000,
        PAGE_SIZE,
        Some(system.fcram_pointer(0x3000)),
    );
    system.register_page_table(&table);

    system.rasterizer_mark_region_cached(fcram::PADDR + 0x3000, PAGE_SIZE, true);
    system.rasterizer_mark_region_cached(fcram::PADDR + 0x3000, PAGE_SIZE, false);

    let index = ((new_linear_heap::VADDR + 0x3000) >> PAGE_BITS) as usize;
    let table = table.read().unwrap();
    assert_eq!(table.attribute(index), PageType::Memory);
    let pointer = table.pointer(index).unwrap();
    assert_eq!(pointer.region, BackingRegion::Fcram);
    assert_eq!(pointer.offset, 0x3000);
}

#[test]
fn heap_aliases_share_backing_bytes() {
    let system = MemorySystem::new();
    let table = PageTable::new_shared();
    system.map_memory_region(
        &table,
        linear_heap::VADDR,
        PAGE_SIZE,
        Some(system.fcram_pointer(0)),
    );
    system.map_memory_region(
        &table,
        new_linear_heap::VADDR,
        PAGE_SIZE,
        Some(system.fcram_pointer(0)),
    );
    system.set_current_page_table(Some(table));

    system.write8(linear_heap::VADDR + 0x123, 0x7E);
    assert_eq!(system.read8(new_linear_heap::VADDR + 0x123), 0x7E);
}
