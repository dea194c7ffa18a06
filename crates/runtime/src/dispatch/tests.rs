use alloc::vec;
use alloc::vec::Vec;

use ember_abi::dispatch::DispatchCellType;
use ember_abi::TypeFlags;

use super::cell::{read_cell_info, resolve_interface_method, InterfaceDispatchCell};
use super::{resolve_virtual_slot, tier_b_accept_count};
use crate::testing::{
    env_guard, install_test_env, set_patch_result, set_token_type, DescriptorBuilder,
    ObjectFixture,
};
use crate::typedesc::DispatchMapEntry;
use crate::env;

fn entry(interface_index: u16, interface_method_slot: u16, impl_method_slot: u16) -> DispatchMapEntry {
    DispatchMapEntry {
        interface_index,
        interface_method_slot,
        impl_method_slot,
    }
}

#[test]
fn kernel_layout_uses_start_slot() {
    let _guard = env_guard();
    install_test_env();
    let i0 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let iface = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let i2 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let host = DescriptorBuilder::new()
        .interface_with_start(i0.descriptor_ptr(), 2)
        .interface_with_start(iface.descriptor_ptr(), 7)
        .interface_with_start(i2.descriptor_ptr(), 12)
        .build();
    assert_eq!(
        host.descriptor().get_interface_method_slot(iface.descriptor(), 2),
        9
    );
}

#[test]
fn aot_layout_walks_the_dispatch_map() {
    let _guard = env_guard();
    install_test_env();
    let i0 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let i1 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let i2 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let host = DescriptorBuilder::new()
        .interface(i0.descriptor_ptr())
        .interface(i1.descriptor_ptr())
        .interface(i2.descriptor_ptr())
        .dispatch_map(&[entry(1, 0, 4), entry(1, 1, 5), entry(2, 0, 6)])
        .build();
    let host = host.descriptor();
    assert_eq!(host.get_interface_method_slot(i1.descriptor(), 1), 5);
    assert_eq!(host.get_interface_method_slot(i1.descriptor(), 0), 4);
    assert_eq!(host.get_interface_method_slot(i2.descriptor(), 0), 6);
    // mapped interface, unmapped slot
    assert_eq!(host.get_interface_method_slot(i2.descriptor(), 3), -1);
}

#[test]
fn aot_layout_without_map_misses() {
    let _guard = env_guard();
    install_test_env();
    let i0 = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let host = DescriptorBuilder::new()
        .interface(i0.descriptor_ptr())
        .flag(TypeFlags::HAS_DISPATCH_MAP)
        .build();
    assert_eq!(host.descriptor().get_interface_method_slot(i0.descriptor(), 0), -1);
}

#[test]
fn tier_a_accepts_on_matching_slot_count() {
    let _guard = env_guard();
    install_test_env();
    let mapped = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0])
        .type_hash(5)
        .build();
    let target = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0])
        .type_hash(6)
        .build();
    let host = DescriptorBuilder::new()
        .interface(mapped.descriptor_ptr())
        .dispatch_map(&[entry(0, 0, 4)])
        .build();
    let before = tier_b_accept_count();
    assert_eq!(host.descriptor().get_interface_method_slot(target.descriptor(), 0), 4);
    assert_eq!(tier_b_accept_count(), before);
}

#[test]
fn tier_b_accepts_and_records_evidence() {
    let _guard = env_guard();
    install_test_env();
    let mapped = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0])
        .type_hash(5)
        .build();
    let target = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0, 0])
        .type_hash(6)
        .build();
    let host = DescriptorBuilder::new()
        .interface(mapped.descriptor_ptr())
        .dispatch_map(&[entry(0, 1, 9)])
        .build();
    let before = tier_b_accept_count();
    assert_eq!(host.descriptor().get_interface_method_slot(target.descriptor(), 1), 9);
    assert_eq!(tier_b_accept_count(), before + 1);
    // no entry with the requested method slot at all
    assert_eq!(host.descriptor().get_interface_method_slot(target.descriptor(), 0), -1);
}

#[test]
fn virtual_slot_routes_stubs_through_the_jit() {
    let _guard = env_guard();
    install_test_env();
    let stub = 0xDEAD_0010usize;
    env::configure(|e| e.lazy_stub = stub);
    set_patch_result(0xBEEF_0020);
    let desc = DescriptorBuilder::new().vtable(&[stub, 0xCAFE_0030]).build();
    let obj = ObjectFixture::new(desc.descriptor_ptr(), 16);
    assert_eq!(resolve_virtual_slot(obj.ptr(), 0), 0xBEEF_0020);
    // non-stub slots come straight from the vtable
    assert_eq!(resolve_virtual_slot(obj.ptr(), 1), 0xCAFE_0030);
    assert_eq!(resolve_virtual_slot(core::ptr::null(), 0), 0);
}

// ---- dispatch-cell parsing ----------------------------------------------

#[test]
fn cell_vtable_offset_reads_the_vtable() {
    let _guard = env_guard();
    install_test_env();
    let desc = DescriptorBuilder::new().vtable(&[0x100, 0x200, 0x300]).build();
    let obj = ObjectFixture::new(desc.descriptor_ptr(), 16);
    let cell = InterfaceDispatchCell {
        stub: 1,
        cache: 16, // byte offset of slot 2
    };
    let info = unsafe { read_cell_info(&cell) };
    assert_eq!(info.cell_type, DispatchCellType::VTableOffset);
    assert_eq!(info.vtable_offset, 16);
    assert_eq!(unsafe { resolve_interface_method(obj.ptr(), &cell) }, 0x300);
}

#[test]
fn cell_cache_header_resolves_type_and_slot() {
    let _guard = env_guard();
    install_test_env();
    let iface = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).vtable(&[0, 0]).build();
    let vtable: Vec<usize> = (0..8).map(|i| 0xA000 + i * 8).collect();
    let host = DescriptorBuilder::new()
        .vtable(&vtable)
        .interface_with_start(iface.descriptor_ptr(), 6)
        .build();
    let obj = ObjectFixture::new(host.descriptor_ptr(), 16);

    // header: interface pointer + (slot 1, type-and-slot tag)
    let header: Vec<u64> = vec![iface.descriptor_ptr() as usize as u64, (1 << 2) as u64];
    let cell = InterfaceDispatchCell {
        stub: 1,
        cache: header.as_ptr() as usize,
    };
    let info = unsafe { read_cell_info(&cell) };
    assert_eq!(info.cell_type, DispatchCellType::InterfaceAndSlot);
    assert!(info.has_cache);
    assert_eq!(info.interface_slot, 1);
    // start slot 6 + method slot 1 = vtable slot 7
    assert_eq!(unsafe { resolve_interface_method(obj.ptr(), &cell) }, 0xA000 + 7 * 8);
}

#[test]
fn cell_inline_interface_pointer_takes_slot_from_terminator() {
    let _guard = env_guard();
    install_test_env();
    let iface = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let cells = [
        InterfaceDispatchCell {
            stub: 1,
            cache: iface.descriptor_ptr() as usize | 0b01,
        },
        InterfaceDispatchCell {
            stub: 0,
            cache: ((DispatchCellType::InterfaceAndSlot as usize) << 16) | 3,
        },
    ];
    let info = unsafe { read_cell_info(cells.as_ptr()) };
    assert_eq!(info.cell_type, DispatchCellType::InterfaceAndSlot);
    assert_eq!(info.interface_type, iface.descriptor_ptr());
    assert_eq!(info.interface_slot, 3);
}

#[test]
fn cell_inline_metadata_token_resolves_through_the_loader() {
    let _guard = env_guard();
    install_test_env();
    let iface = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).vtable(&[0]).build();
    let vtable: Vec<usize> = (0..4).map(|i| 0xB000 + i * 8).collect();
    let host = DescriptorBuilder::new()
        .vtable(&vtable)
        .interface_with_start(iface.descriptor_ptr(), 2)
        .build();
    let obj = ObjectFixture::new(host.descriptor_ptr(), 16);
    set_token_type(0x120, iface.descriptor_ptr());

    let cells = [
        InterfaceDispatchCell {
            stub: 1,
            cache: 0x120 | 0b01,
        },
        InterfaceDispatchCell {
            stub: 0,
            cache: ((DispatchCellType::MetadataToken as usize) << 16) | 1,
        },
    ];
    let info = unsafe { read_cell_info(cells.as_ptr()) };
    assert_eq!(info.cell_type, DispatchCellType::MetadataToken);
    assert_eq!(info.metadata_token, 0x120);
    assert_eq!(info.interface_slot, 1);
    // token → iface, start 2 + slot 1 = vtable slot 3
    assert_eq!(
        unsafe { resolve_interface_method(obj.ptr(), cells.as_ptr()) },
        0xB000 + 3 * 8
    );
}

#[test]
fn cell_relative_pointer_decodes() {
    // words: [cell.stub, cell.cache, term.stub, term.cache, target]
    let mut words = vec![0u64; 5];
    let base = words.as_ptr() as usize;
    let cache_addr = base + 8;
    let target = base + 32;
    let rel = (target - cache_addr) as u32; // 24, low bits clear
    words[0] = 1;
    words[1] = (rel | 0b11) as u64;
    words[2] = 0;
    words[3] = (((DispatchCellType::InterfaceAndSlot as usize) << 16) | 2) as u64;
    let info = unsafe { read_cell_info(base as *const InterfaceDispatchCell) };
    assert_eq!(info.interface_type as usize, target);
    assert_eq!(info.interface_slot, 2);
}

#[test]
fn cell_indirected_relative_pointer_decodes() {
    // words: [cell.stub, cell.cache, term.stub, term.cache, slot_word]
    let mut words = vec![0u64; 5];
    let base = words.as_ptr() as usize;
    let cache_addr = base + 8;
    let slot_word = base + 32;
    let iface_addr = 0x5555_0000usize;
    words[0] = 1;
    words[1] = (((slot_word - cache_addr) as u32) | 0b10) as u64;
    words[2] = 0;
    words[3] = (((DispatchCellType::InterfaceAndSlot as usize) << 16) | 4) as u64;
    words[4] = iface_addr as u64;
    let info = unsafe { read_cell_info(base as *const InterfaceDispatchCell) };
    assert_eq!(info.interface_type as usize, iface_addr);
    assert_eq!(info.interface_slot, 4);
}

#[test]
fn unresolvable_interface_returns_null_code() {
    let _guard = env_guard();
    install_test_env();
    let host = DescriptorBuilder::new().vtable(&[0x100]).build();
    let obj = ObjectFixture::new(host.descriptor_ptr(), 16);
    let stranger = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .type_hash(3)
        .build();
    let header: Vec<u64> = vec![stranger.descriptor_ptr() as usize as u64, 0];
    let cell = InterfaceDispatchCell {
        stub: 1,
        cache: header.as_ptr() as usize,
    };
    assert_eq!(unsafe { resolve_interface_method(obj.ptr(), &cell) }, 0);
}
