//! Interface-dispatch cell parsing.
//!
//! Every AOT interface call site owns a two-word cell `{stub, cache}`.
//! The toolchain seeds `cache` with one of several encodings of the
//! target interface and slot; after the first successful resolution the
//! stub's patcher rewrites it into an inline-cache pointer. This module
//! only decodes; patching belongs to the stub.

use ember_abi::dispatch::{
    DispatchCellType, CACHE_TAG_ALIGNED, CACHE_TAG_INDIRECT_RELATIVE, CACHE_TAG_INLINE,
    CACHE_TAG_MASK, CACHE_TAG_RELATIVE, HEADER_TAG_METADATA_TOKEN, HEADER_VALUE_SHIFT,
    MAX_VTABLE_OFFSET_CACHE,
};

use crate::typedesc::optional::VALID_ADDRESS_FLOOR;
use crate::typedesc::TypeDescriptor;
use crate::{env, object, CodePtr, POINTER_SIZE};

/// A per-call-site dispatch cell as laid out by the AOT toolchain.
#[repr(C)]
pub struct InterfaceDispatchCell {
    pub stub: usize,
    pub cache: usize,
}

/// Target of an already-patched cell's cache pointer.
#[repr(C)]
pub struct InterfaceDispatchCacheHeader {
    pub interface_type: *const TypeDescriptor,
    pub slot_or_token: usize,
}

/// Everything a cell encodes, normalized.
#[derive(Debug, Clone, Copy)]
pub struct DispatchCellInfo {
    pub cell_type: DispatchCellType,
    pub interface_type: *const TypeDescriptor,
    pub interface_slot: u16,
    pub metadata_token: u32,
    pub vtable_offset: u32,
    pub has_cache: bool,
}

impl DispatchCellInfo {
    const fn empty() -> Self {
        Self {
            cell_type: DispatchCellType::InterfaceAndSlot,
            interface_type: core::ptr::null(),
            interface_slot: 0,
            metadata_token: 0,
            vtable_offset: 0,
            has_cache: false,
        }
    }
}

/// Walks forward to the terminator cell (`stub == 0`) that carries the
/// cell type and interface slot for inline-encoded groups.
unsafe fn read_terminator(cell: *const InterfaceDispatchCell, info: &mut DispatchCellInfo) {
    let mut cur = cell;
    loop {
        let c = unsafe { &*cur };
        if c.stub == 0 {
            info.interface_slot = (c.cache & 0xFFFF) as u16;
            let ty = ((c.cache >> 16) & 0xFFFF) as u16;
            if let Ok(cell_type) = DispatchCellType::try_from(ty) {
                info.cell_type = cell_type;
            }
            return;
        }
        cur = unsafe { cur.add(1) };
    }
}

/// Decodes a dispatch cell into a [`DispatchCellInfo`].
///
/// # Safety
/// `cell` must point at a live dispatch-cell group emitted by the AOT
/// toolchain (inline encodings are followed by a terminator cell).
pub unsafe fn read_cell_info(cell: *const InterfaceDispatchCell) -> DispatchCellInfo {
    let mut info = DispatchCellInfo::empty();
    let cache = unsafe { (*cell).cache };
    let cache_addr = unsafe { core::ptr::addr_of!((*cell).cache) } as usize;

    match cache & CACHE_TAG_MASK {
        CACHE_TAG_ALIGNED if cache < MAX_VTABLE_OFFSET_CACHE => {
            info.cell_type = DispatchCellType::VTableOffset;
            info.vtable_offset = cache as u32;
        }
        CACHE_TAG_ALIGNED => {
            // patched cell: cache points at a cache header
            let header = unsafe { &*(cache as *const InterfaceDispatchCacheHeader) };
            info.interface_type = header.interface_type;
            info.has_cache = true;
            let encoded = header.slot_or_token;
            if encoded & CACHE_TAG_MASK == HEADER_TAG_METADATA_TOKEN {
                info.cell_type = DispatchCellType::MetadataToken;
                info.metadata_token = (encoded >> HEADER_VALUE_SHIFT) as u32;
            } else {
                info.cell_type = DispatchCellType::InterfaceAndSlot;
                info.interface_slot = (encoded >> HEADER_VALUE_SHIFT) as u16;
            }
        }
        CACHE_TAG_INLINE => {
            let value = cache & !CACHE_TAG_MASK;
            if value < VALID_ADDRESS_FLOOR {
                info.cell_type = DispatchCellType::MetadataToken;
                info.metadata_token = value as u32;
            } else {
                info.interface_type = value as *const TypeDescriptor;
            }
            unsafe { read_terminator(cell, &mut info) };
        }
        CACHE_TAG_RELATIVE => {
            let rel = (cache as i32) & !(CACHE_TAG_MASK as i32);
            info.interface_type =
                cache_addr.wrapping_add_signed(rel as isize) as *const TypeDescriptor;
            unsafe { read_terminator(cell, &mut info) };
        }
        CACHE_TAG_INDIRECT_RELATIVE => {
            let rel = (cache as i32) & !(CACHE_TAG_MASK as i32);
            let slot = cache_addr.wrapping_add_signed(rel as isize);
            info.interface_type = unsafe { *(slot as *const *const TypeDescriptor) };
            unsafe { read_terminator(cell, &mut info) };
        }
        _ => unreachable!(),
    }
    info
}

/// Resolves an interface call through its dispatch cell to a code
/// pointer, 0 when the interface cannot be found on the object's type.
///
/// # Safety
/// `obj` must be a live managed object and `cell` a live dispatch-cell
/// group.
pub unsafe fn resolve_interface_method(
    obj: *const u8,
    cell: *const InterfaceDispatchCell,
) -> CodePtr {
    if obj.is_null() || cell.is_null() {
        return 0;
    }
    let desc = unsafe { object::descriptor_of(obj) };
    let info = unsafe { read_cell_info(cell) };
    crate::debug!(
        "dispatch cell {:#x}: type {:?}, iface {:#x}, slot {}",
        cell as usize,
        info.cell_type,
        info.interface_type as usize,
        info.interface_slot
    );

    match info.cell_type {
        DispatchCellType::VTableOffset => {
            desc.vtable_slot((info.vtable_offset as usize / POINTER_SIZE) as u16)
        }
        DispatchCellType::InterfaceAndSlot => {
            resolve_on_type(obj, desc, info.interface_type, info.interface_slot)
        }
        DispatchCellType::MetadataToken => {
            let iface = env::resolve_type_token(info.metadata_token);
            resolve_on_type(obj, desc, iface, info.interface_slot)
        }
    }
}

fn resolve_on_type(
    obj: *const u8,
    desc: &TypeDescriptor,
    iface: *const TypeDescriptor,
    method_slot: u16,
) -> CodePtr {
    let Some(iface) = (unsafe { iface.as_ref() }) else {
        return 0;
    };
    let slot = desc.get_interface_method_slot(iface, method_slot);
    if slot < 0 {
        return 0;
    }
    super::resolve_virtual_slot(obj, slot as u16)
}
