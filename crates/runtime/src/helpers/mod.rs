//! Runtime helpers: the functions JIT-emitted code calls for `new`,
//! `newarr`, multi-dimensional arrays and casts, plus the registry
//! through which the JIT finds them.
//!
//! All managed storage comes from the allocator registered in
//! [`crate::env`]; a null from it propagates out as a null result and the
//! calling JIT code turns that into a runtime fatal. The only fatal the
//! core raises itself is an out-of-bounds index in the MD-array element
//! helpers.


use core::ptr;

use hashbrown::HashMap;
use lazy_static::lazy_static;
use spin::Mutex;

use ember_abi::tokens;

use crate::dispatch::{self, InterfaceDispatchCell};
use crate::typedesc::TypeDescriptor;
use crate::{cast, env, object, CodePtr, POINTER_SIZE};

/// Fixed part of the MD-array header: descriptor slot, total length,
/// rank. Dim words follow at 4 bytes each, then the zero lower bounds.
pub const MD_ARRAY_HEADER_BASE: usize = 16;

#[inline(always)]
pub const fn md_array_dims_offset(index: usize) -> usize {
    MD_ARRAY_HEADER_BASE + 4 * index
}

#[inline(always)]
pub const fn md_array_data_offset(rank: usize) -> usize {
    MD_ARRAY_HEADER_BASE + 8 * rank
}

// ---- allocation --------------------------------------------------------

/// Allocates and types a regular object.
///
/// AOT descriptors record the full instance size in `base_size`;
/// JIT-created value-type descriptors record only the raw value size and
/// the descriptor slot is added here.
pub fn new_object(desc: &TypeDescriptor) -> *mut u8 {
    let mut size = desc.base_size as usize;
    if desc.is_value_type() && desc.component_size == 0 && !desc.has_dispatch_map() {
        size += POINTER_SIZE;
    }
    let obj = env::alloc_zeroed(size);
    if obj.is_null() {
        return ptr::null_mut();
    }
    unsafe { object::set_descriptor(obj, desc) };
    if desc.has_finalizer() {
        env::register_finalizable(obj);
    }
    obj
}

/// Allocates a one-dimensional array of `length` elements.
pub fn new_array(desc: &TypeDescriptor, length: i32) -> *mut u8 {
    if length < 0 {
        return ptr::null_mut();
    }
    let Some(size) = (length as usize)
        .checked_mul(desc.component_size as usize)
        .and_then(|bytes| bytes.checked_add(desc.base_size as usize))
    else {
        return ptr::null_mut();
    };
    let obj = env::alloc_zeroed(size);
    if obj.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        object::set_descriptor(obj, desc);
        object::set_array_length(obj, length as u32);
    }
    obj
}

/// Allocates a multi-dimensional array. The header is
/// `16 + 8 × rank` bytes: descriptor, total length, rank, the dimension
/// words and the (always zero) lower bounds.
pub fn new_md_array(desc: &TypeDescriptor, dims: &[u32]) -> *mut u8 {
    let rank = dims.len();
    let mut total = 1usize;
    for &dim in dims {
        total = match total.checked_mul(dim as usize) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
    }
    if total > u32::MAX as usize {
        return ptr::null_mut();
    }
    let Some(size) = total
        .checked_mul(desc.component_size as usize)
        .and_then(|bytes| bytes.checked_add(md_array_data_offset(rank)))
    else {
        return ptr::null_mut();
    };
    let obj = env::alloc_zeroed(size);
    if obj.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        object::set_descriptor(obj, desc);
        *(obj.add(8) as *mut u32) = total as u32;
        *(obj.add(12) as *mut u32) = rank as u32;
        for (i, &dim) in dims.iter().enumerate() {
            *(obj.add(md_array_dims_offset(i)) as *mut u32) = dim;
        }
        // lower bounds stay zero from alloc_zeroed
    }
    obj
}

// ---- MD-array element access -------------------------------------------

/// Row-major element address. An index outside its dimension is the one
/// condition the core treats as fatal.
///
/// # Safety
/// `obj` must be a live MD array of the given rank.
pub unsafe fn md_element_addr(obj: *const u8, indices: &[u32]) -> *mut u8 {
    let rank = unsafe { *(obj.add(12) as *const u32) } as usize;
    if rank != indices.len() {
        env::fatal_stop("md-array rank mismatch");
    }
    let desc = unsafe { object::descriptor_of(obj) };
    let mut linear = 0usize;
    for (i, &index) in indices.iter().enumerate() {
        let dim = unsafe { *(obj.add(md_array_dims_offset(i)) as *const u32) };
        if index >= dim {
            env::fatal_stop("md-array index out of range");
        }
        linear = linear * dim as usize + index as usize;
    }
    let data = obj as usize + md_array_data_offset(rank);
    (data + linear * desc.component_size as usize) as *mut u8
}

unsafe fn read_element(addr: *const u8, size: usize) -> u64 {
    unsafe {
        match size {
            1 => *addr as u64,
            2 => *(addr as *const u16) as u64,
            4 => *(addr as *const u32) as u64,
            8 => *(addr as *const u64),
            _ => 0,
        }
    }
}

unsafe fn write_element(addr: *mut u8, size: usize, value: u64) {
    unsafe {
        match size {
            1 => *addr = value as u8,
            2 => *(addr as *mut u16) = value as u16,
            4 => *(addr as *mut u32) = value as u32,
            8 => *(addr as *mut u64) = value,
            _ => {}
        }
    }
}

/// Reads an element, widened to a u64.
///
/// # Safety
/// See [`md_element_addr`].
pub unsafe fn md_get(obj: *const u8, indices: &[u32]) -> u64 {
    let desc = unsafe { object::descriptor_of(obj) };
    let addr = unsafe { md_element_addr(obj, indices) };
    unsafe { read_element(addr, desc.component_size as usize) }
}

/// Writes an element from the low bytes of `value`.
///
/// # Safety
/// See [`md_element_addr`].
pub unsafe fn md_set(obj: *mut u8, indices: &[u32], value: u64) {
    let desc = unsafe { object::descriptor_of(obj) };
    let addr = unsafe { md_element_addr(obj, indices) };
    unsafe { write_element(addr, desc.component_size as usize, value) }
}

// ---- casts -------------------------------------------------------------

/// `isinst`: the object if its type is assignable to `target`, else null.
pub fn isinst(obj: *const u8, target: &TypeDescriptor) -> *const u8 {
    if obj.is_null() {
        return obj;
    }
    let desc = unsafe { object::descriptor_of(obj) };
    if cast::is_assignable_to(desc, target) {
        obj
    } else {
        ptr::null()
    }
}

/// `castclass`: like [`isinst`]; the JIT turns the null into a cast
/// failure.
pub fn castclass(obj: *const u8, target: &TypeDescriptor) -> *const u8 {
    isinst(obj, target)
}

// ---- the surface compiled code calls ------------------------------------

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn RhpResolveInterfaceMethod(
    obj: *const u8,
    cell: *const InterfaceDispatchCell,
) -> CodePtr {
    unsafe { dispatch::resolve_interface_method(obj, cell) }
}

pub extern "C" fn rhp_new_fast(desc: *const TypeDescriptor) -> *mut u8 {
    match unsafe { desc.as_ref() } {
        Some(desc) => new_object(desc),
        None => ptr::null_mut(),
    }
}

pub extern "C" fn rhp_new_array(desc: *const TypeDescriptor, length: i32) -> *mut u8 {
    match unsafe { desc.as_ref() } {
        Some(desc) => new_array(desc, length),
        None => ptr::null_mut(),
    }
}

pub extern "C" fn rhp_is_assignable_to(
    src: *const TypeDescriptor,
    target: *const TypeDescriptor,
) -> bool {
    match unsafe { (src.as_ref(), target.as_ref()) } {
        (Some(src), Some(target)) => cast::is_assignable_to(src, target),
        _ => false,
    }
}

pub extern "C" fn rhp_isinst(obj: *const u8, target: *const TypeDescriptor) -> *const u8 {
    match unsafe { target.as_ref() } {
        Some(target) => isinst(obj, target),
        None => ptr::null(),
    }
}

pub extern "C" fn rhp_castclass(obj: *const u8, target: *const TypeDescriptor) -> *const u8 {
    match unsafe { target.as_ref() } {
        Some(target) => castclass(obj, target),
        None => ptr::null(),
    }
}

/// Interface resolution for JIT call sites that carry the interface
/// descriptor directly instead of a dispatch cell.
pub extern "C" fn rhp_get_interface_method(
    obj: *const u8,
    iface: *const TypeDescriptor,
    method_slot: u32,
) -> CodePtr {
    if obj.is_null() {
        return 0;
    }
    let Some(iface) = (unsafe { iface.as_ref() }) else {
        return 0;
    };
    let desc = unsafe { object::descriptor_of(obj) };
    let slot = desc.get_interface_method_slot(iface, method_slot as u16);
    if slot < 0 {
        return 0;
    }
    dispatch::resolve_virtual_slot(obj, slot as u16)
}

pub extern "C" fn rhp_new_md_array_2d(desc: *const TypeDescriptor, d0: u32, d1: u32) -> *mut u8 {
    match unsafe { desc.as_ref() } {
        Some(desc) => new_md_array(desc, &[d0, d1]),
        None => ptr::null_mut(),
    }
}

pub extern "C" fn rhp_new_md_array_3d(
    desc: *const TypeDescriptor,
    d0: u32,
    d1: u32,
    d2: u32,
) -> *mut u8 {
    match unsafe { desc.as_ref() } {
        Some(desc) => new_md_array(desc, &[d0, d1, d2]),
        None => ptr::null_mut(),
    }
}

pub extern "C" fn rhp_md_get_2d(obj: *const u8, i: u32, j: u32) -> u64 {
    unsafe { md_get(obj, &[i, j]) }
}

pub extern "C" fn rhp_md_set_2d(obj: *mut u8, i: u32, j: u32, value: u64) {
    unsafe { md_set(obj, &[i, j], value) }
}

pub extern "C" fn rhp_md_addr_2d(obj: *const u8, i: u32, j: u32) -> *mut u8 {
    unsafe { md_element_addr(obj, &[i, j]) }
}

pub extern "C" fn rhp_md_get_3d(obj: *const u8, i: u32, j: u32, k: u32) -> u64 {
    unsafe { md_get(obj, &[i, j, k]) }
}

pub extern "C" fn rhp_md_set_3d(obj: *mut u8, i: u32, j: u32, k: u32, value: u64) {
    unsafe { md_set(obj, &[i, j, k], value) }
}

pub extern "C" fn rhp_md_addr_3d(obj: *const u8, i: u32, j: u32, k: u32) -> *mut u8 {
    unsafe { md_element_addr(obj, &[i, j, k]) }
}

// ---- entry points handed to the JIT -------------------------------------

pub fn get_rhp_new_fast_ptr() -> CodePtr {
    rhp_new_fast as usize
}

pub fn get_rhp_new_array_ptr() -> CodePtr {
    rhp_new_array as usize
}

pub fn get_is_assignable_to_ptr() -> CodePtr {
    rhp_is_assignable_to as usize
}

pub fn get_interface_method_ptr() -> CodePtr {
    rhp_get_interface_method as usize
}

pub fn get_resolve_interface_method_ptr() -> CodePtr {
    RhpResolveInterfaceMethod as usize
}

pub fn get_md_array_helper_ptr(rank: u32) -> CodePtr {
    match rank {
        2 => rhp_new_md_array_2d as usize,
        3 => rhp_new_md_array_3d as usize,
        _ => 0,
    }
}

// the well-known table maps fn addresses, so it cannot be built in a const
lazy_static! {
    static ref COMPILED_METHODS: Mutex<HashMap<u32, CodePtr>> = {
        let mut map = HashMap::new();
        map.insert(tokens::MD_ARRAY_NEW_2D, rhp_new_md_array_2d as usize);
        map.insert(tokens::MD_ARRAY_NEW_3D, rhp_new_md_array_3d as usize);
        map.insert(tokens::MD_ARRAY_GET_2D, rhp_md_get_2d as usize);
        map.insert(tokens::MD_ARRAY_SET_2D, rhp_md_set_2d as usize);
        map.insert(tokens::MD_ARRAY_ADDR_2D, rhp_md_addr_2d as usize);
        map.insert(tokens::MD_ARRAY_GET_3D, rhp_md_get_3d as usize);
        map.insert(tokens::MD_ARRAY_SET_3D, rhp_md_set_3d as usize);
        map.insert(tokens::MD_ARRAY_ADDR_3D, rhp_md_addr_3d as usize);
        Mutex::new(map)
    };
}

/// Lets the JIT publish a method it compiled under a token.
pub fn register_compiled_method(token: u32, code: CodePtr) {
    COMPILED_METHODS.lock().insert(token, code);
}

/// Code pointer registered under `token`, the well-known helpers
/// included.
pub fn compiled_method_for_token(token: u32) -> Option<CodePtr> {
    COMPILED_METHODS.lock().get(&token).copied()
}
