//! Raw access to managed object headers.
//!
//! An object reference is a pointer to a header whose first machine word
//! is the type-descriptor pointer; arrays and strings follow it with a
//! 4-byte length. Nothing here allocates; the helpers in
//! [`crate::helpers`] do.

use crate::typedesc::TypeDescriptor;
use crate::POINTER_SIZE;

/// Byte offset of the 4-byte length word in arrays and strings.
pub const ARRAY_LENGTH_OFFSET: usize = POINTER_SIZE;

/// Reads the descriptor pointer out of an object header.
///
/// # Safety
/// `obj` must point at a live managed object.
#[inline(always)]
pub unsafe fn descriptor_ptr_of(obj: *const u8) -> *const TypeDescriptor {
    unsafe { *(obj as *const *const TypeDescriptor) }
}

/// Borrows the descriptor of a live managed object.
///
/// # Safety
/// `obj` must point at a live managed object whose descriptor outlives
/// the borrow (descriptors are immutable once published).
#[inline(always)]
pub unsafe fn descriptor_of<'a>(obj: *const u8) -> &'a TypeDescriptor {
    unsafe { &*descriptor_ptr_of(obj) }
}

/// Stores the descriptor pointer into a freshly allocated object.
///
/// # Safety
/// `obj` must point at writable storage of at least one machine word.
#[inline(always)]
pub unsafe fn set_descriptor(obj: *mut u8, desc: *const TypeDescriptor) {
    unsafe { *(obj as *mut *const TypeDescriptor) = desc }
}

/// Reads the length word of an array or string.
///
/// # Safety
/// `obj` must point at a live array or string object.
#[inline(always)]
pub unsafe fn array_length(obj: *const u8) -> u32 {
    unsafe { *(obj.add(ARRAY_LENGTH_OFFSET) as *const u32) }
}

/// Stores the length word of an array or string.
///
/// # Safety
/// `obj` must point at writable array storage.
#[inline(always)]
pub unsafe fn set_array_length(obj: *mut u8, length: u32) {
    unsafe { *(obj.add(ARRAY_LENGTH_OFFSET) as *mut u32) = length }
}

/// Total byte size of a live object, component storage included.
///
/// # Safety
/// `obj` must point at a live managed object described by `desc`.
#[inline]
pub unsafe fn object_size(obj: *const u8, desc: &TypeDescriptor) -> usize {
    let mut size = desc.base_size as usize;
    if desc.has_component_size() {
        size += unsafe { array_length(obj) } as usize * desc.component_size as usize;
    }
    size
}
