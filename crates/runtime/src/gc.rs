//! Reference enumeration driven by descriptor metadata.
//!
//! GC-tracked descriptors carry a GCDesc immediately *before* the
//! descriptor header, growing backward: a signed series count at
//! `descriptor - 8`, then `|count|` `(adjusted_size, start_offset)` pairs
//! below it. A positive count describes a regular object; a negative one
//! a value-type array whose series replay at every element.
//!
//! Static roots live in loader-registered regions of 4-byte relative
//! pointers to static blocks; an initialized block points at a
//! static-holder object whose own GCDesc yields the actual references.
//! The collector runs stop-the-world, and nothing here allocates.

use spin::Mutex;
use thiserror::Error;

use crate::typedesc::{RelPtr, TypeDescriptor};
use crate::{object, POINTER_SIZE};

/// One `(adjusted_size, start_offset)` series of a GCDesc. For regular
/// objects the reference run is `adjusted_size + base_size` bytes; for
/// value-type arrays `adjusted_size` is the raw run length.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GcSeries {
    pub adjusted_size: isize,
    pub start_offset: isize,
}

/// Reference-slot callback: receives the address of a slot holding an
/// object reference.
pub type RefSlotCallback<'a> = &'a mut dyn FnMut(*mut *mut u8);

#[inline]
unsafe fn series_count(desc: &TypeDescriptor) -> isize {
    unsafe { *(desc.addr() as *const isize).offset(-1) }
}

/// Series `k`, 1-based; entry 1 sits right below the count word.
#[inline]
unsafe fn series(desc: &TypeDescriptor, k: usize) -> GcSeries {
    unsafe { *(((desc.addr() - POINTER_SIZE) as *const GcSeries).sub(k)) }
}

#[inline]
unsafe fn visit_run(start: usize, run_bytes: usize, callback: &mut dyn FnMut(*mut *mut u8)) {
    let mut slot = start;
    let end = start + run_bytes;
    while slot < end {
        callback(slot as *mut *mut u8);
        slot += POINTER_SIZE;
    }
}

/// Visits every reference slot in `obj` as described by `desc`'s GCDesc.
///
/// # Safety
/// `obj` must be a live object of type `desc`, and `desc` must carry a
/// well-formed GCDesc when `HasPointers` is set.
pub unsafe fn enumerate_object_references(
    obj: *const u8,
    desc: &TypeDescriptor,
    callback: RefSlotCallback,
) {
    if !desc.has_pointers() {
        return;
    }
    let count = unsafe { series_count(desc) };
    if count == 0 {
        return;
    }

    if count > 0 {
        for k in 1..=count as usize {
            let s = unsafe { series(desc, k) };
            let run = s.adjusted_size + desc.base_size as isize;
            if run <= 0 {
                continue;
            }
            let start = (obj as usize).wrapping_add_signed(s.start_offset);
            unsafe { visit_run(start, run as usize, callback) };
        }
    } else {
        // value-type array: replay each series at every element
        let series_n = count.unsigned_abs();
        let length = unsafe { object::array_length(obj) } as usize;
        let component = desc.component_size as usize;
        if length == 0 || component == 0 {
            return;
        }
        // total size is base_size + length * component, so the element
        // buffer begins base_size bytes in
        let elements = obj as usize + desc.base_size as usize;
        for e in 0..length {
            let element = elements + e * component;
            for k in 1..=series_n {
                let s = unsafe { series(desc, k) };
                if s.adjusted_size <= 0 {
                    continue;
                }
                let start = element.wrapping_add_signed(s.start_offset);
                unsafe { visit_run(start, s.adjusted_size as usize, callback) };
            }
        }
    }
}

// ---- static roots ------------------------------------------------------

/// A loader-registered region of 4-byte relative pointers to static
/// blocks.
#[derive(Debug, Clone, Copy)]
pub struct StaticRegion {
    pub base: usize,
    pub slot_count: usize,
}

pub const MAX_STATIC_REGIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RootTableError {
    #[error("static-root region table full")]
    TableFull,
}

/// The bounded region table. Instance type so tests can walk private
/// tables; the kernel uses the global one below.
pub struct RootTable {
    regions: heapless::Vec<StaticRegion, MAX_STATIC_REGIONS>,
}

impl RootTable {
    pub const fn new() -> Self {
        Self {
            regions: heapless::Vec::new(),
        }
    }

    pub fn register(&mut self, region: StaticRegion) -> Result<(), RootTableError> {
        self.regions
            .push(region)
            .map_err(|_| RootTableError::TableFull)
    }

    /// Walks every registered region.
    ///
    /// # Safety
    /// Regions must describe live static-root memory, and referenced
    /// static-holder objects must be live.
    pub unsafe fn enumerate(&self, callback: RefSlotCallback) {
        for region in self.regions.iter() {
            for i in 0..region.slot_count {
                let rel = unsafe { &*((region.base + 4 * i) as *const RelPtr) };
                if rel.is_null() {
                    continue;
                }
                let block = unsafe { rel.resolve() } as *const usize;
                let word = unsafe { *block };
                // low bit set: the loader has not initialized this type's
                // statics yet
                if word == 0 || word & 1 != 0 {
                    continue;
                }
                let holder = word as *const u8;
                let holder_desc = unsafe { object::descriptor_of(holder) };
                unsafe { enumerate_object_references(holder, holder_desc, callback) };
            }
        }
    }
}

impl Default for RootTable {
    fn default() -> Self {
        Self::new()
    }
}

static ROOT_TABLE: Mutex<RootTable> = Mutex::new(RootTable::new());

/// Registers a static-root region with the global table.
pub fn register_static_region(base: usize, slot_count: usize) -> Result<(), RootTableError> {
    ROOT_TABLE.lock().register(StaticRegion { base, slot_count })
}

/// Visits every reference slot reachable from the static region.
///
/// # Safety
/// Must only run stop-the-world; see [`RootTable::enumerate`].
pub unsafe fn enumerate_static_roots(callback: RefSlotCallback) {
    unsafe { ROOT_TABLE.lock().enumerate(callback) }
}
