//! Optional trailing fields of AOT descriptors: relative pointers to the
//! type manager, writable data, the dispatch map and the sealed
//! virtual-slot table.
//!
//! AOT images contain erased placeholder slots for minimal generic
//! instantiations, so every relative pointer is range-checked before it
//! is followed; a rejection turns into a clean `None` and the dispatch
//! engine falls back to its heuristics.

use thiserror::Error;

use super::TypeDescriptor;
use crate::CodePtr;

/// A 32-bit signed offset relative to its own storage location:
/// `target = &slot + *slot`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
pub struct RelPtr(i32);

impl RelPtr {
    #[inline(always)]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn offset(&self) -> i32 {
        self.0
    }

    /// Resolves the target address.
    ///
    /// # Safety
    /// The offset must have been validated against the address windows of
    /// the image this RelPtr lives in; erased slots point anywhere.
    #[inline(always)]
    pub unsafe fn resolve(&self) -> *const u8 {
        (self as *const RelPtr as *const u8).wrapping_offset(self.0 as isize)
    }
}

/// The four optional fields, in image order.
#[repr(C)]
pub struct OptionalFields {
    pub type_manager: RelPtr,
    pub writable_data: RelPtr,
    pub dispatch_map: RelPtr,
    pub sealed_virtual_slots: RelPtr,
}

/// Largest believable dispatch-map displacement. Heuristic guard against
/// parsing uninitialized image memory.
pub const MAX_DISPATCH_MAP_OFFSET: usize = 0x10_0000;
/// Resolved addresses outside this window cannot be image or heap memory.
/// Heuristic, like the offset bound.
pub const VALID_ADDRESS_FLOOR: usize = 0x10000;
pub const VALID_ADDRESS_CEILING: usize = 0xFFFF_8000_0000_0000;
/// No interface plausibly contributes more dispatch-map entries than this.
pub const MAX_ENTRIES_PER_INTERFACE: usize = 50;

#[inline(always)]
pub(crate) fn address_plausible(addr: usize) -> bool {
    (VALID_ADDRESS_FLOOR..=VALID_ADDRESS_CEILING).contains(&addr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchMapError {
    #[error("descriptor has no dispatch map")]
    Missing,
    #[error("relative offset {0:#x} outside the 1 MiB window")]
    OffsetOutOfRange(i32),
    #[error("resolved address {0:#x} outside the valid window")]
    AddressOutOfWindow(usize),
    #[error("entry count {count} above the sanity bound {bound}")]
    ImplausibleEntryCount { count: usize, bound: usize },
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DispatchMapHeader {
    pub standard_count: u16,
    pub default_count: u16,
    pub standard_static_count: u16,
    pub default_static_count: u16,
}

/// `(interface_index, interface_method_slot) → impl_method_slot`. An impl
/// slot at or above `num_vtable_slots` names a sealed virtual slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchMapEntry {
    pub interface_index: u16,
    pub interface_method_slot: u16,
    pub impl_method_slot: u16,
}

/// A validated view over an AOT dispatch map.
#[derive(Debug, Clone, Copy)]
pub struct DispatchMap {
    header: *const DispatchMapHeader,
}

impl DispatchMap {
    /// # Safety
    /// `header` must point at a dispatch map with
    /// `standard_count + default_count` entries behind it.
    pub const unsafe fn from_ptr(header: *const DispatchMapHeader) -> Self {
        Self { header }
    }

    #[inline(always)]
    pub fn header(&self) -> &DispatchMapHeader {
        unsafe { &*self.header }
    }

    /// Number of instance entries (standard + default).
    #[inline]
    pub fn len(&self) -> usize {
        let h = self.header();
        h.standard_count as usize + h.default_count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> &[DispatchMapEntry] {
        unsafe {
            core::slice::from_raw_parts(self.header.add(1) as *const DispatchMapEntry, self.len())
        }
    }
}

impl TypeDescriptor {
    /// The optional-fields block; AOT descriptors only.
    pub fn optional_fields(&self) -> Option<&OptionalFields> {
        if !self.has_dispatch_map() {
            return None;
        }
        let addr = self.addr() + self.optional_fields_offset();
        Some(unsafe { &*(addr as *const OptionalFields) })
    }

    /// Validated dispatch-map access; every rejection reason is explicit.
    pub fn try_dispatch_map(&self) -> Result<DispatchMap, DispatchMapError> {
        let fields = self.optional_fields().ok_or(DispatchMapError::Missing)?;
        let rel = &fields.dispatch_map;
        if rel.is_null() {
            return Err(DispatchMapError::Missing);
        }
        if rel.offset().unsigned_abs() as usize > MAX_DISPATCH_MAP_OFFSET {
            return Err(DispatchMapError::OffsetOutOfRange(rel.offset()));
        }
        let target = unsafe { rel.resolve() } as usize;
        if !address_plausible(target) {
            return Err(DispatchMapError::AddressOutOfWindow(target));
        }
        let map = unsafe { DispatchMap::from_ptr(target as *const DispatchMapHeader) };
        let bound = (self.num_interfaces as usize + 1) * MAX_ENTRIES_PER_INTERFACE;
        let h = *map.header();
        for count in [
            h.standard_count,
            h.default_count,
            h.standard_static_count,
            h.default_static_count,
        ] {
            if count as usize > bound {
                return Err(DispatchMapError::ImplausibleEntryCount {
                    count: count as usize,
                    bound,
                });
            }
        }
        Ok(map)
    }

    /// Dispatch map or null-equivalent; rejections are logged and callers
    /// fall back to the heuristic tiers.
    pub fn dispatch_map(&self) -> Option<DispatchMap> {
        match self.try_dispatch_map() {
            Ok(map) => Some(map),
            Err(DispatchMapError::Missing) => None,
            Err(err) => {
                crate::warn!("descriptor {:#x}: {}", self.addr(), err);
                None
            }
        }
    }

    /// Code pointer of the `index`-th sealed virtual slot. Each table
    /// entry is itself a 4-byte relative pointer. 0 when the descriptor
    /// has no table or the entry is erased.
    pub fn sealed_virtual_slot(&self, index: u16) -> CodePtr {
        let Some(fields) = self.optional_fields() else {
            return 0;
        };
        let rel = &fields.sealed_virtual_slots;
        if rel.is_null() || rel.offset().unsigned_abs() as usize > MAX_DISPATCH_MAP_OFFSET {
            return 0;
        }
        let table = unsafe { rel.resolve() } as usize;
        if !address_plausible(table) {
            return 0;
        }
        let entry = unsafe { &*((table as *const RelPtr).add(index as usize)) };
        if entry.is_null() {
            return 0;
        }
        let code = unsafe { entry.resolve() } as usize;
        if !address_plausible(code) {
            return 0;
        }
        code
    }
}
