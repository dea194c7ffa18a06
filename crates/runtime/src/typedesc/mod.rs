//! Type descriptors: the per-type metadata block every object points at.
//!
//! A descriptor is a 24-byte fixed header followed by variable-length
//! trailing sections (vtable, interface map, optional fields) and, for
//! GC-tracked types, preceded by a GCDesc. Two producers emit them: the
//! AOT toolchain bakes descriptors into the boot image (`HasDispatchMap`
//! set, 8-byte interface-map entries, optional fields present) and the
//! assembly loader synthesizes them at runtime for generic instantiations
//! (16-byte interface-map entries carrying a start slot, no optional
//! fields). Both shapes go through this one type; the flag selects the
//! walker.

pub mod optional;

pub use optional::{
    DispatchMap, DispatchMapEntry, DispatchMapHeader, DispatchMapError, OptionalFields, RelPtr,
};

use ember_abi::TypeFlags;

use crate::cast;
use crate::{CodePtr, POINTER_SIZE};

/// Size of the fixed descriptor header.
pub const HEADER_SIZE: usize = 24;
/// Interface-map entry size in AOT descriptors: a bare descriptor pointer.
pub const AOT_INTERFACE_ENTRY_SIZE: usize = POINTER_SIZE;
/// Interface-map entry size in kernel-synthesized descriptors.
pub const KERNEL_INTERFACE_ENTRY_SIZE: usize = 16;

/// The fixed 24-byte descriptor header. Trailing sections are reached by
/// pointer arithmetic from `self`, so a `TypeDescriptor` reference must
/// only ever be conjured from a pointer into a real descriptor.
#[repr(C)]
pub struct TypeDescriptor {
    /// Element size for arrays and strings, 0 otherwise.
    pub component_size: u16,
    /// Upper half of the combined flag word.
    pub flags: u16,
    /// Instance size in bytes including the descriptor slot. JIT-created
    /// value types store the raw value size instead; the allocator adds
    /// the missing pointer (see `helpers::new_object`).
    pub base_size: u32,
    /// Parent class, array element, first generic argument or Nullable
    /// underlying type, depending on the flags.
    pub related_type: *const TypeDescriptor,
    pub num_vtable_slots: u16,
    pub num_interfaces: u16,
    /// Nonzero when a hash was computed. The algorithm differs between
    /// the two worlds; never compare across them.
    pub type_hash: u32,
}

/// One interface-map entry of a kernel-synthesized descriptor.
#[repr(C)]
pub struct KernelInterfaceEntry {
    pub interface_type: *const TypeDescriptor,
    /// First vtable slot of this interface's methods (contiguous layout).
    pub start_slot: u16,
    _pad: [u8; 6],
}

impl TypeDescriptor {
    #[inline(always)]
    pub fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// The 32-bit flag word: `(flags << 16) | component_size`.
    #[inline(always)]
    pub fn flags_combined(&self) -> u32 {
        ((self.flags as u32) << 16) | self.component_size as u32
    }

    #[inline(always)]
    pub fn flag_bits(&self) -> TypeFlags {
        TypeFlags::from_bits_truncate(self.flags_combined())
    }

    #[inline(always)]
    pub fn has_component_size(&self) -> bool {
        self.flag_bits().contains(TypeFlags::HAS_COMPONENT_SIZE)
    }

    #[inline(always)]
    pub fn has_pointers(&self) -> bool {
        self.flag_bits().contains(TypeFlags::HAS_POINTERS)
    }

    #[inline(always)]
    pub fn is_delegate(&self) -> bool {
        self.flag_bits().contains(TypeFlags::IS_DELEGATE)
    }

    #[inline(always)]
    pub fn has_variance(&self) -> bool {
        self.flag_bits().contains(TypeFlags::HAS_VARIANCE)
    }

    #[inline(always)]
    pub fn is_value_type(&self) -> bool {
        self.flag_bits().contains(TypeFlags::IS_VALUE_TYPE)
    }

    #[inline(always)]
    pub fn has_finalizer(&self) -> bool {
        self.flag_bits().contains(TypeFlags::HAS_FINALIZER)
    }

    #[inline(always)]
    pub fn is_array(&self) -> bool {
        self.flag_bits().contains(TypeFlags::IS_ARRAY)
    }

    /// AOT-emitted descriptor: dispatch map and optional fields present,
    /// 8-byte interface-map entries.
    #[inline(always)]
    pub fn has_dispatch_map(&self) -> bool {
        self.flag_bits().contains(TypeFlags::HAS_DISPATCH_MAP)
    }

    #[inline(always)]
    pub fn is_interface(&self) -> bool {
        self.flag_bits().contains(TypeFlags::IS_INTERFACE)
    }

    #[inline(always)]
    pub fn is_nullable(&self) -> bool {
        self.flag_bits().contains(TypeFlags::IS_NULLABLE)
    }

    /// Descriptor-shape heuristic the JIT uses for locals layout: anything
    /// with reference semantics visible in the descriptor itself.
    pub fn is_reference_type(&self) -> bool {
        self.is_array()
            || self.is_interface()
            || (self.has_component_size() && self.component_size > 0)
            || self.has_pointers()
            || !self.related_type.is_null()
    }

    // ---- related-type views -------------------------------------------

    /// Parent class. Arrays, interfaces and Nullable overload
    /// `related_type` with other meanings and answer `None`.
    pub fn get_parent(&self) -> Option<&TypeDescriptor> {
        if self.is_array() || self.is_interface() || self.is_nullable() {
            return None;
        }
        unsafe { self.related_type.as_ref() }
    }

    /// Element type of an array descriptor.
    pub fn get_array_element(&self) -> Option<&TypeDescriptor> {
        if !self.is_array() {
            return None;
        }
        unsafe { self.related_type.as_ref() }
    }

    /// First type argument of a generic instantiation. Arrays and
    /// Nullable keep other things in `related_type`.
    pub fn get_first_type_arg(&self) -> Option<&TypeDescriptor> {
        if self.is_array() || self.is_nullable() {
            return None;
        }
        unsafe { self.related_type.as_ref() }
    }

    /// Underlying type of a `Nullable<T>` descriptor.
    pub fn get_nullable_underlying(&self) -> Option<&TypeDescriptor> {
        if !self.is_nullable() {
            return None;
        }
        unsafe { self.related_type.as_ref() }
    }

    // ---- trailing-section layout --------------------------------------

    /// Byte offset of vtable slot `slot` from the descriptor start.
    #[inline(always)]
    pub const fn vtable_slot_offset(slot: u16) -> usize {
        HEADER_SIZE + POINTER_SIZE * slot as usize
    }

    #[inline(always)]
    pub fn interface_map_offset(&self) -> usize {
        HEADER_SIZE + POINTER_SIZE * self.num_vtable_slots as usize
    }

    #[inline(always)]
    pub fn interface_entry_size(&self) -> usize {
        if self.has_dispatch_map() {
            AOT_INTERFACE_ENTRY_SIZE
        } else {
            KERNEL_INTERFACE_ENTRY_SIZE
        }
    }

    #[inline(always)]
    pub fn optional_fields_offset(&self) -> usize {
        self.interface_map_offset() + self.num_interfaces as usize * self.interface_entry_size()
    }

    // ---- vtable --------------------------------------------------------

    /// Code pointer at vtable index `slot`, 0 when out of range.
    pub fn vtable_slot(&self, slot: u16) -> CodePtr {
        if slot >= self.num_vtable_slots {
            return 0;
        }
        unsafe { *((self.addr() + Self::vtable_slot_offset(slot)) as *const CodePtr) }
    }

    /// Unified virtual lookup: the regular vtable below
    /// `num_vtable_slots`, the sealed-virtual-slot table above it
    /// (AOT descriptors only). 0 on out-of-range or missing table.
    pub fn virtual_slot(&self, slot: u16) -> CodePtr {
        if slot < self.num_vtable_slots {
            return self.vtable_slot(slot);
        }
        if !self.has_dispatch_map() {
            return 0;
        }
        self.sealed_virtual_slot(slot - self.num_vtable_slots)
    }

    // ---- interface map -------------------------------------------------

    /// Descriptor pointer of interface-map entry `index`. The descriptor
    /// pointer is the first word of the entry in both layouts.
    pub fn get_interface(&self, index: u16) -> *const TypeDescriptor {
        if index >= self.num_interfaces {
            return core::ptr::null();
        }
        let entry = self.addr()
            + self.interface_map_offset()
            + index as usize * self.interface_entry_size();
        unsafe { *(entry as *const *const TypeDescriptor) }
    }

    /// Borrows interface-map entry `index`, skipping null entries.
    #[inline]
    pub fn interface_at(&self, index: u16) -> Option<&TypeDescriptor> {
        unsafe { self.get_interface(index).as_ref() }
    }

    /// Start slot of interface-map entry `index`; kernel layout only.
    pub fn interface_start_slot(&self, index: u16) -> Option<u16> {
        if self.has_dispatch_map() || index >= self.num_interfaces {
            return None;
        }
        let entry = self.addr()
            + self.interface_map_offset()
            + index as usize * KERNEL_INTERFACE_ENTRY_SIZE;
        let entry = unsafe { &*(entry as *const KernelInterfaceEntry) };
        Some(entry.start_slot)
    }

    /// Linear scan for `target` by pointer identity.
    pub fn find_interface_index(&self, target: *const TypeDescriptor) -> Option<u16> {
        (0..self.num_interfaces).find(|&i| core::ptr::eq(self.get_interface(i), target))
    }

    /// Whether the interface map names `target`, by identity or by
    /// cross-world structural equivalence.
    pub fn implements_interface(&self, target: &TypeDescriptor) -> bool {
        (0..self.num_interfaces).any(|i| match self.interface_at(i) {
            Some(ifc) => cast::same_type(ifc, target),
            None => false,
        })
    }

    /// Interface-map index to dispatch `target` through: exact match,
    /// then structural equality, then variance compatibility, then an
    /// implemented interface that itself implements the target.
    ///
    /// For kernel-layout maps, several interfaces can be structurally
    /// identical (one-method interfaces like `IEnumerable` /
    /// `IReadOnlyCollection` / `IReadOnlyList`); the candidate with the
    /// largest start slot is the most derived one and wins.
    pub fn find_variant_compatible_index(&self, target: &TypeDescriptor) -> Option<u16> {
        if let Some(i) = self.find_interface_index(target) {
            return Some(i);
        }

        let mut best: Option<(u16, u16)> = None;
        for i in 0..self.num_interfaces {
            let Some(ifc) = self.interface_at(i) else {
                continue;
            };
            if !cast::structurally_equivalent(ifc, target) {
                continue;
            }
            if self.has_dispatch_map() {
                return Some(i);
            }
            let start = self.interface_start_slot(i).unwrap_or(0);
            if best.map_or(true, |(_, s)| start > s) {
                best = Some((i, start));
            }
        }
        if let Some((i, _)) = best {
            return Some(i);
        }

        for i in 0..self.num_interfaces {
            if let Some(ifc) = self.interface_at(i) {
                if cast::variant_compatible(ifc, target) {
                    return Some(i);
                }
            }
        }

        // e.g. dispatching IEnumerable through a List that only maps
        // IList: an implemented interface may carry the target in its own
        // flattened map
        for i in 0..self.num_interfaces {
            let Some(ifc) = self.interface_at(i) else {
                continue;
            };
            if ifc.implements_interface(target) {
                return Some(i);
            }
        }
        None
    }
}
