//! Assignability: may an instance of `src` be stored in a location typed
//! `target`?
//!
//! Beyond the ordinary class-chain and interface rules this has to bridge
//! the two descriptor worlds: the same logical type can exist once in the
//! boot image and once as a kernel-synthesized instantiation, with
//! different addresses and incompatible hash algorithms. Structural
//! equivalence is the bridge; the world of a descriptor is classified by
//! its address (see [`crate::env::world_of`]).

use crate::env;
use crate::typedesc::TypeDescriptor;

/// Pointer identity or cross-world structural equivalence.
#[inline]
pub fn same_type(a: &TypeDescriptor, b: &TypeDescriptor) -> bool {
    core::ptr::eq(a, b) || structurally_equivalent(a, b)
}

/// Whether two distinct descriptor pointers describe the same logical
/// type.
///
/// Within one world the loader and the image each publish one descriptor
/// per logical type, so two same-world pointers only collapse when both
/// carry computed hashes and they agree (that also rescues AOT rows with
/// malformed slot counts). Across worlds the hashes come from different
/// algorithms and are ignored; the shapes have to match instead: equal
/// vtable slot counts, and for two generic instantiations equal base
/// sizes. A generic/non-generic mismatch is believable only across worlds
/// (AOT interface descriptors may omit `related_type`).
pub fn structurally_equivalent(a: &TypeDescriptor, b: &TypeDescriptor) -> bool {
    if core::ptr::eq(a, b) {
        return true;
    }
    let a_generic = !a.related_type.is_null();
    let b_generic = !b.related_type.is_null();
    if env::world_of(a.addr()) == env::world_of(b.addr()) {
        let both_hashed = a.type_hash != 0 && b.type_hash != 0;
        if !both_hashed || a.type_hash != b.type_hash {
            return false;
        }
        match (a_generic, b_generic) {
            (true, true) => a.base_size == b.base_size,
            (false, false) => true,
            _ => false,
        }
    } else {
        if a.num_vtable_slots != b.num_vtable_slots {
            return false;
        }
        match (a_generic, b_generic) {
            (true, true) => a.base_size == b.base_size,
            _ => true,
        }
    }
}

/// Variance compatibility between two interface instantiations.
///
/// Both sides must come from the same generic definition (resolved by the
/// loader), the definition must declare variance, and the first type
/// arguments must be assignable in the direction the definition's
/// variance word picks. Invariant parameters were already handled by the
/// pointer-equality check upstream.
pub fn variant_compatible(src: &TypeDescriptor, target: &TypeDescriptor) -> bool {
    if !src.is_interface() || !target.is_interface() {
        return false;
    }
    let src_def = env::generic_definition_of(src as *const TypeDescriptor);
    let target_def = env::generic_definition_of(target as *const TypeDescriptor);
    if src_def.is_null() || !core::ptr::eq(src_def, target_def) {
        return false;
    }
    let def = unsafe { &*src_def };
    if !def.has_variance() {
        return false;
    }
    let (Some(src_arg), Some(target_arg)) = (src.get_first_type_arg(), target.get_first_type_arg())
    else {
        return false;
    };
    match def.type_hash & 0x3 {
        1 => is_assignable_to(src_arg, target_arg),
        2 => is_assignable_to(target_arg, src_arg),
        _ => false,
    }
}

/// May an instance of `src` be stored in a location typed `target`?
pub fn is_assignable_to(src: &TypeDescriptor, target: &TypeDescriptor) -> bool {
    if same_type(src, target) {
        return true;
    }

    if target.is_interface() {
        let mut cur = Some(src);
        while let Some(t) = cur {
            if t.implements_interface(target) {
                return true;
            }
            cur = t.get_parent();
        }
        let mut cur = Some(src);
        while let Some(t) = cur {
            // src may itself be the variant interface instantiation
            if variant_compatible(t, target) {
                return true;
            }
            for i in 0..t.num_interfaces {
                if let Some(ifc) = t.interface_at(i) {
                    if variant_compatible(ifc, target) {
                        return true;
                    }
                }
            }
            cur = t.get_parent();
        }
        return false;
    }

    // class target: walk the parent chain
    let mut cur = src.get_parent();
    while let Some(t) = cur {
        if same_type(t, target) {
            return true;
        }
        cur = t.get_parent();
    }

    // array covariance, reference elements only
    if src.is_array() && target.is_array() {
        if let (Some(src_elem), Some(target_elem)) =
            (src.get_array_element(), target.get_array_element())
        {
            if !src_elem.is_value_type() && !target_elem.is_value_type() {
                return is_assignable_to(src_elem, target_elem);
            }
        }
    }
    false
}

impl TypeDescriptor {
    /// See [`is_assignable_to`].
    #[inline]
    pub fn is_assignable_to(&self, target: &TypeDescriptor) -> bool {
        is_assignable_to(self, target)
    }
}

#[cfg(test)]
mod tests;
