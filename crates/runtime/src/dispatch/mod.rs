//! Virtual and interface dispatch across the two descriptor worlds.
//!
//! AOT descriptors answer interface calls through their dispatch map
//! (`(interface_index, method_slot) → impl_slot`); kernel-synthesized
//! descriptors lay interface methods out contiguously and answer with
//! `start_slot + method_slot`. When the caller's interface descriptor and
//! the callee's map disagree about identity (cross-world), two fallback
//! tiers dig through the dispatch map by method slot alone.

mod cell;
#[cfg(test)]
mod tests;

pub use cell::{
    read_cell_info, resolve_interface_method, DispatchCellInfo, InterfaceDispatchCacheHeader,
    InterfaceDispatchCell,
};

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::typedesc::TypeDescriptor;
use crate::{env, object, CodePtr};

/// How many times the risky Tier-B fallback accepted an entry. Evidence
/// for the suspicion that some generic instantiations emit dispatch maps
/// whose interface indices disagree with the interface map.
static TIER_B_ACCEPTS: AtomicUsize = AtomicUsize::new(0);

pub fn tier_b_accept_count() -> usize {
    TIER_B_ACCEPTS.load(Ordering::Relaxed)
}

/// Resolves a virtual call on `obj` through slot `slot`, routing sealed
/// slots through the out-of-band table and lazy-compilation stubs through
/// the JIT.
pub fn resolve_virtual_slot(obj: *const u8, slot: u16) -> CodePtr {
    if obj.is_null() {
        return 0;
    }
    let desc = unsafe { object::descriptor_of(obj) };
    let code = desc.virtual_slot(slot);
    let stub = env::lazy_stub();
    if code != 0 && stub != 0 && code == stub {
        // the JIT patches the vtable on first call; take its word for the
        // final address rather than re-reading the slot
        if let Some(patched) = env::ensure_vtable_slot_compiled(obj, slot) {
            return patched;
        }
    }
    code
}

impl TypeDescriptor {
    /// Vtable slot implementing `method_slot` of interface `iface` on this
    /// type, or −1 when no mapping exists.
    pub fn get_interface_method_slot(&self, iface: &TypeDescriptor, method_slot: u16) -> i32 {
        crate::debug!(
            "interface lookup: desc {:#x}, iface {:#x}, method slot {}",
            self.addr(),
            iface.addr(),
            method_slot
        );
        match self.find_variant_compatible_index(iface) {
            Some(index) => {
                if self.has_dispatch_map() {
                    let Some(map) = self.dispatch_map() else {
                        return -1;
                    };
                    for entry in map.entries() {
                        if entry.interface_index == index
                            && entry.interface_method_slot == method_slot
                        {
                            return entry.impl_method_slot as i32;
                        }
                    }
                    -1
                } else {
                    match self.interface_start_slot(index) {
                        Some(start) => start as i32 + method_slot as i32,
                        None => -1,
                    }
                }
            }
            None => self.cross_world_method_slot(iface, method_slot),
        }
    }

    /// The interface map does not know `iface` at all: the caller holds a
    /// descriptor from the other world and structural matching failed too.
    /// Tier A accepts a dispatch-map entry whose mapped interface at least
    /// agrees with the target on slot count; Tier B takes any entry with
    /// the right method slot.
    fn cross_world_method_slot(&self, iface: &TypeDescriptor, method_slot: u16) -> i32 {
        if !self.has_dispatch_map() {
            return -1;
        }
        let Some(map) = self.dispatch_map() else {
            return -1;
        };

        for entry in map.entries() {
            if entry.interface_method_slot != method_slot {
                continue;
            }
            if let Some(mapped) = self.interface_at(entry.interface_index) {
                if mapped.num_vtable_slots == iface.num_vtable_slots {
                    return entry.impl_method_slot as i32;
                }
            }
        }

        for entry in map.entries() {
            if entry.interface_method_slot == method_slot {
                TIER_B_ACCEPTS.fetch_add(1, Ordering::Relaxed);
                crate::warn!(
                    "tier-B interface dispatch: desc {:#x} accepted entry ({}, {}, {}) for iface {:#x}",
                    self.addr(),
                    entry.interface_index,
                    entry.interface_method_slot,
                    entry.impl_method_slot,
                    iface.addr()
                );
                return entry.impl_method_slot as i32;
            }
        }
        -1
    }
}
