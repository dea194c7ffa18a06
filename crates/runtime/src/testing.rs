//! Test support: synthetic descriptors in owned, 8-aligned buffers, plus
//! a std-backed environment.
//!
//! Environment hooks are global, so every test that installs or reads
//! them holds [`env_guard`] for its whole body; the harness otherwise
//! runs tests in parallel.

use alloc::vec;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ember_abi::TypeFlags;

use crate::env::{self, RuntimeEnv};
use crate::typedesc::{DispatchMapEntry, TypeDescriptor, HEADER_SIZE};
use crate::POINTER_SIZE;

/// Serializes tests that touch the global environment or registries.
pub fn env_guard() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---- std-backed environment ---------------------------------------------

fn test_alloc(size: usize) -> *mut u8 {
    let layout = Layout::from_size_align(size.max(1), POINTER_SIZE).unwrap();
    unsafe { std::alloc::alloc(layout) }
}

fn test_alloc_zeroed(size: usize) -> *mut u8 {
    let layout = Layout::from_size_align(size.max(1), POINTER_SIZE).unwrap();
    unsafe { std::alloc::alloc_zeroed(layout) }
}

fn test_fatal(msg: &str) -> ! {
    panic!("kernel fatal: {msg}");
}

static GENERIC_DEFS: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
static TOKEN_TYPES: Mutex<Vec<(u32, usize)>> = Mutex::new(Vec::new());
static PATCH_RESULT: AtomicUsize = AtomicUsize::new(0);
static FINALIZABLE_COUNT: AtomicUsize = AtomicUsize::new(0);

fn test_generic_definition_of(desc: *const TypeDescriptor) -> *const TypeDescriptor {
    let defs = GENERIC_DEFS.lock().unwrap_or_else(PoisonError::into_inner);
    for &(inst, def) in defs.iter() {
        if inst == desc as usize {
            return def as *const TypeDescriptor;
        }
    }
    core::ptr::null()
}

fn test_resolve_type_token(token: u32) -> *const TypeDescriptor {
    let map = TOKEN_TYPES.lock().unwrap_or_else(PoisonError::into_inner);
    for &(t, desc) in map.iter() {
        if t == token {
            return desc as *const TypeDescriptor;
        }
    }
    core::ptr::null()
}

fn test_ensure_compiled(_obj: *const u8, _slot: u16) -> usize {
    PATCH_RESULT.load(Ordering::Relaxed)
}

fn test_register_finalizable(_obj: *mut u8) {
    FINALIZABLE_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Installs a fresh std-backed environment and clears the loader/JIT
/// tables. Call under [`env_guard`].
pub fn install_test_env() {
    GENERIC_DEFS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    TOKEN_TYPES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    PATCH_RESULT.store(0, Ordering::Relaxed);
    env::install(RuntimeEnv {
        alloc: test_alloc,
        alloc_zeroed: test_alloc_zeroed,
        fatal_stop: test_fatal,
        ensure_vtable_slot_compiled: Some(test_ensure_compiled),
        generic_definition_of: Some(test_generic_definition_of),
        resolve_type_token: Some(test_resolve_type_token),
        register_finalizable: Some(test_register_finalizable),
        ..RuntimeEnv::unconfigured()
    });
}

pub fn set_generic_definition(inst: *const TypeDescriptor, def: *const TypeDescriptor) {
    GENERIC_DEFS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((inst as usize, def as usize));
}

pub fn set_token_type(token: u32, desc: *const TypeDescriptor) {
    TOKEN_TYPES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((token, desc as usize));
}

pub fn set_patch_result(code: usize) {
    PATCH_RESULT.store(code, Ordering::Relaxed);
}

pub fn finalizable_count() -> usize {
    FINALIZABLE_COUNT.load(Ordering::Relaxed)
}

// ---- descriptor fixtures ------------------------------------------------

/// Builds a descriptor with trailing sections (and a leading GCDesc) in
/// one owned buffer, the way the AOT toolchain or loader would lay it
/// out.
pub struct DescriptorBuilder {
    component_size: u16,
    flags: TypeFlags,
    base_size: u32,
    related: *const TypeDescriptor,
    type_hash: u32,
    vtable: Vec<usize>,
    interfaces: Vec<(*const TypeDescriptor, u16)>,
    gc_series: Vec<(isize, isize)>,
    gc_value_array: bool,
    dispatch_map: Option<Vec<DispatchMapEntry>>,
    sealed_count: usize,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self {
            component_size: 0,
            flags: TypeFlags::empty(),
            base_size: HEADER_SIZE as u32,
            related: core::ptr::null(),
            type_hash: 0,
            vtable: Vec::new(),
            interfaces: Vec::new(),
            gc_series: Vec::new(),
            gc_value_array: false,
            dispatch_map: None,
            sealed_count: 0,
        }
    }

    pub fn flag(mut self, flag: TypeFlags) -> Self {
        self.flags |= flag;
        self
    }

    pub fn component_size(mut self, size: u16) -> Self {
        self.component_size = size;
        self
    }

    pub fn base_size(mut self, size: u32) -> Self {
        self.base_size = size;
        self
    }

    pub fn related(mut self, related: *const TypeDescriptor) -> Self {
        self.related = related;
        self
    }

    pub fn type_hash(mut self, hash: u32) -> Self {
        self.type_hash = hash;
        self
    }

    pub fn vtable(mut self, slots: &[usize]) -> Self {
        self.vtable = slots.to_vec();
        self
    }

    /// AOT-layout interface entry (start slot unused).
    pub fn interface(mut self, iface: *const TypeDescriptor) -> Self {
        self.interfaces.push((iface, 0));
        self
    }

    /// Kernel-layout interface entry with its start slot.
    pub fn interface_with_start(mut self, iface: *const TypeDescriptor, start_slot: u16) -> Self {
        self.interfaces.push((iface, start_slot));
        self
    }

    /// Regular-object GC series `(adjusted_size, start_offset)`, in entry
    /// order (entry 1 first). Sets `HasPointers`.
    pub fn gc_series(mut self, series: &[(isize, isize)]) -> Self {
        self.gc_series = series.to_vec();
        self.flags |= TypeFlags::HAS_POINTERS;
        self
    }

    /// Value-type-array GC series (count stored negative).
    pub fn gc_value_array_series(mut self, series: &[(isize, isize)]) -> Self {
        self.gc_series = series.to_vec();
        self.gc_value_array = true;
        self.flags |= TypeFlags::HAS_POINTERS;
        self
    }

    /// Emits optional fields plus a dispatch map behind a valid RelPtr.
    /// Sets `HasDispatchMap`.
    pub fn dispatch_map(mut self, entries: &[DispatchMapEntry]) -> Self {
        self.dispatch_map = Some(entries.to_vec());
        self.flags |= TypeFlags::HAS_DISPATCH_MAP;
        self
    }

    /// Emits a sealed-virtual-slot table with `count` entries, each
    /// resolving to a distinct in-buffer target address.
    pub fn sealed_slots(mut self, count: usize) -> Self {
        self.sealed_count = count;
        self.flags |= TypeFlags::HAS_DISPATCH_MAP;
        self
    }

    pub fn build(self) -> DescriptorFixture {
        let aot = self.flags.contains(TypeFlags::HAS_DISPATCH_MAP);
        let gc_bytes = if self.gc_series.is_empty() {
            0
        } else {
            (2 * self.gc_series.len() + 1) * 8
        };
        let desc_off = gc_bytes;
        let ifmap_off = desc_off + HEADER_SIZE + 8 * self.vtable.len();
        let entry_size = if aot { 8 } else { 16 };
        let opt_off = ifmap_off + entry_size * self.interfaces.len();
        let after_opt = opt_off + if aot { 16 } else { 0 };
        let dm_off = after_opt;
        let dm_bytes = match &self.dispatch_map {
            Some(entries) => (8 + 6 * entries.len() + 7) & !7,
            None => 0,
        };
        let sealed_table_off = dm_off + dm_bytes;
        let sealed_table_bytes = (4 * self.sealed_count + 7) & !7;
        let sealed_targets_off = sealed_table_off + sealed_table_bytes;
        let total = sealed_targets_off + 8 * self.sealed_count;

        let mut buf: Vec<u64> = vec![0u64; total.div_ceil(8)];
        let base = buf.as_mut_ptr() as usize;

        unsafe {
            // GCDesc, growing backward from the descriptor
            if !self.gc_series.is_empty() {
                let count = self.gc_series.len() as isize;
                let stored = if self.gc_value_array { -count } else { count };
                *((base + desc_off - 8) as *mut isize) = stored;
                for (i, &(adjusted, start)) in self.gc_series.iter().enumerate() {
                    let k = i + 1;
                    let entry = base + desc_off - 8 - 16 * k;
                    *(entry as *mut isize) = adjusted;
                    *((entry + 8) as *mut isize) = start;
                }
            }

            // fixed header
            let d = base + desc_off;
            *(d as *mut u16) = self.component_size;
            *((d + 2) as *mut u16) = (self.flags.bits() >> 16) as u16;
            *((d + 4) as *mut u32) = self.base_size;
            *((d + 8) as *mut usize) = self.related as usize;
            *((d + 16) as *mut u16) = self.vtable.len() as u16;
            *((d + 18) as *mut u16) = self.interfaces.len() as u16;
            *((d + 20) as *mut u32) = self.type_hash;

            // vtable
            for (i, &code) in self.vtable.iter().enumerate() {
                *((d + HEADER_SIZE + 8 * i) as *mut usize) = code;
            }

            // interface map
            for (i, &(iface, start)) in self.interfaces.iter().enumerate() {
                let entry = base + ifmap_off + entry_size * i;
                *(entry as *mut usize) = iface as usize;
                if !aot {
                    *((entry + 8) as *mut u16) = start;
                }
            }

            // optional fields and their targets
            if aot {
                let dm_rel_at = opt_off + 8;
                let sealed_rel_at = opt_off + 12;
                if let Some(entries) = &self.dispatch_map {
                    *((base + dm_rel_at) as *mut i32) = (dm_off - dm_rel_at) as i32;
                    *((base + dm_off) as *mut u16) = entries.len() as u16;
                    for (i, entry) in entries.iter().enumerate() {
                        let at = base + dm_off + 8 + 6 * i;
                        *(at as *mut u16) = entry.interface_index;
                        *((at + 2) as *mut u16) = entry.interface_method_slot;
                        *((at + 4) as *mut u16) = entry.impl_method_slot;
                    }
                }
                if self.sealed_count > 0 {
                    *((base + sealed_rel_at) as *mut i32) =
                        (sealed_table_off - sealed_rel_at) as i32;
                    for i in 0..self.sealed_count {
                        let entry_at = sealed_table_off + 4 * i;
                        let target_at = sealed_targets_off + 8 * i;
                        *((base + entry_at) as *mut i32) = (target_at - entry_at) as i32;
                    }
                }
            }
        }

        DescriptorFixture {
            buf,
            desc_off,
            sealed_targets_off,
        }
    }
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DescriptorFixture {
    buf: Vec<u64>,
    desc_off: usize,
    sealed_targets_off: usize,
}

impl DescriptorFixture {
    pub fn base(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    pub fn descriptor_ptr(&self) -> *const TypeDescriptor {
        (self.base() + self.desc_off) as *const TypeDescriptor
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        unsafe { &*self.descriptor_ptr() }
    }

    /// Address a sealed-table entry resolves to; the expected "code
    /// pointer" of sealed slot `index`.
    pub fn sealed_target_addr(&self, index: usize) -> usize {
        self.base() + self.sealed_targets_off + 8 * index
    }

    /// Corrupts buffer bytes; for tests of the validation paths.
    pub fn write_i32(&mut self, byte_offset: usize, value: i32) {
        assert!(byte_offset + 4 <= self.buf.len() * 8);
        let base = self.buf.as_mut_ptr() as usize;
        unsafe { *((base + byte_offset) as *mut i32) = value }
    }

    pub fn write_u16(&mut self, byte_offset: usize, value: u16) {
        assert!(byte_offset + 2 <= self.buf.len() * 8);
        let base = self.buf.as_mut_ptr() as usize;
        unsafe { *((base + byte_offset) as *mut u16) = value }
    }
}

// ---- object fixtures -----------------------------------------------------

/// A fake heap object: descriptor slot at offset 0, then raw words.
pub struct ObjectFixture {
    buf: Vec<u64>,
}

impl ObjectFixture {
    pub fn new(desc: *const TypeDescriptor, size_bytes: usize) -> Self {
        let mut buf = vec![0u64; size_bytes.div_ceil(8).max(1)];
        buf[0] = desc as usize as u64;
        Self { buf }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    pub fn addr(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    pub fn set_array_length(&mut self, length: u32) {
        let obj = self.buf.as_mut_ptr() as *mut u8;
        unsafe { crate::object::set_array_length(obj, length) };
    }

    pub fn write_word(&mut self, byte_offset: usize, value: u64) {
        assert_eq!(byte_offset % 8, 0);
        self.buf[byte_offset / 8] = value;
    }

    pub fn read_word(&self, byte_offset: usize) -> u64 {
        self.buf[byte_offset / 8]
    }
}
