//! The runtime core's view of the rest of the kernel.
//!
//! Every external collaborator is a hook registered here during kernel
//! initialization: the managed-heap allocator, the JIT's lazy-compilation
//! entry, the loader's generic-definition and token resolvers, the fatal
//! handler and the log sink. Hooks are published once before any managed
//! code runs; afterwards they are only read.

use spin::RwLock;

use crate::logging::LogSink;
use crate::typedesc::TypeDescriptor;
use crate::CodePtr;

pub type AllocFn = fn(usize) -> *mut u8;
pub type FatalFn = fn(&str) -> !;
/// Asks the JIT to compile (or fetch) the code for `(obj, slot)` and
/// returns the final code address.
pub type EnsureSlotCompiledFn = fn(*const u8, u16) -> CodePtr;
/// Resolves an instantiated generic's definition descriptor.
pub type GenericDefinitionFn = fn(*const TypeDescriptor) -> *const TypeDescriptor;
/// Resolves a metadata token to a type descriptor.
pub type ResolveTypeTokenFn = fn(u32) -> *const TypeDescriptor;
/// Reports a freshly allocated finalizable object to the collector.
pub type RegisterFinalizableFn = fn(*mut u8);

/// Bottom of the AOT image when the loader has not registered a range.
/// Conservative: everything above it that the loader never claimed for the
/// kernel heap is treated as boot-image memory.
pub const DEFAULT_AOT_IMAGE_START: usize = 0x1D00_0000;

/// Which compilation pathway produced a descriptor, classified by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum World {
    Aot,
    Kernel,
}

pub struct RuntimeEnv {
    pub alloc: AllocFn,
    pub alloc_zeroed: AllocFn,
    pub fatal_stop: FatalFn,
    pub ensure_vtable_slot_compiled: Option<EnsureSlotCompiledFn>,
    pub generic_definition_of: Option<GenericDefinitionFn>,
    pub resolve_type_token: Option<ResolveTypeTokenFn>,
    pub register_finalizable: Option<RegisterFinalizableFn>,
    /// The JIT's universal lazy-compilation stub; a vtable slot holding
    /// this address has not been compiled yet. Zero when the JIT has not
    /// registered one.
    pub lazy_stub: CodePtr,
    pub aot_image_start: usize,
    pub aot_image_end: usize,
    pub log_sink: Option<LogSink>,
}

fn null_alloc(_size: usize) -> *mut u8 {
    core::ptr::null_mut()
}

fn halt(_msg: &str) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

impl RuntimeEnv {
    pub const fn unconfigured() -> Self {
        Self {
            alloc: null_alloc,
            alloc_zeroed: null_alloc,
            fatal_stop: halt,
            ensure_vtable_slot_compiled: None,
            generic_definition_of: None,
            resolve_type_token: None,
            register_finalizable: None,
            lazy_stub: 0,
            aot_image_start: DEFAULT_AOT_IMAGE_START,
            aot_image_end: usize::MAX,
            log_sink: None,
        }
    }
}

static ENV: RwLock<RuntimeEnv> = RwLock::new(RuntimeEnv::unconfigured());

/// Replaces the whole environment. Kernel initialization calls this once
/// before any managed code runs.
pub fn install(env: RuntimeEnv) {
    *ENV.write() = env;
}

/// Adjusts individual hooks in place (the loader registers the image range
/// late, the JIT registers its stub later still).
pub fn configure(f: impl FnOnce(&mut RuntimeEnv)) {
    f(&mut ENV.write());
}

/// Registers the address range the boot image occupies, used to classify
/// descriptor pointers into worlds.
pub fn set_aot_image_range(start: usize, end: usize) {
    configure(|env| {
        env.aot_image_start = start;
        env.aot_image_end = end;
    });
}

#[inline]
pub fn world_of(addr: usize) -> World {
    let env = ENV.read();
    if addr >= env.aot_image_start && addr < env.aot_image_end {
        World::Aot
    } else {
        World::Kernel
    }
}

/// Uninitialized managed-heap storage; callers that skip `alloc_zeroed`
/// own the initialization.
#[inline]
pub fn alloc(size: usize) -> *mut u8 {
    let f = ENV.read().alloc;
    f(size)
}

/// Zero-initialized managed-heap storage.
#[inline]
pub fn alloc_zeroed(size: usize) -> *mut u8 {
    let f = ENV.read().alloc_zeroed;
    f(size)
}

pub(crate) fn fatal_stop(msg: &str) -> ! {
    let f = ENV.read().fatal_stop;
    f(msg)
}

#[inline]
pub(crate) fn lazy_stub() -> CodePtr {
    ENV.read().lazy_stub
}

#[inline]
pub(crate) fn ensure_vtable_slot_compiled(obj: *const u8, slot: u16) -> Option<CodePtr> {
    let hook = ENV.read().ensure_vtable_slot_compiled;
    hook.map(|f| f(obj, slot))
}

#[inline]
pub(crate) fn generic_definition_of(desc: *const TypeDescriptor) -> *const TypeDescriptor {
    let hook = ENV.read().generic_definition_of;
    match hook {
        Some(f) => f(desc),
        None => core::ptr::null(),
    }
}

#[inline]
pub(crate) fn resolve_type_token(token: u32) -> *const TypeDescriptor {
    let hook = ENV.read().resolve_type_token;
    match hook {
        Some(f) => f(token),
        None => core::ptr::null(),
    }
}

#[inline]
pub(crate) fn register_finalizable(obj: *mut u8) {
    let hook = ENV.read().register_finalizable;
    if let Some(f) = hook {
        f(obj);
    }
}

#[inline]
pub(crate) fn log_sink() -> Option<LogSink> {
    ENV.read().log_sink
}
