//! The AOT method directory.
//!
//! Every helper the AOT toolchain compiled into the boot image is
//! registered here during kernel initialization; the JIT then resolves
//! its calls into the image by name hashes (three lookup tiers) or by
//! `(assembly_id, method_token)`.
//!
//! Rows live in append-only block chains: fixed-size blocks linked
//! forward, entries contiguous within a block, nothing ever relocated,
//! since the JIT keeps the `&'static` rows it is handed. All registration
//! happens before the first lookup (kernel init runs single-threaded),
//! so readers never race an append.


use core::alloc::Layout;
use core::mem::MaybeUninit;
use core::ptr;

use spin::Mutex;
use thiserror::Error;

use ember_abi::hash::name_hash;
use ember_abi::{AotMethodFlags, ReturnKind};

use crate::CodePtr;

/// Entries per block. A block is ~3 KiB of rows; boot images register a
/// few hundred helpers.
pub const BLOCK_CAPACITY: usize = 64;

const CTOR_NAME: &[u8] = b".ctor";
/// Synthetic name the pointer-parameter constructor variant registers
/// under, so it never collides with the array-parameter overload.
const CTOR_PTR_NAME: &[u8] = b".ctor$ptr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("directory block allocation failed")]
    BlockAllocationFailed,
}

/// One hash-indexed directory row, 48 bytes in the image format.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AotMethodEntry {
    pub type_name_hash: u64,
    pub method_name_hash: u64,
    pub signature_hash: u64,
    pub native_code: CodePtr,
    pub instantiation_hash: u32,
    pub arg_count: u16,
    pub return_kind: ReturnKind,
    pub return_struct_size: u8,
    pub type_generic_arity: u8,
    pub method_generic_arity: u8,
    pub flags: AotMethodFlags,
    pub reserved: u8,
}

impl AotMethodEntry {
    pub fn new(type_name: &[u8], method_name: &[u8], native_code: CodePtr) -> Self {
        Self {
            type_name_hash: name_hash(type_name),
            method_name_hash: name_hash(method_name),
            signature_hash: 0,
            native_code,
            instantiation_hash: 0,
            arg_count: 0,
            return_kind: ReturnKind::Void,
            return_struct_size: 0,
            type_generic_arity: 0,
            method_generic_arity: 0,
            flags: AotMethodFlags::empty(),
            reserved: 0,
        }
    }

    #[inline(always)]
    pub fn has_this(&self) -> bool {
        self.flags.contains(AotMethodFlags::HAS_THIS)
    }
}

/// One token-indexed directory row.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AotTokenEntry {
    pub assembly_id: u32,
    pub method_token: u32,
    pub native_code: CodePtr,
    pub flags: AotMethodFlags,
    _pad: [u8; 7],
}

impl AotTokenEntry {
    pub fn new(
        assembly_id: u32,
        method_token: u32,
        native_code: CodePtr,
        flags: AotMethodFlags,
    ) -> Self {
        Self {
            assembly_id,
            method_token,
            native_code,
            flags,
            _pad: [0; 7],
        }
    }
}

// ---- block chain -------------------------------------------------------

struct Block<T> {
    entries: [MaybeUninit<T>; BLOCK_CAPACITY],
    next: *mut Block<T>,
}

/// Append-only storage with stable entry addresses. Blocks come from the
/// kernel heap and are never freed or moved.
pub struct BlockChain<T: 'static> {
    head: *mut Block<T>,
    tail: *mut Block<T>,
    tail_len: usize,
    total: usize,
}

// raw block pointers; the chain itself is only reached through the
// directory lock
unsafe impl<T: Send> Send for BlockChain<T> {}

fn allocate_block<T>() -> Result<*mut Block<T>, DirectoryError> {
    let layout = Layout::new::<Block<T>>();
    let block = unsafe { alloc::alloc::alloc(layout) } as *mut Block<T>;
    if block.is_null() {
        return Err(DirectoryError::BlockAllocationFailed);
    }
    unsafe { ptr::addr_of_mut!((*block).next).write(ptr::null_mut()) };
    Ok(block)
}

impl<T: 'static> BlockChain<T> {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            tail_len: 0,
            total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Appends `value`, growing the chain by a block when the tail is
    /// full. The returned reference stays valid forever.
    pub fn push(&mut self, value: T) -> Result<&'static T, DirectoryError> {
        if self.tail.is_null() || self.tail_len == BLOCK_CAPACITY {
            let block = allocate_block::<T>()?;
            if self.tail.is_null() {
                self.head = block;
            } else {
                unsafe { ptr::addr_of_mut!((*self.tail).next).write(block) };
            }
            self.tail = block;
            self.tail_len = 0;
        }
        let slot = unsafe {
            ptr::addr_of_mut!((*self.tail).entries)
                .cast::<T>()
                .add(self.tail_len)
        };
        unsafe { slot.write(value) };
        self.tail_len += 1;
        self.total += 1;
        Ok(unsafe { &*slot })
    }

    pub fn iter(&self) -> BlockChainIter<T> {
        BlockChainIter {
            block: self.head,
            index: 0,
            tail: self.tail,
            tail_len: self.tail_len,
        }
    }
}

pub struct BlockChainIter<T: 'static> {
    block: *const Block<T>,
    index: usize,
    tail: *const Block<T>,
    tail_len: usize,
}

impl<T: 'static> Iterator for BlockChainIter<T> {
    type Item = &'static T;

    fn next(&mut self) -> Option<&'static T> {
        loop {
            if self.block.is_null() {
                return None;
            }
            let limit = if self.block == self.tail {
                self.tail_len
            } else {
                BLOCK_CAPACITY
            };
            if self.index < limit {
                let entry = unsafe {
                    ptr::addr_of!((*self.block).entries)
                        .cast::<T>()
                        .add(self.index)
                };
                self.index += 1;
                return Some(unsafe { &*entry });
            }
            if self.block == self.tail {
                return None;
            }
            self.block = unsafe { (*self.block).next };
            self.index = 0;
        }
    }
}

// ---- the directory -----------------------------------------------------

pub struct MethodDirectory {
    by_hash: BlockChain<AotMethodEntry>,
    by_token: BlockChain<AotTokenEntry>,
}

impl MethodDirectory {
    pub const fn new() -> Self {
        Self {
            by_hash: BlockChain::new(),
            by_token: BlockChain::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn token_len(&self) -> usize {
        self.by_token.len()
    }

    pub fn register(
        &mut self,
        entry: AotMethodEntry,
    ) -> Result<&'static AotMethodEntry, DirectoryError> {
        self.by_hash.push(entry)
    }

    pub fn register_token(
        &mut self,
        entry: AotTokenEntry,
    ) -> Result<&'static AotTokenEntry, DirectoryError> {
        self.by_token.push(entry)
    }

    /// Three-tier lookup. Tier 1 matches the full
    /// `(type, method, signature, instantiation)` key; tier 2 falls back
    /// to the open-generic row (any instantiation); tier 3 is the legacy
    /// name-plus-arg-count match for rows registered without signatures.
    pub fn lookup(
        &self,
        type_name: &[u8],
        method_name: &[u8],
        arg_count: u16,
        signature_hash: u64,
        instantiation_hash: u32,
        ctor_pointer_variant: bool,
    ) -> Option<&'static AotMethodEntry> {
        let tn = name_hash(type_name);
        let mn = if ctor_pointer_variant && method_name == CTOR_NAME {
            name_hash(CTOR_PTR_NAME)
        } else {
            name_hash(method_name)
        };

        if signature_hash != 0 {
            for entry in self.by_hash.iter() {
                if entry.type_name_hash == tn
                    && entry.method_name_hash == mn
                    && entry.signature_hash == signature_hash
                    && entry.instantiation_hash == instantiation_hash
                {
                    return Some(entry);
                }
            }
        }

        for entry in self.by_hash.iter() {
            if entry.type_name_hash == tn
                && entry.method_name_hash == mn
                && entry.signature_hash == signature_hash
                && entry.type_generic_arity > 0
            {
                return Some(entry);
            }
        }

        for entry in self.by_hash.iter() {
            if entry.type_name_hash == tn
                && entry.method_name_hash == mn
                && (entry.arg_count == arg_count || (arg_count == 0 && !entry.has_this()))
            {
                return Some(entry);
            }
        }
        None
    }

    pub fn lookup_token(
        &self,
        assembly_id: u32,
        method_token: u32,
    ) -> Option<&'static AotTokenEntry> {
        self.by_token
            .iter()
            .find(|entry| entry.assembly_id == assembly_id && entry.method_token == method_token)
    }
}

impl Default for MethodDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// ---- global directory --------------------------------------------------

static DIRECTORY: Mutex<MethodDirectory> = Mutex::new(MethodDirectory::new());

/// Registers a fully described row.
pub fn register_aot_method(entry: AotMethodEntry) -> Result<(), DirectoryError> {
    DIRECTORY.lock().register(entry).map(|_| ())
}

/// The short registration form used for the bulk of boot-image helpers.
#[allow(clippy::too_many_arguments)]
pub fn register_aot_hash(
    type_name: &[u8],
    method_name: &[u8],
    code_ptr: CodePtr,
    arg_count: u16,
    return_kind: ReturnKind,
    has_this: bool,
    is_virtual: bool,
    return_struct_size: u8,
) -> Result<(), DirectoryError> {
    let mut flags = AotMethodFlags::empty();
    flags.set(AotMethodFlags::HAS_THIS, has_this);
    flags.set(AotMethodFlags::IS_VIRTUAL, is_virtual);
    let entry = AotMethodEntry {
        arg_count,
        return_kind,
        return_struct_size,
        flags,
        ..AotMethodEntry::new(type_name, method_name, code_ptr)
    };
    register_aot_method(entry)
}

pub fn register_aot_token(
    assembly_id: u32,
    method_token: u32,
    code_ptr: CodePtr,
    flags: AotMethodFlags,
) -> Result<(), DirectoryError> {
    DIRECTORY
        .lock()
        .register_token(AotTokenEntry::new(assembly_id, method_token, code_ptr, flags))
        .map(|_| ())
}

pub fn lookup_hash(
    type_name: &[u8],
    method_name: &[u8],
    arg_count: u16,
    signature_hash: u64,
    instantiation_hash: u32,
    ctor_pointer_variant: bool,
) -> Option<&'static AotMethodEntry> {
    DIRECTORY.lock().lookup(
        type_name,
        method_name,
        arg_count,
        signature_hash,
        instantiation_hash,
        ctor_pointer_variant,
    )
}

pub fn lookup_token(assembly_id: u32, method_token: u32) -> Option<&'static AotTokenEntry> {
    DIRECTORY.lock().lookup_token(assembly_id, method_token)
}
