//! Interface-dispatch cell encoding constants.
//!
//! AOT call sites carry a two-word dispatch cell; the toolchain encodes
//! the target interface into the cell's cache word and the runtime decodes
//! it. The tags below are the shared vocabulary.

use int_enum::IntEnum;

/// What a dispatch cell ultimately describes, as found in the upper 16
/// bits of a terminator cell's cache word.
#[derive(Clone, Copy, Debug, IntEnum, PartialEq, Eq)]
#[repr(u16)]
pub enum DispatchCellType {
    /// The cache word is a direct byte offset into the vtable.
    VTableOffset = 0,
    /// Interface descriptor plus method slot.
    InterfaceAndSlot = 1,
    /// Metadata token still to be resolved by the loader.
    MetadataToken = 2,
}

/// Cache values below this are vtable offsets, not pointers.
pub const MAX_VTABLE_OFFSET_CACHE: usize = 0x1000;

/// Low-two-bit tags of a cell's cache word.
pub const CACHE_TAG_MASK: usize = 0b11;
/// Aligned: either a vtable offset or a pointer to a cache header.
pub const CACHE_TAG_ALIGNED: usize = 0b00;
/// Inline interface descriptor pointer or metadata token.
pub const CACHE_TAG_INLINE: usize = 0b01;
/// Indirected relative interface pointer.
pub const CACHE_TAG_INDIRECT_RELATIVE: usize = 0b10;
/// Relative interface pointer.
pub const CACHE_TAG_RELATIVE: usize = 0b11;

/// Low-two-bit tags of a cache header's `slot_or_token` word.
pub const HEADER_TAG_TYPE_AND_SLOT: usize = 0;
pub const HEADER_TAG_METADATA_TOKEN: usize = 1;
/// Bits above the tag hold the slot or the token.
pub const HEADER_VALUE_SHIFT: u32 = 2;
