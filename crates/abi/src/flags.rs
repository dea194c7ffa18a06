use bitflags::bitflags;

bitflags! {
    /// The 32-bit flag word of a type descriptor.
    ///
    /// The low 16 bits overlay `component_size` (element size for arrays
    /// and strings), so only the upper half carries flags:
    /// `flags_combined = (flags << 16) | component_size`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Array or string; `component_size` is meaningful.
        const HAS_COMPONENT_SIZE = 0x8000_0000;
        /// A GCDesc is stored immediately before the descriptor.
        const HAS_POINTERS = 0x0100_0000;
        const IS_DELEGATE = 0x0080_0000;
        /// Generic definition only; the variance word lives in `type_hash`.
        const HAS_VARIANCE = 0x0040_0000;
        const IS_VALUE_TYPE = 0x0020_0000;
        const HAS_FINALIZER = 0x0010_0000;
        const IS_ARRAY = 0x0008_0000;
        /// AOT-emitted descriptor: 8-byte interface-map entries and
        /// optional fields (dispatch map, sealed slots) are present.
        const HAS_DISPATCH_MAP = 0x0004_0000;
        const IS_INTERFACE = 0x0002_0000;
        const IS_NULLABLE = 0x0001_0000;
    }
}

bitflags! {
    /// Per-method flags stored in AOT directory rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AotMethodFlags: u8 {
        const HAS_THIS = 1;
        const IS_VIRTUAL = 1 << 1;
        const HAS_REF_PARAMS = 1 << 2;
        const HAS_POINTER_PARAMS = 1 << 3;
    }
}

impl TypeFlags {
    /// Mask of the bits that actually are flags (the rest is
    /// `component_size`).
    pub const FLAG_BITS: u32 = 0xFFFF_0000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_word_matches_image_format() {
        assert_eq!(TypeFlags::HAS_COMPONENT_SIZE.bits(), 0x8000_0000);
        assert_eq!(TypeFlags::HAS_POINTERS.bits(), 0x0100_0000);
        assert_eq!(TypeFlags::IS_DELEGATE.bits(), 0x0080_0000);
        assert_eq!(TypeFlags::HAS_VARIANCE.bits(), 0x0040_0000);
        assert_eq!(TypeFlags::IS_VALUE_TYPE.bits(), 0x0020_0000);
        assert_eq!(TypeFlags::HAS_FINALIZER.bits(), 0x0010_0000);
        assert_eq!(TypeFlags::IS_ARRAY.bits(), 0x0008_0000);
        assert_eq!(TypeFlags::HAS_DISPATCH_MAP.bits(), 0x0004_0000);
        assert_eq!(TypeFlags::IS_INTERFACE.bits(), 0x0002_0000);
        assert_eq!(TypeFlags::IS_NULLABLE.bits(), 0x0001_0000);
    }

    #[test]
    fn method_flags_fit_one_byte() {
        let all = AotMethodFlags::all();
        assert_eq!(all.bits() & 0xF0, 0);
    }
}
