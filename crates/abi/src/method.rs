use int_enum::IntEnum;

/// How a compiled method hands its result back.
#[derive(Clone, Copy, Debug, IntEnum, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnKind {
    Void = 0,
    Int32 = 1,
    Int64 = 2,
    IntPtr = 3,
    Struct = 4,
}

/// Largest struct return that still travels in registers. Anything bigger
/// repurposes the first argument register as a hidden return-buffer
/// address.
pub const MAX_STRUCT_RETURN_IN_REGS: u8 = 16;

impl ReturnKind {
    /// Whether a struct return of `struct_size` bytes needs the hidden
    /// return-buffer convention.
    #[inline(always)]
    pub const fn needs_return_buffer(self, struct_size: u8) -> bool {
        matches!(self, ReturnKind::Struct) && struct_size > MAX_STRUCT_RETURN_IN_REGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_kind_round_trips() {
        for raw in 0u8..=4 {
            let kind = ReturnKind::try_from(raw).unwrap();
            assert_eq!(u8::from(kind), raw);
        }
        assert!(ReturnKind::try_from(5u8).is_err());
    }

    #[test]
    fn return_buffer_threshold() {
        assert!(!ReturnKind::Struct.needs_return_buffer(16));
        assert!(ReturnKind::Struct.needs_return_buffer(17));
        assert!(!ReturnKind::Int64.needs_return_buffer(32));
    }
}
