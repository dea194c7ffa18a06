use int_enum::IntEnum;

/// Exception types the runtime and JIT can raise without metadata in
/// hand. The JIT fetches the managed constructor for one of these from
/// the kernel's constructor table and calls it at the throw site.
#[derive(Clone, Copy, Debug, IntEnum, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionKind {
    NullReference = 0,
    InvalidCast = 1,
    IndexOutOfRange = 2,
    OutOfMemory = 3,
    Overflow = 4,
    DivideByZero = 5,
    InvalidOperation = 6,
}

impl ExceptionKind {
    /// Number of kinds; sizes the constructor table.
    pub const COUNT: usize = 7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_and_stay_dense() {
        for raw in 0..ExceptionKind::COUNT as u8 {
            let kind = ExceptionKind::try_from(raw).unwrap();
            assert_eq!(u8::from(kind), raw);
        }
        assert!(ExceptionKind::try_from(ExceptionKind::COUNT as u8).is_err());
    }
}
