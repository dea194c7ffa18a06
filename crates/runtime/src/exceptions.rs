//! The exception-type constructor table.
//!
//! Throw sites in compiled code need a managed exception object, and
//! neither the JIT nor the AOT stubs carry metadata for the handful of
//! runtime-raised types. The loader registers each well-known exception
//! constructor here once its assembly is up; the JIT fetches them by
//! kind. Everything past construction (unwinding, filters) happens above
//! this table and outside the core.

use spin::Mutex;

use ember_abi::exceptions::ExceptionKind;

use crate::CodePtr;

static CTORS: Mutex<[CodePtr; ExceptionKind::COUNT]> = Mutex::new([0; ExceptionKind::COUNT]);

/// Publishes the managed constructor for `kind`. Later registrations win;
/// the loader re-registers when an assembly is reloaded.
pub fn register_exception_ctor(kind: ExceptionKind, code: CodePtr) {
    CTORS.lock()[u8::from(kind) as usize] = code;
}

/// Constructor entry point for `kind`, 0 while unregistered.
pub fn exception_ctor(kind: ExceptionKind) -> CodePtr {
    CTORS.lock()[u8::from(kind) as usize]
}

/// Raw-byte variant for the JIT surface; unknown kinds answer 0.
pub extern "C" fn rhp_exception_ctor(kind: u8) -> CodePtr {
    match ExceptionKind::try_from(kind) {
        Ok(kind) => exception_ctor(kind),
        Err(_) => 0,
    }
}

pub fn get_exception_ctor_ptr() -> CodePtr {
    rhp_exception_ctor as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::env_guard;

    #[test]
    fn constructors_round_trip_by_kind() {
        let _guard = env_guard();
        register_exception_ctor(ExceptionKind::InvalidCast, 0x6100);
        register_exception_ctor(ExceptionKind::IndexOutOfRange, 0x6200);
        assert_eq!(exception_ctor(ExceptionKind::InvalidCast), 0x6100);
        assert_eq!(exception_ctor(ExceptionKind::IndexOutOfRange), 0x6200);
        assert_eq!(rhp_exception_ctor(ExceptionKind::InvalidCast as u8), 0x6100);
        // later registration wins
        register_exception_ctor(ExceptionKind::InvalidCast, 0x6300);
        assert_eq!(exception_ctor(ExceptionKind::InvalidCast), 0x6300);
    }

    #[test]
    fn unknown_kinds_answer_zero() {
        let _guard = env_guard();
        assert_eq!(rhp_exception_ctor(0xFF), 0);
        assert_eq!(exception_ctor(ExceptionKind::DivideByZero), 0);
    }
}
