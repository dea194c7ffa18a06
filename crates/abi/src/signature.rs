//! The packed method-signature hash.
//!
//! Both compilers reduce a parameter list to a 64-bit word so the AOT
//! directory can match overloads without keeping metadata around. Each
//! parameter gets 6 bits: the low 4 are the element-type tag, the high 2
//! the parameter modifier. Parameter 0 sits in the low bits.

use int_enum::IntEnum;

/// Maximum number of parameters a signature hash can describe.
pub const MAX_SIGNATURE_PARAMS: usize = 10;

const PARAM_BITS: u32 = 6;
const TYPE_MASK: u64 = 0xF;
const MOD_SHIFT: u32 = 4;
const MOD_MASK: u64 = 0x3;

/// Element-type tag of a parameter, 4 bits.
#[derive(Clone, Copy, Debug, IntEnum, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    Void = 0,
    Boolean = 1,
    Char = 2,
    I1 = 3,
    U1 = 4,
    I2 = 5,
    U2 = 6,
    I4 = 7,
    U4 = 8,
    I8 = 9,
    U8 = 10,
    R4 = 11,
    R8 = 12,
    String = 13,
    Ptr = 14,
}

/// Parameter passing modifier, 2 bits.
#[derive(Clone, Copy, Debug, IntEnum, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ParamModifier {
    #[default]
    None = 0,
    ByRef = 1,
    Out = 2,
    /// Read-only reference (`in` parameters).
    In = 3,
}

/// Packs up to [`MAX_SIGNATURE_PARAMS`] parameters into a signature hash.
/// Parameters past the limit do not participate in overload matching and
/// are silently ignored, the same truncation both compilers apply.
pub fn encode(params: &[(ElementType, ParamModifier)]) -> u64 {
    let mut hash = 0u64;
    for (i, &(ty, modifier)) in params.iter().take(MAX_SIGNATURE_PARAMS).enumerate() {
        let field = u8::from(ty) as u64 | ((u8::from(modifier) as u64) << MOD_SHIFT);
        hash |= field << (PARAM_BITS * i as u32);
    }
    hash
}

/// Element-type tag of parameter `index`, or `None` past the encodable
/// range or for a tag outside the closed set.
pub fn param_type(hash: u64, index: usize) -> Option<ElementType> {
    if index >= MAX_SIGNATURE_PARAMS {
        return None;
    }
    let raw = ((hash >> (PARAM_BITS * index as u32)) & TYPE_MASK) as u8;
    ElementType::try_from(raw).ok()
}

/// Modifier of parameter `index`, or `None` past the encodable range.
pub fn param_modifier(hash: u64, index: usize) -> Option<ParamModifier> {
    if index >= MAX_SIGNATURE_PARAMS {
        return None;
    }
    let raw = ((hash >> (PARAM_BITS * index as u32 + MOD_SHIFT)) & MOD_MASK) as u8;
    ParamModifier::try_from(raw).ok()
}
