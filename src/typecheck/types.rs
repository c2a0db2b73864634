//! Element dtypes and the binary-operation promotion lattice.
//!
//! Every rule here is pure: given operand dtypes it names the dtype the
//! operation computes in and the dtype it returns, or the reason it is
//! rejected. Shapes are handled separately in `kir::shape`.

use std::fmt;
use std::str::FromStr;

use crate::diagnostic::ErrorKind;

/// Scalar element type of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    /// Alternate 16-bit float: 8 exponent bits, 7 mantissa bits.
    BF16,
    F32,
    F64,
}

impl DType {
    pub const ALL: [DType; 13] = [
        DType::Bool,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
    ];

    pub const SIGNED: [DType; 4] = [DType::I8, DType::I16, DType::I32, DType::I64];
    pub const UNSIGNED: [DType; 4] = [DType::U8, DType::U16, DType::U32, DType::U64];
    pub const FLOATS: [DType; 4] = [DType::F16, DType::BF16, DType::F32, DType::F64];

    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<DType> {
        DType::ALL.iter().copied().find(|d| d.name() == name)
    }

    /// Bit width of the value (1 for `bool`).
    pub fn bits(&self) -> u32 {
        match self {
            DType::Bool => 1,
            DType::I8 | DType::U8 => 8,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => 16,
            DType::I32 | DType::U32 | DType::F32 => 32,
            DType::I64 | DType::U64 | DType::F64 => 64,
        }
    }

    /// Bytes occupied in global memory. `bool` is stored as one byte.
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::Bool => 1,
            other => (other.bits() / 8) as usize,
        }
    }

    pub fn is_bool(&self) -> bool {
        *self == DType::Bool
    }

    /// Signed or unsigned integer (not `bool`).
    pub fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, DType::U8 | DType::U16 | DType::U32 | DType::U64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// `float16` or `bfloat16`.
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    pub fn int(bits: u32, signed: bool) -> Option<DType> {
        match (bits, signed) {
            (8, true) => Some(DType::I8),
            (16, true) => Some(DType::I16),
            (32, true) => Some(DType::I32),
            (64, true) => Some(DType::I64),
            (8, false) => Some(DType::U8),
            (16, false) => Some(DType::U16),
            (32, false) => Some(DType::U32),
            (64, false) => Some(DType::U64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = String;

    /// Accepts full names (`float32`) and the short forms `i32`, `u8`,
    /// `f16`, `bf16`, `f32`, `f64`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(d) = DType::from_name(s) {
            return Ok(d);
        }
        let short = match s {
            "i1" => DType::Bool,
            "i8" => DType::I8,
            "i16" => DType::I16,
            "i32" => DType::I32,
            "i64" => DType::I64,
            "u8" => DType::U8,
            "u16" => DType::U16,
            "u32" => DType::U32,
            "u64" => DType::U64,
            "f16" | "fp16" => DType::F16,
            "bf16" => DType::BF16,
            "f32" | "fp32" => DType::F32,
            "f64" | "fp64" => DType::F64,
            _ => return Err(format!("unknown dtype '{}'", s)),
        };
        Ok(short)
    }
}

// ─── Promotion ─────────────────────────────────────────────────────

/// Common dtype of two operands for arithmetic and comparison.
///
/// Floats dominate ints; two floats take the wider one, except that
/// `float16` with `bfloat16` meet at `float32`. Integers of the same
/// signedness take the wider width. Mixed signedness takes the wider
/// type, and at equal width the unsigned type. `bool` adopts the other
/// operand's dtype.
pub fn promote(a: DType, b: DType) -> DType {
    if a == b {
        return a;
    }
    if a.is_bool() {
        return b;
    }
    if b.is_bool() {
        return a;
    }
    match (a.is_float(), b.is_float()) {
        (true, true) => {
            if a.is_half() && b.is_half() {
                DType::F32
            } else if a.bits() >= b.bits() {
                a
            } else {
                b
            }
        }
        (true, false) => a,
        (false, true) => b,
        (false, false) => {
            if a.is_signed() == b.is_signed() {
                if a.bits() >= b.bits() {
                    a
                } else {
                    b
                }
            } else if a.bits() != b.bits() {
                if a.bits() > b.bits() {
                    a
                } else {
                    b
                }
            } else if a.is_unsigned() {
                a
            } else {
                b
            }
        }
    }
}

/// Binary operators that go through the promotion rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// True division.
    Div,
    /// Truncating integer division.
    FloorDiv,
    /// Truncating remainder (sign of the dividend).
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Elementwise max/min (`maximum`, `minimum`).
    Max,
    Min,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::FloorDiv => "//",
            ArithOp::Mod => "%",
            ArithOp::And => "&",
            ArithOp::Or => "|",
            ArithOp::Xor => "^",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
            ArithOp::Max => "maximum",
            ArithOp::Min => "minimum",
        }
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            ArithOp::And | ArithOp::Or | ArithOp::Xor | ArithOp::Shl | ArithOp::Shr
        )
    }
}

/// A rejected typing rule.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TypeRuleError {
    #[error("bitwise operator '{op}' is not supported on floating-point operands ({lhs}, {rhs})")]
    BitwiseOnFloat {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },
    #[error("bitwise operator '{op}' between uint64 and signed {signed} is not supported")]
    Uint64WithSigned { op: &'static str, signed: DType },
    #[error("floor division '//' requires integer operands, got {lhs} and {rhs}")]
    FloorDivOnFloat { lhs: DType, rhs: DType },
    #[error("{op} requires a floating-point operand, got {dtype}")]
    NeedsFloat { op: &'static str, dtype: DType },
    #[error("unary '{op}' is not supported on {dtype}")]
    Unary { op: &'static str, dtype: DType },
    #[error("cannot bitcast {from} to {to}: bfloat16 has no bitcast")]
    BitcastBf16 { from: DType, to: DType },
    #[error("cannot bitcast {from} ({from_bits} bits) to {to} ({to_bits} bits)")]
    BitcastWidth {
        from: DType,
        to: DType,
        from_bits: u32,
        to_bits: u32,
    },
    #[error("atomic_{op} is not supported on {dtype}")]
    Atomic { op: &'static str, dtype: DType },
}

impl TypeRuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TypeRuleError::BitcastWidth { .. } => ErrorKind::Value,
            _ => ErrorKind::Type,
        }
    }
}

/// Dtypes of one binary operation: operands are cast to `compute`, the
/// result has dtype `result` (`bool` for comparisons).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryTyping {
    pub compute: DType,
    pub result: DType,
}

impl BinaryTyping {
    fn same(dtype: DType) -> Self {
        Self {
            compute: dtype,
            result: dtype,
        }
    }
}

pub fn binary_typing(op: ArithOp, lhs: DType, rhs: DType) -> Result<BinaryTyping, TypeRuleError> {
    if op.is_bitwise() {
        return bitwise_typing(op, lhs, rhs);
    }
    let common = promote(lhs, rhs);
    match op {
        ArithOp::Div => {
            let compute = if common.is_float() && !common.is_half() {
                common
            } else {
                DType::F32
            };
            Ok(BinaryTyping::same(compute))
        }
        ArithOp::FloorDiv => {
            if common.is_float() {
                return Err(TypeRuleError::FloorDivOnFloat { lhs, rhs });
            }
            Ok(BinaryTyping::same(arith_int(common)))
        }
        ArithOp::Mod => {
            let compute = if common.is_half() {
                DType::F32
            } else {
                arith_int(common)
            };
            Ok(BinaryTyping::same(compute))
        }
        ArithOp::Max | ArithOp::Min => Ok(BinaryTyping::same(common)),
        _ => Ok(BinaryTyping::same(arith_int(common))),
    }
}

/// `bool` arithmetic happens in `int32`.
fn arith_int(d: DType) -> DType {
    if d.is_bool() {
        DType::I32
    } else {
        d
    }
}

fn bitwise_typing(op: ArithOp, lhs: DType, rhs: DType) -> Result<BinaryTyping, TypeRuleError> {
    if lhs.is_float() || rhs.is_float() {
        return Err(TypeRuleError::BitwiseOnFloat {
            op: op.symbol(),
            lhs,
            rhs,
        });
    }
    for (a, b) in [(lhs, rhs), (rhs, lhs)] {
        if a == DType::U64 && b.is_signed() {
            return Err(TypeRuleError::Uint64WithSigned {
                op: op.symbol(),
                signed: b,
            });
        }
    }
    let common = promote(lhs, rhs);
    let compute = if common.is_bool() && matches!(op, ArithOp::Shl | ArithOp::Shr) {
        DType::I32
    } else {
        common
    };
    Ok(BinaryTyping::same(compute))
}

/// Comparisons compute in the promoted dtype and return `bool`.
pub fn compare_typing(lhs: DType, rhs: DType) -> BinaryTyping {
    BinaryTyping {
        compute: promote(lhs, rhs),
        result: DType::Bool,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Neg,
    Invert,
}

/// Unary `-` keeps every numeric dtype (wrapping for unsigned); `~` is
/// for integers and `bool`.
pub fn unary_typing(op: UnaryKind, dtype: DType) -> Result<DType, TypeRuleError> {
    match op {
        UnaryKind::Neg if dtype.is_bool() => Err(TypeRuleError::Unary { op: "-", dtype }),
        UnaryKind::Invert if dtype.is_float() => Err(TypeRuleError::Unary { op: "~", dtype }),
        _ => Ok(dtype),
    }
}

/// Transcendentals and `sqrt` are defined on floats only.
pub fn float_math_typing(op: &'static str, dtype: DType) -> Result<DType, TypeRuleError> {
    if dtype.is_float() {
        Ok(dtype)
    } else {
        Err(TypeRuleError::NeedsFloat { op, dtype })
    }
}

pub fn check_bitcast(from: DType, to: DType) -> Result<(), TypeRuleError> {
    if from == to {
        return Ok(());
    }
    if from == DType::BF16 || to == DType::BF16 {
        return Err(TypeRuleError::BitcastBf16 { from, to });
    }
    if from.bits() != to.bits() {
        return Err(TypeRuleError::BitcastWidth {
            from,
            to,
            from_bits: from.bits(),
            to_bits: to.bits(),
        });
    }
    Ok(())
}

/// Read-modify-write kinds supported by atomics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomicKind {
    Add,
    Max,
    Min,
}

impl AtomicKind {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicKind::Add => "add",
            AtomicKind::Max => "max",
            AtomicKind::Min => "min",
        }
    }
}

pub fn check_atomic(op: AtomicKind, dtype: DType) -> Result<(), TypeRuleError> {
    let ok = match dtype {
        DType::I32 | DType::U32 | DType::I64 | DType::U64 | DType::F32 | DType::F64 => true,
        DType::F16 => op == AtomicKind::Add,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(TypeRuleError::Atomic {
            op: op.name(),
            dtype,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_names_round_trip() {
        for d in DType::ALL {
            assert_eq!(DType::from_name(d.name()), Some(d));
            assert_eq!(d.name().parse::<DType>().unwrap(), d);
        }
        assert_eq!("bf16".parse::<DType>().unwrap(), DType::BF16);
        assert!("float8".parse::<DType>().is_err());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(DType::Bool.size_bytes(), 1);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(DType::U64.size_bytes(), 8);
        assert_eq!(DType::Bool.bits(), 1);
    }

    #[test]
    fn test_equal_width_mixed_sign_override_table() {
        assert_eq!(promote(DType::I8, DType::U8), DType::U8);
        assert_eq!(promote(DType::I16, DType::U16), DType::U16);
        assert_eq!(promote(DType::I32, DType::U32), DType::U32);
        assert_eq!(promote(DType::I64, DType::U64), DType::U64);
        assert_eq!(promote(DType::U64, DType::I64), DType::U64);
    }

    #[test]
    fn test_mixed_sign_different_width_takes_wider() {
        assert_eq!(promote(DType::I8, DType::U16), DType::U16);
        assert_eq!(promote(DType::I8, DType::U64), DType::U64);
        assert_eq!(promote(DType::U8, DType::I16), DType::I16);
        assert_eq!(promote(DType::U32, DType::I64), DType::I64);
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(promote(DType::F16, DType::F32), DType::F32);
        assert_eq!(promote(DType::F16, DType::BF16), DType::F32);
        assert_eq!(promote(DType::BF16, DType::F64), DType::F64);
        assert_eq!(promote(DType::I64, DType::F16), DType::F16);
        assert_eq!(promote(DType::Bool, DType::F32), DType::F32);
    }

    #[test]
    fn test_division_rules() {
        let t = binary_typing(ArithOp::Div, DType::I32, DType::I32).unwrap();
        assert_eq!(t.result, DType::F32);
        let t = binary_typing(ArithOp::Div, DType::F16, DType::F16).unwrap();
        assert_eq!(t.result, DType::F32);
        let t = binary_typing(ArithOp::Div, DType::F64, DType::I8).unwrap();
        assert_eq!(t.result, DType::F64);
        let t = binary_typing(ArithOp::Mod, DType::BF16, DType::I32).unwrap();
        assert_eq!(t.result, DType::F32);
        let t = binary_typing(ArithOp::Mod, DType::I8, DType::U8).unwrap();
        assert_eq!(t.result, DType::U8);
        assert!(matches!(
            binary_typing(ArithOp::FloorDiv, DType::F32, DType::I32),
            Err(TypeRuleError::FloorDivOnFloat { .. })
        ));
    }

    #[test]
    fn test_bitwise_rejections() {
        let err = binary_typing(ArithOp::And, DType::F32, DType::I32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert!(err.to_string().contains("floating-point"));
        let err = binary_typing(ArithOp::Xor, DType::I8, DType::U64).unwrap_err();
        assert!(matches!(err, TypeRuleError::Uint64WithSigned { signed: DType::I8, .. }));
        assert!(binary_typing(ArithOp::Or, DType::U64, DType::U32).is_ok());
        let t = binary_typing(ArithOp::And, DType::Bool, DType::Bool).unwrap();
        assert_eq!(t.result, DType::Bool);
    }

    #[test]
    fn test_bool_arithmetic_is_int32() {
        let t = binary_typing(ArithOp::Add, DType::Bool, DType::Bool).unwrap();
        assert_eq!(t.result, DType::I32);
        assert_eq!(compare_typing(DType::Bool, DType::Bool).compute, DType::Bool);
    }

    #[test]
    fn test_unary_rules() {
        assert_eq!(unary_typing(UnaryKind::Neg, DType::U16).unwrap(), DType::U16);
        assert!(unary_typing(UnaryKind::Invert, DType::F32).is_err());
        assert!(unary_typing(UnaryKind::Neg, DType::Bool).is_err());
        assert!(float_math_typing("exp", DType::I32).is_err());
        assert_eq!(float_math_typing("exp", DType::BF16).unwrap(), DType::BF16);
    }

    #[test]
    fn test_bitcast_rules() {
        assert!(check_bitcast(DType::I32, DType::U32).is_ok());
        assert!(check_bitcast(DType::F32, DType::I32).is_ok());
        let err = check_bitcast(DType::BF16, DType::I16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        let err = check_bitcast(DType::I32, DType::I64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn test_atomic_dtypes() {
        assert!(check_atomic(AtomicKind::Add, DType::F16).is_ok());
        assert!(check_atomic(AtomicKind::Max, DType::F16).is_err());
        assert!(check_atomic(AtomicKind::Min, DType::U32).is_ok());
        assert!(check_atomic(AtomicKind::Add, DType::I8).is_err());
    }

    fn any_dtype() -> impl Strategy<Value = DType> {
        proptest::sample::select(DType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn promote_is_commutative(a in any_dtype(), b in any_dtype()) {
            prop_assert_eq!(promote(a, b), promote(b, a));
        }

        #[test]
        fn promote_never_narrows(a in any_dtype(), b in any_dtype()) {
            let c = promote(a, b);
            prop_assert!(c.bits() >= a.bits().min(b.bits()));
            if a.is_float() || b.is_float() {
                prop_assert!(c.is_float());
            }
        }

        #[test]
        fn promote_is_idempotent(a in any_dtype(), b in any_dtype()) {
            let c = promote(a, b);
            prop_assert_eq!(promote(c, a), c);
            prop_assert_eq!(promote(c, b), c);
        }
    }
}
