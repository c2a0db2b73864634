//! Per-lane scalar semantics shared by constant folding and the
//! reference interpreter.
//!
//! A lane is a `u64` bit pattern: integers are truncated to their width
//! and zero-extended, floats hold their IEEE bits (`half` for 16-bit
//! formats), `bool` is 0 or 1. Arithmetic on 16-bit floats runs in
//! `f32` and rounds once on the way back.

use half::{bf16, f16};

use super::{CmpOp, MathFn};
use crate::types::{ArithOp, DType, UnaryKind};

/// All-ones mask for the low `dtype.bits()` bits.
pub fn mask(dtype: DType) -> u64 {
    match dtype.bits() {
        64 => u64::MAX,
        b => (1u64 << b) - 1,
    }
}

// ─── Conversions ──────────────────────────────────────────────────

pub fn to_f64(bits: u64, dtype: DType) -> f64 {
    match dtype {
        DType::F16 => f16::from_bits(bits as u16).to_f64(),
        DType::BF16 => bf16::from_bits(bits as u16).to_f64(),
        DType::F32 => f32::from_bits(bits as u32) as f64,
        DType::F64 => f64::from_bits(bits),
        _ => to_i128(bits, dtype) as f64,
    }
}

/// Round `x` to `dtype`. Float to integer truncates toward zero and
/// saturates; NaN becomes 0.
pub fn from_f64(x: f64, dtype: DType) -> u64 {
    match dtype {
        DType::F16 => f16::from_f64(x).to_bits() as u64,
        DType::BF16 => bf16::from_f64(x).to_bits() as u64,
        DType::F32 => (x as f32).to_bits() as u64,
        DType::F64 => x.to_bits(),
        DType::Bool => (x != 0.0) as u64,
        DType::I8 => (x as i8) as u8 as u64,
        DType::I16 => (x as i16) as u16 as u64,
        DType::I32 => (x as i32) as u32 as u64,
        DType::I64 => (x as i64) as u64,
        DType::U8 => (x as u8) as u64,
        DType::U16 => (x as u16) as u64,
        DType::U32 => (x as u32) as u64,
        DType::U64 => x as u64,
    }
}

/// Integer value of a lane (floats truncate and saturate).
pub fn to_i128(bits: u64, dtype: DType) -> i128 {
    match dtype {
        DType::Bool => (bits & 1) as i128,
        DType::I8 => bits as u8 as i8 as i128,
        DType::I16 => bits as u16 as i16 as i128,
        DType::I32 => bits as u32 as i32 as i128,
        DType::I64 => bits as i64 as i128,
        DType::U8 | DType::U16 | DType::U32 | DType::U64 => (bits & mask(dtype)) as i128,
        _ => to_f64(bits, dtype) as i128,
    }
}

/// Wrap an integer into `dtype` (two's complement truncation for ints).
pub fn from_i128(v: i128, dtype: DType) -> u64 {
    match dtype {
        DType::Bool => (v != 0) as u64,
        DType::F32 => (v as f32).to_bits() as u64,
        d if d.is_float() => from_f64(v as f64, d),
        d => (v as u64) & mask(d),
    }
}

/// Value-preserving conversion.
pub fn cast(bits: u64, from: DType, to: DType) -> u64 {
    if from == to {
        return bits;
    }
    if to == DType::Bool {
        return if from.is_float() {
            (to_f64(bits, from) != 0.0) as u64
        } else {
            ((bits & mask(from)) != 0) as u64
        };
    }
    if from.is_float() {
        return from_f64(to_f64(bits, from), to);
    }
    from_i128(to_i128(bits, from), to)
}

/// Reinterpret the bit pattern; widths are checked by the type rules.
pub fn bitcast(bits: u64, to: DType) -> u64 {
    bits & mask(to)
}

// ─── Arithmetic ───────────────────────────────────────────────────

/// `op` with both lanes already in `dtype`. Integer division and
/// remainder by zero give 0.
pub fn binary(op: ArithOp, a: u64, b: u64, dtype: DType) -> u64 {
    if dtype.is_float() {
        return float_binary(op, a, b, dtype);
    }
    if matches!(op, ArithOp::And | ArithOp::Or | ArithOp::Xor) {
        let r = match op {
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            _ => a ^ b,
        };
        return r & mask(dtype);
    }
    let x = to_i128(a, dtype);
    let y = to_i128(b, dtype);
    let r = match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div | ArithOp::FloorDiv => {
            if y == 0 {
                0
            } else {
                x / y
            }
        }
        ArithOp::Mod => {
            if y == 0 {
                0
            } else {
                x % y
            }
        }
        ArithOp::Shl => {
            if y < 0 || y >= dtype.bits() as i128 {
                0
            } else {
                x << y
            }
        }
        ArithOp::Shr => {
            let width = dtype.bits() as i128;
            if y < 0 || y >= width {
                if x < 0 {
                    -1
                } else {
                    0
                }
            } else {
                x >> y
            }
        }
        ArithOp::Max => x.max(y),
        ArithOp::Min => x.min(y),
        ArithOp::And | ArithOp::Or | ArithOp::Xor => 0,
    };
    from_i128(r, dtype)
}

fn float_binary(op: ArithOp, a: u64, b: u64, dtype: DType) -> u64 {
    if dtype == DType::F64 {
        let x = f64::from_bits(a);
        let y = f64::from_bits(b);
        return apply_f64(op, x, y).to_bits();
    }
    let x = to_f64(a, dtype) as f32;
    let y = to_f64(b, dtype) as f32;
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
        ArithOp::Max => x.max(y),
        ArithOp::Min => x.min(y),
        _ => f32::NAN,
    };
    from_f64(r as f64, dtype)
}

fn apply_f64(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
        ArithOp::Max => x.max(y),
        ArithOp::Min => x.min(y),
        _ => f64::NAN,
    }
}

/// Ordered comparison; any NaN operand makes every predicate false
/// except `ne`.
pub fn compare(op: CmpOp, a: u64, b: u64, dtype: DType) -> bool {
    if dtype.is_float() {
        let x = to_f64(a, dtype);
        let y = to_f64(b, dtype);
        return match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        };
    }
    let x = to_i128(a, dtype);
    let y = to_i128(b, dtype);
    match op {
        CmpOp::Eq => x == y,
        CmpOp::Ne => x != y,
        CmpOp::Lt => x < y,
        CmpOp::Le => x <= y,
        CmpOp::Gt => x > y,
        CmpOp::Ge => x >= y,
    }
}

pub fn unary(op: UnaryKind, a: u64, dtype: DType) -> u64 {
    match op {
        UnaryKind::Neg => {
            if dtype.is_float() {
                // sign-bit flip, exact for every format
                a ^ (1u64 << (dtype.bits() - 1))
            } else {
                from_i128(to_i128(a, dtype).wrapping_neg(), dtype)
            }
        }
        UnaryKind::Invert => {
            if dtype.is_bool() {
                (a & 1) ^ 1
            } else {
                !a & mask(dtype)
            }
        }
    }
}

pub fn math(func: MathFn, a: u64, dtype: DType) -> u64 {
    if !dtype.is_float() {
        // only `abs` type-checks on integers
        let x = to_i128(a, dtype);
        return from_i128(x.abs(), dtype);
    }
    if dtype == DType::F64 {
        let x = f64::from_bits(a);
        let r = match func {
            MathFn::Exp => x.exp(),
            MathFn::Log => x.ln(),
            MathFn::Sin => x.sin(),
            MathFn::Cos => x.cos(),
            MathFn::Sqrt => x.sqrt(),
            MathFn::Abs => x.abs(),
        };
        return r.to_bits();
    }
    let x = to_f64(a, dtype) as f32;
    let r = match func {
        MathFn::Exp => x.exp(),
        MathFn::Log => x.ln(),
        MathFn::Sin => x.sin(),
        MathFn::Cos => x.cos(),
        MathFn::Sqrt => x.sqrt(),
        MathFn::Abs => x.abs(),
    };
    from_f64(r as f64, dtype)
}

/// Additive identity of a reduction over `dtype`, or its extreme value
/// for `max`/`min`.
pub fn reduce_identity(op: super::ReduceOp, dtype: DType) -> u64 {
    use super::ReduceOp;
    match op {
        ReduceOp::Sum => from_i128(0, dtype),
        ReduceOp::Max => {
            if dtype.is_float() {
                from_f64(f64::NEG_INFINITY, dtype)
            } else if dtype.is_signed() {
                from_i128(-(1i128 << (dtype.bits() - 1)), dtype)
            } else {
                0
            }
        }
        ReduceOp::Min => {
            if dtype.is_float() {
                from_f64(f64::INFINITY, dtype)
            } else if dtype.is_signed() {
                from_i128((1i128 << (dtype.bits() - 1)) - 1, dtype)
            } else {
                mask(dtype)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn i(v: i64, d: DType) -> u64 {
        from_i128(v as i128, d)
    }

    #[test]
    fn test_truncating_remainder() {
        let r = binary(ArithOp::Mod, i(-7, DType::I32), i(3, DType::I32), DType::I32);
        assert_eq!(to_i128(r, DType::I32), -1);
        let r = binary(ArithOp::Mod, i(7, DType::I32), i(-3, DType::I32), DType::I32);
        assert_eq!(to_i128(r, DType::I32), 1);
        let r = binary(
            ArithOp::Mod,
            from_f64(-7.5, DType::F32),
            from_f64(2.0, DType::F32),
            DType::F32,
        );
        assert_eq!(to_f64(r, DType::F32), -1.5);
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        assert_eq!(binary(ArithOp::FloorDiv, 5, 0, DType::U8), 0);
        assert_eq!(binary(ArithOp::Mod, 5, 0, DType::I64), 0);
    }

    #[test]
    fn test_wrapping() {
        assert_eq!(binary(ArithOp::Add, 250, 10, DType::U8), 4);
        let r = binary(ArithOp::Mul, u64::MAX, 2, DType::U64);
        assert_eq!(r, u64::MAX - 1);
        assert_eq!(unary(UnaryKind::Neg, 1, DType::U16), 0xffff);
        assert_eq!(unary(UnaryKind::Invert, 0, DType::I8), 0xff);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(binary(ArithOp::Shl, 1, 3, DType::I32), 8);
        assert_eq!(binary(ArithOp::Shl, 1, 40, DType::I32), 0);
        let neg = i(-8, DType::I32);
        assert_eq!(to_i128(binary(ArithOp::Shr, neg, 1, DType::I32), DType::I32), -4);
        assert_eq!(binary(ArithOp::Shr, 0x80, 7, DType::U8), 1);
    }

    #[test]
    fn test_nan_comparisons() {
        let nan = from_f64(f64::NAN, DType::F32);
        let one = from_f64(1.0, DType::F32);
        assert!(!compare(CmpOp::Eq, nan, nan, DType::F32));
        assert!(compare(CmpOp::Ne, nan, one, DType::F32));
        assert!(!compare(CmpOp::Lt, nan, one, DType::F32));
        assert!(!compare(CmpOp::Ge, one, nan, DType::F32));
    }

    #[test]
    fn test_casts() {
        assert_eq!(to_i128(cast(from_f64(-3.9, DType::F32), DType::F32, DType::I32), DType::I32), -3);
        assert_eq!(cast(from_f64(1e10, DType::F64), DType::F64, DType::I16), 0x7fff);
        assert_eq!(cast(i(-1, DType::I32), DType::I32, DType::U8), 0xff);
        assert_eq!(cast(from_f64(0.5, DType::F16), DType::F16, DType::Bool), 1);
        assert_eq!(to_f64(cast(300, DType::I32, DType::F16), DType::F16), 300.0);
        let neg1 = i(-1, DType::I8);
        assert_eq!(to_i128(cast(neg1, DType::I8, DType::I64), DType::I64), -1);
    }

    #[test]
    fn test_bitcast_preserves_pattern() {
        let x = i(-2, DType::I32);
        let u = bitcast(x, DType::U32);
        assert_eq!(u, 0xffff_fffe);
        assert_eq!(bitcast(u, DType::I32), x);
    }

    #[test]
    fn test_half_arithmetic_rounds_once() {
        let a = from_f64(1.0, DType::F16);
        let b = from_f64(0.0002, DType::F16);
        let r = binary(ArithOp::Add, a, b, DType::F16);
        assert_eq!(to_f64(r, DType::F16), 1.0);
        let neg = unary(UnaryKind::Neg, from_f64(2.5, DType::BF16), DType::BF16);
        assert_eq!(to_f64(neg, DType::BF16), -2.5);
    }

    #[test]
    fn test_reduce_identity() {
        use crate::kir::ReduceOp;
        assert_eq!(to_i128(reduce_identity(ReduceOp::Max, DType::I8), DType::I8), -128);
        assert_eq!(reduce_identity(ReduceOp::Min, DType::U16), 0xffff);
        assert_eq!(to_f64(reduce_identity(ReduceOp::Max, DType::F32), DType::F32), f64::NEG_INFINITY);
    }

    proptest! {
        #[test]
        fn remainder_has_sign_of_dividend(x in -10_000i64..10_000, y in 1i64..500) {
            let r = to_i128(binary(ArithOp::Mod, i(x, DType::I32), i(y, DType::I32), DType::I32), DType::I32);
            prop_assert!(r == 0 || (r < 0) == (x < 0));
            prop_assert!(r.abs() < y as i128);
            let q = to_i128(binary(ArithOp::FloorDiv, i(x, DType::I32), i(y, DType::I32), DType::I32), DType::I32);
            prop_assert_eq!(q * y as i128 + r, x as i128);
        }

        #[test]
        fn int_cast_round_trip_through_wider(x in any::<i16>()) {
            let wide = cast(i(x as i64, DType::I16), DType::I16, DType::I64);
            let back = cast(wide, DType::I64, DType::I16);
            prop_assert_eq!(to_i128(back, DType::I16), x as i128);
        }
    }
}
