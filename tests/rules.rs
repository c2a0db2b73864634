//! Randomized checks of the dtype rules and per-lane arithmetic.

use proptest::prelude::*;

use tessel::kir::scalar;
use tessel::types::{promote, ArithOp};
use tessel::DType;

fn dtype() -> impl Strategy<Value = DType> {
    (0..DType::ALL.len()).prop_map(|i| DType::ALL[i])
}

fn lane(v: i32) -> u64 {
    v as u32 as u64
}

fn int(bits: u64) -> i32 {
    bits as u32 as i32
}

proptest! {
    #[test]
    fn promote_is_commutative(a in dtype(), b in dtype()) {
        prop_assert_eq!(promote(a, b), promote(b, a));
    }

    #[test]
    fn promote_is_idempotent_and_bool_is_neutral(a in dtype()) {
        prop_assert_eq!(promote(a, a), a);
        prop_assert_eq!(promote(a, DType::Bool), a);
    }

    #[test]
    fn promote_never_narrows(a in dtype(), b in dtype()) {
        let p = promote(a, b);
        if !a.is_bool() && !b.is_bool() && a.is_float() == b.is_float() {
            prop_assert!(p.bits() >= a.bits().max(b.bits()));
        }
        if a.is_float() || b.is_float() {
            prop_assert!(p.is_float());
        }
    }

    #[test]
    fn remainder_takes_the_sign_of_the_dividend(x in any::<i32>(), y in any::<i32>()) {
        prop_assume!(y != 0);
        let r = int(scalar::binary(ArithOp::Mod, lane(x), lane(y), DType::I32));
        prop_assert_eq!(r, x.wrapping_rem(y));
        prop_assert!(r == 0 || (r < 0) == (x < 0));
        let q = int(scalar::binary(ArithOp::FloorDiv, lane(x), lane(y), DType::I32));
        prop_assert_eq!(q.wrapping_mul(y).wrapping_add(r), x);
    }

    #[test]
    fn integer_division_by_zero_is_zero(x in any::<i32>()) {
        prop_assert_eq!(scalar::binary(ArithOp::Mod, lane(x), 0, DType::I32), 0);
        prop_assert_eq!(scalar::binary(ArithOp::FloorDiv, lane(x), 0, DType::I32), 0);
    }

    #[test]
    fn widening_casts_preserve_values(x in any::<i32>()) {
        let wide = scalar::cast(lane(x), DType::I32, DType::I64);
        prop_assert_eq!(wide as i64, x as i64);
        prop_assert_eq!(scalar::cast(wide, DType::I64, DType::I32), lane(x));
    }

    #[test]
    fn unsigned_add_wraps(x in any::<u32>(), y in any::<u32>()) {
        let sum = scalar::binary(ArithOp::Add, x as u64, y as u64, DType::U32);
        prop_assert_eq!(sum, x.wrapping_add(y) as u64);
    }
}

#[test]
fn test_equal_width_mixed_signedness_is_unsigned() {
    assert_eq!(promote(DType::I32, DType::U32), DType::U32);
    assert_eq!(promote(DType::I64, DType::U32), DType::I64);
    assert_eq!(promote(DType::U8, DType::I16), DType::I16);
    assert_eq!(promote(DType::F16, DType::BF16), DType::F32);
    assert_eq!(promote(DType::I64, DType::F16), DType::F16);
}
