//! Compile-time folding of constant expressions.
//!
//! Integers fold in 64-bit two's complement with truncating division,
//! matching what the device computes for the same operands.

use crate::ast::{BinOp, UnaryOp};
use crate::kir::builder::{SemResult, SemanticError};

use super::value::ConstValue;

enum Num {
    Int(i64),
    Float(f64),
}

fn num(c: &ConstValue) -> Option<Num> {
    match c {
        ConstValue::Int(v) => Some(Num::Int(*v)),
        ConstValue::Bool(b) => Some(Num::Int(*b as i64)),
        ConstValue::Float(x) => Some(Num::Float(*x)),
        _ => None,
    }
}

fn unsupported(op: BinOp, a: &ConstValue, b: &ConstValue) -> SemanticError {
    SemanticError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn division_by_zero(op: BinOp) -> SemanticError {
    SemanticError::value_error(format!(
        "division by zero in constant expression ('{}')",
        op
    ))
}

pub(super) fn binary(op: BinOp, a: &ConstValue, b: &ConstValue) -> SemResult<ConstValue> {
    match op {
        BinOp::And => return Ok(if a.truthy() { b.clone() } else { a.clone() }),
        BinOp::Or => return Ok(if a.truthy() { a.clone() } else { b.clone() }),
        _ => {}
    }
    if op.is_comparison() {
        return compare(op, a, b);
    }
    let (x, y) = match (num(a), num(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(unsupported(op, a, b)),
    };
    if let (ConstValue::Bool(p), ConstValue::Bool(q)) = (a, b) {
        match op {
            BinOp::BitAnd => return Ok(ConstValue::Bool(*p & *q)),
            BinOp::BitOr => return Ok(ConstValue::Bool(*p | *q)),
            BinOp::BitXor => return Ok(ConstValue::Bool(*p ^ *q)),
            _ => {}
        }
    }
    match (x, y) {
        (Num::Int(x), Num::Int(y)) => int_binary(op, x, y),
        (x, y) => {
            let x = match x {
                Num::Int(v) => v as f64,
                Num::Float(f) => f,
            };
            let y = match y {
                Num::Int(v) => v as f64,
                Num::Float(f) => f,
            };
            float_binary(op, x, y, a, b)
        }
    }
}

fn int_binary(op: BinOp, x: i64, y: i64) -> SemResult<ConstValue> {
    let v = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(division_by_zero(op));
            }
            return Ok(ConstValue::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv | BinOp::Mod if y == 0 => return Err(division_by_zero(op)),
        BinOp::FloorDiv => x.wrapping_div(y),
        BinOp::Mod => x.wrapping_rem(y),
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::Shl | BinOp::Shr if y < 0 => {
            return Err(SemanticError::value_error(format!("negative shift count {}", y)))
        }
        BinOp::Shl if y >= 64 => 0,
        BinOp::Shl => x.wrapping_shl(y as u32),
        BinOp::Shr if y >= 64 => {
            if x < 0 {
                -1
            } else {
                0
            }
        }
        BinOp::Shr => x >> y,
        _ => {
            return Err(SemanticError::type_error(format!(
                "operator '{}' cannot fold integers",
                op
            )))
        }
    };
    Ok(ConstValue::Int(v))
}

fn float_binary(op: BinOp, x: f64, y: f64, a: &ConstValue, b: &ConstValue) -> SemResult<ConstValue> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Mod => x % y,
        BinOp::FloorDiv => {
            return Err(SemanticError::type_error(
                "floor division `//` is not supported on floating-point values",
            )
            .with_help("use `/` and convert the result with `.to(...)`"))
        }
        _ if op.is_bitwise() => {
            return Err(SemanticError::type_error(format!(
                "bitwise operator '{}' is not supported on floating-point values",
                op
            )))
        }
        _ => return Err(unsupported(op, a, b)),
    };
    Ok(ConstValue::Float(v))
}

fn compare(op: BinOp, a: &ConstValue, b: &ConstValue) -> SemResult<ConstValue> {
    let ord = match (num(a), num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => x.partial_cmp(&y),
        (Some(x), Some(y)) => {
            let x = match x {
                Num::Int(v) => v as f64,
                Num::Float(f) => f,
            };
            let y = match y {
                Num::Int(v) => v as f64,
                Num::Float(f) => f,
            };
            x.partial_cmp(&y)
        }
        _ => {
            return match op {
                BinOp::Eq => Ok(ConstValue::Bool(a == b)),
                BinOp::Ne => Ok(ConstValue::Bool(a != b)),
                _ => Err(unsupported(op, a, b)),
            };
        }
    };
    use std::cmp::Ordering::*;
    // An unordered pair (NaN) is only "not equal".
    let r = match (op, ord) {
        (BinOp::Ne, None) => true,
        (_, None) => false,
        (BinOp::Eq, Some(o)) => o == Equal,
        (BinOp::Ne, Some(o)) => o != Equal,
        (BinOp::Lt, Some(o)) => o == Less,
        (BinOp::Le, Some(o)) => o != Greater,
        (BinOp::Gt, Some(o)) => o == Greater,
        (BinOp::Ge, Some(o)) => o != Less,
        _ => return Err(unsupported(op, a, b)),
    };
    Ok(ConstValue::Bool(r))
}

pub(super) fn unary(op: UnaryOp, a: &ConstValue) -> SemResult<ConstValue> {
    let v = match (op, a) {
        (UnaryOp::Not, _) => ConstValue::Bool(!a.truthy()),
        (UnaryOp::Neg, ConstValue::Int(v)) => ConstValue::Int(v.wrapping_neg()),
        (UnaryOp::Neg, ConstValue::Bool(b)) => ConstValue::Int(-(*b as i64)),
        (UnaryOp::Neg, ConstValue::Float(x)) => ConstValue::Float(-x),
        (UnaryOp::Invert, ConstValue::Int(v)) => ConstValue::Int(!v),
        (UnaryOp::Invert, ConstValue::Bool(b)) => ConstValue::Int(!(*b as i64)),
        _ => {
            return Err(SemanticError::type_error(format!(
                "bad operand type for unary {}: '{}'",
                op.as_str(),
                a.type_name()
            )))
        }
    };
    Ok(v)
}
