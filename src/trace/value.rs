//! Values the tracer manipulates: compile-time constants, KIR block
//! handles, and compile-time tuples.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::kir::{Elem, ValueId};
use crate::types::DType;

/// A value known while specializing: bound constants, literals, folded
/// expressions, dtype names.
#[derive(Clone, Debug)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
    /// A dtype (`float32`) or pointer type (`X.dtype`).
    Type(Elem),
}

impl ConstValue {
    pub fn dtype(d: DType) -> Self {
        ConstValue::Type(Elem::Scalar(d))
    }

    /// Python-style truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            ConstValue::Int(v) => *v != 0,
            ConstValue::Float(x) => *x != 0.0,
            ConstValue::Bool(b) => *b,
            ConstValue::Str(s) => !s.is_empty(),
            ConstValue::None => false,
            ConstValue::Type(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConstValue::Int(_) => "int",
            ConstValue::Float(_) => "float",
            ConstValue::Bool(_) => "bool",
            ConstValue::Str(_) => "str",
            ConstValue::None => "None",
            ConstValue::Type(_) => "dtype",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ConstValue::Int(_) | ConstValue::Float(_) | ConstValue::Bool(_)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(*v),
            ConstValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::Int(a), ConstValue::Int(b)) => a == b,
            (ConstValue::Float(a), ConstValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Bool(a), ConstValue::Bool(b)) => a == b,
            (ConstValue::Str(a), ConstValue::Str(b)) => a == b,
            (ConstValue::None, ConstValue::None) => true,
            (ConstValue::Type(a), ConstValue::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ConstValue::Int(v) => v.hash(state),
            ConstValue::Float(x) => x.to_bits().hash(state),
            ConstValue::Bool(b) => b.hash(state),
            ConstValue::Str(s) => s.hash(state),
            ConstValue::None => {}
            ConstValue::Type(e) => e.hash(state),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(x) => write!(f, "{:?}", x),
            ConstValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            ConstValue::Str(s) => write!(f, "{:?}", s),
            ConstValue::None => write!(f, "None"),
            ConstValue::Type(e) => write!(f, "{}", e),
        }
    }
}

impl From<i64> for ConstValue {
    fn from(v: i64) -> Self {
        ConstValue::Int(v)
    }
}

impl From<i32> for ConstValue {
    fn from(v: i32) -> Self {
        ConstValue::Int(v as i64)
    }
}

impl From<f64> for ConstValue {
    fn from(x: f64) -> Self {
        ConstValue::Float(x)
    }
}

impl From<bool> for ConstValue {
    fn from(b: bool) -> Self {
        ConstValue::Bool(b)
    }
}

impl From<&str> for ConstValue {
    fn from(s: &str) -> Self {
        ConstValue::Str(s.to_string())
    }
}

impl From<DType> for ConstValue {
    fn from(d: DType) -> Self {
        ConstValue::dtype(d)
    }
}

impl FromStr for ConstValue {
    type Err = String;

    /// Command-line form: `128`, `0.5`, `true`, `None`, `float16`, `".cg"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty constant".to_string());
        }
        match s {
            "true" | "True" => return Ok(ConstValue::Bool(true)),
            "false" | "False" => return Ok(ConstValue::Bool(false)),
            "None" => return Ok(ConstValue::None),
            _ => {}
        }
        if let Ok(v) = s.parse::<i64>() {
            return Ok(ConstValue::Int(v));
        }
        if let Ok(x) = s.parse::<f64>() {
            return Ok(ConstValue::Float(x));
        }
        if let Some(d) = DType::from_name(s) {
            return Ok(ConstValue::dtype(d));
        }
        let quoted = s.len() >= 2
            && ((s.starts_with('"') && s.ends_with('"'))
                || (s.starts_with('\'') && s.ends_with('\'')));
        if quoted {
            return Ok(ConstValue::Str(s[1..s.len() - 1].to_string()));
        }
        Ok(ConstValue::Str(s.to_string()))
    }
}

/// Result of evaluating an expression while tracing.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceValue {
    Const(ConstValue),
    Tensor(ValueId),
    /// Compile-time tuple; never reaches KIR.
    Tuple(Vec<TraceValue>),
}

impl TraceValue {
    pub fn none() -> Self {
        TraceValue::Const(ConstValue::None)
    }

    pub fn as_const(&self) -> Option<&ConstValue> {
        match self {
            TraceValue::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TraceValue::Const(ConstValue::None))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TraceValue::Const(c) => c.type_name(),
            TraceValue::Tensor(_) => "block",
            TraceValue::Tuple(_) => "tuple",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(ConstValue::Int(3).truthy());
        assert!(!ConstValue::Int(0).truthy());
        assert!(!ConstValue::Float(0.0).truthy());
        assert!(!ConstValue::None.truthy());
        assert!(!ConstValue::Str(String::new()).truthy());
        assert!(ConstValue::dtype(DType::F32).truthy());
    }

    #[test]
    fn test_parse_constants() {
        assert_eq!("128".parse::<ConstValue>(), Ok(ConstValue::Int(128)));
        assert_eq!("-3".parse::<ConstValue>(), Ok(ConstValue::Int(-3)));
        assert_eq!("0.5".parse::<ConstValue>(), Ok(ConstValue::Float(0.5)));
        assert_eq!("true".parse::<ConstValue>(), Ok(ConstValue::Bool(true)));
        assert_eq!("None".parse::<ConstValue>(), Ok(ConstValue::None));
        assert_eq!(
            "bfloat16".parse::<ConstValue>(),
            Ok(ConstValue::dtype(DType::BF16))
        );
        assert_eq!("\".cg\"".parse::<ConstValue>(), Ok(ConstValue::from(".cg")));
        assert!("".parse::<ConstValue>().is_err());
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(ConstValue::Float(f64::NAN), ConstValue::Float(f64::NAN));
        assert_ne!(ConstValue::Float(0.0), ConstValue::Float(-0.0));
        assert_ne!(ConstValue::Int(1), ConstValue::Bool(true));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConstValue::Bool(true).to_string(), "True");
        assert_eq!(ConstValue::Float(1.0).to_string(), "1.0");
        assert_eq!(ConstValue::dtype(DType::U8).to_string(), "uint8");
    }
}
