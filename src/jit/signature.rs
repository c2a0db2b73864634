//! Launch signatures: the specialization key of a compiled kernel.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::trace::ConstValue;
use crate::types::DType;

/// What specialization sees of one runtime argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKey {
    /// Pointer to `dtype`; `aligned16` when the address is 16-byte aligned.
    Ptr { dtype: DType, aligned16: bool },
    /// Integer (or bool) scalar. `is_one` binds the constant 1 in place of
    /// a parameter; `div16` records that the value is divisible by 16.
    Int {
        dtype: DType,
        is_one: bool,
        div16: bool,
    },
    Float { dtype: DType },
}

impl ArgKey {
    pub fn ptr(dtype: DType) -> Self {
        ArgKey::Ptr {
            dtype,
            aligned16: true,
        }
    }

    pub fn int(dtype: DType) -> Self {
        ArgKey::Int {
            dtype,
            is_one: false,
            div16: false,
        }
    }

    /// Key of an integer argument with a known value.
    pub fn int_value(dtype: DType, value: i64) -> Self {
        ArgKey::Int {
            dtype,
            is_one: value == 1,
            div16: value % 16 == 0,
        }
    }

    pub fn float(dtype: DType) -> Self {
        ArgKey::Float { dtype }
    }

    /// Scalar dtype, or the pointee for pointers.
    pub fn dtype(&self) -> DType {
        match self {
            ArgKey::Ptr { dtype, .. } | ArgKey::Int { dtype, .. } | ArgKey::Float { dtype } => {
                *dtype
            }
        }
    }

    /// Whether the argument becomes a kernel parameter (the constant 1 does not).
    pub fn is_param(&self) -> bool {
        !matches!(self, ArgKey::Int { is_one: true, .. })
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKey::Ptr { dtype, aligned16 } => {
                write!(f, "*{}", dtype)?;
                if *aligned16 {
                    write!(f, ":16")?;
                }
                Ok(())
            }
            ArgKey::Int { dtype, is_one, div16 } => {
                write!(f, "{}", dtype)?;
                if *is_one {
                    write!(f, "=1")
                } else if *div16 {
                    write!(f, ":16")
                } else {
                    Ok(())
                }
            }
            ArgKey::Float { dtype } => write!(f, "{}", dtype),
        }
    }
}

impl FromStr for ArgKey {
    type Err = String;

    /// `*f32:16` (aligned pointer), `*f16`, `i32`, `i32:16`, `i32=1`, `f32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('*') {
            let (name, aligned16) = match rest.strip_suffix(":16") {
                Some(name) => (name, true),
                None => (rest, false),
            };
            let dtype: DType = name.parse()?;
            return Ok(ArgKey::Ptr { dtype, aligned16 });
        }
        let (name, is_one, div16) = if let Some(name) = s.strip_suffix("=1") {
            (name, true, false)
        } else if let Some(name) = s.strip_suffix(":16") {
            (name, false, true)
        } else {
            (s, false, false)
        };
        let dtype: DType = name.parse()?;
        if dtype.is_float() {
            if is_one || div16 {
                return Err(format!("'{}': float arguments take no specialization", s));
            }
            return Ok(ArgKey::Float { dtype });
        }
        Ok(ArgKey::Int {
            dtype,
            is_one,
            div16,
        })
    }
}

/// Runtime argument keys in parameter order plus the bound constants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    pub args: Vec<ArgKey>,
    pub consts: BTreeMap<String, ConstValue>,
}

impl Signature {
    pub fn new(args: Vec<ArgKey>) -> Self {
        Self {
            args,
            consts: BTreeMap::new(),
        }
    }

    pub fn with_const(mut self, name: &str, value: impl Into<ConstValue>) -> Self {
        self.consts.insert(name.to_string(), value.into());
        self
    }

    /// Launch-argument index of every kernel parameter, in parameter order.
    pub fn param_positions(&self) -> Vec<usize> {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_param())
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        write!(f, "({})", args.join(", "))?;
        if !self.consts.is_empty() {
            let consts: Vec<String> = self
                .consts
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", consts.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_keys() {
        assert_eq!(
            "*f32:16".parse::<ArgKey>(),
            Ok(ArgKey::Ptr {
                dtype: DType::F32,
                aligned16: true
            })
        );
        assert_eq!(
            "*bf16".parse::<ArgKey>(),
            Ok(ArgKey::Ptr {
                dtype: DType::BF16,
                aligned16: false
            })
        );
        assert_eq!("i32=1".parse::<ArgKey>(), Ok(ArgKey::int_value(DType::I32, 1)));
        assert_eq!(
            "int64:16".parse::<ArgKey>(),
            Ok(ArgKey::Int {
                dtype: DType::I64,
                is_one: false,
                div16: true
            })
        );
        assert_eq!("fp16".parse::<ArgKey>(), Ok(ArgKey::float(DType::F16)));
        assert!("f32:16".parse::<ArgKey>().is_err());
        assert!("*q7".parse::<ArgKey>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for key in [
            ArgKey::ptr(DType::F16),
            ArgKey::int_value(DType::I32, 1),
            ArgKey::int_value(DType::I64, 32),
            ArgKey::int(DType::U8),
            ArgKey::float(DType::F64),
        ] {
            assert_eq!(key.to_string().parse::<ArgKey>(), Ok(key));
        }
    }

    #[test]
    fn test_int_value_specialization() {
        assert_eq!(
            ArgKey::int_value(DType::I32, 48),
            ArgKey::Int {
                dtype: DType::I32,
                is_one: false,
                div16: true
            }
        );
        assert!(!ArgKey::int_value(DType::I32, 1).is_param());
    }

    #[test]
    fn test_param_positions_skip_bound_ones() {
        let sig = Signature::new(vec![
            ArgKey::ptr(DType::F32),
            ArgKey::int_value(DType::I32, 1),
            ArgKey::int_value(DType::I32, 7),
        ]);
        assert_eq!(sig.param_positions(), vec![0, 2]);
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::int(DType::I32)])
            .with_const("BLOCK", 128i64);
        assert_eq!(sig.to_string(), "(*float32:16, int32) [BLOCK=128]");
    }
}
