//! Builtin block primitives callable from kernel code.

use crate::ast::CallArg;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::kir::{CacheModifier, Elem, MathFn, ReduceOp, Shape, ValueId};
use crate::span::{Span, Spanned};
use crate::types::{ArithOp, AtomicKind};

use super::{at, const_bits, Args, ConstValue, TraceResult, TraceValue, Tracer};

const BUILTINS: &[&str] = &[
    "program_id",
    "num_programs",
    "arange",
    "zeros",
    "full",
    "load",
    "store",
    "atomic_add",
    "atomic_max",
    "atomic_min",
    "sum",
    "max",
    "min",
    "dot",
    "exp",
    "log",
    "sin",
    "cos",
    "sqrt",
    "abs",
    "where",
    "maximum",
    "minimum",
    "cast",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

impl<'a> Tracer<'a> {
    pub(super) fn builtin(&mut self, name: &str, args: &[CallArg], span: Span) -> TraceResult<TraceValue> {
        let v = match name {
            "program_id" | "num_programs" => {
                let a = self.bind_call(name, args, &["axis"], span)?;
                let axis = const_int(a.req("axis")?, "axis", ErrorKind::Value)?;
                if name == "program_id" {
                    self.builder.program_id(axis)
                } else {
                    self.builder.num_programs(axis)
                }
                .map_err(at(span))?
            }
            "arange" => {
                let a = self.bind_call(name, args, &["start", "end"], span)?;
                let start = const_int(a.req("start")?, "arange start", ErrorKind::Value)?;
                let end = const_int(a.req("end")?, "arange end", ErrorKind::Value)?;
                self.builder.arange(start, end).map_err(at(span))?
            }
            "zeros" => {
                let a = self.bind_call(name, args, &["shape", "dtype"], span)?;
                let shape = shape_arg(a.req("shape")?)?;
                let dtype = self.dtype_arg(a.req("dtype")?)?;
                self.builder.full(shape, 0, dtype).map_err(at(span))?
            }
            "full" => {
                let a = self.bind_call(name, args, &["shape", "value", "dtype"], span)?;
                let shape = shape_arg(a.req("shape")?)?;
                let dtype = self.dtype_arg(a.req("dtype")?)?;
                let value = a.req("value")?;
                match &value.node {
                    TraceValue::Const(c) => {
                        let bits = const_bits(c, dtype).map_err(at(value.span))?;
                        self.builder.full(shape, bits, dtype).map_err(at(span))?
                    }
                    TraceValue::Tensor(v) if self.builder.shape(*v).is_scalar() => {
                        let v = self.builder.cast(*v, dtype).map_err(at(value.span))?;
                        self.builder.broadcast_to(v, &shape).map_err(at(span))?
                    }
                    other => {
                        return Err(Diagnostic::type_error(
                            format!("full() value must be a scalar, got a {}", other.kind_name()),
                            value.span,
                        ))
                    }
                }
            }
            "load" => {
                let a = self.bind_call(
                    name,
                    args,
                    &["pointer", "mask", "other", "cache_modifier"],
                    span,
                )?;
                let ptr = self.pointer_arg(a.req("pointer")?)?;
                let mask = self.mask_arg(&a)?;
                let other = match a.opt("other") {
                    Some(o) => Some(self.pointee_value(ptr, o)?),
                    None => None,
                };
                let cache = cache_arg(a.opt("cache_modifier"))?;
                self.builder.load(ptr, mask, other, cache).map_err(at(span))?
            }
            "store" => {
                let a = self.bind_call(name, args, &["pointer", "value", "mask"], span)?;
                let ptr = self.pointer_arg(a.req("pointer")?)?;
                let value = self.pointee_value(ptr, a.req("value")?)?;
                let mask = self.mask_arg(&a)?;
                self.builder.store(ptr, value, mask).map_err(at(span))?;
                return Ok(TraceValue::none());
            }
            "atomic_add" | "atomic_max" | "atomic_min" => {
                let op = match name {
                    "atomic_add" => AtomicKind::Add,
                    "atomic_max" => AtomicKind::Max,
                    _ => AtomicKind::Min,
                };
                let a = self.bind_call(name, args, &["pointer", "val", "mask"], span)?;
                let ptr = self.pointer_arg(a.req("pointer")?)?;
                let value = self.pointee_value(ptr, a.req("val")?)?;
                let mask = self.mask_arg(&a)?;
                self.builder.atomic(op, ptr, value, mask).map_err(at(span))?
            }
            "sum" | "max" | "min" => {
                let op = match name {
                    "sum" => ReduceOp::Sum,
                    "max" => ReduceOp::Max,
                    _ => ReduceOp::Min,
                };
                let a = self.bind_call(name, args, &["input", "axis"], span)?;
                let input = a.req("input")?;
                let v = self.tensor(&input.node, input.span)?;
                match a.opt("axis") {
                    Some(axis) => {
                        let axis = const_int(axis, "reduction axis", ErrorKind::Shape)?;
                        self.builder.reduce(op, v, axis).map_err(at(span))?
                    }
                    None => {
                        let mut cur = v;
                        while !self.builder.shape(cur).is_scalar() {
                            cur = self.builder.reduce(op, cur, 0).map_err(at(span))?;
                        }
                        if cur == v {
                            return Err(Diagnostic::shape_error(
                                format!("cannot reduce a scalar with {}", name),
                                input.span,
                            ));
                        }
                        cur
                    }
                }
            }
            "dot" => {
                let a = self.bind_call(name, args, &["input", "other"], span)?;
                let x = a.req("input")?;
                let y = a.req("other")?;
                let x = self.tensor(&x.node, x.span)?;
                let y = self.tensor(&y.node, y.span)?;
                self.builder.dot(x, y).map_err(at(span))?
            }
            "exp" | "log" | "sin" | "cos" | "sqrt" | "abs" => {
                let func = MathFn::from_name(name).ok_or_else(|| {
                    Diagnostic::name_error(format!("unknown function '{}'", name), span)
                })?;
                let a = self.bind_call(name, args, &["x"], span)?;
                let x = a.req("x")?;
                let x = self.tensor(&x.node, x.span)?;
                self.builder.math(func, x).map_err(at(span))?
            }
            "where" => {
                let a = self.bind_call(name, args, &["condition", "x", "y"], span)?;
                let cond = a.req("condition")?;
                let cond = self.tensor(&cond.node, cond.span)?;
                let (x, y) = self.weak_pair(a.req("x")?, a.req("y")?, span)?;
                self.builder.select(cond, x, y).map_err(at(span))?
            }
            "maximum" | "minimum" => {
                let op = if name == "maximum" {
                    ArithOp::Max
                } else {
                    ArithOp::Min
                };
                let a = self.bind_call(name, args, &["x", "y"], span)?;
                let (x, y) = self.weak_pair(a.req("x")?, a.req("y")?, span)?;
                self.builder.binary(op, x, y).map_err(at(span))?
            }
            "cast" => {
                let a = self.bind_call(name, args, &["input", "dtype", "bitcast"], span)?;
                let input = a.req("input")?.node.clone();
                return self.convert(&input, &a, span);
            }
            _ => {
                return Err(Diagnostic::name_error(
                    format!("unknown function '{}'", name),
                    span,
                ))
            }
        };
        Ok(TraceValue::Tensor(v))
    }

    fn pointer_arg(&mut self, v: &Spanned<TraceValue>) -> TraceResult<ValueId> {
        let id = self.tensor(&v.node, v.span)?;
        if !self.builder.elem(id).is_ptr() {
            return Err(Diagnostic::type_error(
                format!("expected a pointer, got {}", self.builder.ty(id)),
                v.span,
            ));
        }
        Ok(id)
    }

    fn mask_arg(&mut self, a: &Args) -> TraceResult<Option<ValueId>> {
        match a.opt("mask") {
            Some(m) => Ok(Some(self.tensor(&m.node, m.span)?)),
            None => Ok(None),
        }
    }

    /// A value headed for memory behind `ptr`; constants take the pointee
    /// dtype directly.
    fn pointee_value(&mut self, ptr: ValueId, v: &Spanned<TraceValue>) -> TraceResult<ValueId> {
        match &v.node {
            TraceValue::Const(c) => {
                let pointee = Elem::Scalar(self.builder.elem(ptr).dtype());
                self.const_like(c, pointee).map_err(at(v.span))
            }
            other => self.tensor(other, v.span),
        }
    }

    /// Two operands of an elementwise builtin with weak literal typing.
    fn weak_pair(
        &mut self,
        x: &Spanned<TraceValue>,
        y: &Spanned<TraceValue>,
        span: Span,
    ) -> TraceResult<(ValueId, ValueId)> {
        match (&x.node, &y.node) {
            (TraceValue::Const(_), TraceValue::Const(_)) => {
                Ok((self.tensor(&x.node, x.span)?, self.tensor(&y.node, y.span)?))
            }
            _ => self.operands(&x.node, &y.node).map_err(at(span)),
        }
    }
}

fn const_int(v: &Spanned<TraceValue>, what: &str, kind: ErrorKind) -> TraceResult<i64> {
    match &v.node {
        TraceValue::Const(c) => c.as_int().ok_or_else(|| {
            Diagnostic::type_error(
                format!("{} must be an integer, got {}", what, c.type_name()),
                v.span,
            )
        }),
        other => Err(Diagnostic::of_kind(
            kind,
            format!("{} must be a compile-time constant, got a {}", what, other.kind_name()),
            v.span,
        )),
    }
}

/// `128` or `(32, 64)`.
fn shape_arg(v: &Spanned<TraceValue>) -> TraceResult<Shape> {
    let items: Vec<TraceValue> = match &v.node {
        TraceValue::Tuple(items) => items.clone(),
        single => vec![single.clone()],
    };
    let mut dims = Vec::with_capacity(items.len());
    for item in items {
        let d = const_int(&Spanned::new(item, v.span), "shape dimension", ErrorKind::Value)?;
        if d <= 0 {
            return Err(Diagnostic::value_error(
                format!("shape dimensions must be positive, got {}", d),
                v.span,
            ));
        }
        dims.push(d as usize);
    }
    Ok(Shape::new(dims))
}

fn cache_arg(v: Option<&Spanned<TraceValue>>) -> TraceResult<CacheModifier> {
    let Some(v) = v else {
        return Ok(CacheModifier::None);
    };
    let parsed = match &v.node {
        TraceValue::Const(ConstValue::Str(s)) => CacheModifier::parse(s),
        _ => None,
    };
    parsed.ok_or_else(|| {
        let shown = match &v.node {
            TraceValue::Const(c) => c.to_string(),
            other => other.kind_name().to_string(),
        };
        Diagnostic::value_error(format!("invalid cache modifier {}", shown), v.span)
            .with_help("use \"\", \".ca\" or \".cg\"".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert!(is_builtin("load"));
        assert!(is_builtin("atomic_min"));
        assert!(!is_builtin("range"));
        assert!(!is_builtin("print"));
    }

    #[test]
    fn test_cache_arg() {
        let cg = Spanned::dummy(TraceValue::Const(ConstValue::from(".cg")));
        assert_eq!(cache_arg(Some(&cg)).unwrap(), CacheModifier::CacheGlobal);
        assert_eq!(cache_arg(None).unwrap(), CacheModifier::None);
        let bad = Spanned::dummy(TraceValue::Const(ConstValue::from(".cs")));
        assert_eq!(cache_arg(Some(&bad)).unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn test_shape_arg() {
        let t = Spanned::dummy(TraceValue::Tuple(vec![
            TraceValue::Const(ConstValue::Int(32)),
            TraceValue::Const(ConstValue::Int(64)),
        ]));
        assert_eq!(shape_arg(&t).unwrap(), Shape::new([32, 64]));
        let zero = Spanned::dummy(TraceValue::Const(ConstValue::Int(0)));
        assert_eq!(shape_arg(&zero).unwrap_err().kind, ErrorKind::Value);
    }
}
