//! `if` and `for`: resolved at trace time when the condition or bounds
//! are constants, lowered to KIR regions otherwise.

use std::collections::BTreeSet;

use crate::ast::{Block, Expr, Pattern, Stmt};
use crate::diagnostic::Diagnostic;
use crate::kir::{Elem, Region, Ty, ValueId};
use crate::span::{Span, Spanned};
use crate::types::{promote, DType};

use super::{at, default_dtype, fits, ConstValue, Flow, TraceResult, TraceValue, Tracer, Vars};

/// Constant-bound loops with more iterations stay loops.
const MAX_UNROLL: i128 = 4096;

/// Outcome of tracing a loop body once.
enum BodyTrace {
    Yields(Vec<ValueId>),
    /// Carried variable `index` came out of the body with type `Ty`.
    Retype(usize, Ty),
}

impl<'a> Tracer<'a> {
    pub(super) fn if_stmt(
        &mut self,
        cond: &Spanned<Expr>,
        then_block: &Spanned<Block>,
        else_block: Option<&Spanned<Block>>,
        span: Span,
    ) -> TraceResult<Flow> {
        match self.expr(cond)? {
            TraceValue::Const(c) => {
                if c.truthy() {
                    self.block(&then_block.node)
                } else if let Some(e) = else_block {
                    self.block(&e.node)
                } else {
                    Ok(Flow::Normal)
                }
            }
            TraceValue::Tuple(_) => Err(Diagnostic::type_error(
                "a tuple cannot be used as a condition".to_string(),
                cond.span,
            )),
            TraceValue::Tensor(v) => {
                let shape = self.builder.shape(v);
                if !shape.is_scalar() {
                    return Err(Diagnostic::shape_error(
                        format!("`if` condition must be a scalar, got a block of shape {}", shape),
                        cond.span,
                    )
                    .with_help("use `where(cond, a, b)` to select per element".to_string()));
                }
                let c = self.builder.to_bool(v).map_err(at(cond.span))?;
                self.runtime_if(c, then_block, else_block, span)
            }
        }
    }

    fn runtime_if(
        &mut self,
        cond: ValueId,
        then_block: &Spanned<Block>,
        else_block: Option<&Spanned<Block>>,
        span: Span,
    ) -> TraceResult<Flow> {
        let snapshot = self.frame().vars.clone();
        self.frame_mut().runtime_depth += 1;
        let then_branch = self.branch(Some(then_block), &snapshot);
        let else_branch = match &then_branch {
            Ok(_) => self.branch(else_block, &snapshot),
            Err(_) => Ok((Region::default(), Vars::new())),
        };
        self.frame_mut().runtime_depth -= 1;
        let (mut then_region, then_vars) = then_branch?;
        let (mut else_region, else_vars) = else_branch?;

        // Names bound on both paths survive; values that differ become
        // results of the `if`.
        let mut merged = Vars::new();
        let mut changed = Vec::new();
        let mut tys = Vec::new();
        for (name, tv) in &then_vars {
            let Some(ev) = else_vars.get(name) else {
                continue;
            };
            if tv == ev {
                merged.insert(name.clone(), tv.clone());
                continue;
            }
            let (t, e) = self.merge_pair(name, tv, ev, span)?;
            tys.push(self.builder.ty(t).clone());
            then_region.yields.push(t);
            else_region.yields.push(e);
            changed.push(name.clone());
        }
        let results = self.builder.emit_if(cond, then_region, else_region, tys);
        for (name, v) in changed.into_iter().zip(results) {
            merged.insert(name, TraceValue::Tensor(v));
        }
        self.frame_mut().vars = merged;
        Ok(Flow::Normal)
    }

    /// Trace one arm in its own region starting from `snapshot`; returns
    /// the region and the variables as the arm leaves them.
    fn branch(&mut self, block: Option<&Spanned<Block>>, snapshot: &Vars) -> TraceResult<(Region, Vars)> {
        self.frame_mut().vars = snapshot.clone();
        self.builder.begin_region();
        let flow = match block {
            Some(b) => self.block(&b.node),
            None => Ok(Flow::Normal),
        };
        let region = self.builder.end_region(Vec::new());
        let vars = std::mem::replace(&mut self.frame_mut().vars, snapshot.clone());
        flow?;
        Ok((region, vars))
    }

    /// Bring the two arm values of `name` to one type. Constants are
    /// materialized in the enclosing region, ahead of the `if`.
    fn merge_pair(
        &mut self,
        name: &str,
        then_value: &TraceValue,
        else_value: &TraceValue,
        span: Span,
    ) -> TraceResult<(ValueId, ValueId)> {
        let (t, e) = match (then_value, else_value) {
            (TraceValue::Tensor(t), TraceValue::Tensor(e)) => (*t, *e),
            (TraceValue::Tensor(t), TraceValue::Const(c)) => {
                let ty = self.builder.ty(*t).clone();
                (*t, self.const_as(c, &ty).map_err(at(span))?)
            }
            (TraceValue::Const(c), TraceValue::Tensor(e)) => {
                let ty = self.builder.ty(*e).clone();
                (self.const_as(c, &ty).map_err(at(span))?, *e)
            }
            (TraceValue::Const(a), TraceValue::Const(b)) => {
                let da = default_dtype(a).map_err(at(span))?;
                let db = default_dtype(b).map_err(at(span))?;
                let ty = Ty::scalar(promote(da, db));
                (
                    self.const_as(a, &ty).map_err(at(span))?,
                    self.const_as(b, &ty).map_err(at(span))?,
                )
            }
            _ => {
                return Err(Diagnostic::type_error(
                    format!(
                        "variable '{}' is a tuple that differs between the branches of a runtime `if`",
                        name
                    ),
                    span,
                ))
            }
        };
        let (tt, et) = (self.builder.ty(t).clone(), self.builder.ty(e).clone());
        if tt != et {
            return Err(Diagnostic::type_error(
                format!(
                    "variable '{}' is {} in the then-branch but {} in the else-branch",
                    name, tt, et
                ),
                span,
            ));
        }
        Ok((t, e))
    }

    // ─── Loops ────────────────────────────────────────────────────

    pub(super) fn for_stmt(
        &mut self,
        var: &Spanned<String>,
        start: &Spanned<Expr>,
        end: &Spanned<Expr>,
        step: Option<&Spanned<Expr>>,
        body: &Spanned<Block>,
        span: Span,
    ) -> TraceResult<Flow> {
        let lo = self.expr(start)?;
        let hi = self.expr(end)?;
        let (st, step_span) = match step {
            Some(s) => (self.expr(s)?, s.span),
            None => (TraceValue::Const(ConstValue::Int(1)), span),
        };
        if const_bound(&st) == Some(0) {
            return Err(Diagnostic::value_error(
                "range() step must not be zero".to_string(),
                step_span,
            ));
        }
        if let (Some(a), Some(b), Some(c)) = (const_bound(&lo), const_bound(&hi), const_bound(&st)) {
            let trips = trip_count(a, b, c);
            if trips <= MAX_UNROLL {
                for k in 0..trips {
                    let i = a as i128 + k * c as i128;
                    self.declare(&var.node, TraceValue::Const(ConstValue::Int(i as i64)));
                    if let Flow::Return(v) = self.block(&body.node)? {
                        return Ok(Flow::Return(v));
                    }
                }
                return Ok(Flow::Normal);
            }
        }
        let bounds = [(lo, start.span), (hi, end.span), (st, step_span)];
        self.runtime_for(var, &bounds, body, span)
    }

    fn runtime_for(
        &mut self,
        var: &Spanned<String>,
        bounds: &[(TraceValue, Span); 3],
        body: &Spanned<Block>,
        span: Span,
    ) -> TraceResult<Flow> {
        let iv_dtype = self.induction_dtype(bounds)?;
        let mut ends = Vec::with_capacity(3);
        for (v, sp) in bounds {
            let id = match v {
                TraceValue::Tensor(id) => self.builder.cast(*id, iv_dtype).map_err(at(*sp))?,
                TraceValue::Const(_) => {
                    let v = const_bound(v).unwrap_or_default();
                    self.builder.int_const(v, iv_dtype)
                }
                TraceValue::Tuple(_) => {
                    return Err(Diagnostic::type_error(
                        "range() bounds must be integers, got a tuple".to_string(),
                        *sp,
                    ))
                }
            };
            ends.push(id);
        }

        let snapshot = self.frame().vars.clone();
        let mut assigned = BTreeSet::new();
        assigned_names(&body.node, &mut assigned);
        let carried: Vec<(String, TraceValue)> = assigned
            .into_iter()
            .filter(|n| *n != var.node)
            .filter_map(|n| snapshot.get(&n).cloned().map(|v| (n, v)))
            .collect();

        let mut init_tys = Vec::with_capacity(carried.len());
        for (name, value) in &carried {
            let ty = match value {
                TraceValue::Tensor(v) => self.builder.ty(*v).clone(),
                TraceValue::Const(c) if c.is_numeric() => {
                    Ty::scalar(default_dtype(c).map_err(at(span))?)
                }
                other => {
                    return Err(Diagnostic::type_error(
                        format!(
                            "loop-carried variable '{}' must be a number or a block, got a {}",
                            name,
                            other.kind_name()
                        ),
                        span,
                    ))
                }
            };
            init_tys.push(ty);
        }

        // A carried constant is weakly typed: if the body turns it into a
        // block of another type, trace again with that type.
        let mut attempts = 0;
        let region = loop {
            attempts += 1;
            self.frame_mut().vars = snapshot.clone();
            self.frame_mut().runtime_depth += 1;
            self.builder.begin_region();
            let iv = self.builder.region_arg(Ty::scalar(iv_dtype));
            self.declare(&var.node, TraceValue::Tensor(iv));
            for ((name, _), ty) in carried.iter().zip(&init_tys) {
                let arg = self.builder.region_arg(ty.clone());
                self.declare(name, TraceValue::Tensor(arg));
            }
            let traced = self.loop_body(body, &carried, &init_tys, span);
            self.frame_mut().runtime_depth -= 1;
            match traced {
                Ok(BodyTrace::Yields(yields)) => break self.builder.end_region(yields),
                Ok(BodyTrace::Retype(i, ty)) => {
                    self.builder.end_region(Vec::new());
                    let (name, init) = &carried[i];
                    let weak = matches!(init, TraceValue::Const(_));
                    if !weak || attempts > carried.len() {
                        self.frame_mut().vars = snapshot;
                        return Err(Diagnostic::type_error(
                            format!(
                                "loop-carried variable '{}' changes type from {} to {} inside the loop",
                                name, init_tys[i], ty
                            ),
                            span,
                        )
                        .with_help(format!(
                            "give '{}' its final type before the loop, e.g. with `.to(...)`",
                            name
                        )));
                    }
                    init_tys[i] = ty;
                }
                Err(d) => {
                    self.builder.end_region(Vec::new());
                    self.frame_mut().vars = snapshot;
                    return Err(d);
                }
            }
        };

        let mut init = Vec::with_capacity(carried.len());
        for ((name, value), ty) in carried.iter().zip(&init_tys) {
            let v = match value {
                TraceValue::Tensor(v) => *v,
                TraceValue::Const(c) => self.const_as(c, ty).map_err(at(span))?,
                TraceValue::Tuple(_) => continue,
            };
            if self.builder.ty(v) != ty {
                return Err(Diagnostic::type_error(
                    format!(
                        "loop-carried variable '{}' starts as {} but the loop makes it {}",
                        name,
                        self.builder.ty(v),
                        ty
                    ),
                    span,
                ));
            }
            init.push(v);
        }
        let results = self
            .builder
            .emit_for((ends[0], ends[1], ends[2]), init, region);
        self.frame_mut().vars = snapshot;
        for ((name, _), v) in carried.iter().zip(results) {
            self.declare(name, TraceValue::Tensor(v));
        }
        Ok(Flow::Normal)
    }

    fn loop_body(
        &mut self,
        body: &Spanned<Block>,
        carried: &[(String, TraceValue)],
        init_tys: &[Ty],
        span: Span,
    ) -> TraceResult<BodyTrace> {
        self.block(&body.node)?;
        let mut yields = Vec::with_capacity(carried.len());
        for (i, ((name, _), ty)) in carried.iter().zip(init_tys).enumerate() {
            let value = self.frame().vars.get(name).cloned().unwrap_or_else(TraceValue::none);
            let v = match value {
                TraceValue::Tensor(v) => v,
                TraceValue::Const(c) if c.is_numeric() => {
                    // Constants re-enter the loop at the carried type when
                    // the weak typing rules allow it.
                    let v = self.const_as(&c, ty).map_err(at(span))?;
                    if self.builder.ty(v) != ty {
                        let d = default_dtype(&c).map_err(at(span))?;
                        return Ok(BodyTrace::Retype(i, Ty::scalar(d)));
                    }
                    v
                }
                other => {
                    return Err(Diagnostic::type_error(
                        format!(
                            "loop-carried variable '{}' becomes a {} inside the loop",
                            name,
                            other.kind_name()
                        ),
                        span,
                    ))
                }
            };
            let vty = self.builder.ty(v).clone();
            if vty != *ty {
                return Ok(BodyTrace::Retype(i, vty));
            }
            yields.push(v);
        }
        Ok(BodyTrace::Yields(yields))
    }

    /// Promoted dtype of the integer block bounds (`int32` by default,
    /// widened to `int64` when a constant bound needs it).
    fn induction_dtype(&self, bounds: &[(TraceValue, Span); 3]) -> TraceResult<DType> {
        let mut dtype: Option<DType> = None;
        for (v, sp) in bounds {
            match v {
                TraceValue::Tensor(id) => {
                    let ty = self.builder.ty(*id);
                    if !ty.shape.is_scalar() {
                        return Err(Diagnostic::shape_error(
                            format!("range() bounds must be scalars, got {}", ty),
                            *sp,
                        ));
                    }
                    let d = match ty.elem {
                        Elem::Scalar(d) if d.is_int() => d,
                        _ => {
                            return Err(Diagnostic::type_error(
                                format!("range() bounds must be integers, got {}", ty),
                                *sp,
                            ))
                        }
                    };
                    dtype = Some(dtype.map_or(d, |cur| promote(cur, d)));
                }
                TraceValue::Const(_) if const_bound(v).is_some() => {}
                other => {
                    return Err(Diagnostic::type_error(
                        format!("range() bounds must be integers, got a {}", other.kind_name()),
                        *sp,
                    ))
                }
            }
        }
        let mut dtype = dtype.unwrap_or(DType::I32);
        for (v, _) in bounds {
            if let Some(c) = const_bound(v) {
                if !fits(c, dtype) {
                    dtype = promote(dtype, DType::I64);
                }
            }
        }
        Ok(dtype)
    }
}

fn const_bound(v: &TraceValue) -> Option<i64> {
    match v {
        TraceValue::Const(c @ (ConstValue::Int(_) | ConstValue::Bool(_))) => c.as_int(),
        _ => None,
    }
}

fn trip_count(lo: i64, hi: i64, step: i64) -> i128 {
    let (lo, hi, step) = (lo as i128, hi as i128, step as i128);
    if step > 0 && hi > lo {
        (hi - lo + step - 1) / step
    } else if step < 0 && hi < lo {
        (lo - hi - step - 1) / -step
    } else {
        0
    }
}

/// Every name a block may rebind, nested blocks included.
pub(super) fn assigned_names(block: &Block, out: &mut BTreeSet<String>) {
    for stmt in &block.stmts {
        match &stmt.node {
            Stmt::Let { pattern, .. } | Stmt::Assign { target: pattern, .. } => {
                let names = match pattern {
                    Pattern::Name(n) => vec![n],
                    Pattern::Tuple(ns) => ns.iter().collect(),
                };
                out.extend(names.into_iter().map(|n| n.node.clone()));
            }
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                assigned_names(&then_block.node, out);
                if let Some(e) = else_block {
                    assigned_names(&e.node, out);
                }
            }
            Stmt::For { var, body, .. } => {
                out.insert(var.node.clone());
                assigned_names(&body.node, out);
            }
            Stmt::Return(_) | Stmt::Pass | Stmt::Expr(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_count() {
        assert_eq!(trip_count(0, 10, 1), 10);
        assert_eq!(trip_count(0, 10, 3), 4);
        assert_eq!(trip_count(10, 0, -3), 4);
        assert_eq!(trip_count(5, 5, 1), 0);
        assert_eq!(trip_count(5, 0, 1), 0);
    }

    #[test]
    fn test_const_bound() {
        assert_eq!(const_bound(&TraceValue::Const(ConstValue::Int(7))), Some(7));
        assert_eq!(const_bound(&TraceValue::Const(ConstValue::Float(7.0))), None);
        assert_eq!(const_bound(&TraceValue::Tensor(ValueId(0))), None);
    }
}
