//! Tracer: specializes one kernel for one signature and emits KIR.
//!
//! Compile-time values (bound constants, literals, dtype names, tuples)
//! are evaluated while tracing; everything else becomes block values in a
//! `KirBuilder`. Helpers are inlined at every call site, `if` on a
//! constant picks a branch, and loops over constant bounds are unrolled.
//! What remains is structural control flow over runtime scalars.

mod builtins;
mod control;
mod fold;
#[cfg(test)]
mod tests;
pub mod value;

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::ast::{self, BinOp, CallArg, Expr, FnDef, FnKind, Literal, Pattern, Stmt, UnaryOp};
use crate::diagnostic::Diagnostic;
use crate::jit::signature::{ArgKey, Signature};
use crate::kir::builder::{KirBuilder, SemResult, SemanticError};
use crate::kir::{CmpOp, Elem, KernelIr, Shape, Ty, ValueId};
use crate::kir::scalar;
use crate::span::{Span, Spanned};
use crate::types::{ArithOp, DType, UnaryKind};

pub(crate) use builtins::is_builtin;
pub use value::{ConstValue, TraceValue};

/// Helper calls nested deeper than this are rejected.
const MAX_INLINE_DEPTH: usize = 64;

type TraceResult<T> = Result<T, Diagnostic>;

type Vars = BTreeMap<String, TraceValue>;

enum Flow {
    Normal,
    Return(TraceValue),
}

/// Scope of one kernel or inlined helper body.
#[derive(Default)]
struct Frame {
    vars: Vars,
    /// Runtime `if`/`for` regions currently open in this body.
    runtime_depth: usize,
}

/// Attach a source location to a builder error.
fn at(span: Span) -> impl Fn(SemanticError) -> Diagnostic {
    move |e| {
        let d = Diagnostic::of_kind(e.kind, e.message, span);
        match e.help {
            Some(help) => d.with_help(help),
            None => d,
        }
    }
}

/// Trace kernel `name` of `file` for `sig`.
pub fn trace_kernel(file: &ast::File, name: &str, sig: &Signature) -> Result<KernelIr, Vec<Diagnostic>> {
    let def = match file.find(name) {
        Some(def) if def.kind == FnKind::Kernel => def,
        Some(def) => {
            return Err(vec![Diagnostic::name_error(
                format!("'{}' is a helper function, not a kernel", name),
                def.name.span,
            )
            .with_help(format!("declare it as `kernel {}(...)` to launch it", name))])
        }
        None => {
            return Err(vec![Diagnostic::name_error(
                format!("no kernel named '{}'", name),
                Span::dummy(),
            )])
        }
    };
    let mut tracer = Tracer {
        file,
        builder: KirBuilder::new(name),
        frames: vec![Frame::default()],
    };
    tracer.trace_entry(def, sig).map_err(|d| vec![d])?;
    let ir = tracer.builder.finish();
    debug!(
        "traced kernel '{}' for {}: {} instructions",
        name,
        sig,
        ir.inst_count()
    );
    trace!("{}", ir);
    Ok(ir)
}

/// Arguments of one call bound to parameter names.
struct Args {
    fname: String,
    names: Vec<String>,
    slots: Vec<Option<Spanned<TraceValue>>>,
    span: Span,
}

impl Args {
    fn get(&self, name: &str) -> Option<&Spanned<TraceValue>> {
        let i = self.names.iter().position(|n| n == name)?;
        self.slots[i].as_ref()
    }

    /// Like `get`, but an explicit `None` counts as absent.
    fn opt(&self, name: &str) -> Option<&Spanned<TraceValue>> {
        self.get(name).filter(|v| !v.node.is_none())
    }

    fn req(&self, name: &str) -> TraceResult<&Spanned<TraceValue>> {
        self.get(name).ok_or_else(|| {
            Diagnostic::type_error(
                format!("{}() missing required argument '{}'", self.fname, name),
                self.span,
            )
        })
    }
}

struct Tracer<'a> {
    file: &'a ast::File,
    builder: KirBuilder,
    frames: Vec<Frame>,
}

impl<'a> Tracer<'a> {
    // ─── Entry ────────────────────────────────────────────────────

    fn trace_entry(&mut self, def: &FnDef, sig: &Signature) -> TraceResult<()> {
        let runtime: Vec<&ast::Param> = def.runtime_params().collect();
        if sig.args.len() > runtime.len() {
            return Err(Diagnostic::value_error(
                format!(
                    "kernel '{}' takes {} runtime arguments but {} were given",
                    def.name.node,
                    runtime.len(),
                    sig.args.len()
                ),
                def.name.span,
            ));
        }
        for (i, p) in runtime.iter().enumerate() {
            let value = match (sig.args.get(i), &p.default) {
                (Some(key), _) => self.bind_arg(&p.name.node, *key),
                (None, Some(default)) => TraceValue::Const(self.const_default(default)?),
                (None, None) => {
                    return Err(Diagnostic::value_error(
                        format!("missing argument for parameter '{}'", p.name.node),
                        p.name.span,
                    ))
                }
            };
            self.declare(&p.name.node, value);
        }
        for name in sig.consts.keys() {
            if !def.const_params().any(|p| p.name.node == *name) {
                return Err(Diagnostic::name_error(
                    format!(
                        "kernel '{}' has no constant parameter '{}'",
                        def.name.node, name
                    ),
                    def.name.span,
                ));
            }
        }
        for p in def.const_params() {
            let value = match (sig.consts.get(&p.name.node), &p.default) {
                (Some(c), _) => c.clone(),
                (None, Some(default)) => self.const_default(default)?,
                (None, None) => {
                    return Err(Diagnostic::value_error(
                        format!("missing value for constant '{}'", p.name.node),
                        p.name.span,
                    )
                    .with_help(format!(
                        "bind it at launch, e.g. `{}=128`",
                        p.name.node
                    )))
                }
            };
            self.declare(&p.name.node, TraceValue::Const(value));
        }
        self.block(&def.body.node)?;
        Ok(())
    }

    fn bind_arg(&mut self, name: &str, key: ArgKey) -> TraceValue {
        let v = match key {
            ArgKey::Ptr { dtype, aligned16 } => self.builder.param(
                name,
                Ty::block(Elem::Ptr(dtype), Shape::scalar()),
                if aligned16 { 16 } else { 1 },
            ),
            ArgKey::Int { is_one: true, .. } => return TraceValue::Const(ConstValue::Int(1)),
            ArgKey::Int { dtype, div16, .. } => {
                self.builder
                    .param(name, Ty::scalar(dtype), if div16 { 16 } else { 1 })
            }
            ArgKey::Float { dtype } => self.builder.param(name, Ty::scalar(dtype), 1),
        };
        TraceValue::Tensor(v)
    }

    /// Evaluate a parameter default in an empty scope.
    fn const_default(&mut self, default: &Spanned<Expr>) -> TraceResult<ConstValue> {
        self.frames.push(Frame::default());
        let v = self.expr(default);
        self.frames.pop();
        match v? {
            TraceValue::Const(c) => Ok(c),
            other => Err(Diagnostic::value_error(
                format!(
                    "default value must be a compile-time constant, got a {}",
                    other.kind_name()
                ),
                default.span,
            )),
        }
    }

    // ─── Scopes ───────────────────────────────────────────────────

    fn frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn declare(&mut self, name: &str, value: TraceValue) {
        self.frame_mut().vars.insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str, span: Span) -> TraceResult<TraceValue> {
        if let Some(v) = self.frame().vars.get(name) {
            return Ok(v.clone());
        }
        if let Some(d) = DType::from_name(name) {
            return Ok(TraceValue::Const(ConstValue::dtype(d)));
        }
        if self.file.find(name).is_some() || is_builtin(name) {
            return Err(Diagnostic::type_error(
                format!("function '{}' cannot be used as a value", name),
                span,
            ));
        }
        Err(Diagnostic::name_error(
            format!("undefined variable '{}'", name),
            span,
        ))
    }

    fn bind(&mut self, pattern: &Pattern, value: TraceValue, span: Span, declare: bool) -> TraceResult<()> {
        match pattern {
            Pattern::Name(name) => self.bind_name(name, value, declare),
            Pattern::Tuple(names) => {
                let items = match value {
                    TraceValue::Tuple(items) => items,
                    other => {
                        return Err(Diagnostic::type_error(
                            format!("cannot unpack a {} into {} names", other.kind_name(), names.len()),
                            span,
                        ))
                    }
                };
                if items.len() != names.len() {
                    return Err(Diagnostic::value_error(
                        format!(
                            "cannot unpack a tuple of {} values into {} names",
                            items.len(),
                            names.len()
                        ),
                        span,
                    ));
                }
                for (name, item) in names.iter().zip(items) {
                    self.bind_name(name, item, declare)?;
                }
                Ok(())
            }
        }
    }

    fn bind_name(&mut self, name: &Spanned<String>, value: TraceValue, declare: bool) -> TraceResult<()> {
        if !declare && !self.frame().vars.contains_key(&name.node) {
            return Err(Diagnostic::name_error(
                format!("cannot assign to undefined variable '{}'", name.node),
                name.span,
            )
            .with_help(format!("declare it first with `let {} = ...`", name.node)));
        }
        self.declare(&name.node, value);
        Ok(())
    }

    // ─── Statements ───────────────────────────────────────────────

    fn block(&mut self, block: &ast::Block) -> TraceResult<Flow> {
        for stmt in &block.stmts {
            if let Flow::Return(v) = self.stmt(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, stmt: &Spanned<Stmt>) -> TraceResult<Flow> {
        match &stmt.node {
            Stmt::Let { pattern, init } => {
                let value = self.expr(init)?;
                self.bind(pattern, value, stmt.span, true)?;
            }
            Stmt::Assign {
                target,
                op: None,
                value,
            } => {
                let value = self.expr(value)?;
                self.bind(target, value, stmt.span, false)?;
            }
            Stmt::Assign {
                target,
                op: Some(op),
                value,
            } => {
                let name = match target {
                    Pattern::Name(name) => name,
                    Pattern::Tuple(_) => {
                        return Err(Diagnostic::type_error(
                            "augmented assignment needs a single name".to_string(),
                            stmt.span,
                        ))
                    }
                };
                let old = self.lookup(&name.node, name.span)?;
                let rhs = self.expr(value)?;
                let new = self.binary(*op, old, rhs, stmt.span)?;
                self.declare(&name.node, new);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => return self.if_stmt(cond, then_block, else_block.as_ref(), stmt.span),
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => return self.for_stmt(var, start, end, step.as_ref(), body, stmt.span),
            Stmt::Return(value) => {
                if self.frame().runtime_depth > 0 {
                    return Err(Diagnostic::value_error(
                        "`return` inside a runtime `if` or `for` is not supported".to_string(),
                        stmt.span,
                    )
                    .with_help(
                        "assign the result to a variable and return after the branch".to_string(),
                    ));
                }
                let value = match value {
                    Some(e) => self.expr(e)?,
                    None => TraceValue::none(),
                };
                if self.frames.len() == 1 && !value.is_none() {
                    return Err(Diagnostic::value_error(
                        "kernels cannot return a value".to_string(),
                        stmt.span,
                    )
                    .with_help("write results to memory with `store`".to_string()));
                }
                return Ok(Flow::Return(value));
            }
            Stmt::Pass => {}
            Stmt::Expr(e) => {
                self.expr(e)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ─── Expressions ──────────────────────────────────────────────

    fn expr(&mut self, e: &Spanned<Expr>) -> TraceResult<TraceValue> {
        let span = e.span;
        match &e.node {
            Expr::Literal(lit) => literal(lit, span),
            Expr::Var(name) => self.lookup(name, span),
            Expr::BinOp { op, lhs, rhs } if matches!(op, BinOp::And | BinOp::Or) => {
                let l = self.expr(lhs)?;
                if let TraceValue::Const(c) = &l {
                    let short = if *op == BinOp::And {
                        !c.truthy()
                    } else {
                        c.truthy()
                    };
                    return if short { Ok(l) } else { self.expr(rhs) };
                }
                let r = self.expr(rhs)?;
                self.binary(*op, l, r, span)
            }
            Expr::BinOp { op, lhs, rhs } => {
                let l = self.expr(lhs)?;
                let r = self.expr(rhs)?;
                self.binary(*op, l, r, span)
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.expr(operand)?;
                self.unary(*op, v, span)
            }
            Expr::Call { callee, args } => self.call(callee, args, span),
            Expr::Method {
                receiver,
                method,
                args,
            } => {
                let recv = self.expr(receiver)?;
                if method.node != "to" {
                    return Err(Diagnostic::name_error(
                        format!("unknown method '{}'", method.node),
                        method.span,
                    )
                    .with_help("blocks support `.to(dtype, bitcast=False)`".to_string()));
                }
                let a = self.bind_call("to", args, &["dtype", "bitcast"], span)?;
                self.convert(&recv, &a, span)
            }
            Expr::Attr { expr, attr } => {
                let v = self.expr(expr)?;
                self.attr(v, attr)
            }
            Expr::Index { expr, items } => {
                let v = self.expr(expr)?;
                let v = self.tensor(&v, expr.span)?;
                let items: Vec<_> = items.iter().map(|i| i.node).collect();
                let out = self.builder.index(v, &items).map_err(at(span))?;
                Ok(TraceValue::Tensor(out))
            }
            Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.expr(item)?);
                }
                Ok(TraceValue::Tuple(values))
            }
        }
    }

    fn binary(&mut self, op: BinOp, lhs: TraceValue, rhs: TraceValue, span: Span) -> TraceResult<TraceValue> {
        match (&lhs, &rhs) {
            (TraceValue::Const(a), TraceValue::Const(b)) => {
                return fold::binary(op, a, b).map(TraceValue::Const).map_err(at(span))
            }
            (TraceValue::Tuple(_), _) | (_, TraceValue::Tuple(_)) => {
                return Err(Diagnostic::type_error(
                    format!(
                        "unsupported operand types for {}: '{}' and '{}'",
                        op,
                        lhs.kind_name(),
                        rhs.kind_name()
                    ),
                    span,
                ))
            }
            _ => {}
        }
        let (a, b) = self.operands(&lhs, &rhs).map_err(at(span))?;
        let v = match lowered(op) {
            Lowered::Logical(op) => self.builder.logical(op, a, b),
            Lowered::Cmp(cmp) => self.builder.compare(cmp, a, b),
            Lowered::Arith(op) => self.builder.binary(op, a, b),
        }
        .map_err(at(span))?;
        Ok(TraceValue::Tensor(v))
    }

    fn unary(&mut self, op: UnaryOp, v: TraceValue, span: Span) -> TraceResult<TraceValue> {
        let id = match v {
            TraceValue::Const(c) => {
                return fold::unary(op, &c).map(TraceValue::Const).map_err(at(span))
            }
            TraceValue::Tensor(id) => id,
            TraceValue::Tuple(_) => {
                return Err(Diagnostic::type_error(
                    format!("bad operand type for unary {}: 'tuple'", op.as_str()),
                    span,
                ))
            }
        };
        let out = match op {
            UnaryOp::Neg => self.builder.unary(UnaryKind::Neg, id),
            UnaryOp::Invert => self.builder.unary(UnaryKind::Invert, id),
            UnaryOp::Not => self.builder.logical_not(id),
        }
        .map_err(at(span))?;
        Ok(TraceValue::Tensor(out))
    }

    fn attr(&mut self, v: TraceValue, attr: &Spanned<String>) -> TraceResult<TraceValue> {
        let out = match (attr.node.as_str(), &v) {
            ("dtype", TraceValue::Tensor(id)) => ConstValue::Type(self.builder.elem(*id)),
            ("dtype", TraceValue::Const(c)) if c.is_numeric() => {
                ConstValue::dtype(default_dtype(c).map_err(at(attr.span))?)
            }
            ("element_ty", TraceValue::Const(ConstValue::Type(Elem::Ptr(d)))) => {
                ConstValue::dtype(*d)
            }
            ("shape", TraceValue::Tensor(id)) => {
                let dims = self.builder.shape(*id).0;
                return Ok(TraceValue::Tuple(
                    dims.into_iter()
                        .map(|d| TraceValue::Const(ConstValue::Int(d as i64)))
                        .collect(),
                ));
            }
            _ => {
                return Err(Diagnostic::name_error(
                    format!("a {} has no attribute '{}'", v.kind_name(), attr.node),
                    attr.span,
                ))
            }
        };
        Ok(TraceValue::Const(out))
    }

    /// `x.to(dtype, bitcast=False)` and `cast(x, dtype, bitcast=False)`.
    fn convert(&mut self, value: &TraceValue, a: &Args, span: Span) -> TraceResult<TraceValue> {
        let dtype = self.dtype_arg(a.req("dtype")?)?;
        let bitcast = match a.opt("bitcast") {
            Some(b) => match &b.node {
                TraceValue::Const(c) => c.truthy(),
                other => {
                    return Err(Diagnostic::type_error(
                        format!("bitcast must be a compile-time bool, got a {}", other.kind_name()),
                        b.span,
                    ))
                }
            },
            None => false,
        };
        let v = self.tensor(value, span)?;
        let out = if bitcast {
            self.builder.bitcast(v, dtype)
        } else {
            self.builder.cast(v, dtype)
        }
        .map_err(at(span))?;
        Ok(TraceValue::Tensor(out))
    }

    // ─── Calls ────────────────────────────────────────────────────

    fn call(&mut self, callee: &Spanned<String>, args: &[CallArg], span: Span) -> TraceResult<TraceValue> {
        if let Some(def) = self.file.find(&callee.node) {
            return self.inline(def, args, span);
        }
        if is_builtin(&callee.node) {
            return self.builtin(&callee.node, args, span);
        }
        if callee.node == "range" {
            return Err(Diagnostic::type_error(
                "range() can only be used as the iterable of a `for` loop".to_string(),
                callee.span,
            ));
        }
        Err(Diagnostic::name_error(
            format!("unknown function '{}'", callee.node),
            callee.span,
        ))
    }

    /// Evaluate call arguments and match them to `params` by position and
    /// keyword.
    fn bind_call(&mut self, fname: &str, args: &[CallArg], params: &[&str], span: Span) -> TraceResult<Args> {
        let mut slots: Vec<Option<Spanned<TraceValue>>> = vec![None; params.len()];
        let mut positional = 0;
        for arg in args {
            let idx = match &arg.name {
                None => {
                    if positional >= params.len() {
                        return Err(Diagnostic::type_error(
                            format!(
                                "{}() takes at most {} arguments but more were given",
                                fname,
                                params.len()
                            ),
                            arg.value.span,
                        ));
                    }
                    positional += 1;
                    positional - 1
                }
                Some(kw) => params.iter().position(|p| *p == kw.node).ok_or_else(|| {
                    Diagnostic::name_error(
                        format!("{}() got an unexpected keyword argument '{}'", fname, kw.node),
                        kw.span,
                    )
                })?,
            };
            if slots[idx].is_some() {
                return Err(Diagnostic::type_error(
                    format!("{}() got multiple values for argument '{}'", fname, params[idx]),
                    arg.value.span,
                ));
            }
            let v = self.expr(&arg.value)?;
            slots[idx] = Some(Spanned::new(v, arg.value.span));
        }
        Ok(Args {
            fname: fname.to_string(),
            names: params.iter().map(|p| p.to_string()).collect(),
            slots,
            span,
        })
    }

    fn inline(&mut self, def: &FnDef, args: &[CallArg], span: Span) -> TraceResult<TraceValue> {
        if def.kind == FnKind::Kernel {
            return Err(Diagnostic::type_error(
                format!("kernel '{}' cannot be called from device code", def.name.node),
                span,
            )
            .with_help("move the shared code into a `fn` helper".to_string()));
        }
        if self.frames.len() > MAX_INLINE_DEPTH {
            return Err(Diagnostic::value_error(
                format!("helper calls nested more than {} deep", MAX_INLINE_DEPTH),
                span,
            ));
        }
        let names: Vec<&str> = def.params.iter().map(|p| p.name.node.as_str()).collect();
        let a = self.bind_call(&def.name.node, args, &names, span)?;
        let mut frame = Frame::default();
        for (p, slot) in def.params.iter().zip(a.slots) {
            let value = match (slot, &p.default) {
                (Some(v), _) => {
                    if p.is_const && !matches!(v.node, TraceValue::Const(_)) {
                        return Err(Diagnostic::value_error(
                            format!(
                                "argument for constant parameter '{}' must be a compile-time constant",
                                p.name.node
                            ),
                            v.span,
                        ));
                    }
                    v.node
                }
                (None, Some(default)) => TraceValue::Const(self.const_default(default)?),
                (None, None) => {
                    return Err(Diagnostic::type_error(
                        format!(
                            "{}() missing required argument '{}'",
                            def.name.node, p.name.node
                        ),
                        span,
                    ))
                }
            };
            frame.vars.insert(p.name.node.clone(), value);
        }
        self.frames.push(frame);
        let flow = self.block(&def.body.node);
        self.frames.pop();
        match flow? {
            Flow::Normal => Ok(TraceValue::none()),
            Flow::Return(v) => Ok(v),
        }
    }

    fn dtype_arg(&self, v: &Spanned<TraceValue>) -> TraceResult<DType> {
        match &v.node {
            TraceValue::Const(ConstValue::Type(Elem::Scalar(d))) => Ok(*d),
            other => Err(Diagnostic::type_error(
                format!("expected a scalar dtype, got a {}", other.kind_name()),
                v.span,
            )),
        }
    }

    // ─── Materialization ──────────────────────────────────────────

    /// Lower a compile-time constant next to a block of element `elem`.
    ///
    /// Literals are weakly typed: an int takes the block's integer dtype
    /// when it fits and the block's float dtype on float blocks; a float
    /// takes the block's float dtype, or `float32`.
    fn const_like(&mut self, c: &ConstValue, elem: Elem) -> SemResult<ValueId> {
        let target = match elem {
            Elem::Scalar(d) => d,
            Elem::Ptr(_) => return self.default_const(c),
        };
        match c {
            ConstValue::Int(v) if target.is_int() && fits(*v, target) => {
                Ok(self.builder.int_const(*v, target))
            }
            ConstValue::Int(v) if target.is_float() => {
                Ok(self.builder.float_const(*v as f64, target))
            }
            ConstValue::Float(x) if target.is_float() => Ok(self.builder.float_const(*x, target)),
            _ => self.default_const(c),
        }
    }

    /// Lower a constant at its default dtype.
    fn default_const(&mut self, c: &ConstValue) -> SemResult<ValueId> {
        let d = default_dtype(c)?;
        Ok(match c {
            ConstValue::Int(v) => self.builder.int_const(*v, d),
            ConstValue::Float(x) => self.builder.float_const(*x, d),
            ConstValue::Bool(b) => self.builder.constant(*b as u64, d),
            _ => return not_numeric(c),
        })
    }

    /// Lower `c` to exactly `ty` when the weak typing rules allow it;
    /// the caller checks the resulting type.
    fn const_as(&mut self, c: &ConstValue, ty: &Ty) -> SemResult<ValueId> {
        let v = self.const_like(c, ty.elem)?;
        self.builder.broadcast_to(v, &ty.shape)
    }

    fn tensor(&mut self, v: &TraceValue, span: Span) -> TraceResult<ValueId> {
        match v {
            TraceValue::Tensor(id) => Ok(*id),
            TraceValue::Const(c) => self.default_const(c).map_err(at(span)),
            TraceValue::Tuple(_) => Err(Diagnostic::type_error(
                "a tuple cannot be used as a block value".to_string(),
                span,
            )),
        }
    }

    /// Both operands of a binary op as block values, with weak typing
    /// applied to a constant side.
    fn operands(&mut self, lhs: &TraceValue, rhs: &TraceValue) -> SemResult<(ValueId, ValueId)> {
        match (lhs, rhs) {
            (TraceValue::Tensor(a), TraceValue::Tensor(b)) => Ok((*a, *b)),
            (TraceValue::Tensor(a), TraceValue::Const(c)) => {
                let elem = self.builder.elem(*a);
                Ok((*a, self.const_like(c, elem)?))
            }
            (TraceValue::Const(c), TraceValue::Tensor(b)) => {
                let elem = self.builder.elem(*b);
                Ok((self.const_like(c, elem)?, *b))
            }
            _ => Err(SemanticError::type_error(format!(
                "unsupported operands '{}' and '{}'",
                lhs.kind_name(),
                rhs.kind_name()
            ))),
        }
    }
}

fn literal(lit: &Literal, span: Span) -> TraceResult<TraceValue> {
    let c = match lit {
        Literal::Integer(v) => match i64::try_from(*v) {
            Ok(v) => ConstValue::Int(v),
            Err(_) => {
                return Err(Diagnostic::value_error(
                    format!("integer literal {} does not fit in 64 bits", v),
                    span,
                ))
            }
        },
        Literal::Float(x) => ConstValue::Float(*x),
        Literal::Bool(b) => ConstValue::Bool(*b),
        Literal::Str(s) => ConstValue::Str(s.clone()),
        Literal::None => ConstValue::None,
    };
    Ok(TraceValue::Const(c))
}

/// `int32` for ints that fit (else `int64`), `float32`, `bool`.
fn default_dtype(c: &ConstValue) -> SemResult<DType> {
    match c {
        ConstValue::Int(v) if fits(*v, DType::I32) => Ok(DType::I32),
        ConstValue::Int(_) => Ok(DType::I64),
        ConstValue::Float(_) => Ok(DType::F32),
        ConstValue::Bool(_) => Ok(DType::Bool),
        _ => not_numeric(c),
    }
}

fn not_numeric<T>(c: &ConstValue) -> SemResult<T> {
    Err(SemanticError::type_error(format!(
        "a '{}' value cannot be used in a block expression",
        c.type_name()
    )))
}

/// Whether `v` is representable in integer dtype `d`.
fn fits(v: i64, d: DType) -> bool {
    let v = v as i128;
    let bits = d.bits();
    if d.is_signed() {
        let half = 1i128 << (bits - 1);
        (-half..half).contains(&v)
    } else if d.is_unsigned() {
        (0..(1i128 << bits)).contains(&v)
    } else {
        false
    }
}

/// Bit pattern of constant `c` converted to `dtype` with device cast rules.
fn const_bits(c: &ConstValue, dtype: DType) -> SemResult<u64> {
    Ok(match c {
        ConstValue::Int(v) => scalar::cast(*v as u64, DType::I64, dtype),
        ConstValue::Float(x) => scalar::cast(x.to_bits(), DType::F64, dtype),
        ConstValue::Bool(b) => scalar::cast(*b as u64, DType::Bool, dtype),
        _ => return not_numeric(c),
    })
}

enum Lowered {
    Arith(ArithOp),
    Cmp(CmpOp),
    /// `and` / `or` over truthiness.
    Logical(ArithOp),
}

fn lowered(op: BinOp) -> Lowered {
    match op {
        BinOp::Add => Lowered::Arith(ArithOp::Add),
        BinOp::Sub => Lowered::Arith(ArithOp::Sub),
        BinOp::Mul => Lowered::Arith(ArithOp::Mul),
        BinOp::Div => Lowered::Arith(ArithOp::Div),
        BinOp::FloorDiv => Lowered::Arith(ArithOp::FloorDiv),
        BinOp::Mod => Lowered::Arith(ArithOp::Mod),
        BinOp::BitAnd => Lowered::Arith(ArithOp::And),
        BinOp::BitOr => Lowered::Arith(ArithOp::Or),
        BinOp::BitXor => Lowered::Arith(ArithOp::Xor),
        BinOp::Shl => Lowered::Arith(ArithOp::Shl),
        BinOp::Shr => Lowered::Arith(ArithOp::Shr),
        BinOp::Eq => Lowered::Cmp(CmpOp::Eq),
        BinOp::Ne => Lowered::Cmp(CmpOp::Ne),
        BinOp::Lt => Lowered::Cmp(CmpOp::Lt),
        BinOp::Le => Lowered::Cmp(CmpOp::Le),
        BinOp::Gt => Lowered::Cmp(CmpOp::Gt),
        BinOp::Ge => Lowered::Cmp(CmpOp::Ge),
        BinOp::And => Lowered::Logical(ArithOp::And),
        BinOp::Or => Lowered::Logical(ArithOp::Or),
    }
}
