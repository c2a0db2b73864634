//! KirBuilder: typed construction of KIR.
//!
//! Every public constructor enforces the block typing rules: operand
//! dtypes are promoted and cast explicitly, shapes are broadcast with
//! explicit `Splat`/`ExpandDims`/`Broadcast` ops, and rule violations are
//! returned as `SemanticError`s (without spans; the tracer attaches the
//! source location).

use super::shape::{broadcast_shapes, can_broadcast_to, MAX_NUMEL};
use super::{
    CacheModifier, CmpOp, Elem, Inst, IrParam, KernelIr, MathFn, Op, ReduceOp, Region, Shape,
    Ty, ValueId,
};
use crate::ast::IndexItem;
use crate::diagnostic::ErrorKind;
use crate::kir::scalar;
use crate::types::{
    binary_typing, check_atomic, check_bitcast, compare_typing, float_math_typing, promote,
    unary_typing, ArithOp, AtomicKind, DType, TypeRuleError, UnaryKind,
};

/// A rejected construction, classified like a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    pub help: Option<String>,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            help: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn shape_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Shape, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl From<TypeRuleError> for SemanticError {
    fn from(e: TypeRuleError) -> Self {
        SemanticError::new(e.kind(), e.to_string())
    }
}

pub type SemResult<T> = Result<T, SemanticError>;

pub struct KirBuilder {
    name: String,
    types: Vec<Ty>,
    params: Vec<IrParam>,
    /// Innermost region last; index 0 is the kernel body.
    regions: Vec<Region>,
}

impl KirBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            params: Vec::new(),
            regions: vec![Region::default()],
        }
    }

    pub fn finish(mut self) -> KernelIr {
        let body = self.regions.swap_remove(0);
        KernelIr {
            name: self.name,
            params: self.params,
            types: self.types,
            body,
        }
    }

    pub fn ty(&self, v: ValueId) -> &Ty {
        &self.types[v.index()]
    }

    pub fn shape(&self, v: ValueId) -> Shape {
        self.ty(v).shape.clone()
    }

    pub fn elem(&self, v: ValueId) -> Elem {
        self.ty(v).elem
    }

    fn fresh(&mut self, ty: Ty) -> ValueId {
        let id = ValueId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    fn current(&mut self) -> &mut Region {
        let last = self.regions.len() - 1;
        &mut self.regions[last]
    }

    fn emit(&mut self, op: Op, ty: Ty) -> ValueId {
        let v = self.fresh(ty);
        self.current().insts.push(Inst {
            results: vec![v],
            op,
        });
        v
    }

    fn emit_void(&mut self, op: Op) {
        self.current().insts.push(Inst {
            results: Vec::new(),
            op,
        });
    }

    // ─── Leaves ───────────────────────────────────────────────────

    pub fn param(&mut self, name: &str, ty: Ty, divisibility: u64) -> ValueId {
        let index = self.params.len();
        let v = self.emit(Op::Param { index }, ty.clone());
        self.params.push(IrParam {
            name: name.to_string(),
            value: v,
            ty,
            divisibility,
        });
        v
    }

    pub fn constant(&mut self, bits: u64, dtype: DType) -> ValueId {
        let bits = bits & scalar::mask(dtype);
        self.emit(Op::Const { bits }, Ty::scalar(dtype))
    }

    pub fn int_const(&mut self, v: i64, dtype: DType) -> ValueId {
        self.constant(scalar::from_i128(v as i128, dtype), dtype)
    }

    pub fn float_const(&mut self, x: f64, dtype: DType) -> ValueId {
        self.constant(scalar::from_f64(x, dtype), dtype)
    }

    pub fn program_id(&mut self, axis: i64) -> SemResult<ValueId> {
        let axis = check_grid_axis(axis)?;
        Ok(self.emit(Op::ProgramId { axis }, Ty::scalar(DType::I32)))
    }

    pub fn num_programs(&mut self, axis: i64) -> SemResult<ValueId> {
        let axis = check_grid_axis(axis)?;
        Ok(self.emit(Op::NumPrograms { axis }, Ty::scalar(DType::I32)))
    }

    pub fn arange(&mut self, start: i64, end: i64) -> SemResult<ValueId> {
        if end <= start {
            return Err(SemanticError::value_error(format!(
                "arange end ({}) must be greater than start ({})",
                end, start
            )));
        }
        let len = (end - start) as u64;
        if !len.is_power_of_two() {
            return Err(SemanticError::value_error(format!(
                "arange length {} is not a power of two",
                len
            ))
            .with_help("block dimensions must be powers of two"));
        }
        if len as usize > MAX_NUMEL || start < i32::MIN as i64 || end > i32::MAX as i64 + 1 {
            return Err(SemanticError::value_error(format!(
                "arange({}, {}) exceeds the int32 block range",
                start, end
            )));
        }
        let ty = Ty::block(Elem::Scalar(DType::I32), Shape::new([len as usize]));
        Ok(self.emit(Op::Arange { start, end }, ty))
    }

    /// A block of `shape` filled with one scalar lane pattern.
    pub fn full(&mut self, shape: Shape, bits: u64, dtype: DType) -> SemResult<ValueId> {
        check_block_shape(&shape)?;
        let c = self.constant(bits, dtype);
        self.broadcast_to(c, &shape)
    }

    // ─── Shapes ───────────────────────────────────────────────────

    pub fn expand_dims(&mut self, v: ValueId, axis: usize) -> ValueId {
        let ty = self.ty(v).clone();
        let new_ty = ty.with_shape(ty.shape.insert_axis(axis));
        self.emit(Op::ExpandDims { value: v, axis }, new_ty)
    }

    /// Stretch `v` to exactly `shape`.
    pub fn broadcast_to(&mut self, v: ValueId, shape: &Shape) -> SemResult<ValueId> {
        let ty = self.ty(v).clone();
        if ty.shape == *shape {
            return Ok(v);
        }
        if !can_broadcast_to(&ty.shape, shape) {
            return Err(SemanticError::shape_error(format!(
                "cannot broadcast shape {} to {}",
                ty.shape, shape
            )));
        }
        if ty.shape.is_scalar() {
            return Ok(self.emit(Op::Splat { value: v }, ty.with_shape(shape.clone())));
        }
        let mut cur = v;
        while self.ty(cur).shape.rank() < shape.rank() {
            cur = self.expand_dims(cur, 0);
        }
        if self.ty(cur).shape == *shape {
            return Ok(cur);
        }
        Ok(self.emit(Op::Broadcast { value: cur }, ty.with_shape(shape.clone())))
    }

    /// Bring two values to their common broadcast shape.
    pub fn broadcast_pair(&mut self, a: ValueId, b: ValueId) -> SemResult<(ValueId, ValueId)> {
        let sa = self.shape(a);
        let sb = self.shape(b);
        if sa == sb {
            return Ok((a, b));
        }
        let target = broadcast_shapes(&sa, &sb).map_err(|msg| {
            SemanticError::shape_error(msg)
                .with_help("insert size-1 axes with `x[:, None]` or `x[None, :]`")
        })?;
        Ok((self.broadcast_to(a, &target)?, self.broadcast_to(b, &target)?))
    }

    /// `x[None, :]`-style indexing: `:` keeps an axis, `None` inserts one.
    pub fn index(&mut self, v: ValueId, items: &[IndexItem]) -> SemResult<ValueId> {
        let rank = self.shape(v).rank();
        let kept = items.iter().filter(|i| **i == IndexItem::Full).count();
        if kept != rank {
            return Err(SemanticError::shape_error(format!(
                "index has {} ':' entries but the block has rank {}",
                kept, rank
            ))
            .with_help("use one ':' per existing axis and `None` for each new axis"));
        }
        let mut cur = v;
        for (pos, item) in items.iter().enumerate() {
            if *item == IndexItem::NewAxis {
                cur = self.expand_dims(cur, pos);
            }
        }
        Ok(cur)
    }

    // ─── Elementwise ──────────────────────────────────────────────

    fn scalar_dtype(&self, v: ValueId, what: &str) -> SemResult<DType> {
        match self.elem(v) {
            Elem::Scalar(d) => Ok(d),
            Elem::Ptr(d) => Err(SemanticError::type_error(format!(
                "{} is not supported on pointer type ptr<{}>",
                what, d
            ))),
        }
    }

    /// Value-preserving conversion to `dtype` (no-op when already there).
    pub fn cast(&mut self, v: ValueId, dtype: DType) -> SemResult<ValueId> {
        let ty = self.ty(v).clone();
        match ty.elem {
            Elem::Scalar(d) if d == dtype => Ok(v),
            Elem::Scalar(_) => Ok(self.emit(
                Op::Cast {
                    value: v,
                    bitcast: false,
                },
                ty.with_elem(Elem::Scalar(dtype)),
            )),
            Elem::Ptr(d) => Err(SemanticError::type_error(format!(
                "cannot cast pointer ptr<{}> to {}",
                d, dtype
            ))),
        }
    }

    pub fn bitcast(&mut self, v: ValueId, dtype: DType) -> SemResult<ValueId> {
        let from = self.scalar_dtype(v, "bitcast")?;
        check_bitcast(from, dtype)?;
        if from == dtype {
            return Ok(v);
        }
        let ty = self.ty(v).with_elem(Elem::Scalar(dtype));
        Ok(self.emit(
            Op::Cast {
                value: v,
                bitcast: true,
            },
            ty,
        ))
    }

    pub fn binary(&mut self, op: ArithOp, a: ValueId, b: ValueId) -> SemResult<ValueId> {
        match (self.elem(a), self.elem(b)) {
            (Elem::Ptr(_), Elem::Scalar(_)) if matches!(op, ArithOp::Add | ArithOp::Sub) => {
                self.ptr_offset(op, a, b)
            }
            (Elem::Scalar(_), Elem::Ptr(_)) if op == ArithOp::Add => {
                self.ptr_offset(op, b, a)
            }
            (Elem::Ptr(_), _) | (_, Elem::Ptr(_)) => Err(SemanticError::type_error(format!(
                "operator '{}' is not supported between {} and {}",
                op.symbol(),
                self.ty(a),
                self.ty(b)
            ))),
            (Elem::Scalar(da), Elem::Scalar(db)) => {
                let typing = binary_typing(op, da, db)?;
                let (a, b) = self.broadcast_pair(a, b)?;
                let a = self.cast(a, typing.compute)?;
                let b = self.cast(b, typing.compute)?;
                let ty = Ty::block(Elem::Scalar(typing.result), self.shape(a));
                Ok(self.emit(Op::Binary { op, lhs: a, rhs: b }, ty))
            }
        }
    }

    fn ptr_offset(&mut self, op: ArithOp, ptr: ValueId, offset: ValueId) -> SemResult<ValueId> {
        let od = self.scalar_dtype(offset, "pointer offset")?;
        if !od.is_int() {
            return Err(SemanticError::type_error(format!(
                "pointer offset must be an integer, got {}",
                od
            )));
        }
        let offset = if op == ArithOp::Sub {
            self.unary(UnaryKind::Neg, offset)?
        } else {
            offset
        };
        let (ptr, offset) = self.broadcast_pair(ptr, offset)?;
        let ty = self.ty(ptr).clone();
        Ok(self.emit(Op::PtrAdd { ptr, offset }, ty))
    }

    pub fn compare(&mut self, op: CmpOp, a: ValueId, b: ValueId) -> SemResult<ValueId> {
        let da = self.scalar_dtype(a, "comparison")?;
        let db = self.scalar_dtype(b, "comparison")?;
        let typing = compare_typing(da, db);
        let (a, b) = self.broadcast_pair(a, b)?;
        let a = self.cast(a, typing.compute)?;
        let b = self.cast(b, typing.compute)?;
        let ty = Ty::block(Elem::Scalar(DType::Bool), self.shape(a));
        Ok(self.emit(Op::Cmp { op, lhs: a, rhs: b }, ty))
    }

    pub fn unary(&mut self, op: UnaryKind, v: ValueId) -> SemResult<ValueId> {
        let d = self.scalar_dtype(v, "unary operator")?;
        let out = unary_typing(op, d)?;
        let ty = self.ty(v).with_elem(Elem::Scalar(out));
        Ok(self.emit(Op::Unary { op, value: v }, ty))
    }

    /// `not x`: true where `x` is zero.
    pub fn logical_not(&mut self, v: ValueId) -> SemResult<ValueId> {
        let b = self.to_bool(v)?;
        self.unary(UnaryKind::Invert, b)
    }

    /// `x and y` / `x or y` on blocks, elementwise over truthiness.
    pub fn logical(&mut self, op: ArithOp, a: ValueId, b: ValueId) -> SemResult<ValueId> {
        let a = self.to_bool(a)?;
        let b = self.to_bool(b)?;
        self.binary(op, a, b)
    }

    pub fn to_bool(&mut self, v: ValueId) -> SemResult<ValueId> {
        self.scalar_dtype(v, "truth test")?;
        self.cast(v, DType::Bool)
    }

    pub fn math(&mut self, func: MathFn, v: ValueId) -> SemResult<ValueId> {
        let d = self.scalar_dtype(v, func.name())?;
        if func == MathFn::Abs {
            if d.is_bool() {
                return Err(SemanticError::type_error("abs is not supported on bool"));
            }
        } else {
            float_math_typing(func.name(), d)?;
        }
        let ty = self.ty(v).clone();
        Ok(self.emit(Op::Math { func, value: v }, ty))
    }

    /// `where(cond, a, b)`: all three broadcast together; `a` and `b`
    /// promote to a common dtype.
    pub fn select(&mut self, cond: ValueId, a: ValueId, b: ValueId) -> SemResult<ValueId> {
        let cond = self.to_bool(cond)?;
        let elem = match (self.elem(a), self.elem(b)) {
            (Elem::Scalar(da), Elem::Scalar(db)) => Elem::Scalar(promote(da, db)),
            (Elem::Ptr(pa), Elem::Ptr(pb)) if pa == pb => Elem::Ptr(pa),
            _ => {
                return Err(SemanticError::type_error(format!(
                    "where branches have incompatible types {} and {}",
                    self.ty(a),
                    self.ty(b)
                )))
            }
        };
        let (a, b) = if let Elem::Scalar(d) = elem {
            (self.cast(a, d)?, self.cast(b, d)?)
        } else {
            (a, b)
        };
        let (a, b) = self.broadcast_pair(a, b)?;
        let (cond, a) = self.broadcast_pair(cond, a)?;
        let b = self.broadcast_to(b, &self.shape(a))?;
        let ty = Ty::block(elem, self.shape(a));
        Ok(self.emit(
            Op::Select {
                cond,
                on_true: a,
                on_false: b,
            },
            ty,
        ))
    }

    // ─── Reductions and dot ───────────────────────────────────────

    pub fn reduce(&mut self, op: ReduceOp, v: ValueId, axis: i64) -> SemResult<ValueId> {
        let shape = self.shape(v);
        let d = self.scalar_dtype(v, op.name())?;
        if shape.is_scalar() {
            return Err(SemanticError::shape_error(format!(
                "cannot reduce a scalar with {}",
                op.name()
            )));
        }
        let rank = shape.rank() as i64;
        let norm = if axis < 0 { axis + rank } else { axis };
        if norm < 0 || norm >= rank {
            return Err(SemanticError::shape_error(format!(
                "reduction axis {} is out of range for a block of rank {}",
                axis, rank
            )));
        }
        let v = if d.is_bool() {
            self.cast(v, DType::I32)?
        } else {
            v
        };
        let axis = norm as usize;
        let ty = self.ty(v).with_shape(shape.remove_axis(axis));
        Ok(self.emit(Op::Reduce { op, value: v, axis }, ty))
    }

    pub fn dot(&mut self, a: ValueId, b: ValueId) -> SemResult<ValueId> {
        let sa = self.shape(a);
        let sb = self.shape(b);
        if sa.rank() != 2 || sb.rank() != 2 {
            return Err(SemanticError::shape_error(format!(
                "dot expects rank-2 operands, got {} and {}",
                sa, sb
            )));
        }
        if sa.0[1] != sb.0[0] {
            return Err(SemanticError::shape_error(format!(
                "dot inner dimensions differ: {} · {}",
                sa, sb
            ))
            .with_help("the operands must be (M, K) and (K, N)"));
        }
        let da = self.scalar_dtype(a, "dot")?;
        let db = self.scalar_dtype(b, "dot")?;
        if !da.is_float() || !db.is_float() {
            return Err(SemanticError::type_error(format!(
                "dot requires floating-point operands, got {} and {}",
                da, db
            )));
        }
        let operand = promote(da, db);
        let a = self.cast(a, operand)?;
        let b = self.cast(b, operand)?;
        let acc = if operand == DType::F64 {
            DType::F64
        } else {
            DType::F32
        };
        let ty = Ty::block(Elem::Scalar(acc), Shape::new([sa.0[0], sb.0[1]]));
        Ok(self.emit(Op::Dot { a, b }, ty))
    }

    // ─── Memory ───────────────────────────────────────────────────

    fn pointee(&self, ptr: ValueId, what: &str) -> SemResult<DType> {
        match self.elem(ptr) {
            Elem::Ptr(d) => Ok(d),
            Elem::Scalar(d) => Err(SemanticError::type_error(format!(
                "{} expects a pointer, got {}",
                what, d
            ))),
        }
    }

    fn prepare_mask(&mut self, mask: Option<ValueId>, shape: &Shape) -> SemResult<Option<ValueId>> {
        let Some(m) = mask else {
            return Ok(None);
        };
        match self.elem(m) {
            Elem::Scalar(DType::Bool) => {}
            other => {
                return Err(SemanticError::value_error(format!(
                    "mask must have bool element type, got {}",
                    other
                )))
            }
        }
        Ok(Some(self.broadcast_to(m, shape)?))
    }

    pub fn load(
        &mut self,
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
        cache: CacheModifier,
    ) -> SemResult<ValueId> {
        let pointee = self.pointee(ptr, "load")?;
        let shape = self.shape(ptr);
        if other.is_some() && mask.is_none() {
            return Err(SemanticError::value_error(
                "`other` cannot be provided without `mask`",
            ));
        }
        let mask = self.prepare_mask(mask, &shape)?;
        let other = match other {
            Some(o) => {
                let o = self.cast(o, pointee)?;
                Some(self.broadcast_to(o, &shape)?)
            }
            None => None,
        };
        let ty = Ty::block(Elem::Scalar(pointee), shape);
        Ok(self.emit(
            Op::Load {
                ptr,
                mask,
                other,
                cache,
            },
            ty,
        ))
    }

    fn prepare_value(&mut self, ptr: ValueId, value: ValueId, what: &str) -> SemResult<ValueId> {
        let pointee = self.pointee(ptr, what)?;
        let shape = self.shape(ptr);
        let vshape = self.shape(value);
        if shape.is_scalar() && !vshape.is_scalar() {
            return Err(SemanticError::shape_error(format!(
                "{} of a {} block through a scalar pointer",
                what, vshape
            )));
        }
        let value = self.cast(value, pointee)?;
        self.broadcast_to(value, &shape)
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) -> SemResult<()> {
        let value = self.prepare_value(ptr, value, "store")?;
        let shape = self.shape(ptr);
        let mask = self.prepare_mask(mask, &shape)?;
        self.emit_void(Op::Store { ptr, value, mask });
        Ok(())
    }

    pub fn atomic(
        &mut self,
        op: AtomicKind,
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    ) -> SemResult<ValueId> {
        let pointee = self.pointee(ptr, "atomic")?;
        check_atomic(op, pointee)?;
        let value = self.prepare_value(ptr, value, "atomic")?;
        let shape = self.shape(ptr);
        let mask = self.prepare_mask(mask, &shape)?;
        let ty = Ty::block(Elem::Scalar(pointee), shape);
        Ok(self.emit(
            Op::Atomic {
                op,
                ptr,
                value,
                mask,
            },
            ty,
        ))
    }

    // ─── Regions ──────────────────────────────────────────────────

    pub fn begin_region(&mut self) {
        self.regions.push(Region::default());
    }

    pub fn region_arg(&mut self, ty: Ty) -> ValueId {
        let v = self.fresh(ty);
        self.current().args.push(v);
        v
    }

    pub fn end_region(&mut self, yields: Vec<ValueId>) -> Region {
        let mut region = self.regions.pop().unwrap_or_default();
        region.yields = yields;
        region
    }

    pub fn emit_if(
        &mut self,
        cond: ValueId,
        then_region: Region,
        else_region: Region,
        result_tys: Vec<Ty>,
    ) -> Vec<ValueId> {
        let results: Vec<ValueId> = result_tys.into_iter().map(|t| self.fresh(t)).collect();
        self.current().insts.push(Inst {
            results: results.clone(),
            op: Op::If {
                cond,
                then_region,
                else_region,
            },
        });
        results
    }

    pub fn emit_for(
        &mut self,
        bounds: (ValueId, ValueId, ValueId),
        init: Vec<ValueId>,
        body: Region,
    ) -> Vec<ValueId> {
        let result_tys: Vec<Ty> = init.iter().map(|v| self.ty(*v).clone()).collect();
        let results: Vec<ValueId> = result_tys.into_iter().map(|t| self.fresh(t)).collect();
        let (lower, upper, step) = bounds;
        self.current().insts.push(Inst {
            results: results.clone(),
            op: Op::For {
                lower,
                upper,
                step,
                init,
                body,
            },
        });
        results
    }
}

fn check_grid_axis(axis: i64) -> SemResult<u8> {
    if (0..3).contains(&axis) {
        Ok(axis as u8)
    } else {
        Err(SemanticError::value_error(format!(
            "grid axis must be 0, 1 or 2, got {}",
            axis
        )))
    }
}

fn check_block_shape(shape: &Shape) -> SemResult<()> {
    for d in shape.dims() {
        if !d.is_power_of_two() {
            return Err(SemanticError::value_error(format!(
                "block dimension {} in shape {} is not a power of two",
                d, shape
            )));
        }
    }
    if shape.numel() > MAX_NUMEL {
        return Err(SemanticError::value_error(format!(
            "block of shape {} has {} elements, more than the limit of {}",
            shape,
            shape.numel(),
            MAX_NUMEL
        )));
    }
    Ok(())
}
