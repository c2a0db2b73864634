//! KIR: the kernel IR of specialized tile programs.
//!
//! One `KernelIr` is the body of a single program instance, fully
//! specialized for one launch signature: every value has a static element
//! type and shape, every promotion is an explicit `Cast`, every shape
//! stretch an explicit `Broadcast`. Control flow is structural: `If` and
//! `For` carry nested regions that yield values back to the parent.
//!
//! Pipeline:
//! ```text
//! source → AST → trace (specialize) → KIR ─→ axis analysis → PTX text
//!                                          └→ interpreter (grid executor)
//! ```

pub mod axis;
pub mod builder;
pub mod lower;
pub mod scalar;
pub mod shape;

use std::fmt;

use crate::types::{ArithOp, AtomicKind, DType, UnaryKind};

pub use shape::Shape;

// ─── Values and types ─────────────────────────────────────────────

/// SSA value handle; indexes `KernelIr::types`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Element of a block: a scalar dtype or a pointer into global memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Elem {
    Scalar(DType),
    Ptr(DType),
}

impl Elem {
    /// Scalar dtype, or the pointee dtype for pointers.
    pub fn dtype(&self) -> DType {
        match self {
            Elem::Scalar(d) | Elem::Ptr(d) => *d,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Elem::Ptr(_))
    }

    /// Storage bytes of one lane (8 for pointers).
    pub fn size_bytes(&self) -> usize {
        match self {
            Elem::Scalar(d) => d.size_bytes(),
            Elem::Ptr(_) => 8,
        }
    }
}

impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elem::Scalar(d) => write!(f, "{}", d),
            Elem::Ptr(d) => write!(f, "ptr<{}>", d),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ty {
    pub elem: Elem,
    pub shape: Shape,
}

impl Ty {
    pub fn scalar(dtype: DType) -> Self {
        Self {
            elem: Elem::Scalar(dtype),
            shape: Shape::scalar(),
        }
    }

    pub fn block(elem: Elem, shape: Shape) -> Self {
        Self { elem, shape }
    }

    pub fn with_shape(&self, shape: Shape) -> Self {
        Self {
            elem: self.elem,
            shape,
        }
    }

    pub fn with_elem(&self, elem: Elem) -> Self {
        Self {
            elem,
            shape: self.shape.clone(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_scalar() {
            write!(f, "{}", self.elem)
        } else {
            let dims: Vec<String> = self.shape.0.iter().map(|d| d.to_string()).collect();
            write!(f, "{}[{}]", self.elem, dims.join("x"))
        }
    }
}

// ─── Operations ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MathFn {
    Exp,
    Log,
    Sin,
    Cos,
    Sqrt,
    Abs,
}

impl MathFn {
    pub fn name(&self) -> &'static str {
        match self {
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Sqrt => "sqrt",
            MathFn::Abs => "abs",
        }
    }

    pub fn from_name(name: &str) -> Option<MathFn> {
        match name {
            "exp" => Some(MathFn::Exp),
            "log" => Some(MathFn::Log),
            "sin" => Some(MathFn::Sin),
            "cos" => Some(MathFn::Cos),
            "sqrt" => Some(MathFn::Sqrt),
            "abs" => Some(MathFn::Abs),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }

    /// The elementwise combine step.
    pub fn combine(&self) -> ArithOp {
        match self {
            ReduceOp::Sum => ArithOp::Add,
            ReduceOp::Max => ArithOp::Max,
            ReduceOp::Min => ArithOp::Min,
        }
    }
}

/// Cache policy hint of a global load. Never changes loaded values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheModifier {
    #[default]
    None,
    /// `.ca`: cache at all levels.
    CacheAll,
    /// `.cg`: cache in L2 only.
    CacheGlobal,
}

impl CacheModifier {
    pub fn parse(s: &str) -> Option<CacheModifier> {
        match s {
            "" => Some(CacheModifier::None),
            ".ca" => Some(CacheModifier::CacheAll),
            ".cg" => Some(CacheModifier::CacheGlobal),
            _ => None,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            CacheModifier::None => "",
            CacheModifier::CacheAll => ".ca",
            CacheModifier::CacheGlobal => ".cg",
        }
    }
}

/// A single KIR operation. Result types live in `KernelIr::types`.
#[derive(Clone, Debug)]
pub enum Op {
    /// Runtime argument `index` (position among the non-constant params).
    Param { index: usize },
    /// Scalar constant; `bits` is the lane bit pattern of the result dtype.
    Const { bits: u64 },
    ProgramId { axis: u8 },
    NumPrograms { axis: u8 },
    /// `[start, start+1, ..., end-1]` as int32.
    Arange { start: i64, end: i64 },
    /// Scalar replicated to the result shape.
    Splat { value: ValueId },
    /// Size-1 dimensions stretched to the result shape (same rank).
    Broadcast { value: ValueId },
    /// Insert a size-1 axis at `axis`.
    ExpandDims { value: ValueId, axis: usize },
    Cast { value: ValueId, bitcast: bool },
    Unary { op: UnaryKind, value: ValueId },
    /// Both operands already share the result's compute dtype and shape.
    Binary {
        op: ArithOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Math { func: MathFn, value: ValueId },
    Select {
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
    /// Pointer plus an integer offset counted in pointee elements.
    PtrAdd { ptr: ValueId, offset: ValueId },
    Load {
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
        cache: CacheModifier,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    },
    /// Read-modify-write; the result is the prior memory value.
    Atomic {
        op: AtomicKind,
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    },
    Reduce {
        op: ReduceOp,
        value: ValueId,
        axis: usize,
    },
    /// (M,K)·(K,N) → (M,N) in the result dtype.
    Dot { a: ValueId, b: ValueId },
    /// Results are the yields of whichever region runs.
    If {
        cond: ValueId,
        then_region: Region,
        else_region: Region,
    },
    /// `body.args[0]` is the induction variable, the rest receive `init`
    /// on entry and the previous iteration's yields afterwards. Results
    /// are the final carried values.
    For {
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        init: Vec<ValueId>,
        body: Region,
    },
}

impl Op {
    /// Values read by this operation (not including nested regions).
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Param { .. }
            | Op::Const { .. }
            | Op::ProgramId { .. }
            | Op::NumPrograms { .. }
            | Op::Arange { .. } => Vec::new(),
            Op::Splat { value }
            | Op::Broadcast { value }
            | Op::ExpandDims { value, .. }
            | Op::Cast { value, .. }
            | Op::Unary { value, .. }
            | Op::Math { value, .. }
            | Op::Reduce { value, .. } => vec![*value],
            Op::Binary { lhs, rhs, .. } | Op::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            Op::PtrAdd { ptr, offset } => vec![*ptr, *offset],
            Op::Load {
                ptr, mask, other, ..
            } => {
                let mut v = vec![*ptr];
                v.extend(mask.iter().copied());
                v.extend(other.iter().copied());
                v
            }
            Op::Store { ptr, value, mask } | Op::Atomic {
                ptr, value, mask, ..
            } => {
                let mut v = vec![*ptr, *value];
                v.extend(mask.iter().copied());
                v
            }
            Op::Dot { a, b } => vec![*a, *b],
            Op::If { cond, .. } => vec![*cond],
            Op::For {
                lower,
                upper,
                step,
                init,
                ..
            } => {
                let mut v = vec![*lower, *upper, *step];
                v.extend(init.iter().copied());
                v
            }
        }
    }

    /// Whether the operation touches global memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, Op::Load { .. } | Op::Store { .. } | Op::Atomic { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Inst {
    pub results: Vec<ValueId>,
    pub op: Op,
}

/// A straight-line instruction list with block arguments and yields.
#[derive(Clone, Debug, Default)]
pub struct Region {
    pub args: Vec<ValueId>,
    pub insts: Vec<Inst>,
    pub yields: Vec<ValueId>,
}

impl Region {
    /// Visit every instruction, nested regions included, in program order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Inst)) {
        for inst in &self.insts {
            f(inst);
            match &inst.op {
                Op::If {
                    then_region,
                    else_region,
                    ..
                } => {
                    then_region.walk(f);
                    else_region.walk(f);
                }
                Op::For { body, .. } => body.walk(f),
                _ => {}
            }
        }
    }
}

/// A runtime parameter of the specialized kernel.
#[derive(Clone, Debug)]
pub struct IrParam {
    pub name: String,
    pub value: ValueId,
    pub ty: Ty,
    /// Known divisibility: address bytes for pointers, value for ints.
    pub divisibility: u64,
}

/// A kernel specialized for one signature.
#[derive(Clone, Debug)]
pub struct KernelIr {
    pub name: String,
    pub params: Vec<IrParam>,
    pub types: Vec<Ty>,
    pub body: Region,
}

impl KernelIr {
    pub fn ty(&self, v: ValueId) -> &Ty {
        &self.types[v.index()]
    }

    pub fn num_values(&self) -> usize {
        self.types.len()
    }

    pub fn walk<'a>(&'a self, mut f: impl FnMut(&'a Inst)) {
        self.body.walk(&mut f);
    }

    /// Number of instructions, nested regions included.
    pub fn inst_count(&self) -> usize {
        let mut n = 0;
        self.walk(|_| n += 1);
        n
    }
}

// ─── Display ──────────────────────────────────────────────────────

fn opt(v: &Option<ValueId>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "_".to_string())
}

fn list(vs: &[ValueId]) -> String {
    vs.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl KernelIr {
    fn fmt_region(&self, f: &mut fmt::Formatter<'_>, region: &Region, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for inst in &region.insts {
            self.fmt_inst(f, inst, depth)?;
        }
        if !region.yields.is_empty() {
            writeln!(f, "{}yield {}", pad, list(&region.yields))?;
        }
        Ok(())
    }

    fn fmt_inst(&self, f: &mut fmt::Formatter<'_>, inst: &Inst, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        write!(f, "{}", pad)?;
        if !inst.results.is_empty() {
            write!(f, "{} = ", list(&inst.results))?;
        }
        match &inst.op {
            Op::Param { index } => write!(f, "param {}", index)?,
            Op::Const { bits } => write!(f, "const {:#x}", bits)?,
            Op::ProgramId { axis } => write!(f, "program_id {}", axis)?,
            Op::NumPrograms { axis } => write!(f, "num_programs {}", axis)?,
            Op::Arange { start, end } => write!(f, "arange {}..{}", start, end)?,
            Op::Splat { value } => write!(f, "splat {}", value)?,
            Op::Broadcast { value } => write!(f, "broadcast {}", value)?,
            Op::ExpandDims { value, axis } => write!(f, "expand_dims {}, axis={}", value, axis)?,
            Op::Cast { value, bitcast } => {
                let name = if *bitcast { "bitcast" } else { "cast" };
                write!(f, "{} {}", name, value)?
            }
            Op::Unary { op, value } => {
                let name = match op {
                    UnaryKind::Neg => "neg",
                    UnaryKind::Invert => "not",
                };
                write!(f, "{} {}", name, value)?
            }
            Op::Binary { op, lhs, rhs } => write!(f, "{} {}, {}", arith_name(*op), lhs, rhs)?,
            Op::Cmp { op, lhs, rhs } => write!(f, "cmp.{} {}, {}", op.name(), lhs, rhs)?,
            Op::Math { func, value } => write!(f, "{} {}", func.name(), value)?,
            Op::Select {
                cond,
                on_true,
                on_false,
            } => write!(f, "select {}, {}, {}", cond, on_true, on_false)?,
            Op::PtrAdd { ptr, offset } => write!(f, "ptr_add {}, {}", ptr, offset)?,
            Op::Load {
                ptr,
                mask,
                other,
                cache,
            } => write!(
                f,
                "load{} {}, mask={}, other={}",
                cache.suffix(),
                ptr,
                opt(mask),
                opt(other)
            )?,
            Op::Store { ptr, value, mask } => {
                write!(f, "store {}, {}, mask={}", ptr, value, opt(mask))?
            }
            Op::Atomic {
                op,
                ptr,
                value,
                mask,
            } => write!(
                f,
                "atomic_{} {}, {}, mask={}",
                op.name(),
                ptr,
                value,
                opt(mask)
            )?,
            Op::Reduce { op, value, axis } => {
                write!(f, "reduce.{} {}, axis={}", op.name(), value, axis)?
            }
            Op::Dot { a, b } => write!(f, "dot {}, {}", a, b)?,
            Op::If {
                cond,
                then_region,
                else_region,
            } => {
                writeln!(f, "if {} {{", cond)?;
                self.fmt_region(f, then_region, depth + 1)?;
                writeln!(f, "{}}} else {{", pad)?;
                self.fmt_region(f, else_region, depth + 1)?;
                write!(f, "{}}}", pad)?;
            }
            Op::For {
                lower,
                upper,
                step,
                init,
                body,
            } => {
                let iv = body.args.first().map(|v| v.to_string()).unwrap_or_default();
                write!(f, "for {} in {}..{} step {}", iv, lower, upper, step)?;
                if !init.is_empty() {
                    let carried: Vec<String> = body.args[1..]
                        .iter()
                        .zip(init)
                        .map(|(a, i)| format!("{} = {}", a, i))
                        .collect();
                    write!(f, " iter({})", carried.join(", "))?;
                }
                writeln!(f, " {{")?;
                self.fmt_region(f, body, depth + 1)?;
                write!(f, "{}}}", pad)?;
            }
        }
        match inst.results.as_slice() {
            [] => {}
            [single] => write!(f, " : {}", self.ty(*single))?,
            many => {
                let tys: Vec<String> = many.iter().map(|v| self.ty(*v).to_string()).collect();
                write!(f, " : ({})", tys.join(", "))?
            }
        }
        writeln!(f)
    }
}

pub fn arith_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
        ArithOp::FloorDiv => "floordiv",
        ArithOp::Mod => "rem",
        ArithOp::And => "and",
        ArithOp::Or => "or",
        ArithOp::Xor => "xor",
        ArithOp::Shl => "shl",
        ArithOp::Shr => "shr",
        ArithOp::Max => "max",
        ArithOp::Min => "min",
    }
}

impl fmt::Display for KernelIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.value, p.ty))
            .collect();
        writeln!(f, "kernel {}({}) {{", self.name, params.join(", "))?;
        self.fmt_region(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}
