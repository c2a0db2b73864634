//! PTX text emitter.
//!
//! Every block value is distributed over `32 * num_warps` threads; each
//! thread owns `elems_per_thread` consecutive lanes held in scalar
//! registers. Global memory accesses are grouped into vectors whose width
//! comes from the axis analysis. Blocks smaller than the thread count are
//! replicated.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{elems_per_thread, vector_width, KernelLowering, LowerOptions};
use crate::kir::axis::AxisAnalysis;
use crate::kir::scalar;
use crate::kir::{CmpOp, Elem, Inst, KernelIr, MathFn, Op, ReduceOp, Region, ValueId};
use crate::types::{ArithOp, AtomicKind, DType, UnaryKind};

/// Lowers KIR to NVIDIA PTX assembly.
#[derive(Debug, Default)]
pub struct PtxLowering;

impl PtxLowering {
    pub fn new() -> Self {
        Self
    }
}

impl KernelLowering for PtxLowering {
    fn target_name(&self) -> &str {
        "ptx"
    }

    fn lower(&self, ir: &KernelIr, options: &LowerOptions) -> String {
        let analysis = AxisAnalysis::run(ir);
        let mut emitter = Emitter::new(ir, &analysis, options);
        emitter.region(&ir.body);
        emitter.finish()
    }
}

// ─── Register classes and type names ──────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum RegClass {
    Pred,
    Short,
    Half,
    Word,
    Float,
    Wide,
    Double,
}

impl RegClass {
    fn of(elem: Elem) -> Self {
        match elem {
            Elem::Ptr(_) => RegClass::Wide,
            Elem::Scalar(d) => match d {
                DType::Bool => RegClass::Pred,
                DType::I8 | DType::U8 | DType::I16 | DType::U16 => RegClass::Short,
                DType::F16 | DType::BF16 => RegClass::Half,
                DType::I32 | DType::U32 => RegClass::Word,
                DType::F32 => RegClass::Float,
                DType::I64 | DType::U64 => RegClass::Wide,
                DType::F64 => RegClass::Double,
            },
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            RegClass::Pred => "p",
            RegClass::Short => "rs",
            RegClass::Half => "h",
            RegClass::Word => "r",
            RegClass::Float => "f",
            RegClass::Wide => "rd",
            RegClass::Double => "fd",
        }
    }

    fn decl(self) -> &'static str {
        match self {
            RegClass::Pred => ".pred",
            RegClass::Short | RegClass::Half => ".b16",
            RegClass::Word => ".b32",
            RegClass::Float => ".f32",
            RegClass::Wide => ".b64",
            RegClass::Double => ".f64",
        }
    }

    /// Untyped move/select suffix.
    fn bits(self) -> &'static str {
        match self {
            RegClass::Pred => "pred",
            RegClass::Short | RegClass::Half => "b16",
            RegClass::Word | RegClass::Float => "b32",
            RegClass::Wide | RegClass::Double => "b64",
        }
    }
}

/// Arithmetic suffix; 8-bit integers compute in 16-bit registers.
fn arith_ty(d: DType) -> &'static str {
    match d {
        DType::Bool => "pred",
        DType::I8 | DType::I16 => "s16",
        DType::U8 | DType::U16 => "u16",
        DType::I32 => "s32",
        DType::U32 => "u32",
        DType::I64 => "s64",
        DType::U64 => "u64",
        DType::F16 => "f16",
        DType::BF16 => "bf16",
        DType::F32 => "f32",
        DType::F64 => "f64",
    }
}

/// Exact-width type for conversions and parameters.
fn exact_ty(d: DType) -> &'static str {
    match d {
        DType::Bool | DType::U8 => "u8",
        DType::I8 => "s8",
        _ => arith_ty(d),
    }
}

fn mem_ty(d: DType) -> &'static str {
    match d.size_bytes() {
        1 => "b8",
        2 => "b16",
        4 => "b32",
        _ => "b64",
    }
}

fn param_ty(elem: Elem) -> &'static str {
    match elem {
        Elem::Ptr(_) => "u64",
        Elem::Scalar(DType::F16) | Elem::Scalar(DType::BF16) => "b16",
        Elem::Scalar(d) => exact_ty(d),
    }
}

/// Immediate operand for a lane bit pattern.
fn imm(bits: u64, d: DType) -> String {
    match d {
        DType::F32 => format!("0f{:08X}", bits as u32),
        DType::F64 => format!("0d{:016X}", bits),
        DType::F16 | DType::BF16 => format!("0x{:04X}", bits as u16),
        DType::Bool => (bits & 1).to_string(),
        d if d.is_signed() => scalar::to_i128(bits, d).to_string(),
        _ => bits.to_string(),
    }
}

fn axis_reg(axis: u8) -> &'static str {
    match axis {
        0 => "x",
        1 => "y",
        _ => "z",
    }
}

fn vec_suffix(width: usize) -> String {
    if width > 1 {
        format!(".v{}", width)
    } else {
        String::new()
    }
}

fn reg_list(regs: &[String]) -> String {
    if regs.len() == 1 {
        regs[0].clone()
    } else {
        format!("{{{}}}", regs.join(", "))
    }
}

// ─── Emitter ──────────────────────────────────────────────────────

struct Emitter<'a> {
    ir: &'a KernelIr,
    analysis: &'a AxisAnalysis,
    options: &'a LowerOptions,
    threads: usize,
    regs: BTreeMap<ValueId, Vec<String>>,
    counts: BTreeMap<RegClass, usize>,
    lines: Vec<String>,
    labels: usize,
    smem_bytes: usize,
    tid: String,
}

impl<'a> Emitter<'a> {
    fn new(ir: &'a KernelIr, analysis: &'a AxisAnalysis, options: &'a LowerOptions) -> Self {
        let mut e = Self {
            ir,
            analysis,
            options,
            threads: options.threads(),
            regs: BTreeMap::new(),
            counts: BTreeMap::new(),
            lines: Vec::new(),
            labels: 0,
            smem_bytes: 0,
            tid: String::new(),
        };
        let tid = e.fresh(RegClass::Word);
        e.emit(format!("mov.u32 {}, %tid.x;", tid));
        e.tid = tid;
        e
    }

    fn fresh(&mut self, class: RegClass) -> String {
        let n = self.counts.entry(class).or_insert(0);
        *n += 1;
        format!("%{}{}", class.prefix(), n)
    }

    fn emit(&mut self, line: impl Into<String>) {
        self.lines.push(format!("\t{}", line.into()));
    }

    fn label(&mut self, name: &str) {
        self.lines.push(format!("{}:", name));
    }

    fn next_label(&mut self, kind: &str) -> String {
        self.labels += 1;
        format!("$L__{}_{}", kind, self.labels)
    }

    fn dtype(&self, v: ValueId) -> DType {
        self.ir.ty(v).elem.dtype()
    }

    fn class(&self, v: ValueId) -> RegClass {
        RegClass::of(self.ir.ty(v).elem)
    }

    fn lanes(&self, v: ValueId) -> usize {
        elems_per_thread(self.ir.ty(v).numel(), self.threads)
    }

    /// Allocate the registers holding `v`.
    fn define(&mut self, v: ValueId) -> Vec<String> {
        let class = self.class(v);
        let regs: Vec<String> = (0..self.lanes(v)).map(|_| self.fresh(class)).collect();
        self.regs.insert(v, regs.clone());
        regs
    }

    /// Register of lane `i` of `v`; replicated values wrap around.
    fn get(&self, v: ValueId, i: usize) -> String {
        match self.regs.get(&v) {
            Some(regs) if !regs.is_empty() => regs[i % regs.len()].clone(),
            _ => v.to_string(),
        }
    }

    fn reserve_shared(&mut self, bytes: usize) {
        self.smem_bytes = self.smem_bytes.max(bytes);
    }

    fn mov(&mut self, class: RegClass, dst: &str, src: &str) {
        self.emit(format!("mov.{} {}, {};", class.bits(), dst, src));
    }

    fn region(&mut self, region: &Region) {
        for inst in &region.insts {
            self.inst(inst);
        }
    }

    fn inst(&mut self, inst: &Inst) {
        let result = inst.results.first().copied();
        match (&inst.op, result) {
            (Op::If { cond, then_region, else_region }, _) => {
                self.lower_if(*cond, then_region, else_region, &inst.results)
            }
            (Op::For { lower, upper, step, init, body }, _) => {
                self.lower_for((*lower, *upper, *step), init, body, &inst.results)
            }
            (Op::Store { ptr, value, mask }, _) => self.lower_store(*ptr, *value, *mask),
            (op, Some(out)) => self.lower_value(op, out),
            (_, None) => {}
        }
    }

    fn lower_value(&mut self, op: &Op, out: ValueId) {
        match op {
            Op::Param { index } => self.lower_param(*index, out),
            Op::Const { bits } => {
                let d = self.dtype(out);
                let class = self.class(out);
                let regs = self.define(out);
                let value = imm(*bits, d);
                self.mov(class, &regs[0], &value);
            }
            Op::ProgramId { axis } => {
                let regs = self.define(out);
                self.emit(format!("mov.u32 {}, %ctaid.{};", regs[0], axis_reg(*axis)));
            }
            Op::NumPrograms { axis } => {
                let regs = self.define(out);
                self.emit(format!("mov.u32 {}, %nctaid.{};", regs[0], axis_reg(*axis)));
            }
            Op::Arange { start, .. } => {
                let regs = self.define(out);
                let n = regs.len();
                for (i, r) in regs.iter().enumerate() {
                    let line = format!("mad.lo.s32 {}, {}, {}, {};", r, self.tid, n, start + i as i64);
                    self.emit(line);
                }
            }
            Op::Splat { value } | Op::ExpandDims { value, .. } => {
                let class = self.class(out);
                let regs = self.define(out);
                for (i, r) in regs.iter().enumerate() {
                    let src = self.get(*value, i);
                    self.mov(class, r, &src);
                }
            }
            Op::Broadcast { value } => self.lower_broadcast(*value, out),
            Op::Cast { value, bitcast } => self.lower_cast(*value, *bitcast, out),
            Op::Unary { op, value } => self.lower_unary(*op, *value, out),
            Op::Binary { op, lhs, rhs } => {
                let d = self.dtype(out);
                let regs = self.define(out);
                for (i, r) in regs.iter().enumerate() {
                    let (a, b) = (self.get(*lhs, i), self.get(*rhs, i));
                    self.binary(*op, d, r, &a, &b);
                }
            }
            Op::Cmp { op, lhs, rhs } => {
                let d = self.dtype(*lhs);
                let regs = self.define(out);
                for (i, r) in regs.iter().enumerate() {
                    let (a, b) = (self.get(*lhs, i), self.get(*rhs, i));
                    self.compare(*op, d, r, &a, &b);
                }
            }
            Op::Math { func, value } => self.lower_math(*func, *value, out),
            Op::Select {
                cond,
                on_true,
                on_false,
            } => self.lower_select(*cond, *on_true, *on_false, out),
            Op::PtrAdd { ptr, offset } => self.lower_ptr_add(*ptr, *offset, out),
            Op::Load {
                ptr,
                mask,
                other,
                cache,
            } => self.lower_load(*ptr, *mask, *other, cache.suffix(), out),
            Op::Atomic {
                op,
                ptr,
                value,
                mask,
            } => self.lower_atomic(*op, *ptr, *value, *mask, out),
            Op::Reduce { op, value, .. } => self.lower_reduce(*op, *value, out),
            Op::Dot { a, b } => self.lower_dot(*a, *b, out),
            Op::Store { .. } | Op::If { .. } | Op::For { .. } => {}
        }
    }

    // ─── Leaves ───────────────────────────────────────────────────

    fn lower_param(&mut self, index: usize, out: ValueId) {
        let elem = self.ir.ty(out).elem;
        let name = format!("[{}_param_{}]", self.ir.name, index);
        let regs = self.define(out);
        if elem == Elem::Scalar(DType::Bool) {
            let tmp = self.fresh(RegClass::Short);
            self.emit(format!("ld.param.u8 {}, {};", tmp, name));
            self.emit(format!("setp.ne.u16 {}, {}, 0;", regs[0], tmp));
        } else {
            self.emit(format!("ld.param.{} {}, {};", param_ty(elem), regs[0], name));
        }
    }

    fn lower_broadcast(&mut self, value: ValueId, out: ValueId) {
        let class = self.class(out);
        let regs = self.define(out);
        if class == RegClass::Pred {
            for (i, r) in regs.iter().enumerate() {
                let src = self.get(value, i);
                self.mov(class, r, &src);
            }
            return;
        }
        // Layout conversion through shared memory.
        let d = self.dtype(out);
        let bytes = d.size_bytes();
        let src_lanes = self.lanes(value);
        self.reserve_shared(bytes * src_lanes.max(regs.len()));
        for j in 0..src_lanes {
            let src = self.get(value, j);
            self.emit(format!("st.shared.{} [smem+{}], {};", mem_ty(d), j * bytes, src));
        }
        self.emit("bar.sync 0;");
        for (i, r) in regs.iter().enumerate() {
            let off = (i % src_lanes) * bytes;
            self.emit(format!("ld.shared.{} {}, [smem+{}];", mem_ty(d), r, off));
        }
        self.emit("bar.sync 0;");
    }

    fn lower_cast(&mut self, value: ValueId, bitcast: bool, out: ValueId) {
        let from = self.dtype(value);
        let to = self.dtype(out);
        let class = self.class(out);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let src = self.get(value, i);
            let line = if bitcast || from == to {
                format!("mov.{} {}, {};", class.bits(), r, src)
            } else if to.is_bool() {
                let zero = imm(0, from);
                format!("setp.ne.{} {}, {}, {};", arith_ty(from), r, src, zero)
            } else if from.is_bool() {
                let one = imm(scalar::cast(1, DType::Bool, to), to);
                let zero = imm(0, to);
                format!("selp.{} {}, {}, {}, {};", class.bits(), r, one, zero, src)
            } else if from.is_float() && to.is_float() {
                let round = if to.bits() < from.bits() { ".rn" } else { "" };
                format!("cvt{}.{}.{} {}, {};", round, arith_ty(to), arith_ty(from), r, src)
            } else if to.is_float() {
                format!("cvt.rn.{}.{} {}, {};", arith_ty(to), exact_ty(from), r, src)
            } else if from.is_float() {
                format!("cvt.rzi.{}.{} {}, {};", exact_ty(to), arith_ty(from), r, src)
            } else {
                format!("cvt.{}.{} {}, {};", exact_ty(to), exact_ty(from), r, src)
            };
            self.emit(line);
        }
    }

    fn lower_unary(&mut self, op: UnaryKind, value: ValueId, out: ValueId) {
        let d = self.dtype(out);
        let class = self.class(out);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let src = self.get(value, i);
            let line = match op {
                UnaryKind::Neg if d.is_float() => format!("neg.{} {}, {};", arith_ty(d), r, src),
                UnaryKind::Neg => {
                    let ty = match class {
                        RegClass::Wide => "s64",
                        RegClass::Short => "s16",
                        _ => "s32",
                    };
                    format!("neg.{} {}, {};", ty, r, src)
                }
                UnaryKind::Invert => format!("not.{} {}, {};", class.bits(), r, src),
            };
            self.emit(line);
        }
    }

    // ─── Elementwise arithmetic ───────────────────────────────────

    fn binary(&mut self, op: ArithOp, d: DType, out: &str, a: &str, b: &str) {
        let ty = arith_ty(d);
        let bits = RegClass::of(Elem::Scalar(d)).bits();
        let line = match op {
            ArithOp::Add => format!("add.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Sub => format!("sub.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Mul if d.is_float() => format!("mul.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Mul => format!("mul.lo.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Div | ArithOp::FloorDiv if d.is_float() => {
                format!("div.rn.{} {}, {}, {};", ty, out, a, b)
            }
            ArithOp::Div | ArithOp::FloorDiv => format!("div.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Mod if d.is_float() => {
                // a - trunc(a / b) * b
                let class = RegClass::of(Elem::Scalar(d));
                let q = self.fresh(class);
                self.emit(format!("div.rn.{} {}, {}, {};", ty, q, a, b));
                self.emit(format!("cvt.rzi.{}.{} {}, {};", ty, ty, q, q));
                self.emit(format!("neg.{} {}, {};", ty, q, q));
                format!("fma.rn.{} {}, {}, {}, {};", ty, out, q, b, a)
            }
            ArithOp::Mod => format!("rem.{} {}, {}, {};", ty, out, a, b),
            ArithOp::And => format!("and.{} {}, {}, {};", bits, out, a, b),
            ArithOp::Or => format!("or.{} {}, {}, {};", bits, out, a, b),
            ArithOp::Xor => format!("xor.{} {}, {}, {};", bits, out, a, b),
            ArithOp::Shl => format!("shl.{} {}, {}, {};", bits, out, a, b),
            ArithOp::Shr => format!("shr.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Max => format!("max.{} {}, {}, {};", ty, out, a, b),
            ArithOp::Min => format!("min.{} {}, {}, {};", ty, out, a, b),
        };
        self.emit(line);
    }

    fn compare(&mut self, op: CmpOp, d: DType, out: &str, a: &str, b: &str) {
        if d.is_bool() {
            self.compare_pred(op, out, a, b);
            return;
        }
        // Ordered predicates are false on NaN; `neu` is true on NaN.
        let name = match op {
            CmpOp::Ne if d.is_float() => "neu",
            _ => op.name(),
        };
        self.emit(format!("setp.{}.{} {}, {}, {};", name, arith_ty(d), out, a, b));
    }

    fn compare_pred(&mut self, op: CmpOp, out: &str, a: &str, b: &str) {
        match op {
            CmpOp::Eq => {
                self.emit(format!("xor.pred {}, {}, {};", out, a, b));
                self.emit(format!("not.pred {}, {};", out, out));
            }
            CmpOp::Ne => self.emit(format!("xor.pred {}, {}, {};", out, a, b)),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
                let t = self.fresh(RegClass::Pred);
                let (neg, keep, combine) = match op {
                    CmpOp::Lt => (a, b, "and"),
                    CmpOp::Le => (a, b, "or"),
                    CmpOp::Gt => (b, a, "and"),
                    _ => (b, a, "or"),
                };
                self.emit(format!("not.pred {}, {};", t, neg));
                self.emit(format!("{}.pred {}, {}, {};", combine, out, t, keep));
            }
        }
    }

    fn lower_math(&mut self, func: MathFn, value: ValueId, out: ValueId) {
        let d = self.dtype(out);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let src = self.get(value, i);
            match d {
                DType::F32 => self.math_f32(func, r, &src),
                DType::F16 | DType::BF16 => {
                    let x = self.fresh(RegClass::Float);
                    let y = self.fresh(RegClass::Float);
                    self.emit(format!("cvt.f32.{} {}, {};", arith_ty(d), x, src));
                    self.math_f32(func, &y, &x);
                    self.emit(format!("cvt.rn.{}.f32 {}, {};", arith_ty(d), r, y));
                }
                DType::F64 => match func {
                    MathFn::Sqrt => self.emit(format!("sqrt.rn.f64 {}, {};", r, src)),
                    MathFn::Abs => self.emit(format!("abs.f64 {}, {};", r, src)),
                    _ => self.emit(format!("call.uni ({}), __nv_{}, ({});", r, func.name(), src)),
                },
                d if d.is_unsigned() => self.mov(RegClass::of(Elem::Scalar(d)), r, &src),
                d => {
                    let ty = match d.bits() {
                        64 => "s64",
                        32 => "s32",
                        _ => "s16",
                    };
                    self.emit(format!("abs.{} {}, {};", ty, r, src));
                }
            }
        }
    }

    fn math_f32(&mut self, func: MathFn, out: &str, src: &str) {
        match func {
            MathFn::Exp => {
                let t = self.fresh(RegClass::Float);
                self.emit(format!("mul.f32 {}, {}, 0f3FB8AA3B;", t, src));
                self.emit(format!("ex2.approx.f32 {}, {};", out, t));
            }
            MathFn::Log => {
                let t = self.fresh(RegClass::Float);
                self.emit(format!("lg2.approx.f32 {}, {};", t, src));
                self.emit(format!("mul.f32 {}, {}, 0f3F317218;", out, t));
            }
            MathFn::Sin => self.emit(format!("sin.approx.f32 {}, {};", out, src)),
            MathFn::Cos => self.emit(format!("cos.approx.f32 {}, {};", out, src)),
            MathFn::Sqrt => self.emit(format!("sqrt.rn.f32 {}, {};", out, src)),
            MathFn::Abs => self.emit(format!("abs.f32 {}, {};", out, src)),
        }
    }

    fn lower_select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId, out: ValueId) {
        let class = self.class(out);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let (c, a, b) = (
                self.get(cond, i),
                self.get(on_true, i),
                self.get(on_false, i),
            );
            if class == RegClass::Pred {
                let t = self.fresh(RegClass::Pred);
                let u = self.fresh(RegClass::Pred);
                self.emit(format!("and.pred {}, {}, {};", t, c, a));
                self.emit(format!("not.pred {}, {};", u, c));
                self.emit(format!("and.pred {}, {}, {};", u, u, b));
                self.emit(format!("or.pred {}, {}, {};", r, t, u));
            } else {
                self.emit(format!("selp.{} {}, {}, {}, {};", class.bits(), r, a, b, c));
            }
        }
    }

    fn lower_ptr_add(&mut self, ptr: ValueId, offset: ValueId, out: ValueId) {
        let elem_bytes = self.dtype(out).size_bytes();
        let od = self.dtype(offset);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let (p, o) = (self.get(ptr, i), self.get(offset, i));
            if od.bits() == 64 {
                self.emit(format!("mad.lo.s64 {}, {}, {}, {};", r, o, elem_bytes, p));
                continue;
            }
            let signed = if od.is_signed() { "s" } else { "u" };
            let word = if od.bits() < 32 {
                let w = self.fresh(RegClass::Word);
                self.emit(format!("cvt.{}32.{} {}, {};", signed, exact_ty(od), w, o));
                w
            } else {
                o
            };
            let t = self.fresh(RegClass::Wide);
            self.emit(format!("mul.wide.{}32 {}, {}, {};", signed, t, word, elem_bytes));
            self.emit(format!("add.s64 {}, {}, {};", r, p, t));
        }
    }

    // ─── Memory ───────────────────────────────────────────────────

    /// Data registers for `width` lanes of `d`, packing sub-word lanes into
    /// 32-bit words when the vector spans at least one word.
    fn packed(&self, d: DType, width: usize) -> Option<usize> {
        let bytes = d.size_bytes();
        (bytes < 4 && width * bytes >= 4).then(|| width * bytes / 4)
    }

    fn pack(&mut self, d: DType, lanes: &[String]) -> Vec<String> {
        let per_word = 4 / d.size_bytes();
        let mut words = Vec::new();
        for chunk in lanes.chunks(per_word) {
            let w = self.fresh(RegClass::Word);
            if per_word == 2 {
                self.emit(format!("mov.b32 {}, {};", w, reg_list(chunk)));
            } else {
                self.emit(format!("mov.b32 {}, 0;", w));
                for (k, lane) in chunk.iter().enumerate() {
                    let x = self.fresh(RegClass::Word);
                    self.emit(format!("cvt.u32.u16 {}, {};", x, lane));
                    self.emit(format!("bfi.b32 {}, {}, {}, {}, 8;", w, x, w, 8 * k));
                }
            }
            words.push(w);
        }
        words
    }

    fn unpack(&mut self, d: DType, words: &[String], lanes: &[String]) {
        let per_word = 4 / d.size_bytes();
        for (w, chunk) in words.iter().zip(lanes.chunks(per_word)) {
            if per_word == 2 {
                self.emit(format!("mov.b32 {}, {};", reg_list(chunk), w));
            } else {
                for (k, lane) in chunk.iter().enumerate() {
                    let x = self.fresh(RegClass::Word);
                    self.emit(format!("bfe.u32 {}, {}, {}, 8;", x, w, 8 * k));
                    self.emit(format!("cvt.u16.u32 {}, {};", lane, x));
                }
            }
        }
    }

    fn lower_load(
        &mut self,
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
        cache: &str,
        out: ValueId,
    ) {
        let d = self.dtype(out);
        let width = vector_width(self.ir, self.analysis, ptr, mask, self.threads);
        let regs = self.define(out);
        for start in (0..regs.len()).step_by(width) {
            let end = (start + width).min(regs.len());
            let lanes: Vec<String> = if d.is_bool() {
                (start..end).map(|_| self.fresh(RegClass::Short)).collect()
            } else {
                regs[start..end].to_vec()
            };
            if let Some(o) = other {
                for (k, lane) in lanes.iter().enumerate() {
                    let src = self.get(o, start + k);
                    if d.is_bool() {
                        self.emit(format!("selp.u16 {}, 1, 0, {};", lane, src));
                    } else {
                        self.mov(RegClass::of(Elem::Scalar(d)), lane, &src);
                    }
                }
            }
            let pred = mask
                .map(|m| format!("@{} ", self.get(m, start)))
                .unwrap_or_default();
            let addr = self.get(ptr, start);
            match self.packed(d, lanes.len()) {
                Some(n) => {
                    let words = if other.is_some() {
                        self.pack(d, &lanes)
                    } else {
                        (0..n).map(|_| self.fresh(RegClass::Word)).collect()
                    };
                    self.emit(format!(
                        "{}ld.global{}{}.b32 {}, [{}];",
                        pred,
                        cache,
                        vec_suffix(n),
                        reg_list(&words),
                        addr
                    ));
                    self.unpack(d, &words, &lanes);
                }
                None => self.emit(format!(
                    "{}ld.global{}{}.{} {}, [{}];",
                    pred,
                    cache,
                    vec_suffix(lanes.len()),
                    mem_ty(d),
                    reg_list(&lanes),
                    addr
                )),
            }
            if d.is_bool() {
                for (k, lane) in lanes.iter().enumerate() {
                    self.emit(format!("setp.ne.u16 {}, {}, 0;", regs[start + k], lane));
                }
            }
        }
    }

    fn lower_store(&mut self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) {
        let d = self.dtype(value);
        let width = vector_width(self.ir, self.analysis, ptr, mask, self.threads);
        let count = self.lanes(ptr);
        for start in (0..count).step_by(width) {
            let end = (start + width).min(count);
            let mut lanes = Vec::new();
            for i in start..end {
                let src = self.get(value, i);
                if d.is_bool() {
                    let t = self.fresh(RegClass::Short);
                    self.emit(format!("selp.u16 {}, 1, 0, {};", t, src));
                    lanes.push(t);
                } else {
                    lanes.push(src);
                }
            }
            let pred = mask
                .map(|m| format!("@{} ", self.get(m, start)))
                .unwrap_or_default();
            let addr = self.get(ptr, start);
            let (data, suffix, ty) = match self.packed(d, lanes.len()) {
                Some(n) => (self.pack(d, &lanes), vec_suffix(n), "b32"),
                None => (lanes.clone(), vec_suffix(lanes.len()), mem_ty(d)),
            };
            self.emit(format!(
                "{}st.global{}.{} [{}], {};",
                pred,
                suffix,
                ty,
                addr,
                reg_list(&data)
            ));
        }
    }

    fn lower_atomic(
        &mut self,
        op: AtomicKind,
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
        out: ValueId,
    ) {
        let d = self.dtype(out);
        let regs = self.define(out);
        for (i, r) in regs.iter().enumerate() {
            let (addr, val) = (self.get(ptr, i), self.get(value, i));
            let pred = mask.map(|m| self.get(m, i));
            let guard = pred.as_ref().map(|p| format!("@{} ", p)).unwrap_or_default();
            if d.is_float() && op != AtomicKind::Add {
                self.float_minmax_atomic(op, d, r, &addr, &val, pred.as_deref());
                continue;
            }
            let ty = match (op, d) {
                (AtomicKind::Add, DType::F16) => "noftz.f16".to_string(),
                (AtomicKind::Add, DType::I32) => "u32".to_string(),
                (AtomicKind::Add, DType::I64) => "u64".to_string(),
                _ => arith_ty(d).to_string(),
            };
            self.emit(format!(
                "{}atom.global.{}.{} {}, [{}], {};",
                guard,
                op.name(),
                ty,
                r,
                addr,
                val
            ));
        }
    }

    /// Float max/min as integer atomics: non-negative values order like
    /// signed ints, negative values order inversely as unsigned ints.
    fn float_minmax_atomic(
        &mut self,
        op: AtomicKind,
        d: DType,
        out: &str,
        addr: &str,
        val: &str,
        mask: Option<&str>,
    ) {
        let (int_class, bits) = if d == DType::F64 {
            (RegClass::Wide, 64)
        } else {
            (RegClass::Word, 32)
        };
        let as_int = self.fresh(int_class);
        let old = self.fresh(int_class);
        let pos = self.fresh(RegClass::Pred);
        let neg = self.fresh(RegClass::Pred);
        self.emit(format!("mov.b{} {}, {};", bits, as_int, val));
        self.emit(format!("setp.ge.s{} {}, {}, 0;", bits, pos, as_int));
        self.emit(format!("not.pred {}, {};", neg, pos));
        if let Some(m) = mask {
            self.emit(format!("and.pred {}, {}, {};", pos, pos, m));
            self.emit(format!("and.pred {}, {}, {};", neg, neg, m));
        }
        let (on_pos, on_neg) = match op {
            AtomicKind::Max => ("max", "min"),
            _ => ("min", "max"),
        };
        self.emit(format!(
            "@{} atom.global.{}.s{} {}, [{}], {};",
            pos, on_pos, bits, old, addr, as_int
        ));
        self.emit(format!(
            "@{} atom.global.{}.u{} {}, [{}], {};",
            neg, on_neg, bits, old, addr, as_int
        ));
        self.emit(format!("mov.b{} {}, {};", bits, out, old));
    }

    // ─── Reductions and dot ───────────────────────────────────────

    fn lower_reduce(&mut self, op: ReduceOp, value: ValueId, out: ValueId) {
        let d = self.dtype(out);
        let class = self.class(out);
        let combine = op.combine();
        let src_lanes = self.lanes(value);
        let regs = self.define(out);
        let group = (src_lanes / regs.len()).max(1);

        for (i, acc) in regs.iter().enumerate() {
            let first = self.get(value, i * group);
            self.mov(class, acc, &first);
            for j in 1..group {
                let x = self.get(value, i * group + j);
                self.binary(combine, d, acc, acc, &x);
            }
            let mut offset = 16;
            while offset >= 1 {
                let t = self.fresh(class);
                self.shuffle(class, &t, acc, offset);
                self.binary(combine, d, acc, acc, &t);
                offset /= 2;
            }
        }

        let warps = self.options.num_warps as usize;
        if warps > 1 {
            let bytes = d.size_bytes().max(4);
            self.reserve_shared(warps * bytes * regs.len());
            for (i, acc) in regs.iter().enumerate() {
                self.emit(format!(
                    "st.shared.{} [smem+{}], {};",
                    mem_ty(d),
                    i * warps * bytes,
                    acc
                ));
            }
            self.emit("bar.sync 0;");
            for (i, acc) in regs.iter().enumerate() {
                for w in 1..warps {
                    let t = self.fresh(class);
                    let off = (i * warps + w) * bytes;
                    self.emit(format!("ld.shared.{} {}, [smem+{}];", mem_ty(d), t, off));
                    self.binary(combine, d, acc, acc, &t);
                }
            }
            self.emit("bar.sync 0;");
        }
    }

    fn shuffle(&mut self, class: RegClass, dst: &str, src: &str, offset: u32) {
        match class {
            RegClass::Wide | RegClass::Double => {
                let (lo, hi) = (self.fresh(RegClass::Word), self.fresh(RegClass::Word));
                self.emit(format!("mov.b64 {{{}, {}}}, {};", lo, hi, src));
                for half in [&lo, &hi] {
                    self.emit(format!(
                        "shfl.sync.bfly.b32 {}, {}, {}, 31, -1;",
                        half, half, offset
                    ));
                }
                self.emit(format!("mov.b64 {}, {{{}, {}}};", dst, lo, hi));
            }
            RegClass::Short | RegClass::Half => {
                let w = self.fresh(RegClass::Word);
                self.emit(format!("cvt.u32.u16 {}, {};", w, src));
                self.emit(format!("shfl.sync.bfly.b32 {}, {}, {}, 31, -1;", w, w, offset));
                self.emit(format!("cvt.u16.u32 {}, {};", dst, w));
            }
            _ => self.emit(format!(
                "shfl.sync.bfly.b32 {}, {}, {}, 31, -1;",
                dst, src, offset
            )),
        }
    }

    fn lower_dot(&mut self, a: ValueId, b: ValueId, out: ValueId) {
        let operand = self.dtype(a);
        let acc_ty = self.dtype(out);
        let (m, k) = (self.ir.ty(a).shape.0[0], self.ir.ty(a).shape.0[1]);
        let n = self.ir.ty(b).shape.0[1];
        let regs = self.define(out);
        let acc_class = self.class(out);
        for r in &regs {
            let zero = imm(0, acc_ty);
            self.mov(acc_class, r, &zero);
        }

        // Stage both operands through shared memory.
        let bytes = operand.size_bytes();
        self.reserve_shared((m * k + k * n) * bytes);
        for (v, base) in [(a, 0), (b, m * k * bytes)] {
            for j in 0..self.lanes(v) {
                let src = self.get(v, j);
                let off = base + j * bytes;
                self.emit(format!("st.shared.{} [smem+{}], {};", mem_ty(operand), off, src));
            }
        }
        self.emit("bar.sync 0;");

        let mma = match operand {
            DType::F16 | DType::BF16 if m >= 16 && n >= 8 && k >= 16 => Some((16, 8, 16)),
            DType::F32 if m >= 16 && n >= 8 && k >= 8 => Some((16, 8, 8)),
            _ => None,
        };
        let counter = self.fresh(RegClass::Word);
        let p = self.fresh(RegClass::Pred);
        let top = self.next_label("dot");
        self.emit(format!("mov.u32 {}, 0;", counter));
        self.label(&top);
        let k_steps = match mma {
            Some((tm, tn, tk)) => {
                let tiles = ((m / tm) * (n / tn)).div_ceil(self.options.num_warps as usize);
                self.mma_step(operand, (tm, tn, tk), tiles, &regs);
                k / tk
            }
            None => {
                let (x, y) = (self.fresh(acc_class), self.fresh(acc_class));
                self.emit(format!("ld.shared.{} {}, [smem+0];", mem_ty(acc_ty), x));
                self.emit(format!(
                    "ld.shared.{} {}, [smem+{}];",
                    mem_ty(acc_ty),
                    y,
                    m * k * bytes
                ));
                for r in &regs {
                    self.emit(format!(
                        "fma.rn.{} {}, {}, {}, {};",
                        arith_ty(acc_ty),
                        r,
                        x,
                        y,
                        r
                    ));
                }
                k
            }
        };
        self.emit(format!("add.s32 {}, {}, 1;", counter, counter));
        self.emit(format!("setp.lt.s32 {}, {}, {};", p, counter, k_steps));
        self.emit(format!("@{} bra {};", p, top));
        self.emit("bar.sync 0;");
    }

    fn mma_step(&mut self, operand: DType, tile: (usize, usize, usize), tiles: usize, acc: &[String]) {
        let (tm, tn, tk) = tile;
        let frag_a: Vec<String> = (0..4).map(|_| self.fresh(RegClass::Word)).collect();
        let frag_b: Vec<String> = (0..2).map(|_| self.fresh(RegClass::Word)).collect();
        let kind = if operand == DType::F32 {
            self.emit(format!("ld.shared.v4.b32 {}, [smem+0];", reg_list(&frag_a)));
            self.emit(format!("ld.shared.v2.b32 {}, [smem+16];", reg_list(&frag_b)));
            for r in frag_a.iter().chain(&frag_b) {
                self.emit(format!("cvt.rna.tf32.f32 {}, {};", r, r));
            }
            "tf32".to_string()
        } else {
            self.emit(format!(
                "ldmatrix.sync.aligned.m8n8.x4.shared.b16 {}, [smem+0];",
                reg_list(&frag_a)
            ));
            self.emit(format!(
                "ldmatrix.sync.aligned.m8n8.x2.trans.shared.b16 {}, [smem+0];",
                reg_list(&frag_b)
            ));
            arith_ty(operand).to_string()
        };
        for t in 0..tiles {
            let c: Vec<String> = (0..4).map(|j| acc[(t * 4 + j) % acc.len()].clone()).collect();
            self.emit(format!(
                "mma.sync.aligned.m{}n{}k{}.row.col.f32.{}.{}.f32 {}, {}, {}, {};",
                tm,
                tn,
                tk,
                kind,
                kind,
                reg_list(&c),
                reg_list(&frag_a),
                reg_list(&frag_b),
                reg_list(&c)
            ));
        }
    }

    // ─── Control flow ─────────────────────────────────────────────

    /// Copy `srcs` into the registers of `dsts` as one parallel move.
    fn copy_values(&mut self, dsts: &[Vec<String>], classes: &[RegClass], srcs: &[ValueId]) {
        let mut staged = Vec::new();
        for ((dst, class), src) in dsts.iter().zip(classes).zip(srcs) {
            for i in 0..dst.len() {
                let t = self.fresh(*class);
                let s = self.get(*src, i);
                self.mov(*class, &t, &s);
                staged.push((*class, t));
            }
        }
        let mut it = staged.into_iter();
        for dst in dsts {
            for d in dst {
                if let Some((class, t)) = it.next() {
                    self.mov(class, d, &t);
                }
            }
        }
    }

    fn lower_if(&mut self, cond: ValueId, then_region: &Region, else_region: &Region, results: &[ValueId]) {
        let dsts: Vec<Vec<String>> = results.iter().map(|r| self.define(*r)).collect();
        let classes: Vec<RegClass> = results.iter().map(|r| self.class(*r)).collect();
        let c = self.get(cond, 0);
        let else_label = self.next_label("else");
        let end_label = self.next_label("endif");
        self.emit(format!("@!{} bra {};", c, else_label));
        self.region(then_region);
        self.copy_values(&dsts, &classes, &then_region.yields);
        self.emit(format!("bra.uni {};", end_label));
        self.label(&else_label);
        self.region(else_region);
        self.copy_values(&dsts, &classes, &else_region.yields);
        self.label(&end_label);
    }

    fn lower_for(
        &mut self,
        bounds: (ValueId, ValueId, ValueId),
        init: &[ValueId],
        body: &Region,
        results: &[ValueId],
    ) {
        let (lower, upper, step) = bounds;
        let Some((&iv, carried)) = body.args.split_first() else {
            return;
        };
        let iv_ty = self.dtype(iv);
        let iv_class = self.class(iv);
        let iv_reg = self.define(iv);
        let dsts: Vec<Vec<String>> = carried.iter().map(|a| self.define(*a)).collect();
        let classes: Vec<RegClass> = carried.iter().map(|a| self.class(*a)).collect();

        let lo = self.get(lower, 0);
        self.mov(iv_class, &iv_reg[0], &lo);
        self.copy_values(&dsts, &classes, init);

        let descending = self.analysis.get(step).constant.is_some_and(|s| s < 0);
        let exit_cmp = if descending { "le" } else { "ge" };
        let top = self.next_label("loop");
        let exit = self.next_label("exit");
        let p = self.fresh(RegClass::Pred);
        let hi = self.get(upper, 0);
        self.label(&top);
        self.emit(format!(
            "setp.{}.{} {}, {}, {};",
            exit_cmp,
            arith_ty(iv_ty),
            p,
            iv_reg[0],
            hi
        ));
        self.emit(format!("@{} bra {};", p, exit));
        self.region(body);
        self.copy_values(&dsts, &classes, &body.yields);
        let st = self.get(step, 0);
        self.emit(format!("add.{} {}, {}, {};", arith_ty(iv_ty), iv_reg[0], iv_reg[0], st));
        self.emit(format!("bra.uni {};", top));
        self.label(&exit);

        for (r, regs) in results.iter().zip(dsts) {
            self.regs.insert(*r, regs);
        }
    }

    // ─── Output ───────────────────────────────────────────────────

    fn finish(self) -> String {
        let ir = self.ir;
        let mut out = String::new();
        let _ = writeln!(out, "//\n// Generated by tessel\n//\n");
        let _ = writeln!(out, ".version 8.0");
        let _ = writeln!(out, ".target {}", self.options.arch);
        let _ = writeln!(out, ".address_size 64\n");
        let _ = writeln!(out, ".visible .entry {}(", ir.name);
        let params: Vec<String> = ir
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("\t.param .{} {}_param_{}", param_ty(p.ty.elem), ir.name, i))
            .collect();
        let _ = writeln!(out, "{}", params.join(",\n"));
        let _ = writeln!(out, ")");
        let _ = writeln!(out, ".maxntid {}, 1, 1", self.threads);
        let _ = writeln!(out, "{{");
        for (class, count) in &self.counts {
            let _ = writeln!(
                out,
                "\t.reg {} \t%{}<{}>;",
                class.decl(),
                class.prefix(),
                count + 1
            );
        }
        if self.smem_bytes > 0 {
            let _ = writeln!(out, "\t.shared .align 16 .b8 smem[{}];", self.smem_bytes);
        }
        let _ = writeln!(out);
        for line in &self.lines {
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out, "\tret;");
        let _ = writeln!(out, "}}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kir::builder::KirBuilder;
    use crate::kir::{CacheModifier, Shape, Ty};

    fn ptr(d: DType) -> Ty {
        Ty::scalar(d).with_elem(Elem::Ptr(d))
    }

    fn lower(ir: &KernelIr, num_warps: u32) -> String {
        let options = LowerOptions {
            num_warps,
            ..LowerOptions::default()
        };
        PtxLowering::new().lower(ir, &options)
    }

    /// y[i] = x[i] over a block of `n`, optionally masked against a bound.
    fn copy_kernel(n: i64, d: DType, masked: bool, cache: CacheModifier) -> KernelIr {
        let mut b = KirBuilder::new("copy");
        let x = b.param("X", ptr(d), 16);
        let y = b.param("Y", ptr(d), 16);
        let bound = b.param("N", Ty::scalar(DType::I32), 16);
        let off = b.arange(0, n).unwrap();
        let xs = b.binary(ArithOp::Add, x, off).unwrap();
        let ys = b.binary(ArithOp::Add, y, off).unwrap();
        let mask = masked.then(|| b.compare(CmpOp::Lt, off, bound).unwrap());
        let v = b.load(xs, mask, None, cache).unwrap();
        b.store(ys, v, mask).unwrap();
        b.finish()
    }

    #[test]
    fn test_header_and_params() {
        let ptx = lower(&copy_kernel(128, DType::F32, false, CacheModifier::None), 4);
        assert!(ptx.contains(".version 8.0"));
        assert!(ptx.contains(".target sm_80"));
        assert!(ptx.contains(".visible .entry copy("));
        assert!(ptx.contains(".param .u64 copy_param_0"));
        assert!(ptx.contains(".param .s32 copy_param_2"));
        assert!(ptx.contains(".maxntid 128, 1, 1"));
        assert!(ptx.contains("\tret;\n}"));
    }

    #[test]
    fn test_vectorized_access() {
        let ptx = lower(&copy_kernel(1024, DType::F32, false, CacheModifier::None), 4);
        assert!(ptx.contains("ld.global.v4.b32"));
        assert!(ptx.contains("st.global.v4.b32"));
    }

    #[test]
    fn test_small_block_is_scalar() {
        let ptx = lower(&copy_kernel(128, DType::F32, false, CacheModifier::None), 4);
        assert!(ptx.contains("ld.global.b32"));
        assert!(!ptx.contains("ld.global.v"));
    }

    #[test]
    fn test_cache_modifiers() {
        let ca = lower(&copy_kernel(128, DType::F32, false, CacheModifier::CacheAll), 4);
        assert!(ca.contains("ld.global.ca"));
        let cg = lower(&copy_kernel(128, DType::F32, false, CacheModifier::CacheGlobal), 4);
        assert!(cg.contains("ld.global.cg"));
        let plain = lower(&copy_kernel(128, DType::F32, false, CacheModifier::None), 4);
        assert!(!plain.contains(".ca") && !plain.contains(".cg"));
    }

    #[test]
    fn test_masked_access_is_predicated() {
        let ptx = lower(&copy_kernel(1024, DType::F32, true, CacheModifier::None), 4);
        assert!(ptx.contains("setp.lt.s32"));
        assert!(ptx.contains("@%p"));
        // Bound divisible by 16 keeps the mask constant over 4-lane runs.
        assert!(ptx.contains("ld.global.v4.b32"));
    }

    #[test]
    fn test_half_vectors_pack_into_words() {
        let ptx = lower(&copy_kernel(2048, DType::F16, false, CacheModifier::None), 4);
        assert!(ptx.contains("ld.global.v4.b32"));
        assert!(ptx.contains("mov.b32 {%h"));
    }

    #[test]
    fn test_reduce_uses_shuffles_and_barrier() {
        let mut b = KirBuilder::new("sum");
        let x = b.param("X", ptr(DType::F32), 16);
        let z = b.param("Z", ptr(DType::F32), 16);
        let off = b.arange(0, 256).unwrap();
        let xs = b.binary(ArithOp::Add, x, off).unwrap();
        let v = b.load(xs, None, None, CacheModifier::None).unwrap();
        let s = b.reduce(ReduceOp::Sum, v, 0).unwrap();
        b.store(z, s, None).unwrap();
        let ptx = lower(&b.finish(), 4);
        assert!(ptx.contains("shfl.sync.bfly.b32"));
        assert!(ptx.contains("bar.sync 0;"));
        assert!(ptx.contains(".shared .align 16 .b8 smem["));
    }

    #[test]
    fn test_dot_uses_mma_for_half_operands() {
        let mut b = KirBuilder::new("matmul");
        let x = b.param("X", ptr(DType::F16), 16);
        let shape = Shape::new([32, 32]);
        let xs = b.broadcast_to(x, &shape).unwrap();
        let a = b.load(xs, None, None, CacheModifier::None).unwrap();
        let c = b.dot(a, a).unwrap();
        let z = b.param("Z", ptr(DType::F32), 16);
        let zs = b.broadcast_to(z, &shape).unwrap();
        b.store(zs, c, None).unwrap();
        let ptx = lower(&b.finish(), 4);
        assert!(ptx.contains("mma.sync.aligned.m16n8k16.row.col.f32.f16.f16.f32"));
        assert!(ptx.contains("ldmatrix.sync.aligned"));
    }

    #[test]
    fn test_dot_f64_uses_fma() {
        let mut b = KirBuilder::new("dot64");
        let x = b.param("X", ptr(DType::F64), 16);
        let xs = b.broadcast_to(x, &Shape::new([16, 16])).unwrap();
        let a = b.load(xs, None, None, CacheModifier::None).unwrap();
        b.dot(a, a).unwrap();
        let ptx = lower(&b.finish(), 4);
        assert!(ptx.contains("fma.rn.f64"));
        assert!(!ptx.contains("mma.sync"));
    }

    #[test]
    fn test_atomics() {
        let mut b = KirBuilder::new("atomics");
        let x = b.param("X", ptr(DType::F32), 16);
        let one = b.float_const(1.0, DType::F32);
        b.atomic(AtomicKind::Add, x, one, None).unwrap();
        b.atomic(AtomicKind::Max, x, one, None).unwrap();
        let ptx = lower(&b.finish(), 1);
        assert!(ptx.contains("atom.global.add.f32"));
        assert!(ptx.contains("atom.global.max.s32"));
        assert!(ptx.contains("atom.global.min.u32"));
    }

    #[test]
    fn test_float_ne_is_unordered() {
        let mut b = KirBuilder::new("cmp");
        let x = b.param("x", Ty::scalar(DType::F32), 1);
        b.compare(CmpOp::Ne, x, x).unwrap();
        b.compare(CmpOp::Lt, x, x).unwrap();
        let ptx = lower(&b.finish(), 1);
        assert!(ptx.contains("setp.neu.f32"));
        assert!(ptx.contains("setp.lt.f32"));
    }

    #[test]
    fn test_loop_and_branch_labels() {
        let mut b = KirBuilder::new("loops");
        let n = b.param("n", Ty::scalar(DType::I32), 1);
        let zero = b.int_const(0, DType::I32);
        let one = b.int_const(1, DType::I32);
        b.begin_region();
        let _iv = b.region_arg(Ty::scalar(DType::I32));
        let acc = b.region_arg(Ty::scalar(DType::I32));
        let next = b.binary(ArithOp::Add, acc, one).unwrap();
        let body = b.end_region(vec![next]);
        let total = b.emit_for((zero, n, one), vec![zero], body);

        let cond = b.compare(CmpOp::Gt, total[0], zero).unwrap();
        b.begin_region();
        let then_region = b.end_region(vec![one]);
        b.begin_region();
        let else_region = b.end_region(vec![zero]);
        b.emit_if(cond, then_region, else_region, vec![Ty::scalar(DType::I32)]);

        let ptx = lower(&b.finish(), 4);
        assert!(ptx.contains("$L__loop_"));
        assert!(ptx.contains("setp.ge.s32"));
        assert!(ptx.contains("bra.uni $L__loop_"));
        assert!(ptx.contains("@!%p"));
        assert!(ptx.contains("$L__endif_"));
    }

    #[test]
    fn test_deterministic() {
        let ir = copy_kernel(512, DType::F32, true, CacheModifier::CacheGlobal);
        assert_eq!(lower(&ir, 4), lower(&ir, 4));
    }
}
