//! Axis analysis: per-dimension contiguity, divisibility and constancy.
//!
//! For every value and every dimension `d`:
//! - `contiguity[d]`: length of the runs along `d` whose values increase
//!   by exactly one (pointers: by one element).
//! - `divisibility[d]`: largest power of two known to divide the first
//!   value of every contiguous run along `d` (pointers: in bytes). It says
//!   nothing about the other values of a run: `arange(0, 8)` has
//!   divisibility `2^30` but holds odd values.
//! - `constancy[d]`: length of the runs along `d` that hold one value.
//!
//! Memory lowering reads these facts to pick vector widths.

use super::{Elem, KernelIr, Op, Region, ValueId};
use crate::types::ArithOp;

/// Cap on tracked divisibility; beyond this we only know "very aligned".
pub const MAX_DIVISIBILITY: u64 = 1 << 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisInfo {
    pub contiguity: Vec<u64>,
    pub divisibility: Vec<u64>,
    pub constancy: Vec<u64>,
    /// Known compile-time value, when the whole block is one constant.
    pub constant: Option<i64>,
}

impl AxisInfo {
    /// Nothing known beyond the trivial facts.
    pub fn unknown(rank: usize) -> Self {
        let n = rank.max(1);
        Self {
            contiguity: vec![1; n],
            divisibility: vec![1; n],
            constancy: vec![1; n],
            constant: None,
        }
    }

    /// Scalar (or splatted) value with divisibility `div`.
    pub fn uniform(dims: &[usize], div: u64, constant: Option<i64>) -> Self {
        let n = dims.len().max(1);
        let constancy = if dims.is_empty() {
            vec![1]
        } else {
            dims.iter().map(|d| *d as u64).collect()
        };
        Self {
            contiguity: vec![1; n],
            divisibility: vec![div.clamp(1, MAX_DIVISIBILITY); n],
            constancy,
            constant,
        }
    }

    pub fn rank(&self) -> usize {
        self.contiguity.len()
    }
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Largest power of two dividing `v` (`MAX_DIVISIBILITY` for zero).
pub fn pow2_divisor(v: i64) -> u64 {
    if v == 0 {
        return MAX_DIVISIBILITY;
    }
    let tz = v.unsigned_abs().trailing_zeros();
    (1u64 << tz.min(30)).min(MAX_DIVISIBILITY)
}

/// Facts for every value of a kernel, indexed by `ValueId`.
pub struct AxisAnalysis {
    infos: Vec<AxisInfo>,
}

impl AxisAnalysis {
    pub fn run(ir: &KernelIr) -> Self {
        let infos = ir
            .types
            .iter()
            .map(|t| AxisInfo::unknown(t.shape.rank()))
            .collect();
        let mut analysis = Self { infos };
        for p in &ir.params {
            let dims = p.ty.shape.dims().to_vec();
            analysis.infos[p.value.index()] = AxisInfo::uniform(&dims, p.divisibility, None);
        }
        analysis.visit_region(ir, &ir.body);
        analysis
    }

    pub fn get(&self, v: ValueId) -> &AxisInfo {
        &self.infos[v.index()]
    }

    fn set(&mut self, v: ValueId, info: AxisInfo) {
        self.infos[v.index()] = info;
    }

    fn visit_region(&mut self, ir: &KernelIr, region: &Region) {
        for inst in &region.insts {
            match &inst.op {
                Op::If {
                    then_region,
                    else_region,
                    ..
                } => {
                    self.visit_region(ir, then_region);
                    self.visit_region(ir, else_region);
                }
                Op::For { body, .. } => self.visit_region(ir, body),
                _ => {}
            }
            if let [result] = inst.results.as_slice() {
                let info = self.infer(ir, &inst.op, *result);
                self.set(*result, info);
            }
        }
    }

    fn infer(&self, ir: &KernelIr, op: &Op, result: ValueId) -> AxisInfo {
        let ty = ir.ty(result);
        let dims: Vec<usize> = ty.shape.dims().to_vec();
        let rank = dims.len();
        match op {
            Op::Param { .. } => self.get(result).clone(),
            Op::Const { bits } => {
                let v = match ty.elem {
                    Elem::Scalar(d) if d.is_int() || d.is_bool() => {
                        Some(crate::kir::scalar::to_i128(*bits, d) as i64)
                    }
                    _ => None,
                };
                let div = v.map(pow2_divisor).unwrap_or(1);
                AxisInfo::uniform(&dims, div, v)
            }
            Op::ProgramId { .. } | Op::NumPrograms { .. } => AxisInfo::unknown(0),
            Op::Arange { start, end } => AxisInfo {
                contiguity: vec![(end - start) as u64],
                divisibility: vec![pow2_divisor(*start)],
                constancy: vec![1],
                constant: None,
            },
            Op::Splat { value } => {
                let src = self.get(*value);
                AxisInfo::uniform(&dims, src.divisibility[0], src.constant)
            }
            Op::Broadcast { value } => {
                let src = self.get(*value);
                let src_dims = ir.ty(*value).shape.dims().to_vec();
                let mut out = src.clone();
                for d in 0..rank {
                    if src_dims[d] == 1 && dims[d] != 1 {
                        out.contiguity[d] = 1;
                        out.constancy[d] = dims[d] as u64;
                    }
                }
                out
            }
            Op::ExpandDims { value, axis } => {
                let src = self.get(*value);
                if ir.ty(*value).shape.is_scalar() {
                    return AxisInfo::uniform(&dims, src.divisibility[0], src.constant);
                }
                // every element starts a run along the new axis
                let div = (0..src.rank())
                    .map(|d| run_start_divisibility(src, d))
                    .fold(0, gcd)
                    .max(1);
                let mut out = src.clone();
                out.contiguity.insert(*axis, 1);
                out.divisibility.insert(*axis, div);
                out.constancy.insert(*axis, 1);
                out
            }
            Op::Cast { value, bitcast } => {
                let src = self.get(*value).clone();
                let from = ir.ty(*value).elem.dtype();
                let to = ty.elem.dtype();
                if from.is_int() && to.is_int() && !*bitcast && to.bits() >= from.bits() {
                    src
                } else {
                    AxisInfo {
                        contiguity: vec![1; src.rank()],
                        divisibility: vec![1; src.rank()],
                        constancy: src.constancy,
                        constant: None,
                    }
                }
            }
            Op::PtrAdd { ptr, offset } => {
                let p = self.get(*ptr);
                let o = self.get(*offset);
                let elem_bytes = ty.elem.dtype().size_bytes() as u64;
                let mut out = AxisInfo::unknown(rank);
                for d in 0..out.rank() {
                    out.contiguity[d] = add_contiguity(p, o, d);
                    out.divisibility[d] = gcd(
                        p.divisibility[d],
                        o.divisibility[d].saturating_mul(elem_bytes).min(MAX_DIVISIBILITY),
                    );
                    out.constancy[d] = gcd(p.constancy[d], o.constancy[d]);
                }
                out
            }
            Op::Binary { op, lhs, rhs } => self.infer_binary(*op, *lhs, *rhs, rank),
            Op::Cmp { lhs, rhs, .. } => {
                let a = self.get(*lhs);
                let b = self.get(*rhs);
                let mut out = AxisInfo::unknown(rank);
                for d in 0..out.rank() {
                    let mut c = gcd(a.constancy[d], b.constancy[d]);
                    // contiguous run vs. a value constant over the run
                    if a.contiguity[d] > 1 && b.constancy[d] >= a.contiguity[d] {
                        c = c.max(gcd(gcd(a.contiguity[d], a.divisibility[d]), b.divisibility[d]));
                    }
                    if b.contiguity[d] > 1 && a.constancy[d] >= b.contiguity[d] {
                        c = c.max(gcd(gcd(b.contiguity[d], b.divisibility[d]), a.divisibility[d]));
                    }
                    out.constancy[d] = c;
                }
                out
            }
            Op::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.get(*cond);
                let a = self.get(*on_true);
                let b = self.get(*on_false);
                let mut out = AxisInfo::unknown(rank);
                for d in 0..out.rank() {
                    out.constancy[d] = gcd(c.constancy[d], gcd(a.constancy[d], b.constancy[d]));
                    out.divisibility[d] = gcd(a.divisibility[d], b.divisibility[d]);
                    if c.constancy[d] >= a.contiguity[d].max(b.contiguity[d]) {
                        out.contiguity[d] = a.contiguity[d].min(b.contiguity[d]);
                    }
                }
                out
            }
            Op::Unary { value, .. } | Op::Math { value, .. } => {
                let src = self.get(*value);
                let mut out = AxisInfo::unknown(rank);
                out.constancy = src.constancy.clone();
                out
            }
            _ => AxisInfo::unknown(rank),
        }
    }

    fn infer_binary(&self, op: ArithOp, lhs: ValueId, rhs: ValueId, rank: usize) -> AxisInfo {
        let a = self.get(lhs);
        let b = self.get(rhs);
        let mut out = AxisInfo::unknown(rank);
        for d in 0..out.rank() {
            out.constancy[d] = gcd(a.constancy[d], b.constancy[d]);
            match op {
                ArithOp::Add => {
                    out.contiguity[d] = add_contiguity(a, b, d);
                    out.divisibility[d] = gcd(a.divisibility[d], b.divisibility[d]);
                }
                ArithOp::Sub => {
                    out.contiguity[d] = gcd(a.contiguity[d], b.constancy[d]);
                    out.divisibility[d] = gcd(a.divisibility[d], b.divisibility[d]);
                }
                ArithOp::Mul => {
                    if b.constant == Some(1) {
                        out.contiguity[d] = a.contiguity[d];
                    } else if a.constant == Some(1) {
                        out.contiguity[d] = b.contiguity[d];
                    }
                    let lhs = if b.constant == Some(1) {
                        a.divisibility[d]
                    } else {
                        run_start_divisibility(a, d)
                    };
                    let rhs = if a.constant == Some(1) {
                        b.divisibility[d]
                    } else {
                        run_start_divisibility(b, d)
                    };
                    out.divisibility[d] = lhs.saturating_mul(rhs).min(MAX_DIVISIBILITY);
                }
                ArithOp::Shl => {
                    if let Some(s) = b.constant.filter(|s| (0..30).contains(s)) {
                        if s == 0 {
                            out.contiguity[d] = a.contiguity[d];
                            out.divisibility[d] = a.divisibility[d];
                        } else {
                            out.divisibility[d] =
                                (run_start_divisibility(a, d) << s).min(MAX_DIVISIBILITY);
                        }
                    }
                }
                ArithOp::FloorDiv | ArithOp::Div => {
                    if b.constant == Some(1) {
                        out.contiguity[d] = a.contiguity[d];
                        out.divisibility[d] = a.divisibility[d];
                    }
                }
                _ => {}
            }
        }
        out.constant = match (op, a.constant, b.constant) {
            (ArithOp::Add, Some(x), Some(y)) => x.checked_add(y),
            (ArithOp::Sub, Some(x), Some(y)) => x.checked_sub(y),
            (ArithOp::Mul, Some(x), Some(y)) => x.checked_mul(y),
            _ => None,
        };
        out
    }
}

/// Divisibility that holds for every element along `d`, not only run starts.
fn run_start_divisibility(info: &AxisInfo, d: usize) -> u64 {
    if info.contiguity[d] > 1 {
        1
    } else {
        info.divisibility[d]
    }
}

/// `a + b` is contiguous where one side runs and the other stays fixed.
fn add_contiguity(a: &AxisInfo, b: &AxisInfo, d: usize) -> u64 {
    gcd(a.contiguity[d], b.constancy[d]).max(gcd(a.constancy[d], b.contiguity[d]))
}
