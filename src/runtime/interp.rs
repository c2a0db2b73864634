//! Reference interpreter: runs one program instance of a `KernelIr`.
//!
//! Every value is a dense row-major vector of `u64` lanes (see
//! `kir::scalar`). Pointer lanes hold absolute byte addresses.

use crate::kir::{scalar, KernelIr, Op, ReduceOp, Region, Shape, ValueId};
use crate::types::{ArithOp, AtomicKind, DType};

use super::memory::{Fault, Memory};

type Lanes = Vec<u64>;

pub(super) struct Program<'a> {
    ir: &'a KernelIr,
    memory: &'a Memory,
    pid: [u32; 3],
    grid: [u32; 3],
    params: &'a [u64],
    values: Vec<Lanes>,
}

impl<'a> Program<'a> {
    pub(super) fn new(
        ir: &'a KernelIr,
        memory: &'a Memory,
        pid: [u32; 3],
        grid: [u32; 3],
        params: &'a [u64],
    ) -> Self {
        Self {
            ir,
            memory,
            pid,
            grid,
            params,
            values: vec![Vec::new(); ir.num_values()],
        }
    }

    pub(super) fn run(mut self) -> Result<(), Fault> {
        let (ir, pid) = (self.ir, self.pid);
        self.region(&ir.body).map_err(|f| f.in_program(pid))?;
        Ok(())
    }

    fn get(&self, v: ValueId) -> &Lanes {
        &self.values[v.index()]
    }

    fn dtype(&self, v: ValueId) -> DType {
        self.ir.ty(v).elem.dtype()
    }

    fn shape(&self, v: ValueId) -> &Shape {
        &self.ir.ty(v).shape
    }

    fn set(&mut self, v: ValueId, lanes: Lanes) {
        self.values[v.index()] = lanes;
    }

    /// Execute `region`; returns its yielded lanes.
    fn region(&mut self, region: &Region) -> Result<Vec<Lanes>, Fault> {
        for inst in &region.insts {
            match &inst.op {
                Op::If {
                    cond,
                    then_region,
                    else_region,
                } => {
                    let taken = if self.get(*cond)[0] != 0 {
                        then_region
                    } else {
                        else_region
                    };
                    let yields = self.region(taken)?;
                    for (r, lanes) in inst.results.iter().zip(yields) {
                        self.set(*r, lanes);
                    }
                }
                Op::For {
                    lower,
                    upper,
                    step,
                    init,
                    body,
                } => {
                    let results = self.for_loop(*lower, *upper, *step, init, body)?;
                    for (r, lanes) in inst.results.iter().zip(results) {
                        self.set(*r, lanes);
                    }
                }
                op => {
                    let out = self.op(op, inst.results.first().copied())?;
                    if let (Some(r), Some(lanes)) = (inst.results.first(), out) {
                        self.set(*r, lanes);
                    }
                }
            }
        }
        Ok(region.yields.iter().map(|y| self.get(*y).clone()).collect())
    }

    fn for_loop(
        &mut self,
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        init: &[ValueId],
        body: &Region,
    ) -> Result<Vec<Lanes>, Fault> {
        let lo = scalar::to_i128(self.get(lower)[0], self.dtype(lower));
        let hi = scalar::to_i128(self.get(upper)[0], self.dtype(upper));
        let st = scalar::to_i128(self.get(step)[0], self.dtype(step));
        let mut carried: Vec<Lanes> = init.iter().map(|v| self.get(*v).clone()).collect();
        let Some((&iv, args)) = body.args.split_first() else {
            return Ok(carried);
        };
        let iv_dtype = self.dtype(iv);
        let mut i = lo;
        while (st > 0 && i < hi) || (st < 0 && i > hi) {
            self.set(iv, vec![scalar::from_i128(i, iv_dtype)]);
            for (arg, lanes) in args.iter().zip(carried) {
                self.set(*arg, lanes);
            }
            carried = self.region(body)?;
            i += st;
        }
        Ok(carried)
    }

    fn op(&self, op: &Op, result: Option<ValueId>) -> Result<Option<Lanes>, Fault> {
        let out_ty = result.map(|r| self.ir.ty(r));
        let lanes = match op {
            Op::Param { index } => vec![self.params[*index]],
            Op::Const { bits } => vec![*bits],
            Op::ProgramId { axis } => {
                vec![scalar::from_i128(self.pid[*axis as usize] as i128, DType::I32)]
            }
            Op::NumPrograms { axis } => {
                vec![scalar::from_i128(self.grid[*axis as usize] as i128, DType::I32)]
            }
            Op::Arange { start, end } => (*start..*end)
                .map(|i| scalar::from_i128(i as i128, DType::I32))
                .collect(),
            Op::Splat { value } => {
                let n = out_ty.map(|t| t.numel()).unwrap_or(1);
                vec![self.get(*value)[0]; n]
            }
            Op::Broadcast { value } => {
                let to = out_ty.map(|t| t.shape.clone()).unwrap_or_default();
                broadcast(self.get(*value), self.shape(*value), &to)
            }
            Op::ExpandDims { value, .. } => self.get(*value).clone(),
            Op::Cast { value, bitcast } => {
                let from = self.dtype(*value);
                let to = out_ty.map(|t| t.elem.dtype()).unwrap_or(from);
                self.get(*value)
                    .iter()
                    .map(|&b| {
                        if *bitcast {
                            scalar::bitcast(b, to)
                        } else {
                            scalar::cast(b, from, to)
                        }
                    })
                    .collect()
            }
            Op::Unary { op, value } => {
                let d = self.dtype(*value);
                self.get(*value)
                    .iter()
                    .map(|&a| scalar::unary(*op, a, d))
                    .collect()
            }
            Op::Binary { op, lhs, rhs } => {
                let compute = self.dtype(*lhs);
                let to = out_ty.map(|t| t.elem.dtype()).unwrap_or(compute);
                zip(self.get(*lhs), self.get(*rhs), |a, b| {
                    scalar::cast(scalar::binary(*op, a, b, compute), compute, to)
                })
            }
            Op::Cmp { op, lhs, rhs } => {
                let d = self.dtype(*lhs);
                zip(self.get(*lhs), self.get(*rhs), |a, b| {
                    scalar::compare(*op, a, b, d) as u64
                })
            }
            Op::Math { func, value } => {
                let d = self.dtype(*value);
                self.get(*value)
                    .iter()
                    .map(|&a| scalar::math(*func, a, d))
                    .collect()
            }
            Op::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.get(*cond);
                let t = self.get(*on_true);
                let f = self.get(*on_false);
                (0..c.len())
                    .map(|i| if c[i] != 0 { t[i] } else { f[i] })
                    .collect()
            }
            Op::PtrAdd { ptr, offset } => {
                let size = self.dtype(*ptr).size_bytes() as i128;
                let od = self.dtype(*offset);
                zip(self.get(*ptr), self.get(*offset), |p, o| {
                    (p as i128).wrapping_add(scalar::to_i128(o, od) * size) as u64
                })
            }
            Op::Load {
                ptr, mask, other, ..
            } => self.load(*ptr, *mask, *other)?,
            Op::Store { ptr, value, mask } => {
                self.store(*ptr, *value, *mask)?;
                return Ok(None);
            }
            Op::Atomic {
                op,
                ptr,
                value,
                mask,
            } => self.atomic(*op, *ptr, *value, *mask)?,
            Op::Reduce { op, value, axis } => {
                reduce(*op, self.get(*value), self.shape(*value), *axis, self.dtype(*value))
            }
            Op::Dot { a, b } => {
                let acc = out_ty.map(|t| t.elem.dtype()).unwrap_or(DType::F32);
                dot(
                    self.get(*a),
                    self.get(*b),
                    self.shape(*a),
                    self.shape(*b),
                    self.dtype(*a),
                    acc,
                )
            }
            Op::If { .. } | Op::For { .. } => return Ok(None),
        };
        Ok(Some(lanes))
    }

    /// Active lane indices under `mask` (all lanes when absent).
    fn active(&self, n: usize, mask: Option<ValueId>) -> Vec<usize> {
        match mask {
            Some(m) => {
                let m = self.get(m);
                (0..n).filter(|&i| m[i] != 0).collect()
            }
            None => (0..n).collect(),
        }
    }

    fn load(
        &self,
        ptr: ValueId,
        mask: Option<ValueId>,
        other: Option<ValueId>,
    ) -> Result<Lanes, Fault> {
        let pointee = self.dtype(ptr);
        let addrs = self.get(ptr);
        let mut out = match other {
            Some(o) => self.get(o).clone(),
            None => vec![0; addrs.len()],
        };
        let active = self.active(addrs.len(), mask);
        let at: Vec<u64> = active.iter().map(|&i| addrs[i]).collect();
        let loaded = self.memory.load(&at, pointee.size_bytes())?;
        for (i, bits) in active.into_iter().zip(loaded) {
            out[i] = normalize(bits, pointee);
        }
        Ok(out)
    }

    fn store(&self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) -> Result<(), Fault> {
        let pointee = self.dtype(ptr);
        let addrs = self.get(ptr);
        let values = self.get(value);
        let lanes: Vec<(u64, u64)> = self
            .active(addrs.len(), mask)
            .into_iter()
            .map(|i| (addrs[i], values[i]))
            .collect();
        self.memory.store(&lanes, pointee.size_bytes())
    }

    fn atomic(
        &self,
        op: AtomicKind,
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    ) -> Result<Lanes, Fault> {
        let pointee = self.dtype(ptr);
        let addrs = self.get(ptr);
        let values = self.get(value);
        let active = self.active(addrs.len(), mask);
        let lanes: Vec<(u64, u64)> = active.iter().map(|&i| (addrs[i], values[i])).collect();
        let combine = match op {
            AtomicKind::Add => ArithOp::Add,
            AtomicKind::Max => ArithOp::Max,
            AtomicKind::Min => ArithOp::Min,
        };
        let prior = self.memory.atomic(&lanes, pointee.size_bytes(), |old, v| {
            scalar::binary(combine, old, v, pointee)
        })?;
        let mut out = vec![0; addrs.len()];
        for (i, bits) in active.into_iter().zip(prior) {
            out[i] = bits;
        }
        Ok(out)
    }
}

fn zip(a: &[u64], b: &[u64], f: impl Fn(u64, u64) -> u64) -> Lanes {
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}

/// Canonical lane bits of a value read from memory.
fn normalize(bits: u64, dtype: DType) -> u64 {
    if dtype.is_bool() {
        (bits != 0) as u64
    } else {
        bits & scalar::mask(dtype)
    }
}

/// Stretch the size-1 axes of `from` to `to` (same rank).
fn broadcast(lanes: &[u64], from: &Shape, to: &Shape) -> Lanes {
    let strides = from.strides();
    (0..to.numel())
        .map(|flat| {
            let idx = to.unravel(flat);
            let src: usize = idx
                .iter()
                .zip(from.dims())
                .zip(&strides)
                .map(|((&i, &d), &s)| if d == 1 { 0 } else { i * s })
                .sum();
            lanes[src]
        })
        .collect()
}

/// Reduce along `axis`, combining pairwise in a balanced tree.
fn reduce(op: ReduceOp, lanes: &[u64], shape: &Shape, axis: usize, dtype: DType) -> Lanes {
    let dims = shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let len = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let combine = op.combine();
    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let mut row: Vec<u64> = (0..len).map(|k| lanes[(o * len + k) * inner + i]).collect();
            while row.len() > 1 {
                row = row
                    .chunks(2)
                    .map(|pair| match pair {
                        [a, b] => scalar::binary(combine, *a, *b, dtype),
                        [a] => *a,
                        _ => scalar::reduce_identity(op, dtype),
                    })
                    .collect();
            }
            out.push(row.first().copied().unwrap_or_else(|| scalar::reduce_identity(op, dtype)));
        }
    }
    out
}

/// `(M,K)·(K,N)`; products and sums run in `acc`.
fn dot(a: &[u64], b: &[u64], sa: &Shape, sb: &Shape, operand: DType, acc: DType) -> Lanes {
    let (m, k) = (sa.dims()[0], sa.dims()[1]);
    let n = sb.dims()[1];
    let a: Vec<u64> = a.iter().map(|&x| scalar::cast(x, operand, acc)).collect();
    let b: Vec<u64> = b.iter().map(|&x| scalar::cast(x, operand, acc)).collect();
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            let mut sum = scalar::from_i128(0, acc);
            for p in 0..k {
                let prod = scalar::binary(ArithOp::Mul, a[i * k + p], b[p * n + j], acc);
                sum = scalar::binary(ArithOp::Add, sum, prod, acc);
            }
            out.push(sum);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32s(xs: &[f32]) -> Lanes {
        xs.iter().map(|x| x.to_bits() as u64).collect()
    }

    #[test]
    fn test_broadcast_row_and_column() {
        let row = vec![1, 2, 3];
        let out = broadcast(&row, &Shape::new([1, 3]), &Shape::new([2, 3]));
        assert_eq!(out, vec![1, 2, 3, 1, 2, 3]);
        let col = vec![7, 8];
        let out = broadcast(&col, &Shape::new([2, 1]), &Shape::new([2, 3]));
        assert_eq!(out, vec![7, 7, 7, 8, 8, 8]);
    }

    #[test]
    fn test_reduce_axes() {
        // [[1, 2, 3], [4, 5, 6]]
        let lanes = vec![1, 2, 3, 4, 5, 6];
        let shape = Shape::new([2, 3]);
        assert_eq!(reduce(ReduceOp::Sum, &lanes, &shape, 0, DType::I32), vec![5, 7, 9]);
        assert_eq!(reduce(ReduceOp::Sum, &lanes, &shape, 1, DType::I32), vec![6, 15]);
        assert_eq!(reduce(ReduceOp::Max, &lanes, &shape, 1, DType::I32), vec![3, 6]);
    }

    #[test]
    fn test_reduce_signed_min() {
        let lanes: Lanes = [-3i32, 9, -7, 2]
            .iter()
            .map(|&x| scalar::from_i128(x as i128, DType::I32))
            .collect();
        let out = reduce(ReduceOp::Min, &lanes, &Shape::new([4]), 0, DType::I32);
        assert_eq!(scalar::to_i128(out[0], DType::I32), -7);
    }

    #[test]
    fn test_dot_small() {
        // [[1, 2], [3, 4]] · [[5, 6], [7, 8]] = [[19, 22], [43, 50]]
        let a = f32s(&[1.0, 2.0, 3.0, 4.0]);
        let b = f32s(&[5.0, 6.0, 7.0, 8.0]);
        let s = Shape::new([2, 2]);
        let out = dot(&a, &b, &s, &s, DType::F32, DType::F32);
        assert_eq!(out, f32s(&[19.0, 22.0, 43.0, 50.0]));
    }

    #[test]
    fn test_normalize_bool() {
        assert_eq!(normalize(0xff, DType::Bool), 1);
        assert_eq!(normalize(0, DType::Bool), 0);
        assert_eq!(normalize(0x1_0000_0005, DType::I32), 5);
    }
}
