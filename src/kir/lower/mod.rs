//! KernelLowering: renders a specialized `KernelIr` as target assembly.
//!
//! The assembly is for structural inspection (vector widths, cache
//! hints, predication, synchronization); execution goes through the
//! reference interpreter in `runtime`.

mod ptx;

use super::axis::AxisAnalysis;
use super::{Elem, KernelIr, ValueId};

pub use ptx::PtxLowering;

/// Launch-shape parameters that affect code generation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LowerOptions {
    pub num_warps: u32,
    /// Target architecture, e.g. `sm_80`.
    pub arch: String,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            num_warps: 4,
            arch: "sm_80".to_string(),
        }
    }
}

impl LowerOptions {
    pub fn threads(&self) -> usize {
        32 * self.num_warps as usize
    }
}

/// Lowers a kernel into assembly text for one target.
pub trait KernelLowering {
    /// The target name (e.g. "ptx").
    fn target_name(&self) -> &str;

    /// Render the whole kernel. Deterministic for a given input.
    fn lower(&self, ir: &KernelIr, options: &LowerOptions) -> String;
}

/// Create a kernel-lowering backend for the given target name.
pub fn create_kernel_lowering(target: &str) -> Option<Box<dyn KernelLowering>> {
    match target {
        "ptx" | "cuda" => Some(Box::new(PtxLowering::new())),
        _ => None,
    }
}

/// Lanes of a block each thread holds (at least one; small blocks are
/// replicated across threads).
pub fn elems_per_thread(numel: usize, threads: usize) -> usize {
    numel.div_ceil(threads).max(1)
}

/// Vector width of a global memory access through `ptr`.
///
/// The most contiguous axis is the fast axis. The width is the minimum of
/// the run length along it, the known alignment in elements, 128 bits,
/// the lanes a thread owns, and the run length over which the mask is
/// constant; then rounded down to a power of two.
pub fn vector_width(
    ir: &KernelIr,
    analysis: &AxisAnalysis,
    ptr: ValueId,
    mask: Option<ValueId>,
    threads: usize,
) -> usize {
    let ty = ir.ty(ptr);
    if ty.shape.is_scalar() {
        return 1;
    }
    let elem_bytes = match ty.elem {
        Elem::Ptr(d) => d.size_bytes() as u64,
        Elem::Scalar(_) => return 1,
    };
    let info = analysis.get(ptr);
    let axis = fastest_axis(&info.contiguity);

    let mut width = info.contiguity[axis];
    width = width.min((info.divisibility[axis] / elem_bytes).max(1));
    width = width.min((16 / elem_bytes).max(1));
    width = width.min(elems_per_thread(ty.numel(), threads) as u64);
    if let Some(m) = mask {
        width = width.min(analysis.get(m).constancy[axis]);
    }
    prev_power_of_two(width.max(1)) as usize
}

/// Index of the largest contiguity; ties go to the innermost axis.
pub fn fastest_axis(contiguity: &[u64]) -> usize {
    let mut best = contiguity.len().saturating_sub(1);
    for (d, c) in contiguity.iter().enumerate() {
        if *c > contiguity[best] {
            best = d;
        }
    }
    best
}

fn prev_power_of_two(x: u64) -> u64 {
    1u64 << (63 - x.leading_zeros())
}
