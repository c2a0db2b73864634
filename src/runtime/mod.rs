//! Reference runtime: device memory, launch arguments and the grid
//! executor.
//!
//! A `Device` owns one global address space. Host data goes in and out
//! through `DeviceBuffer`s. A `Runner` executes a specialized kernel over
//! a launch grid; `GridExecutor` runs every program instance in
//! parallel, each instance interpreting the KIR sequentially. Program
//! instances share nothing but global memory.

mod interp;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use half::{bf16, f16};
use rayon::prelude::*;

use crate::jit::signature::ArgKey;
use crate::kir::{scalar, KernelIr};
use crate::types::DType;

pub use memory::{Access, Fault, Memory};

// ─── Host element types ───────────────────────────────────────────

/// A host type with a kernel dtype and a plain byte representation.
pub trait Element: Pod {
    const DTYPE: DType;
}

macro_rules! element {
    ($($t:ty => $d:ident),* $(,)?) => {
        $(impl Element for $t {
            const DTYPE: DType = DType::$d;
        })*
    };
}

element! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f16 => F16, bf16 => BF16, f32 => F32, f64 => F64,
}

// ─── Device and buffers ───────────────────────────────────────────

/// The reference device: one global memory shared by all launches.
#[derive(Clone, Debug, Default)]
pub struct Device {
    memory: Arc<Memory>,
}

#[derive(Debug)]
struct Allocation {
    memory: Arc<Memory>,
    base: u64,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.memory.free(self.base);
    }
}

/// A typed view of device memory. Clones share the allocation, which is
/// unmapped when the last view drops.
#[derive(Clone, Debug)]
pub struct DeviceBuffer {
    alloc: Arc<Allocation>,
    offset: usize,
    len: usize,
    dtype: DType,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Device address of the first element.
    pub fn addr(&self) -> u64 {
        self.alloc.base + (self.offset * self.dtype.size_bytes()) as u64
    }

    /// The elements from `start` on; the view keeps the allocation alive.
    pub fn slice_from(&self, start: usize) -> DeviceBuffer {
        let start = start.min(self.len);
        DeviceBuffer {
            alloc: Arc::clone(&self.alloc),
            offset: self.offset + start,
            len: self.len - start,
            dtype: self.dtype,
        }
    }

    fn byte_len(&self) -> usize {
        self.len * self.dtype.size_bytes()
    }
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    fn wrap(&self, bytes: Vec<u8>, len: usize, dtype: DType) -> DeviceBuffer {
        let base = self.memory.alloc(bytes);
        DeviceBuffer {
            alloc: Arc::new(Allocation {
                memory: Arc::clone(&self.memory),
                base,
            }),
            offset: 0,
            len,
            dtype,
        }
    }

    pub fn upload<T: Element>(&self, data: &[T]) -> DeviceBuffer {
        let bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
        self.wrap(bytes, data.len(), T::DTYPE)
    }

    /// `bool` is stored one byte per element.
    pub fn upload_bool(&self, data: &[bool]) -> DeviceBuffer {
        let bytes = data.iter().map(|&b| b as u8).collect();
        self.wrap(bytes, data.len(), DType::Bool)
    }

    pub fn zeros(&self, dtype: DType, len: usize) -> DeviceBuffer {
        self.wrap(vec![0; len * dtype.size_bytes()], len, dtype)
    }

    pub fn download<T: Element>(&self, buf: &DeviceBuffer) -> crate::Result<Vec<T>> {
        if T::DTYPE != buf.dtype {
            return Err(crate::Error::Launch(format!(
                "cannot download a {} buffer as {}",
                buf.dtype,
                T::DTYPE
            )));
        }
        let bytes = self.memory.read_bytes(buf.addr(), buf.byte_len())?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn download_bool(&self, buf: &DeviceBuffer) -> crate::Result<Vec<bool>> {
        if buf.dtype != DType::Bool {
            return Err(crate::Error::Launch(format!(
                "cannot download a {} buffer as bool",
                buf.dtype
            )));
        }
        let bytes = self.memory.read_bytes(buf.addr(), buf.byte_len())?;
        Ok(bytes.into_iter().map(|b| b != 0).collect())
    }

    /// Overwrite a buffer with host data of the same dtype and length.
    pub fn write<T: Element>(&self, buf: &DeviceBuffer, data: &[T]) -> crate::Result<()> {
        if T::DTYPE != buf.dtype || data.len() != buf.len {
            return Err(crate::Error::Launch(format!(
                "cannot write {} {} values into a {}[{}] buffer",
                data.len(),
                T::DTYPE,
                buf.dtype,
                buf.len
            )));
        }
        self.memory
            .write_bytes(buf.addr(), bytemuck::cast_slice(data))?;
        Ok(())
    }
}

// ─── Launch arguments ─────────────────────────────────────────────

/// One runtime argument of a launch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg {
    Ptr { addr: u64, dtype: DType },
    /// Scalar lane bits in `dtype` (see `kir::scalar`).
    Scalar { bits: u64, dtype: DType },
}

impl Arg {
    /// An integer scalar: `int32` when the value fits, else `int64`.
    pub fn int(v: i64) -> Self {
        let dtype = if i32::try_from(v).is_ok() {
            DType::I32
        } else {
            DType::I64
        };
        Self::typed(v as f64, v as i128, dtype)
    }

    pub fn uint(v: u64) -> Self {
        let dtype = if u32::try_from(v).is_ok() {
            DType::U32
        } else {
            DType::U64
        };
        Self::typed(v as f64, v as i128, dtype)
    }

    pub fn float(x: f64, dtype: DType) -> Self {
        Self::typed(x, x as i128, dtype)
    }

    pub fn bool(b: bool) -> Self {
        Arg::Scalar {
            bits: b as u64,
            dtype: DType::Bool,
        }
    }

    pub fn scalar(bits: u64, dtype: DType) -> Self {
        Arg::Scalar {
            bits: bits & scalar::mask(dtype),
            dtype,
        }
    }

    fn typed(x: f64, v: i128, dtype: DType) -> Self {
        let bits = if dtype.is_float() {
            scalar::from_f64(x, dtype)
        } else {
            scalar::from_i128(v, dtype)
        };
        Arg::Scalar { bits, dtype }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Arg::Ptr { dtype, .. } | Arg::Scalar { dtype, .. } => *dtype,
        }
    }

    /// The lane bits this argument binds to its kernel parameter.
    pub fn bits(&self) -> u64 {
        match self {
            Arg::Ptr { addr, .. } => *addr,
            Arg::Scalar { bits, .. } => *bits,
        }
    }

    /// What specialization sees of this argument.
    pub fn key(&self) -> ArgKey {
        match *self {
            Arg::Ptr { addr, dtype } => ArgKey::Ptr {
                dtype,
                aligned16: addr % 16 == 0,
            },
            Arg::Scalar { dtype, .. } if dtype.is_float() => ArgKey::float(dtype),
            Arg::Scalar { dtype, .. } if dtype.is_bool() => ArgKey::int(dtype),
            Arg::Scalar { bits, dtype } => {
                let v = scalar::to_i128(bits, dtype);
                ArgKey::Int {
                    dtype,
                    is_one: v == 1,
                    div16: v % 16 == 0,
                }
            }
        }
    }
}

impl From<&DeviceBuffer> for Arg {
    fn from(buf: &DeviceBuffer) -> Self {
        Arg::Ptr {
            addr: buf.addr(),
            dtype: buf.dtype,
        }
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::typed(v as f64, v as i128, DType::I32)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::int(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::typed(v as f64, v as i128, DType::U32)
    }
}

impl From<f32> for Arg {
    fn from(x: f32) -> Self {
        Arg::float(x as f64, DType::F32)
    }
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self {
        Arg::float(x, DType::F64)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::bool(b)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Ptr { addr, dtype } => write!(f, "*{} @ {:#x}", dtype, addr),
            Arg::Scalar { bits, dtype } if dtype.is_float() => {
                write!(f, "{}({})", dtype, scalar::to_f64(*bits, *dtype))
            }
            Arg::Scalar { bits, dtype } => {
                write!(f, "{}({})", dtype, scalar::to_i128(*bits, *dtype))
            }
        }
    }
}

// ─── Grid ─────────────────────────────────────────────────────────

/// Launch grid of one to three positive dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Grid(Vec<u32>);

impl Grid {
    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Grid(dims.into())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// The three grid extents, padding missing axes with 1.
    pub fn dims(&self) -> Result<[u32; 3], String> {
        if self.0.is_empty() || self.0.len() > 3 {
            return Err(format!(
                "a grid has 1 to 3 dimensions, got {}",
                self.0.len()
            ));
        }
        if let Some(d) = self.0.iter().find(|&&d| d == 0) {
            return Err(format!("grid dimensions must be positive, got {}", d));
        }
        let mut dims = [1u32; 3];
        dims[..self.0.len()].copy_from_slice(&self.0);
        Ok(dims)
    }

    pub fn num_programs(&self) -> u64 {
        self.0.iter().map(|&d| d as u64).product()
    }
}

impl From<u32> for Grid {
    fn from(x: u32) -> Self {
        Grid(vec![x])
    }
}

impl From<(u32, u32)> for Grid {
    fn from((x, y): (u32, u32)) -> Self {
        Grid(vec![x, y])
    }
}

impl From<(u32, u32, u32)> for Grid {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Grid(vec![x, y, z])
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "({})", dims.join(", "))
    }
}

// ─── Runners ──────────────────────────────────────────────────────

/// Execute a specialized kernel over a grid.
pub trait Runner {
    /// Run every program instance. `params` holds the lane bits of each
    /// kernel parameter, in parameter order.
    fn run(&self, ir: &KernelIr, grid: [u32; 3], params: &[u64]) -> Result<(), Fault>;
}

/// Runs program instances in parallel on the rayon pool.
#[derive(Clone, Debug)]
pub struct GridExecutor {
    memory: Arc<Memory>,
    parallel: bool,
}

impl GridExecutor {
    pub fn new(device: &Device) -> Self {
        Self {
            memory: Arc::clone(&device.memory),
            parallel: true,
        }
    }

    /// Run programs one after another in grid order.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

impl Runner for GridExecutor {
    fn run(&self, ir: &KernelIr, grid: [u32; 3], params: &[u64]) -> Result<(), Fault> {
        let total = grid.iter().map(|&d| d as u64).product::<u64>();
        let program = |flat: u64| {
            let pid = unravel(flat, grid);
            interp::Program::new(ir, &self.memory, pid, grid, params).run()
        };
        if self.parallel {
            (0..total).into_par_iter().try_for_each(program)
        } else {
            (0..total).try_for_each(program)
        }
    }
}

/// Grid coordinates of the `flat`-th program; axis 0 varies fastest.
fn unravel(flat: u64, grid: [u32; 3]) -> [u32; 3] {
    let x = flat % grid[0] as u64;
    let rest = flat / grid[0] as u64;
    let y = rest % grid[1] as u64;
    let z = rest / grid[1] as u64;
    [x as u32, y as u32, z as u32]
}
