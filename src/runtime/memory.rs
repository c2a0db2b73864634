//! Global memory of the reference executor.
//!
//! A flat 64-bit byte address space. Every allocation starts on a
//! 256-byte boundary; addresses below `BASE` are never mapped, so a null
//! pointer always faults. Accesses take the lock once per block
//! operation: loads share it, stores and atomics hold it exclusively.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;

/// First mapped address.
pub const BASE: u64 = 0x1000_0000;
/// Alignment of every allocation.
pub const ALIGN: u64 = 256;

/// Kind of a faulting access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Load,
    Store,
    Atomic,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Load => "load",
            Access::Store => "store",
            Access::Atomic => "atomic",
        })
    }
}

/// An access outside every live allocation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {access} of {size} bytes at {addr:#x} (program {program:?})")]
pub struct Fault {
    pub access: Access,
    pub addr: u64,
    pub size: usize,
    /// Grid coordinates of the faulting program instance.
    pub program: [u32; 3],
}

impl Fault {
    pub fn new(access: Access, addr: u64, size: usize) -> Self {
        Self {
            access,
            addr,
            size,
            program: [0; 3],
        }
    }

    pub fn in_program(mut self, program: [u32; 3]) -> Self {
        self.program = program;
        self
    }
}

#[derive(Debug)]
struct State {
    next: u64,
    blocks: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug)]
pub struct Memory {
    state: RwLock<State>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next: BASE,
                blocks: BTreeMap::new(),
            }),
        }
    }

    /// Map `bytes` at a fresh aligned address.
    pub fn alloc(&self, bytes: Vec<u8>) -> u64 {
        let mut state = self.state.write();
        let addr = state.next;
        let reserved = (bytes.len() as u64).max(1).div_ceil(ALIGN) * ALIGN;
        state.next = addr + reserved;
        state.blocks.insert(addr, bytes);
        addr
    }

    /// Unmap the allocation starting at `addr`. Returns whether one existed.
    pub fn free(&self, addr: u64) -> bool {
        self.state.write().blocks.remove(&addr).is_some()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.read().blocks.len()
    }

    /// Copy `len` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, Fault> {
        let state = self.state.read();
        let (block, at) = locate(&state.blocks, addr, len).ok_or(Fault::new(Access::Load, addr, len))?;
        Ok(block[at..at + len].to_vec())
    }

    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) -> Result<(), Fault> {
        let mut state = self.state.write();
        let (block, at) = locate_mut(&mut state.blocks, addr, bytes.len())
            .ok_or(Fault::new(Access::Store, addr, bytes.len()))?;
        block[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read one `size`-byte little-endian lane per address.
    pub fn load(&self, addrs: &[u64], size: usize) -> Result<Vec<u64>, Fault> {
        let state = self.state.read();
        addrs
            .iter()
            .map(|&addr| {
                let (block, at) =
                    locate(&state.blocks, addr, size).ok_or(Fault::new(Access::Load, addr, size))?;
                Ok(read_lane(&block[at..at + size]))
            })
            .collect()
    }

    /// Write one lane per `(address, bits)` pair, in order. Nothing is
    /// written when any address faults.
    pub fn store(&self, lanes: &[(u64, u64)], size: usize) -> Result<(), Fault> {
        let mut state = self.state.write();
        check_all(&state.blocks, lanes, size, Access::Store)?;
        for &(addr, bits) in lanes {
            if let Some((block, at)) = locate_mut(&mut state.blocks, addr, size) {
                write_lane(&mut block[at..at + size], bits);
            }
        }
        Ok(())
    }

    /// Read-modify-write every lane in order under one exclusive lock;
    /// returns the prior values.
    pub fn atomic(
        &self,
        lanes: &[(u64, u64)],
        size: usize,
        update: impl Fn(u64, u64) -> u64,
    ) -> Result<Vec<u64>, Fault> {
        let mut state = self.state.write();
        check_all(&state.blocks, lanes, size, Access::Atomic)?;
        let mut prior = Vec::with_capacity(lanes.len());
        for &(addr, bits) in lanes {
            if let Some((block, at)) = locate_mut(&mut state.blocks, addr, size) {
                let slot = &mut block[at..at + size];
                let old = read_lane(slot);
                write_lane(slot, update(old, bits));
                prior.push(old);
            }
        }
        Ok(prior)
    }
}

fn locate(blocks: &BTreeMap<u64, Vec<u8>>, addr: u64, len: usize) -> Option<(&Vec<u8>, usize)> {
    let (&base, block) = blocks.range(..=addr).next_back()?;
    let at = (addr - base) as usize;
    (at.checked_add(len)? <= block.len()).then_some((block, at))
}

fn locate_mut(
    blocks: &mut BTreeMap<u64, Vec<u8>>,
    addr: u64,
    len: usize,
) -> Option<(&mut Vec<u8>, usize)> {
    let (&base, block) = blocks.range_mut(..=addr).next_back()?;
    let at = (addr - base) as usize;
    (at.checked_add(len)? <= block.len()).then_some((block, at))
}

fn check_all(
    blocks: &BTreeMap<u64, Vec<u8>>,
    lanes: &[(u64, u64)],
    size: usize,
    access: Access,
) -> Result<(), Fault> {
    for &(addr, _) in lanes {
        if locate(blocks, addr, size).is_none() {
            return Err(Fault::new(access, addr, size));
        }
    }
    Ok(())
}

fn read_lane(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn write_lane(bytes: &mut [u8], bits: u64) {
    let n = bytes.len();
    bytes.copy_from_slice(&bits.to_le_bytes()[..n]);
}
