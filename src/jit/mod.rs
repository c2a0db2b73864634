//! JIT entry points: modules, kernels, specialization and launch.
//!
//! A `Kernel` is compiled once per distinct launch signature. Compiled
//! kernels live in a process-wide cache keyed by kernel identity (a
//! BLAKE3 hash of the module source and the kernel name), the signature
//! and the code-generation options. Every key has its own lock, so
//! concurrent first launches of one signature compile it once while
//! other signatures proceed. Failed compilations leave no entry.

pub mod signature;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, trace};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::ast::{self, FnKind};
use crate::config::{valid_num_warps, JitConfig};
use crate::diagnostic::Diagnostic;
use crate::kir::lower::{create_kernel_lowering, LowerOptions};
use crate::kir::KernelIr;
use crate::runtime::{Arg, Device, Grid, GridExecutor, Runner};
use crate::span::Span;
use crate::trace::{trace_kernel, ConstValue};
use crate::{Error, Result};

pub use signature::{ArgKey, Signature};

// ─── Modules ──────────────────────────────────────────────────────

/// A parsed and checked source file.
#[derive(Clone, Debug)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

#[derive(Debug)]
struct ModuleInner {
    source: String,
    file: ast::File,
}

impl Module {
    pub fn parse(source: &str) -> Result<Module> {
        let file = crate::parse_source(source)?;
        crate::typecheck::check_file(&file)?;
        Ok(Module {
            inner: Arc::new(ModuleInner {
                source: source.to_string(),
                file,
            }),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Module> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&source)
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn file(&self) -> &ast::File {
        &self.inner.file
    }

    /// Names of the launchable kernels, in definition order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.inner
            .file
            .kernels()
            .map(|k| k.name.node.as_str())
            .collect()
    }

    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        match self.inner.file.find(name) {
            Some(def) if def.kind == FnKind::Kernel => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(self.inner.source.as_bytes());
                hasher.update(&[0]);
                hasher.update(name.as_bytes());
                Ok(Kernel {
                    module: self.clone(),
                    name: name.to_string(),
                    identity: *hasher.finalize().as_bytes(),
                })
            }
            Some(def) => Err(Error::Compile(vec![Diagnostic::name_error(
                format!("'{}' is a helper, not a kernel", name),
                def.name.span,
            )
            .with_help(format!("declare it as `kernel {}(...)`", name))])),
            None => Err(Error::Compile(vec![Diagnostic::name_error(
                format!("no kernel named '{}'", name),
                Span::dummy(),
            )])),
        }
    }
}

// ─── Launch options ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LaunchOptions {
    /// Warps per program instance; affects the emitted assembly only.
    pub num_warps: u32,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            num_warps: JitConfig::global().num_warps,
        }
    }
}

impl LaunchOptions {
    pub fn num_warps(num_warps: u32) -> Self {
        Self { num_warps }
    }

    fn lower_options(&self) -> LowerOptions {
        LowerOptions {
            num_warps: self.num_warps,
            arch: JitConfig::global().arch.clone(),
        }
    }
}

// ─── Compiled kernels ─────────────────────────────────────────────

static SERIAL: AtomicU64 = AtomicU64::new(0);

/// A kernel specialized for one signature.
#[derive(Debug)]
pub struct CompiledKernel {
    name: String,
    signature: Signature,
    options: LowerOptions,
    ir: KernelIr,
    ir_text: String,
    ptx: String,
    serial: u64,
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn ir(&self) -> &KernelIr {
        &self.ir
    }

    pub fn num_warps(&self) -> u32 {
        self.options.num_warps
    }

    /// Process-unique number of this compilation.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Textual artifacts: `"ir"` (KIR) or `"ptx"`.
    pub fn asm(&self, which: &str) -> Option<&str> {
        match which {
            "ptx" => Some(&self.ptx),
            "ir" | "kir" => Some(&self.ir_text),
            _ => None,
        }
    }

    /// Run over `grid` with launch arguments matching the signature.
    pub fn run(&self, device: &Device, grid: &Grid, args: &[Arg]) -> Result<()> {
        let dims = grid.dims().map_err(Error::Launch)?;
        let keys: Vec<ArgKey> = args.iter().map(Arg::key).collect();
        if keys != self.signature.args {
            return Err(Error::Launch(format!(
                "arguments {} do not match the compiled signature {}",
                Signature::new(keys),
                self.signature
            )));
        }
        let params: Vec<u64> = self
            .signature
            .param_positions()
            .into_iter()
            .map(|i| args[i].bits())
            .collect();
        debug!(
            "launch {}{} over grid {} ({} programs)",
            self.name,
            self.signature,
            grid,
            grid.num_programs()
        );
        GridExecutor::new(device).run(&self.ir, dims, &params)?;
        Ok(())
    }
}

// ─── Cache ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    kernel: [u8; 32],
    signature: Signature,
    options: LowerOptions,
}

type Slot = Arc<Mutex<Option<Arc<CompiledKernel>>>>;

static CACHE: Lazy<Mutex<HashMap<CacheKey, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Number of successfully compiled signatures of every kernel.
pub fn cache_len() -> usize {
    CACHE.lock().values().filter(|s| s.lock().is_some()).count()
}

// ─── Kernels ──────────────────────────────────────────────────────

/// A launchable kernel of a `Module`.
#[derive(Clone, Debug)]
pub struct Kernel {
    module: Module,
    name: String,
    identity: [u8; 32],
}

impl Kernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex BLAKE3 identity of (module source, kernel name).
    pub fn identity(&self) -> String {
        blake3::Hash::from(self.identity).to_hex().to_string()
    }

    fn def(&self) -> Option<&ast::FnDef> {
        self.module.file().find(&self.name)
    }

    /// Runtime parameter names, in launch order.
    pub fn runtime_params(&self) -> Vec<&str> {
        self.def()
            .map(|d| d.runtime_params().map(|p| p.name.node.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn const_params(&self) -> Vec<&str> {
        self.def()
            .map(|d| d.const_params().map(|p| p.name.node.as_str()).collect())
            .unwrap_or_default()
    }

    /// Signatures of this kernel currently in the cache.
    pub fn cached_signatures(&self) -> Vec<Signature> {
        CACHE
            .lock()
            .iter()
            .filter(|(k, slot)| k.kernel == self.identity && slot.lock().is_some())
            .map(|(k, _)| k.signature.clone())
            .collect()
    }

    /// The signature a launch with `args` and `consts` specializes for.
    pub fn signature_for(&self, args: &[Arg], consts: &[(&str, ConstValue)]) -> Signature {
        let mut sig = Signature::new(args.iter().map(Arg::key).collect());
        for (name, value) in consts {
            sig.consts.insert(name.to_string(), value.clone());
        }
        sig
    }

    /// Compile (or fetch) the specialization for `signature`.
    pub fn compile(&self, signature: &Signature, options: &LaunchOptions) -> Result<Arc<CompiledKernel>> {
        if !valid_num_warps(options.num_warps) {
            return Err(Error::Launch(format!(
                "num_warps must be a power of two in 1..=32, got {}",
                options.num_warps
            )));
        }
        let key = CacheKey {
            kernel: self.identity,
            signature: signature.clone(),
            options: options.lower_options(),
        };
        let slot = Arc::clone(CACHE.lock().entry(key.clone()).or_default());
        let mut guard = slot.lock();
        if let Some(compiled) = guard.as_ref() {
            debug!("cache hit: {}{}", self.name, signature);
            return Ok(Arc::clone(compiled));
        }
        match self.build(signature, key.options.clone()) {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                *guard = Some(Arc::clone(&compiled));
                Ok(compiled)
            }
            Err(e) => {
                drop(guard);
                let mut map = CACHE.lock();
                let vacant = map
                    .get(&key)
                    .and_then(|s| s.try_lock().map(|g| g.is_none()))
                    .unwrap_or(false);
                if vacant {
                    map.remove(&key);
                }
                Err(e)
            }
        }
    }

    fn build(&self, signature: &Signature, options: LowerOptions) -> Result<CompiledKernel> {
        debug!("compiling {}{} (num_warps={})", self.name, signature, options.num_warps);
        let ir = trace_kernel(self.module.file(), &self.name, signature).map_err(|diags| {
            debug!("compilation of {}{} failed: {}", self.name, signature, diags.len());
            Error::Compile(diags)
        })?;
        let ir_text = ir.to_string();
        if JitConfig::global().dump_ir {
            info!("{}{}:\n{}", self.name, signature, ir_text);
        } else {
            trace!("{}", ir_text);
        }
        let backend = create_kernel_lowering("ptx")
            .ok_or_else(|| Error::Launch("no ptx backend available".to_string()))?;
        let asm = backend.lower(&ir, &options);
        Ok(CompiledKernel {
            name: self.name.clone(),
            signature: signature.clone(),
            options,
            ptx: asm,
            ir,
            ir_text,
            serial: SERIAL.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Specialize for the arguments, then run every program of `grid`.
    /// Returns the compiled kernel used.
    pub fn launch(
        &self,
        device: &Device,
        grid: impl Into<Grid>,
        args: &[Arg],
        consts: &[(&str, ConstValue)],
        options: &LaunchOptions,
    ) -> Result<Arc<CompiledKernel>> {
        let grid = grid.into();
        grid.dims().map_err(Error::Launch)?;
        let signature = self.signature_for(args, consts);
        let compiled = self.compile(&signature, options)?;
        compiled.run(device, &grid, args)?;
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    const SRC: &str = "
fn helper(x) {
    return x
}

kernel copy(Z, X, const N) {
    let off = arange(0, N)
    store(Z + off, helper(load(X + off)))
}
";

    #[test]
    fn test_kernel_lookup() {
        let m = Module::parse(SRC).unwrap();
        assert_eq!(m.kernel_names(), vec!["copy"]);
        let k = m.kernel("copy").unwrap();
        assert_eq!(k.runtime_params(), vec!["Z", "X"]);
        assert_eq!(k.const_params(), vec!["N"]);
        assert_eq!(k.identity().len(), 64);
        assert_eq!(m.kernel("helper").unwrap_err().kind(), Some(crate::ErrorKind::Name));
        assert!(m.kernel("nope").is_err());
    }

    #[test]
    fn test_identity_depends_on_source_and_name() {
        let a = Module::parse(SRC).unwrap().kernel("copy").unwrap();
        let b = Module::parse(SRC).unwrap().kernel("copy").unwrap();
        let c = Module::parse(&format!("{}\n# edited\n", SRC))
            .unwrap()
            .kernel("copy")
            .unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_compile_is_cached_per_signature() {
        let src = format!("{}\n# cache test\n", SRC);
        let k = Module::parse(&src).unwrap().kernel("copy").unwrap();
        let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::ptr(DType::F32)])
            .with_const("N", 64i64);
        let opts = LaunchOptions::num_warps(4);
        let first = k.compile(&sig, &opts).unwrap();
        let again = k.compile(&sig, &opts).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        let other = k.compile(&sig.clone().with_const("N", 128i64), &opts).unwrap();
        assert_ne!(first.serial(), other.serial());
        assert_eq!(k.cached_signatures().len(), 2);
    }

    #[test]
    fn test_failed_compilation_is_not_cached() {
        let src = format!("{}\n# failure test\n", SRC);
        let k = Module::parse(&src).unwrap().kernel("copy").unwrap();
        let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::ptr(DType::F32)]);
        let err = k.compile(&sig, &LaunchOptions::num_warps(4)).unwrap_err();
        assert_eq!(err.kind(), Some(crate::ErrorKind::Value));
        assert!(k.cached_signatures().is_empty());
    }

    #[test]
    fn test_bad_num_warps() {
        let k = Module::parse(SRC).unwrap().kernel("copy").unwrap();
        let sig = Signature::default();
        assert!(matches!(
            k.compile(&sig, &LaunchOptions::num_warps(3)),
            Err(Error::Launch(_))
        ));
    }

    #[test]
    fn test_asm_names() {
        let src = format!("{}\n# asm test\n", SRC);
        let k = Module::parse(&src).unwrap().kernel("copy").unwrap();
        let sig = Signature::new(vec![ArgKey::ptr(DType::F32), ArgKey::ptr(DType::F32)])
            .with_const("N", 128i64);
        let c = k.compile(&sig, &LaunchOptions::num_warps(4)).unwrap();
        assert!(c.asm("ir").unwrap().starts_with("kernel copy("));
        assert!(c.asm("ptx").unwrap().contains(".entry copy"));
        assert!(c.asm("sass").is_none());
    }
}
