use std::path::PathBuf;
use std::process;

use clap::{Args, ValueEnum};
use tessel::{ArgKey, ConstValue, Kernel, LaunchOptions, Signature};

use super::{exit_with, load_module, split_binding};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Emit {
    Ptx,
    Ir,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Input .tsl file
    pub input: PathBuf,
    /// Kernel to specialize
    #[arg(short, long)]
    pub kernel: String,
    /// Runtime argument key, e.g. `X=*f32:16`, `n=i32`, `stride=i32=1`
    #[arg(long = "arg", value_name = "NAME=SPEC")]
    pub args: Vec<String>,
    /// Constant binding, e.g. `BLOCK=128`, `DTYPE=float16`
    #[arg(long = "const", value_name = "NAME=VALUE")]
    pub consts: Vec<String>,
    /// Artifact to write
    #[arg(long, value_enum, default_value = "ptx")]
    pub emit: Emit,
    /// Warps per program (default: TESSEL_NUM_WARPS or 4)
    #[arg(long)]
    pub num_warps: Option<u32>,
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_build(args: BuildArgs) {
    let module = load_module(&args.input);
    let kernel = match module.kernel(&args.kernel) {
        Ok(k) => k,
        Err(e) => exit_with(e, &args.input, module.source()),
    };
    let signature = match signature(&kernel, &args.args, &args.consts) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("error: {}", msg);
            process::exit(1);
        }
    };
    let options = match args.num_warps {
        Some(n) => LaunchOptions::num_warps(n),
        None => LaunchOptions::default(),
    };
    let compiled = match kernel.compile(&signature, &options) {
        Ok(c) => c,
        Err(e) => exit_with(e, &args.input, module.source()),
    };
    let which = match args.emit {
        Emit::Ptx => "ptx",
        Emit::Ir => "ir",
    };
    let text = compiled.asm(which).unwrap_or_default();
    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!("Compiled {}{} -> {}", kernel.name(), signature, path.display());
        }
        None => print!("{}", text),
    }
}

/// Build the signature from `--arg` / `--const` bindings. Runtime
/// arguments follow parameter order; trailing ones may fall back to
/// their defaults.
fn signature(kernel: &Kernel, arg_specs: &[String], const_specs: &[String]) -> Result<Signature, String> {
    let mut given = std::collections::BTreeMap::new();
    for spec in arg_specs {
        let (name, key) = split_binding(spec)?;
        let key: ArgKey = key.parse().map_err(|e| format!("--arg {}: {}", name, e))?;
        if !kernel.runtime_params().contains(&name.as_str()) {
            return Err(format!("kernel '{}' has no runtime parameter '{}'", kernel.name(), name));
        }
        given.insert(name, key);
    }
    let mut keys = Vec::new();
    let mut missing: Option<&str> = None;
    for p in kernel.runtime_params() {
        match (given.get(p), missing) {
            (Some(_), Some(gap)) => {
                return Err(format!("--arg {} given but earlier parameter '{}' is not", p, gap))
            }
            (Some(key), None) => keys.push(*key),
            (None, _) => missing = missing.or(Some(p)),
        }
    }
    let mut sig = Signature::new(keys);
    for spec in const_specs {
        let (name, value) = split_binding(spec)?;
        let value: ConstValue = value.parse().map_err(|e| format!("--const {}: {}", name, e))?;
        sig.consts.insert(name, value);
    }
    Ok(sig)
}
