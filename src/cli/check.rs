use std::path::PathBuf;

use clap::Args;

use super::load_module;

#[derive(Args)]
pub struct CheckArgs {
    /// Input .tsl file
    pub input: PathBuf,
}

pub fn cmd_check(args: CheckArgs) {
    let module = load_module(&args.input);
    for name in module.kernel_names() {
        let Ok(kernel) = module.kernel(name) else {
            continue;
        };
        let consts: Vec<String> = kernel
            .const_params()
            .iter()
            .map(|c| format!("const {}", c))
            .collect();
        let params: Vec<&str> = kernel
            .runtime_params()
            .into_iter()
            .chain(consts.iter().map(String::as_str))
            .collect();
        println!("kernel {}({})", name, params.join(", "));
    }
    eprintln!("OK: {}", args.input.display());
}
