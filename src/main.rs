mod cli;

use clap::{Parser, Subcommand};

use cli::build::BuildArgs;
use cli::check::CheckArgs;

#[derive(Parser)]
#[command(
    name = "tessel",
    version,
    about = "Tessel: JIT compiler for tile-based GPU kernels"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and check a .tsl file, listing its kernels
    Check(CheckArgs),
    /// Specialize one kernel for a signature and emit PTX or KIR
    Build(BuildArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => cli::check::cmd_check(args),
        Command::Build(args) => cli::build::cmd_build(args),
    }
}
