use std::path::PathBuf;

use clap::Parser;
use qvm::{CallTracker, ExecutionMode, Instance, LoadOptions, VmConfig};

mod utils;
use utils::{console_host, init_logging, module_name, read_image, read_map};

#[derive(Parser, Debug)]
#[command(name = "qvm-run")]
#[command(about = "Load a QVM image and call its entry point")]
#[command(long_about = "
qvm-run - load a bytecode module and perform one call into it

The module sees a console host: system call 1 prints a string, the shared
math and memory traps (100-113) work, every other call returns 0.

Examples:
  # Call command 0 with no arguments
  qvm-run game.qvm

  # Call command 3 with two arguments, interpreted
  qvm-run game.qvm --command 3 --args 10 20 --mode interpreted

  # Print a profile after the call (needs game.map next to the image)
  qvm-run game.qvm --profile
")]
struct Args {
    /// Path to the .qvm image
    image: PathBuf,

    /// Command number passed as the first entry argument
    #[arg(short, long, default_value_t = 0)]
    command: i32,

    /// Up to three more integer arguments
    #[arg(short, long, num_args = 0..=3, allow_negative_numbers = true)]
    args: Vec<i32>,

    /// Execution strategy
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<ExecutionMode>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Count function calls and print a report
    #[arg(short, long)]
    profile: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_mode(s: &str) -> Result<ExecutionMode, String> {
    match s {
        "interpreted" => Ok(ExecutionMode::Interpreted),
        "compiled" => Ok(ExecutionMode::Compiled),
        _ => Err(format!("unknown mode '{s}', expected interpreted or compiled")),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = match &args.config {
        Some(path) => VmConfig::from_file(path)?,
        None => VmConfig::default(),
    };
    let name = module_name(&args.image);
    let bytes = read_image(&args.image)?;
    let profile = args.profile || config.profile;
    let opts = LoadOptions {
        mode: args.mode.unwrap_or_else(|| config.kind_for(&name).execution_mode()),
        map: if profile || config.wants_symbols() { read_map(&args.image) } else { None },
        profile,
    };

    let mut inst = Instance::load(&name, &bytes, &opts, CallTracker::new())?;
    let mut host = console_host();
    let result = inst.call(&mut host, args.command, &args.args)?;
    println!("{result}");

    if profile {
        for row in inst.profile_report() {
            println!("{row}");
        }
    }
    if inst.break_count() > 0 {
        eprintln!("{} breakpoints hit", inst.break_count());
    }
    Ok(())
}
