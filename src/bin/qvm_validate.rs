use std::path::{Path, PathBuf};

use clap::Parser;
use qvm::{ExecutionMode, Instance};

mod utils;
use utils::{init_logging, module_name, read_image};

#[derive(Parser, Debug)]
#[command(name = "qvm-validate")]
#[command(about = "Check that QVM images load")]
#[command(long_about = "
qvm-validate - load-time validation of bytecode modules

Each image goes through the full loader: header and segment bounds,
instruction decoding, static branch targets and the jump table. Nothing is
executed.

Examples:
  # Validate a single module
  qvm-validate vm/game.qvm

  # Validate several, quietly
  qvm-validate vm/*.qvm --quiet
")]
struct Args {
    /// Path(s) to .qvm images
    images: Vec<PathBuf>,

    /// Show header details
    #[arg(short, long)]
    verbose: bool,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn validate_file(path: &Path, verbose: bool, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    if verbose {
        println!("Validating: {}", path.display());
    }
    let bytes = read_image(path)?;
    if verbose {
        println!("  Size: {} bytes", bytes.len());
    }

    match Instance::new(&module_name(path), &bytes, ExecutionMode::Interpreted) {
        Ok(inst) => {
            if verbose {
                let h = inst.header();
                println!("  Format: {:?}", h.version);
                println!("  Instructions: {}", h.instruction_count);
                println!("  Code: {} bytes", h.code_length);
                println!("  Data: {} + {} lit + {} bss -> {} bytes", h.data_length, h.lit_length, h.bss_length, h.data_size());
                if let Some(table) = inst.jump_table() {
                    println!("  Jump targets: {} declared, {} allowed", table.declared_len(), table.len());
                }
            }
            if !quiet {
                println!("VALID: {}", path.display());
            }
            Ok(())
        }
        Err(e) => Err(format!("INVALID: {} - {}", path.display(), e).into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(false);

    if args.images.is_empty() {
        eprintln!("Error: No images specified");
        eprintln!("Usage: qvm-validate <IMAGES>...");
        std::process::exit(1);
    }

    let mut errors = Vec::new();
    for path in &args.images {
        if !path.exists() {
            errors.push(format!("ERROR: {} - File not found", path.display()));
            continue;
        }
        if let Err(e) = validate_file(path, args.verbose, args.quiet) {
            errors.push(e.to_string());
        }
    }

    if !errors.is_empty() {
        eprintln!("\nValidation errors:");
        for error in &errors {
            eprintln!("{error}");
        }
    }

    if args.images.len() > 1 && !args.quiet {
        println!("\nSummary:");
        println!("  Valid: {}/{}", args.images.len() - errors.len(), args.images.len());
        if !errors.is_empty() {
            println!("  Invalid: {}/{}", errors.len(), args.images.len());
        }
    }

    if errors.is_empty() { Ok(()) } else { std::process::exit(1) }
}
