use std::path::PathBuf;

use clap::Parser;
use qvm::disasm::disassemble;
use qvm::{ExecutionMode, Instance};

mod utils;
use utils::{init_logging, module_name, read_image, read_map};

#[derive(Parser, Debug)]
#[command(name = "qvm-inspect")]
#[command(about = "Inspect QVM images")]
#[command(long_about = "
qvm-inspect - show the layout and code of a bytecode module

Examples:
  # Header and segment summary
  qvm-inspect game.qvm

  # Add a full listing, with symbols from game.map when present
  qvm-inspect game.qvm --disassemble

  # Only the symbol table
  qvm-inspect game.qvm --symbols-only
")]
struct Args {
    /// Path to the .qvm image
    image: PathBuf,

    /// Print every instruction
    #[arg(short, long)]
    disassemble: bool,

    /// Show only the symbols
    #[arg(long)]
    symbols_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(false);

    let bytes = read_image(&args.image)?;
    let mut inst = Instance::new(&module_name(&args.image), &bytes, ExecutionMode::Interpreted)
        .map_err(|e| format!("Failed to load {}: {}", args.image.display(), e))?;
    if let Some(map) = read_map(&args.image) {
        inst.attach_symbols(&map);
    }

    if !args.symbols_only {
        let h = inst.header();
        println!("Module: {}", args.image.display());
        println!("Size: {} bytes", bytes.len());
        println!("Format: {:?} (magic 0x{:08x})", h.version, h.version.magic());
        println!();
        println!("Segments:");
        println!("  code      offset {:8}  length {:8}  ({} instructions)", h.code_offset, h.code_length, h.instruction_count);
        println!("  data      offset {:8}  length {:8}", h.data_offset, h.data_length);
        println!("  lit                        length {:8}", h.lit_length);
        println!("  bss                        length {:8}", h.bss_length);
        println!("  sandbox   {} bytes, stack bottom {}", h.data_size(), inst.stack_bottom());
        if let Some(table) = inst.jump_table() {
            println!("  jump table {} entries, {} indirect targets allowed", table.declared_len(), table.len());
        }
        println!();
    }

    if let Some(symbols) = inst.symbols() {
        println!("Symbols:");
        for sym in symbols.symbols() {
            println!("  {:08x}  {}", sym.offset, sym.name);
        }
        println!();
    }

    if args.disassemble && !args.symbols_only {
        println!("Code:");
        print!("{}", disassemble(inst.program(), inst.symbols(), inst.jump_table()));
    }
    Ok(())
}
