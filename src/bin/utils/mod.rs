#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt, EnvFilter};

use qvm::SystemCalls;
use qvm::traps;

/// Installs the log subscriber. `RUST_LOG` overrides the default filter;
/// `--debug` raises it.
pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "debug" } else { "warn,qvm=info" })
    });
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn read_image(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e).into())
}

/// `foo.qvm` -> `foo.map`, if that exists.
pub fn read_map(path: &Path) -> Option<String> {
    let map: PathBuf = path.with_extension("map");
    fs::read_to_string(map).ok()
}

pub fn module_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "vm".to_string())
}

/// Host that only offers the shared traps plus a print call (1), and
/// answers everything else with zero.
pub fn console_host() -> impl SystemCalls {
    |vm: &mut qvm::VmContext<'_>, args: &qvm::SyscallArgs| -> Result<i32, qvm::Error> {
        if let Some(r) = traps::dispatch(vm, args) { return Ok(r); }
        match args.number() {
            1 => {
                if let Some(text) = vm.string(args.int(1)) { print!("{text}"); }
                Ok(0)
            }
            n => {
                tracing::warn!(number = n, "unhandled system call");
                Ok(0)
            }
        }
    }
}
