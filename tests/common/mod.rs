#![allow(dead_code)]

use qvm::asm::{Asm, ImageBuilder};
use qvm::{Error, ExecutionMode, FormatVersion, Instance, SyscallArgs, SystemCalls, VmContext};

/// Frame used by every test function; leaves room for four outgoing
/// arguments.
pub const FRAME: i32 = 32;

/// Enough for the program stack; the sandbox comes out at 4096 bytes.
pub const BSS: u32 = 0x1000;

pub const MODES: [ExecutionMode; 2] = [ExecutionMode::Interpreted, ExecutionMode::Compiled];

/// `vmMain` that runs `body` between its `ENTER` and `LEAVE`.
pub fn main_fn(body: impl FnOnce(&mut Asm)) -> Asm {
    let mut asm = Asm::new();
    asm.enter(FRAME);
    body(&mut asm);
    asm.leave(FRAME);
    asm
}

pub fn image(asm: &Asm, version: FormatVersion) -> Vec<u8> {
    ImageBuilder::new(version, asm.finish().unwrap()).bss(BSS).build()
}

pub fn image_with_data(asm: &Asm, version: FormatVersion, data: &[u8]) -> Vec<u8> {
    ImageBuilder::new(version, asm.finish().unwrap()).data(data).bss(BSS).build()
}

pub fn load(bytes: &[u8], mode: ExecutionMode) -> Instance {
    Instance::new("test", bytes, mode).unwrap()
}

/// Host that answers every system call with zero.
pub fn no_host() -> impl SystemCalls {
    |_: &mut VmContext<'_>, _: &SyscallArgs| -> Result<i32, Error> { Ok(0) }
}

/// Host whose call 1 doubles its first argument.
pub fn doubling_host() -> impl SystemCalls {
    |_: &mut VmContext<'_>, args: &SyscallArgs| -> Result<i32, Error> {
        match args.number() {
            1 => Ok(args.int(1).wrapping_mul(2)),
            _ => Ok(0),
        }
    }
}

/// Runs `body` as `vmMain` in `mode` and returns the call result.
pub fn eval(mode: ExecutionMode, body: impl FnOnce(&mut Asm)) -> Result<i32, Error> {
    let bytes = image(&main_fn(body), FormatVersion::Extended);
    load(&bytes, mode).call(&mut no_host(), 0, &[])
}

/// Same as [`eval`], checked to agree across both strategies.
pub fn eval_both(body: impl Fn(&mut Asm)) -> Result<i32, Error> {
    let interpreted = eval(ExecutionMode::Interpreted, &body);
    let compiled = eval(ExecutionMode::Compiled, &body);
    assert_eq!(interpreted, compiled, "strategies disagree");
    interpreted
}

pub fn fault_message(result: Result<i32, Error>) -> &'static str {
    match result {
        Err(Error::Fault(f)) => f.message,
        other => panic!("expected a fault, got {other:?}"),
    }
}
