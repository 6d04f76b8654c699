use std::fmt::{Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    Load(&'static str),
    #[error("{0}")]
    ReloadMismatch(&'static str),
    #[error("{0}")]
    Fault(Fault),
    #[error("{0}")]
    Bridge(&'static str),
    #[error("{0}")]
    Unavailable(&'static str),
    #[error("{0}")]
    Config(String),
}

impl Error {
    #[inline] pub fn load(msg: &'static str) -> Self { Error::Load(msg) }
    #[inline] pub fn reload(msg: &'static str) -> Self { Error::ReloadMismatch(msg) }
    #[inline] pub fn bridge(msg: &'static str) -> Self { Error::Bridge(msg) }
    #[inline] pub fn unavailable(msg: &'static str) -> Self { Error::Unavailable(msg) }

    pub fn is_fault(&self) -> bool { matches!(self, Error::Fault(_)) }
}

/// A containment violation raised while a module was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: &'static str,
    pub module: String,
    /// Byte offset of the faulting instruction inside the code segment.
    pub offset: u32,
    pub instruction: u32,
    pub symbol: Option<String>,
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.symbol {
            Some(sym) => write!(f, "{}: {} at {} (offset 0x{:x})", self.module, self.message, sym, self.offset),
            None => write!(f, "{}: {} at offset 0x{:x}", self.module, self.message, self.offset),
        }
    }
}

// Load errors
pub const BAD_HEADER: &str = "bad header";
pub const BAD_MAGIC: &str = "does not have a recognisable magic number in its header";
pub const BAD_OPCODE: &str = "illegal opcode";
pub const BAD_BRANCH_TARGET: &str = "jump to invalid instruction number";
pub const BAD_JUMP_TABLE_ENTRY: &str = "jump table entry is not an instruction";
pub const CODE_OVERRUN: &str = "instruction stream runs past the code segment";
pub const DATA_TOO_LARGE: &str = "data segment too large";
pub const IMAGE_TRUNCATED: &str = "image shorter than its header";
pub const MODULE_NOT_FOUND: &str = "couldn't open vm file";
pub const SEGMENT_OUT_OF_IMAGE: &str = "segment lies outside the image";
pub const TOO_MANY_VMS: &str = "too many vms loaded";
// Reload errors
pub const DATA_SIZE_MISMATCH: &str = "data region size not matching after restart";
pub const JUMP_TABLE_MISMATCH: &str = "jump table size not matching after restart";
pub const RELOAD_WHILE_RUNNING: &str = "restart requested while a call is active";
pub const RESTART_FAILED: &str = "restart failed";
// Containment faults
pub const BAD_INSTRUCTION: &str = "bad vm instruction";
pub const BLOCK_COPY_OUT_OF_RANGE: &str = "OP_BLOCK_COPY out of range";
pub const DIVIDE_BY_ZERO: &str = "integer divide by zero";
pub const ILLEGAL_JUMP: &str = "indirect jump to an illegal target";
pub const OPSTACK_CORRUPTED: &str = "operand stack corrupted";
pub const OPSTACK_OVERFLOW: &str = "operand stack overflow";
pub const OPSTACK_UNDERFLOW: &str = "operand stack underflow";
pub const PC_OUT_OF_RANGE: &str = "program counter out of range";
pub const PC_OUT_OF_RANGE_CALL: &str = "program counter out of range in OP_CALL";
pub const PC_OUT_OF_RANGE_LEAVE: &str = "program counter out of range in OP_LEAVE";
pub const STACK_OVERFLOW: &str = "programStack overflow";
// Bridge / availability
pub const TOO_MANY_ARGS: &str = "too many arguments for vmMain";
pub const INSTANCE_FAULTED: &str = "vm faulted and must be restarted";
pub const INSTANCE_UNLOADED: &str = "vm has been unloaded";
pub const INSTANCE_BUSY: &str = "vm is in use";
pub const UNKNOWN_VM: &str = "no vm loaded under that name";
// Translation
pub const TRANSLATION_LIMIT: &str = "module too large to translate";
