#![deny(unsafe_code)]

mod byte_iter;
mod machine;
mod interpreter;
mod translator;

pub mod error;
pub mod header;
pub mod opcode;
pub mod program;
pub mod sandbox;
pub mod jump_table;
pub mod engine;
pub mod bridge;
pub mod instance;
pub mod native;
pub mod symbols;
pub mod traps;
pub mod source;
pub mod config;
pub mod manager;
pub mod asm;
pub mod disasm;

pub use bridge::{CallArgs, CallTracker, SyscallArgs, SystemCalls, VmContext};
pub use config::{VmConfig, VmKind};
pub use engine::ExecutionMode;
pub use error::{Error, Fault};
pub use header::{FormatVersion, ModuleHeader, ModuleImage};
pub use instance::{Instance, InstanceInfo, LoadOptions, VmState};
pub use manager::{LoadedVm, VmHandle, VmManager};
pub use native::{NativeInstance, NativeLoader, NativeModule};
pub use sandbox::{SandboxMemory, VmPtr};
pub use source::{DirImageSource, ImageSource, MemoryImageSource};
