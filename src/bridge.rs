use std::cell::RefCell;
use std::rc::Rc;

use crate::error::*;
use crate::instance::Instance;
use crate::native::NativeInstance;
use crate::sandbox::{SandboxMemory, VmPtr};

/// Command number plus three arguments.
pub const MAX_VMMAIN_ARGS: usize = 4;
/// System call number plus nineteen arguments.
pub const MAX_VMSYSCALL_ARGS: usize = 20;

/// Host-to-module call arguments, serialised into a fixed block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallArgs {
    words: [i32; MAX_VMMAIN_ARGS],
}

impl CallArgs {
    /// Missing arguments are passed as zero.
    pub fn new(command: i32, args: &[i32]) -> Result<Self, Error> {
        if args.len() >= MAX_VMMAIN_ARGS { return Err(Error::bridge(TOO_MANY_ARGS)); }
        let mut words = [0; MAX_VMMAIN_ARGS];
        words[0] = command;
        words[1..=args.len()].copy_from_slice(args);
        Ok(Self { words })
    }

    #[inline] pub fn command(&self) -> i32 { self.words[0] }
    /// `i`-th argument after the command, starting at zero.
    #[inline] pub fn arg(&self, i: usize) -> i32 { self.words.get(i + 1).copied().unwrap_or(0) }
    #[inline] pub fn words(&self) -> &[i32; MAX_VMMAIN_ARGS] { &self.words }
}

/// Module-to-host call arguments. Word 0 is the call number; words 1.. are
/// the arguments as the module passed them, including unused trailing slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    words: [i32; MAX_VMSYSCALL_ARGS],
}

impl SyscallArgs {
    pub fn from_words(words: [i32; MAX_VMSYSCALL_ARGS]) -> Self { Self { words } }

    /// Used by native modules, which call the host directly.
    pub fn new(number: i32, args: &[i32]) -> Self {
        let mut words = [0; MAX_VMSYSCALL_ARGS];
        words[0] = number;
        let n = args.len().min(MAX_VMSYSCALL_ARGS - 1);
        words[1..=n].copy_from_slice(&args[..n]);
        Self { words }
    }

    #[inline] pub fn number(&self) -> i32 { self.words[0] }
    #[inline] pub fn int(&self, i: usize) -> i32 { self.words.get(i).copied().unwrap_or(0) }
    #[inline] pub fn float(&self, i: usize) -> f32 { f32::from_bits(self.int(i) as u32) }
    #[inline] pub fn ptr(&self, i: usize) -> VmPtr { VmPtr::from_i32(self.int(i)) }
    #[inline] pub fn words(&self) -> &[i32; MAX_VMSYSCALL_ARGS] { &self.words }
}

/// Host services a module may invoke.
///
/// Handlers report their own failures through the returned integer. `Err`
/// is for propagating errors out of nested calls made through
/// [`VmContext::call`], so that a fault deep inside a re-entrant call still
/// unwinds to the outermost host call.
pub trait SystemCalls {
    fn system_call(&mut self, vm: &mut VmContext<'_>, args: &SyscallArgs) -> Result<i32, Error>;
}

impl<F> SystemCalls for F
where F: FnMut(&mut VmContext<'_>, &SyscallArgs) -> Result<i32, Error> {
    fn system_call(&mut self, vm: &mut VmContext<'_>, args: &SyscallArgs) -> Result<i32, Error> {
        self(vm, args)
    }
}

enum Target<'a> {
    Bytecode(&'a mut Instance),
    Native(&'a mut NativeInstance),
}

/// The calling instance, as seen by a system call handler.
pub struct VmContext<'a> {
    target: Target<'a>,
}

impl<'a> VmContext<'a> {
    pub(crate) fn bytecode(inst: &'a mut Instance) -> Self { Self { target: Target::Bytecode(inst) } }
    pub(crate) fn native(inst: &'a mut NativeInstance) -> Self { Self { target: Target::Native(inst) } }

    pub fn name(&self) -> &str {
        match &self.target {
            Target::Bytecode(inst) => inst.name(),
            Target::Native(inst) => inst.name(),
        }
    }

    pub fn call_level(&self) -> u32 {
        match &self.target {
            Target::Bytecode(inst) => inst.call_level(),
            Target::Native(inst) => inst.call_level(),
        }
    }

    /// Sandbox of a bytecode module. Native modules have none.
    pub fn memory(&self) -> Option<&SandboxMemory> {
        match &self.target {
            Target::Bytecode(inst) => inst.memory(),
            Target::Native(_) => None,
        }
    }

    pub fn memory_mut(&mut self) -> Option<&mut SandboxMemory> {
        match &mut self.target {
            Target::Bytecode(inst) => inst.memory_mut(),
            Target::Native(_) => None,
        }
    }

    /// Translates a pointer-valued argument into an index of the sandbox.
    pub fn arg_ptr(&self, value: i32) -> Option<usize> {
        self.memory()?.resolve(VmPtr::from_i32(value))
    }

    pub fn string(&self, value: i32) -> Option<String> {
        self.memory()?.string(VmPtr::from_i32(value))
    }

    /// Re-enters the calling module.
    pub fn call(&mut self, host: &mut dyn SystemCalls, command: i32, args: &[i32]) -> Result<i32, Error> {
        match &mut self.target {
            Target::Bytecode(inst) => inst.call(host, command, args),
            Target::Native(inst) => inst.call(host, command, args),
        }
    }
}

/// Which instance is executing, kept as an explicit stack so nested calls
/// restore the previous one when they return.
#[derive(Debug, Default)]
pub struct CallTracker {
    active: RefCell<Vec<Rc<str>>>,
    last: RefCell<Option<Rc<str>>>,
}

impl CallTracker {
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    pub fn enter(self: &Rc<Self>, name: &Rc<str>) -> CallGuard {
        self.active.borrow_mut().push(name.clone());
        *self.last.borrow_mut() = Some(name.clone());
        CallGuard { tracker: self.clone() }
    }

    /// Instance running right now, if any.
    pub fn current(&self) -> Option<Rc<str>> { self.active.borrow().last().cloned() }

    /// Most recently entered instance; survives the end of the call.
    pub fn last(&self) -> Option<Rc<str>> { self.last.borrow().clone() }

    pub fn depth(&self) -> usize { self.active.borrow().len() }

    pub(crate) fn forget(&self, name: &str) {
        let mut last = self.last.borrow_mut();
        if last.as_deref() == Some(name) { *last = None; }
    }
}

pub struct CallGuard {
    tracker: Rc<CallTracker>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.tracker.active.borrow_mut().pop();
    }
}
