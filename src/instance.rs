use std::fmt::{Display, Formatter};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::bridge::{CallArgs, CallTracker, SystemCalls};
use crate::config::VmKind;
use crate::engine::{self, ExecutionMode, ExecutionStrategy};
use crate::error::*;
use crate::header::{FormatVersion, ModuleHeader, ModuleImage};
use crate::jump_table::JumpTable;
use crate::machine::{Machine, PROGRAM_STACK_SIZE};
use crate::program::Program;
use crate::sandbox::SandboxMemory;
use crate::symbols::{ProfileEntry, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmState {
    /// Segments are in place; no strategy prepared yet.
    Loaded,
    Ready,
    /// At least one call is on the stack.
    Running,
    /// A containment violation was detected. Only a reload recovers.
    Faulted,
    Unloaded,
}

impl Display for VmState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VmState::Loaded => "loaded",
            VmState::Ready => "ready",
            VmState::Running => "running",
            VmState::Faulted => "faulted",
            VmState::Unloaded => "unloaded",
        })
    }
}

/// Per-load settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub mode: ExecutionMode,
    /// Contents of the symbol side file, if diagnostics are wanted.
    pub map: Option<String>,
    pub profile: bool,
}

/// A loaded bytecode module.
pub struct Instance {
    pub(crate) name: Rc<str>,
    pub(crate) header: ModuleHeader,
    pub(crate) memory: SandboxMemory,
    /// Present for extended images only.
    pub(crate) jump_table: Option<JumpTable>,
    pub(crate) program: Rc<Program>,
    pub(crate) strategy: Rc<dyn ExecutionStrategy>,
    pub(crate) requested: ExecutionMode,
    pub(crate) program_stack: i32,
    pub(crate) stack_bottom: i32,
    pub(crate) state: VmState,
    pub(crate) call_level: u32,
    pub(crate) tracker: Rc<CallTracker>,
    pub(crate) map: Option<String>,
    pub(crate) symbols: Option<SymbolTable>,
    pub(crate) profiling: bool,
    pub(crate) break_count: u64,
    pub(crate) last_fault: Option<Fault>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("mode", &self.strategy.mode())
            .field("memory", &self.memory)
            .finish()
    }
}

struct Parsed {
    header: ModuleHeader,
    program: Program,
    jump_table: Option<JumpTable>,
}

fn parse(image: &ModuleImage<'_>) -> Result<Parsed, Error> {
    let program = Program::decode(image.code, image.header.instruction_count as usize)?;
    let jump_table = match image.header.version {
        FormatVersion::Extended => Some(JumpTable::build(&image.jump_targets, &program)?),
        FormatVersion::Legacy => None,
    };
    Ok(Parsed { header: image.header.clone(), program, jump_table })
}

impl Instance {
    /// Loads `bytes` with default options and a private call tracker.
    pub fn new(name: &str, bytes: &[u8], mode: ExecutionMode) -> Result<Self, Error> {
        Self::load(name, bytes, &LoadOptions { mode, ..Default::default() }, CallTracker::new())
    }

    pub fn load(name: &str, bytes: &[u8], opts: &LoadOptions, tracker: Rc<CallTracker>) -> Result<Self, Error> {
        info!(vm = %name, "loading vm");
        let image = ModuleImage::parse(bytes).inspect_err(|e| warn!(vm = %name, error = %e, "load failed"))?;
        let parsed = parse(&image).inspect_err(|e| warn!(vm = %name, error = %e, "load failed"))?;
        let memory = SandboxMemory::from_image(&image);
        debug!(
            vm = %name,
            instructions = parsed.program.len(),
            data = memory.len(),
            jump_targets = parsed.jump_table.as_ref().map_or(0, JumpTable::declared_len),
            "segments loaded"
        );

        let mut inst = Instance {
            name: Rc::from(name),
            header: parsed.header,
            memory,
            jump_table: parsed.jump_table,
            program: Rc::new(parsed.program),
            strategy: engine::prepare(name, ExecutionMode::Interpreted, &Program::default(), None),
            requested: opts.mode,
            program_stack: 0,
            stack_bottom: 0,
            state: VmState::Loaded,
            call_level: 0,
            tracker,
            map: opts.map.clone(),
            symbols: None,
            profiling: opts.profile,
            break_count: 0,
            last_fault: None,
        };
        inst.prepare();
        Ok(inst)
    }

    /// Builds the execution strategy, the program stack and the symbol
    /// table for the current program. Moves to `Ready`.
    fn prepare(&mut self) {
        self.strategy = engine::prepare(&self.name, self.requested, &self.program, self.jump_table.as_ref());
        let size = self.memory.len() as i32;
        self.program_stack = size;
        self.stack_bottom = size - PROGRAM_STACK_SIZE as i32;
        self.symbols = self.map.as_deref().map(|text| SymbolTable::parse(text, &self.program));
        self.state = VmState::Ready;
        info!(vm = %self.name, mode = %self.strategy.mode(), "vm ready");
    }

    /// Runs the module's entry point with `command` and up to three
    /// arguments. Re-entrant: system call handlers may call back in through
    /// their [`VmContext`](crate::bridge::VmContext).
    pub fn call(&mut self, host: &mut dyn SystemCalls, command: i32, args: &[i32]) -> Result<i32, Error> {
        match self.state {
            VmState::Faulted => return Err(Error::unavailable(INSTANCE_FAULTED)),
            VmState::Unloaded => return Err(Error::unavailable(INSTANCE_UNLOADED)),
            VmState::Loaded | VmState::Ready | VmState::Running => {}
        }
        let call_args = CallArgs::new(command, args)?;

        let tracker = self.tracker.clone();
        let _guard = tracker.enter(&self.name);
        let saved_stack = self.program_stack;
        let strategy = self.strategy.clone();
        self.state = VmState::Running;
        self.call_level += 1;

        let result = {
            let mut m = Machine::new(self, host);
            m.begin(&call_args)
                .and_then(|()| strategy.run(&mut m))
                .and_then(|()| m.finish())
        };

        self.call_level -= 1;
        self.program_stack = saved_stack;
        if self.state == VmState::Running && self.call_level == 0 {
            self.state = VmState::Ready;
        }
        result
    }

    /// Marks the instance faulted and builds the error describing where.
    pub(crate) fn record_fault(&mut self, message: &'static str, instruction: usize, program: &Program) -> Error {
        let offset = program.offset_of(instruction);
        let symbol = self.symbols.as_ref().and_then(|s| s.lookup(offset));
        let fault = Fault {
            message,
            module: self.name.to_string(),
            offset,
            instruction: instruction as u32,
            symbol,
        };
        error!(vm = %self.name, instruction, offset, symbol = ?fault.symbol, "{}", message);
        self.state = VmState::Faulted;
        self.last_fault = Some(fault.clone());
        Error::Fault(fault)
    }

    /// Reloads from `bytes` in place, keeping the data allocation. Nothing
    /// changes unless the new image is accepted. `map` replaces the symbol
    /// file when given; otherwise the previous one is applied to the new
    /// code.
    ///
    /// Must not be called while a call into this instance is active.
    pub fn reload(&mut self, bytes: &[u8], map: Option<&str>) -> Result<(), Error> {
        if self.state == VmState::Unloaded { return Err(Error::unavailable(INSTANCE_UNLOADED)); }
        if self.call_level > 0 { return Err(Error::reload(RELOAD_WHILE_RUNNING)); }
        info!(vm = %self.name, "reloading vm");

        let image = ModuleImage::parse(bytes)?;
        let parsed = parse(&image)?;
        if image.data_size() != self.memory.len() {
            warn!(vm = %self.name, old = self.memory.len(), new = image.data_size(), "{}", DATA_SIZE_MISMATCH);
            return Err(Error::reload(DATA_SIZE_MISMATCH));
        }
        let old_targets = self.jump_table.as_ref().map(JumpTable::declared_len);
        let new_targets = parsed.jump_table.as_ref().map(JumpTable::declared_len);
        if old_targets != new_targets {
            warn!(vm = %self.name, old = ?old_targets, new = ?new_targets, "{}", JUMP_TABLE_MISMATCH);
            return Err(Error::reload(JUMP_TABLE_MISMATCH));
        }

        self.memory.reset(&image);
        self.header = parsed.header;
        self.program = Rc::new(parsed.program);
        self.jump_table = parsed.jump_table;
        if let Some(map) = map { self.map = Some(map.to_string()); }
        self.break_count = 0;
        self.last_fault = None;
        self.state = VmState::Loaded;
        self.prepare();
        Ok(())
    }

    /// Releases the sandbox, the jump table, the prepared code and the
    /// symbols. The instance accepts no further calls.
    pub fn unload(&mut self) -> Result<(), Error> {
        if self.call_level > 0 { return Err(Error::unavailable(INSTANCE_BUSY)); }
        info!(vm = %self.name, "unloading vm");
        self.memory.release();
        self.jump_table = None;
        self.program = Rc::new(Program::default());
        self.strategy = engine::prepare(&self.name, ExecutionMode::Interpreted, &self.program, None);
        self.symbols = None;
        self.map = None;
        self.state = VmState::Unloaded;
        self.tracker.forget(&self.name);
        Ok(())
    }

    /// Loads symbols after the fact, e.g. when diagnostics are switched on.
    pub fn attach_symbols(&mut self, map: &str) {
        self.symbols = Some(SymbolTable::parse(map, &self.program));
        self.map = Some(map.to_string());
    }

    pub fn set_profiling(&mut self, on: bool) { self.profiling = on; }

    /// Profile since the last report, highest count first. Empty without
    /// symbols.
    pub fn profile_report(&mut self) -> Vec<ProfileEntry> {
        self.symbols.as_mut().map(SymbolTable::report).unwrap_or_default()
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn call_level(&self) -> u32 { self.call_level }
    pub fn state(&self) -> VmState { self.state }
    /// Strategy actually in use, which may differ from the requested one.
    pub fn mode(&self) -> ExecutionMode { self.strategy.mode() }
    pub fn header(&self) -> &ModuleHeader { &self.header }
    pub fn program(&self) -> &Program { &self.program }
    pub fn jump_table(&self) -> Option<&JumpTable> { self.jump_table.as_ref() }
    pub fn symbols(&self) -> Option<&SymbolTable> { self.symbols.as_ref() }
    pub fn program_stack(&self) -> i32 { self.program_stack }
    pub fn stack_bottom(&self) -> i32 { self.stack_bottom }
    pub fn break_count(&self) -> u64 { self.break_count }
    pub fn last_fault(&self) -> Option<Fault> { self.last_fault.clone() }

    pub fn lookup_symbol(&self, offset: u32) -> Option<String> {
        self.symbols.as_ref()?.lookup(offset)
    }

    /// `None` once unloaded.
    pub fn memory(&self) -> Option<&SandboxMemory> {
        (self.state != VmState::Unloaded).then_some(&self.memory)
    }

    pub fn memory_mut(&mut self) -> Option<&mut SandboxMemory> {
        if self.state == VmState::Unloaded { return None; }
        Some(&mut self.memory)
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            name: self.name.to_string(),
            kind: self.strategy.mode().into(),
            state: self.state,
            instructions: self.program.len(),
            code_length: self.program.code_length,
            jump_targets: self.jump_table.as_ref().map_or(0, JumpTable::declared_len),
            data_length: self.memory.len(),
        }
    }
}

/// Summary of a loaded module for status listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    pub kind: VmKind,
    pub state: VmState,
    pub instructions: usize,
    pub code_length: u32,
    pub jump_targets: usize,
    pub data_length: u32,
}

impl Display for InstanceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} : {} ({})", self.name, self.kind, self.state)?;
        if let VmKind::Native = self.kind { return Ok(()); }
        writeln!(f, "    code length : {:7}", self.code_length)?;
        writeln!(f, "    table length: {:7}", self.jump_targets * 4)?;
        write!(f, "    data length : {:7}", self.data_length)
    }
}
