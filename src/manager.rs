use std::cell::RefCell;
use std::fmt::Write;
use std::rc::Rc;

use tracing::{info, warn};

use crate::bridge::{CallTracker, SystemCalls};
use crate::config::{VmConfig, VmKind};
use crate::error::*;
use crate::instance::{Instance, InstanceInfo, LoadOptions, VmState};
use crate::native::{NativeInstance, NativeLoader, NoNativeModules};
use crate::source::ImageSource;

/// A module loaded under some name, bytecode or native.
#[derive(Debug)]
pub enum LoadedVm {
    Bytecode(Instance),
    Native(NativeInstance),
}

pub type VmHandle = Rc<RefCell<LoadedVm>>;

impl LoadedVm {
    pub fn name(&self) -> &str {
        match self {
            LoadedVm::Bytecode(inst) => inst.name(),
            LoadedVm::Native(inst) => inst.name(),
        }
    }

    pub fn kind(&self) -> VmKind {
        match self {
            LoadedVm::Bytecode(inst) => inst.mode().into(),
            LoadedVm::Native(_) => VmKind::Native,
        }
    }

    pub fn call(&mut self, host: &mut dyn SystemCalls, command: i32, args: &[i32]) -> Result<i32, Error> {
        match self {
            LoadedVm::Bytecode(inst) => inst.call(host, command, args),
            LoadedVm::Native(inst) => inst.call(host, command, args),
        }
    }

    pub fn as_bytecode(&self) -> Option<&Instance> {
        match self {
            LoadedVm::Bytecode(inst) => Some(inst),
            LoadedVm::Native(_) => None,
        }
    }

    pub fn as_bytecode_mut(&mut self) -> Option<&mut Instance> {
        match self {
            LoadedVm::Bytecode(inst) => Some(inst),
            LoadedVm::Native(_) => None,
        }
    }

    pub fn info(&self) -> InstanceInfo {
        match self {
            LoadedVm::Bytecode(inst) => inst.info(),
            LoadedVm::Native(inst) => InstanceInfo {
                name: inst.name().to_string(),
                kind: VmKind::Native,
                state: VmState::Ready,
                instructions: 0,
                code_length: 0,
                jump_targets: 0,
                data_length: 0,
            },
        }
    }
}

/// Owns every loaded module and decides how each one is loaded.
pub struct VmManager {
    config: VmConfig,
    source: Box<dyn ImageSource>,
    natives: Box<dyn NativeLoader>,
    tracker: Rc<CallTracker>,
    /// Names are kept outside the cells so lookups work during a call.
    vms: Vec<(String, VmHandle)>,
}

impl VmManager {
    pub fn new(config: VmConfig, source: impl ImageSource + 'static) -> Self {
        Self::with_natives(config, source, NoNativeModules)
    }

    pub fn with_natives(config: VmConfig, source: impl ImageSource + 'static, natives: impl NativeLoader + 'static) -> Self {
        Self {
            config,
            source: Box::new(source),
            natives: Box::new(natives),
            tracker: CallTracker::new(),
            vms: Vec::new(),
        }
    }

    pub fn config(&self) -> &VmConfig { &self.config }
    pub fn tracker(&self) -> &Rc<CallTracker> { &self.tracker }
    pub fn len(&self) -> usize { self.vms.len() }
    pub fn is_empty(&self) -> bool { self.vms.is_empty() }

    fn find(&self, name: &str) -> Option<usize> {
        self.vms.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<VmHandle> {
        self.find(name).map(|i| self.vms[i].1.clone())
    }

    /// Returns the module loaded under `name`, loading it first if needed.
    pub fn create(&mut self, name: &str) -> Result<VmHandle, Error> {
        if let Some(vm) = self.get(name) {
            return Ok(vm);
        }
        if self.vms.len() >= self.config.max_instances {
            warn!(vm = %name, max = self.config.max_instances, "{}", TOO_MANY_VMS);
            return Err(Error::load(TOO_MANY_VMS));
        }

        let kind = self.config.kind_for(name);
        let vm = match kind {
            VmKind::Native => match self.natives.load(name) {
                Some(module) => LoadedVm::Native(NativeInstance::new(name, module, self.tracker.clone())),
                None => {
                    info!(vm = %name, "no native module, loading bytecode");
                    LoadedVm::Bytecode(self.load_bytecode(name, kind)?)
                }
            },
            VmKind::Interpreted | VmKind::Compiled => LoadedVm::Bytecode(self.load_bytecode(name, kind)?),
        };
        let handle = Rc::new(RefCell::new(vm));
        self.vms.push((name.to_string(), handle.clone()));
        Ok(handle)
    }

    fn load_options(&self, name: &str, kind: VmKind) -> LoadOptions {
        LoadOptions {
            mode: kind.execution_mode(),
            map: if self.config.wants_symbols() { self.source.symbol_map(name) } else { None },
            profile: self.config.profile,
        }
    }

    /// Tries every image the source has for `name`; a candidate that fails
    /// to load gives way to the next.
    fn load_bytecode(&self, name: &str, kind: VmKind) -> Result<Instance, Error> {
        let opts = self.load_options(name, kind);
        let mut last = Error::load(MODULE_NOT_FOUND);
        for bytes in self.source.images(name) {
            match Instance::load(name, &bytes, &opts, self.tracker.clone()) {
                Ok(inst) => return Ok(inst),
                Err(e @ Error::Load(_)) => {
                    warn!(vm = %name, error = %e, "trying next image");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Bytecode modules are reloaded in place and keep their data
    /// allocation; native modules are rebuilt from scratch.
    pub fn restart(&mut self, name: &str) -> Result<(), Error> {
        let handle = self.get(name).ok_or(Error::unavailable(UNKNOWN_VM))?;
        let mut vm = handle.try_borrow_mut().map_err(|_| Error::unavailable(INSTANCE_BUSY))?;
        info!(vm = %name, "restarting vm");
        match &mut *vm {
            LoadedVm::Bytecode(inst) => {
                let map = if self.config.wants_symbols() { self.source.symbol_map(name) } else { None };
                let mut last = Error::load(MODULE_NOT_FOUND);
                for bytes in self.source.images(name) {
                    match inst.reload(&bytes, map.as_deref()) {
                        Ok(()) => return Ok(()),
                        Err(e @ Error::Load(_)) => last = e,
                        Err(e) => return Err(e),
                    }
                }
                Err(last)
            }
            LoadedVm::Native(_) => {
                let module = self.natives.load(name).ok_or(Error::reload(RESTART_FAILED))?;
                *vm = LoadedVm::Native(NativeInstance::new(name, module, self.tracker.clone()));
                Ok(())
            }
        }
    }

    pub fn unload(&mut self, name: &str) -> Result<(), Error> {
        let i = self.find(name).ok_or(Error::unavailable(UNKNOWN_VM))?;
        {
            let mut vm = self.vms[i].1.try_borrow_mut().map_err(|_| Error::unavailable(INSTANCE_BUSY))?;
            match &mut *vm {
                LoadedVm::Bytecode(inst) => inst.unload()?,
                LoadedVm::Native(inst) => inst.forget(),
            }
        }
        self.vms.remove(i);
        Ok(())
    }

    /// Unloads everything not currently executing.
    pub fn clear(&mut self) {
        let names: Vec<String> = self.vms.iter().map(|(n, _)| n.clone()).collect();
        for name in names {
            if let Err(e) = self.unload(&name) {
                warn!(vm = %name, error = %e, "unload failed");
            }
        }
    }

    /// Calls into the module loaded under `name`.
    pub fn call(&self, name: &str, host: &mut dyn SystemCalls, command: i32, args: &[i32]) -> Result<i32, Error> {
        let handle = self.get(name).ok_or(Error::unavailable(UNKNOWN_VM))?;
        let mut vm = handle.try_borrow_mut().map_err(|_| Error::unavailable(INSTANCE_BUSY))?;
        vm.call(host, command, args)
    }

    /// Name of the module executing right now.
    pub fn current(&self) -> Option<Rc<str>> { self.tracker.current() }

    /// Name of the module most recently called, kept after the call ends.
    pub fn last(&self) -> Option<Rc<str>> { self.tracker.last() }

    /// Status of every module not currently borrowed.
    pub fn info(&self) -> Vec<InstanceInfo> {
        self.vms.iter().filter_map(|(_, vm)| vm.try_borrow().ok().map(|vm| vm.info())).collect()
    }

    /// Human-readable listing, one block per module.
    pub fn report(&self) -> String {
        let mut out = String::from("Registered virtual machines:\n");
        for (name, vm) in &self.vms {
            match vm.try_borrow() {
                Ok(vm) => { let _ = writeln!(out, "{}", vm.info()); }
                Err(_) => { let _ = writeln!(out, "{name} : busy"); }
            }
        }
        out
    }
}
