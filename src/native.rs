use std::rc::Rc;

use tracing::info;

use crate::bridge::{CallArgs, CallTracker, SystemCalls, VmContext};
use crate::error::*;

/// A module compiled into, or linked by, the host. It shares the host's
/// address space, so there is no sandbox and pointer arguments are opaque.
pub trait NativeModule {
    /// The module's entry point. `vm` is how it reaches the host's system
    /// calls and re-enters itself.
    fn vm_main(&self, host: &mut dyn SystemCalls, vm: &mut VmContext<'_>, args: &CallArgs) -> Result<i32, Error>;
}

/// Finds native modules by name.
pub trait NativeLoader {
    fn load(&self, name: &str) -> Option<Rc<dyn NativeModule>>;
}

/// Loader that never finds anything, for hosts without native modules.
#[derive(Debug, Default)]
pub struct NoNativeModules;

impl NativeLoader for NoNativeModules {
    fn load(&self, _name: &str) -> Option<Rc<dyn NativeModule>> { None }
}

pub struct NativeInstance {
    name: Rc<str>,
    module: Rc<dyn NativeModule>,
    call_level: u32,
    tracker: Rc<CallTracker>,
}

impl std::fmt::Debug for NativeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeInstance")
            .field("name", &self.name)
            .field("call_level", &self.call_level)
            .finish()
    }
}

impl NativeInstance {
    pub fn new(name: &str, module: Rc<dyn NativeModule>, tracker: Rc<CallTracker>) -> Self {
        info!(vm = %name, "loaded native vm");
        Self { name: Rc::from(name), module, call_level: 0, tracker }
    }

    pub fn call(&mut self, host: &mut dyn SystemCalls, command: i32, args: &[i32]) -> Result<i32, Error> {
        let call_args = CallArgs::new(command, args)?;
        let tracker = self.tracker.clone();
        let _guard = tracker.enter(&self.name);
        let module = self.module.clone();
        self.call_level += 1;
        let result = module.vm_main(host, &mut VmContext::native(self), &call_args);
        self.call_level -= 1;
        result
    }

    pub(crate) fn forget(&self) { self.tracker.forget(&self.name); }

    pub fn name(&self) -> &str { &self.name }
    pub fn call_level(&self) -> u32 { self.call_level }
}
