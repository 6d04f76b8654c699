use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::ExecutionMode;
use crate::error::Error;

/// How a module should be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    /// Host-linked code through a [`NativeLoader`](crate::native::NativeLoader).
    Native,
    Interpreted,
    #[default]
    Compiled,
}

impl From<ExecutionMode> for VmKind {
    fn from(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Interpreted => VmKind::Interpreted,
            ExecutionMode::Compiled => VmKind::Compiled,
        }
    }
}

impl Display for VmKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VmKind::Native => "native",
            VmKind::Interpreted => "interpreted",
            VmKind::Compiled => "compiled",
        })
    }
}

impl VmKind {
    /// Bytecode strategy for this kind. Native modules that cannot be found
    /// run compiled.
    pub fn execution_mode(self) -> ExecutionMode {
        match self {
            VmKind::Interpreted => ExecutionMode::Interpreted,
            VmKind::Native | VmKind::Compiled => ExecutionMode::Compiled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub default_kind: VmKind,
    /// Per-module overrides of `default_kind`.
    pub modules: HashMap<String, VmKind>,
    /// Symbols are loaded when above zero.
    pub debug_level: u32,
    pub profile: bool,
    pub max_instances: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            default_kind: VmKind::default(),
            modules: HashMap::new(),
            debug_level: 0,
            profile: false,
            max_instances: 3,
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn kind_for(&self, name: &str) -> VmKind {
        self.modules.get(name).copied().unwrap_or(self.default_kind)
    }

    /// Symbols are needed for readable faults and for profiling.
    pub fn wants_symbols(&self) -> bool { self.debug_level > 0 || self.profile }
}
