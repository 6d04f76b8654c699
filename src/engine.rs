use std::fmt::{Display, Formatter};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::*;
use crate::interpreter::Interpreter;
use crate::jump_table::JumpTable;
use crate::machine::Machine;
use crate::program::Program;
use crate::translator::Translated;

/// How bytecode is executed. Chosen once when an instance is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Interpreted,
    #[default]
    Compiled,
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionMode::Interpreted => "interpreted",
            ExecutionMode::Compiled => "compiled",
        })
    }
}

/// A way of running a prepared program. Every strategy drives the same
/// [`Machine`] operations, so results only depend on the bytecode and on
/// what the system calls return.
pub(crate) trait ExecutionStrategy {
    fn mode(&self) -> ExecutionMode;

    /// Runs from the machine's current position until the outermost frame
    /// returns.
    fn run(&self, m: &mut Machine<'_>) -> Result<(), Error>;
}

/// Prepares `requested`, degrading to the interpreter when translation is
/// not possible for this program.
pub(crate) fn prepare(
    name: &str,
    requested: ExecutionMode,
    program: &Program,
    jump_table: Option<&JumpTable>,
) -> Rc<dyn ExecutionStrategy> {
    match requested {
        ExecutionMode::Interpreted => Rc::new(Interpreter),
        ExecutionMode::Compiled => match Translated::translate(program, jump_table) {
            Ok(code) => {
                debug!(vm = %name, fused = code.fused(), "using translated code");
                Rc::new(code)
            }
            Err(e) => {
                warn!(vm = %name, error = %e, "translation failed, falling back to the interpreter");
                Rc::new(Interpreter)
            }
        },
    }
}
