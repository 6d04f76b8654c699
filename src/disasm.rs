//! Text listing of a decoded program, one instruction per line.

use std::fmt::{self, Display, Formatter};

use crate::jump_table::JumpTable;
use crate::opcode::Opcode;
use crate::program::Program;
use crate::symbols::SymbolTable;

pub struct Disassembly<'a> {
    program: &'a Program,
    symbols: Option<&'a SymbolTable>,
    jump_table: Option<&'a JumpTable>,
}

pub fn disassemble<'a>(program: &'a Program, symbols: Option<&'a SymbolTable>, jump_table: Option<&'a JumpTable>) -> Disassembly<'a> {
    Disassembly { program, symbols, jump_table }
}

impl Display for Disassembly<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (n, ins) in self.program.code.iter().enumerate() {
            let offset = self.program.offset_of(n);
            if let Some(sym) = self.symbols.and_then(|s| s.symbols().iter().find(|s| s.offset == offset)) {
                writeln!(f, "{}:", sym.name)?;
            }
            let marker = if self.jump_table.is_some_and(|t| t.allows(n as i32)) { '*' } else { ' ' };
            write!(f, "{marker}{n:6} {offset:08x}  {:<10}", ins.op.name())?;
            match ins.op.operand_size() {
                0 => {}
                _ if ins.op.is_branch() => write!(f, " -> {}", ins.operand)?,
                _ if ins.op == Opcode::Const && ins.operand < 0 => write!(f, " {}  ; syscall {}", ins.operand, -1 - ins.operand)?,
                _ => write!(f, " {}", ins.operand)?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
