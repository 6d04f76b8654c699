use tracing::warn;

use crate::byte_iter::ByteIter;
use crate::error::*;
use crate::opcode::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub operand: i32,
}

/// Decoded instruction stream. Instruction numbers index `code`; `offsets`
/// maps each instruction number back to its byte offset in the code segment.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<Instruction>,
    pub offsets: Vec<u32>,
    pub code_length: u32,
}

impl Program {
    pub fn decode(code: &[u8], instruction_count: usize) -> Result<Self, Error> {
        let capacity = instruction_count.min(code.len());
        let mut program = Program {
            code: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            code_length: code.len() as u32,
        };

        let mut it = ByteIter::new(code, 0);
        for _ in 0..instruction_count {
            let offset = it.cur() as u32;
            let byte = it.read_u8(CODE_OVERRUN)?;
            let op = Opcode::from_byte(byte).ok_or_else(|| {
                warn!(offset, byte, "{}", BAD_OPCODE);
                Error::load(BAD_OPCODE)
            })?;
            let operand = match op.operand_size() {
                4 => it.read_i32(CODE_OVERRUN)?,
                1 => it.read_u8(CODE_OVERRUN)? as i32,
                _ => 0,
            };
            program.code.push(Instruction { op, operand });
            program.offsets.push(offset);
        }

        for ins in &program.code {
            if ins.op.is_branch() && !program.is_instruction(ins.operand) {
                warn!(target = ins.operand, "{}", BAD_BRANCH_TARGET);
                return Err(Error::load(BAD_BRANCH_TARGET));
            }
        }
        Ok(program)
    }

    #[inline]
    pub fn len(&self) -> usize { self.code.len() }
    #[inline]
    pub fn is_empty(&self) -> bool { self.code.is_empty() }

    #[inline]
    pub fn is_instruction(&self, n: i32) -> bool { n >= 0 && (n as usize) < self.code.len() }

    /// Byte offset of instruction `n`; one past the end maps to the code length.
    #[inline]
    pub fn offset_of(&self, n: usize) -> u32 {
        self.offsets.get(n).copied().unwrap_or(self.code_length)
    }

    /// Instruction whose encoding starts at `offset`.
    pub fn instruction_at(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Targets of `CONST n; JUMP` pairs that name a real instruction.
    pub fn direct_jump_targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.code.windows(2).filter_map(|w| {
            (w[0].op == Opcode::Const && w[1].op == Opcode::Jump && self.is_instruction(w[0].operand))
                .then_some(w[0].operand as u32)
        })
    }
}
