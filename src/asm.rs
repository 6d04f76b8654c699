//! Builds bytecode and module images without hand-computing instruction
//! numbers or header fields. Used by the tests, the benches and the example
//! host.

use thiserror::Error;

use crate::header::FormatVersion;
use crate::opcode::Opcode;

/// A control-flow target, resolved to an instruction number once placed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("label was referenced but never placed")]
pub struct UnresolvedLabel;

#[derive(Copy, Clone, Debug)]
enum Operand {
    None,
    Imm(i32),
    Label(Label),
}

/// Assembled code segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Code {
    pub bytes: Vec<u8>,
    pub instruction_count: i32,
    /// Resolved targets of labels marked with [`Asm::indirect`].
    pub jump_targets: Vec<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct Asm {
    ops: Vec<(Opcode, Operand)>,
    labels: Vec<Option<u32>>,
    indirect: Vec<Label>,
}

impl Asm {
    pub fn new() -> Self { Self::default() }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds `label` to the next instruction.
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.ops.len() as u32);
        self
    }

    /// Instruction number the next emitted instruction will get.
    pub fn here(&self) -> i32 { self.ops.len() as i32 }

    /// Lists `label` in the image's jump table.
    pub fn indirect(&mut self, label: Label) -> &mut Self {
        self.indirect.push(label);
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        let operand = if op.operand_size() == 0 { Operand::None } else { Operand::Imm(0) };
        self.ops.push((op, operand));
        self
    }

    pub fn op_imm(&mut self, op: Opcode, v: i32) -> &mut Self {
        self.ops.push((op, Operand::Imm(v)));
        self
    }

    pub fn op_label(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.ops.push((op, Operand::Label(label)));
        self
    }

    pub fn enter(&mut self, frame: i32) -> &mut Self { self.op_imm(Opcode::Enter, frame) }
    pub fn leave(&mut self, frame: i32) -> &mut Self { self.op_imm(Opcode::Leave, frame) }
    pub fn konst(&mut self, v: i32) -> &mut Self { self.op_imm(Opcode::Const, v) }
    pub fn konst_f32(&mut self, v: f32) -> &mut Self { self.op_imm(Opcode::Const, v.to_bits() as i32) }
    pub fn local(&mut self, offset: i32) -> &mut Self { self.op_imm(Opcode::Local, offset) }
    pub fn arg(&mut self, offset: u8) -> &mut Self { self.op_imm(Opcode::Arg, offset as i32) }
    pub fn block_copy(&mut self, n: i32) -> &mut Self { self.op_imm(Opcode::BlockCopy, n) }

    /// `CONST label; JUMP`.
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.op_label(Opcode::Const, label).op(Opcode::Jump)
    }

    /// `CONST label; CALL`.
    pub fn call(&mut self, label: Label) -> &mut Self {
        self.op_label(Opcode::Const, label).op(Opcode::Call)
    }

    /// Calls host service `number`.
    pub fn syscall(&mut self, number: i32) -> &mut Self {
        self.konst(-1 - number).op(Opcode::Call)
    }

    /// Loads the `n`-th entry argument of a function whose `ENTER` frame is
    /// `frame` bytes.
    pub fn param(&mut self, frame: i32, n: i32) -> &mut Self {
        self.local(frame + 8 + 4 * n).op(Opcode::Load4)
    }

    pub fn finish(&self) -> Result<Code, UnresolvedLabel> {
        let resolve = |l: Label| self.labels[l.0 as usize].map(|n| n as i32).ok_or(UnresolvedLabel);
        let mut bytes = Vec::with_capacity(self.ops.len() * 5);
        for &(op, operand) in &self.ops {
            bytes.push(op as u8);
            let v = match operand {
                Operand::None => continue,
                Operand::Imm(v) => v,
                Operand::Label(l) => resolve(l)?,
            };
            match op.operand_size() {
                1 => bytes.push(v as u8),
                _ => bytes.extend_from_slice(&v.to_le_bytes()),
            }
        }
        let jump_targets = self.indirect.iter().map(|&l| resolve(l)).collect::<Result<_, _>>()?;
        Ok(Code { bytes, instruction_count: self.ops.len() as i32, jump_targets })
    }
}

/// Lays out a complete module image.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    version: FormatVersion,
    code: Code,
    data: Vec<u8>,
    lit: Vec<u8>,
    bss: u32,
}

impl ImageBuilder {
    pub fn new(version: FormatVersion, code: Code) -> Self {
        Self { version, code, data: Vec::new(), lit: Vec::new(), bss: 0 }
    }

    pub fn data(mut self, data: &[u8]) -> Self { self.data = data.to_vec(); self }
    pub fn lit(mut self, lit: &[u8]) -> Self { self.lit = lit.to_vec(); self }
    pub fn bss(mut self, bss: u32) -> Self { self.bss = bss; self }

    /// Header, code, data, literals, then the jump table for extended
    /// images.
    pub fn build(&self) -> Vec<u8> {
        let header_size = self.version.header_size();
        let code_offset = header_size;
        let data_offset = code_offset + self.code.bytes.len();

        let mut fields = vec![
            self.version.magic(),
            self.code.instruction_count,
            code_offset as i32,
            self.code.bytes.len() as i32,
            data_offset as i32,
            self.data.len() as i32,
            self.lit.len() as i32,
            self.bss as i32,
        ];
        if self.version == FormatVersion::Extended {
            fields.push(4 * self.code.jump_targets.len() as i32);
        }

        let mut out = Vec::with_capacity(data_offset + self.data.len() + self.lit.len());
        for f in fields { out.extend_from_slice(&f.to_le_bytes()); }
        out.extend_from_slice(&self.code.bytes);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.lit);
        if self.version == FormatVersion::Extended {
            for t in &self.code.jump_targets { out.extend_from_slice(&t.to_le_bytes()); }
        }
        out
    }
}
