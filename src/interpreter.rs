use crate::engine::{ExecutionMode, ExecutionStrategy};
use crate::error::*;
use crate::machine::{Flow, Machine};
use crate::opcode::Opcode;

/// Decodes and executes one instruction at a time.
#[derive(Debug, Default)]
pub(crate) struct Interpreter;

impl ExecutionStrategy for Interpreter {
    fn mode(&self) -> ExecutionMode { ExecutionMode::Interpreted }

    fn run(&self, m: &mut Machine<'_>) -> Result<(), Error> {
        loop {
            let ins = m.fetch()?;
            let x = ins.operand;
            match ins.op {
                Opcode::Undef => return Err(m.undefined()),
                Opcode::Ignore => {}
                Opcode::Break => m.break_point(),
                Opcode::Enter => m.enter(x)?,
                Opcode::Leave => {
                    if let Flow::Done = m.leave(x)? { return Ok(()); }
                }
                Opcode::Call => m.call()?,
                Opcode::Push => m.push_i32(0)?,
                Opcode::Pop => { m.pop()?; }
                Opcode::Const => m.push_i32(x)?,
                Opcode::Local => m.local(x)?,
                Opcode::Jump => m.jump()?,

                Opcode::Eq => m.eq(x)?,
                Opcode::Ne => m.ne(x)?,
                Opcode::Lti => m.lti(x)?,
                Opcode::Lei => m.lei(x)?,
                Opcode::Gti => m.gti(x)?,
                Opcode::Gei => m.gei(x)?,
                Opcode::Ltu => m.ltu(x)?,
                Opcode::Leu => m.leu(x)?,
                Opcode::Gtu => m.gtu(x)?,
                Opcode::Geu => m.geu(x)?,
                Opcode::Eqf => m.eqf(x)?,
                Opcode::Nef => m.nef(x)?,
                Opcode::Ltf => m.ltf(x)?,
                Opcode::Lef => m.lef(x)?,
                Opcode::Gtf => m.gtf(x)?,
                Opcode::Gef => m.gef(x)?,

                Opcode::Load1 => m.load1()?,
                Opcode::Load2 => m.load2()?,
                Opcode::Load4 => m.load4()?,
                Opcode::Store1 => m.store1()?,
                Opcode::Store2 => m.store2()?,
                Opcode::Store4 => m.store4()?,
                Opcode::Arg => m.arg(x)?,
                Opcode::BlockCopy => m.block_copy(x)?,

                Opcode::Sex8 => m.sex8()?,
                Opcode::Sex16 => m.sex16()?,
                Opcode::Negi => m.negi()?,
                Opcode::Add => m.add()?,
                Opcode::Sub => m.sub()?,
                Opcode::Divi => m.divi()?,
                Opcode::Divu => m.divu()?,
                Opcode::Modi => m.modi()?,
                Opcode::Modu => m.modu()?,
                Opcode::Muli => m.muli()?,
                Opcode::Mulu => m.mulu()?,
                Opcode::Band => m.band()?,
                Opcode::Bor => m.bor()?,
                Opcode::Bxor => m.bxor()?,
                Opcode::Bcom => m.bcom()?,
                Opcode::Lsh => m.lsh()?,
                Opcode::Rshi => m.rshi()?,
                Opcode::Rshu => m.rshu()?,
                Opcode::Negf => m.negf()?,
                Opcode::Addf => m.addf()?,
                Opcode::Subf => m.subf()?,
                Opcode::Divf => m.divf()?,
                Opcode::Mulf => m.mulf()?,
                Opcode::Cvif => m.cvif()?,
                Opcode::Cvfi => m.cvfi()?,
            }
        }
    }
}
