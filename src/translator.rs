use tracing::debug;

use crate::engine::{ExecutionMode, ExecutionStrategy};
use crate::error::*;
use crate::jump_table::JumpTable;
use crate::machine::{Flow, Machine, Word};
use crate::opcode::Opcode;
use crate::program::Program;

/// Largest program translated; bigger ones run interpreted.
pub const MAX_TRANSLATED_INSTRUCTIONS: usize = 1 << 22;

type Op = Box<dyn Fn(&mut Machine<'_>) -> Result<Flow, Error>>;

/// Closure-threaded code: every instruction is turned into a closure with
/// its operand baked in, once, at load time. Common instruction pairs are
/// fused into a single closure; the second instruction keeps its own slot so
/// branches into the middle of a pair still land correctly.
pub(crate) struct Translated {
    ops: Vec<Op>,
    fused: usize,
}

macro_rules! step {
    ($m:ident => $body:expr) => {
        Box::new(move |$m: &mut Machine<'_>| -> Result<Flow, Error> { $body; Ok(Flow::Next) })
    };
}

macro_rules! simple {
    ($method:ident) => { step!(m => m.$method()?) };
}

macro_rules! branch {
    ($method:ident, $x:ident) => { step!(m => m.$method($x)?) };
}

impl Translated {
    pub(crate) fn translate(program: &Program, jump_table: Option<&JumpTable>) -> Result<Self, Error> {
        if program.len() > MAX_TRANSLATED_INSTRUCTIONS {
            return Err(Error::unavailable(TRANSLATION_LIMIT));
        }
        let mut ops: Vec<Op> = Vec::with_capacity(program.len());
        let mut fused = 0;

        for (i, ins) in program.code.iter().enumerate() {
            let next = program.code.get(i + 1).map(|n| n.op);
            let x = ins.operand;

            let op: Op = match (ins.op, next) {
                (Opcode::Const, Some(Opcode::Jump)) => {
                    fused += 1;
                    let legal = match jump_table {
                        Some(table) => table.allows(x),
                        None => program.is_instruction(x),
                    };
                    if legal {
                        let target = x as usize;
                        Box::new(move |m: &mut Machine<'_>| -> Result<Flow, Error> {
                            m.ensure_room()?;
                            m.cur = i + 1;
                            m.pc = target;
                            Ok(Flow::Next)
                        })
                    } else {
                        debug!(instruction = i, target = x, "static jump to illegal target");
                        Box::new(move |m: &mut Machine<'_>| -> Result<Flow, Error> {
                            m.ensure_room()?;
                            m.cur = i + 1;
                            Err(m.fault(ILLEGAL_JUMP))
                        })
                    }
                }
                (Opcode::Const, Some(Opcode::Call)) => {
                    fused += 1;
                    Box::new(move |m: &mut Machine<'_>| -> Result<Flow, Error> {
                        m.ensure_room()?;
                        m.cur = i + 1;
                        m.pc = i + 2;
                        m.call_to(x)?;
                        Ok(Flow::Next)
                    })
                }
                (Opcode::Local, Some(Opcode::Load4)) => {
                    fused += 1;
                    Box::new(move |m: &mut Machine<'_>| -> Result<Flow, Error> {
                        m.ensure_room()?;
                        m.cur = i + 1;
                        m.pc = i + 2;
                        let v = m.inst.memory.load_u32(m.ps.wrapping_add(x) as u32);
                        m.push(Word::from_u32(v))?;
                        Ok(Flow::Next)
                    })
                }
                _ => Self::single(ins.op, x),
            };
            ops.push(op);
        }

        debug!(instructions = ops.len(), fused, "translated");
        Ok(Self { ops, fused })
    }

    fn single(op: Opcode, x: i32) -> Op {
        match op {
            Opcode::Undef => Box::new(|m: &mut Machine<'_>| -> Result<Flow, Error> { Err(m.undefined()) }),
            Opcode::Ignore => Box::new(|_: &mut Machine<'_>| -> Result<Flow, Error> { Ok(Flow::Next) }),
            Opcode::Break => step!(m => m.break_point()),
            Opcode::Enter => step!(m => m.enter(x)?),
            Opcode::Leave => Box::new(move |m: &mut Machine<'_>| -> Result<Flow, Error> { m.leave(x) }),
            Opcode::Call => simple!(call),
            Opcode::Push => step!(m => m.push_i32(0)?),
            Opcode::Pop => step!(m => m.pop()?),
            Opcode::Const => step!(m => m.push_i32(x)?),
            Opcode::Local => step!(m => m.local(x)?),
            Opcode::Jump => simple!(jump),

            Opcode::Eq => branch!(eq, x),
            Opcode::Ne => branch!(ne, x),
            Opcode::Lti => branch!(lti, x),
            Opcode::Lei => branch!(lei, x),
            Opcode::Gti => branch!(gti, x),
            Opcode::Gei => branch!(gei, x),
            Opcode::Ltu => branch!(ltu, x),
            Opcode::Leu => branch!(leu, x),
            Opcode::Gtu => branch!(gtu, x),
            Opcode::Geu => branch!(geu, x),
            Opcode::Eqf => branch!(eqf, x),
            Opcode::Nef => branch!(nef, x),
            Opcode::Ltf => branch!(ltf, x),
            Opcode::Lef => branch!(lef, x),
            Opcode::Gtf => branch!(gtf, x),
            Opcode::Gef => branch!(gef, x),

            Opcode::Load1 => simple!(load1),
            Opcode::Load2 => simple!(load2),
            Opcode::Load4 => simple!(load4),
            Opcode::Store1 => simple!(store1),
            Opcode::Store2 => simple!(store2),
            Opcode::Store4 => simple!(store4),
            Opcode::Arg => step!(m => m.arg(x)?),
            Opcode::BlockCopy => step!(m => m.block_copy(x)?),

            Opcode::Sex8 => simple!(sex8),
            Opcode::Sex16 => simple!(sex16),
            Opcode::Negi => simple!(negi),
            Opcode::Add => simple!(add),
            Opcode::Sub => simple!(sub),
            Opcode::Divi => simple!(divi),
            Opcode::Divu => simple!(divu),
            Opcode::Modi => simple!(modi),
            Opcode::Modu => simple!(modu),
            Opcode::Muli => simple!(muli),
            Opcode::Mulu => simple!(mulu),
            Opcode::Band => simple!(band),
            Opcode::Bor => simple!(bor),
            Opcode::Bxor => simple!(bxor),
            Opcode::Bcom => simple!(bcom),
            Opcode::Lsh => simple!(lsh),
            Opcode::Rshi => simple!(rshi),
            Opcode::Rshu => simple!(rshu),
            Opcode::Negf => simple!(negf),
            Opcode::Addf => simple!(addf),
            Opcode::Subf => simple!(subf),
            Opcode::Divf => simple!(divf),
            Opcode::Mulf => simple!(mulf),
            Opcode::Cvif => simple!(cvif),
            Opcode::Cvfi => simple!(cvfi),
        }
    }

    pub(crate) fn fused(&self) -> usize { self.fused }
}

impl ExecutionStrategy for Translated {
    fn mode(&self) -> ExecutionMode { ExecutionMode::Compiled }

    fn run(&self, m: &mut Machine<'_>) -> Result<(), Error> {
        loop {
            let Some(op) = self.ops.get(m.pc) else {
                m.cur = m.pc;
                return Err(m.fault(PC_OUT_OF_RANGE));
            };
            m.cur = m.pc;
            m.pc += 1;
            if let Flow::Done = op(m)? { return Ok(()); }
        }
    }
}
