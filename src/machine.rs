use std::rc::Rc;

use paste::paste;
#[cfg(feature = "vm_debug")]
use tracing::trace;

use crate::bridge::{CallArgs, SyscallArgs, SystemCalls, VmContext, MAX_VMMAIN_ARGS, MAX_VMSYSCALL_ARGS};
use crate::error::*;
use crate::instance::{Instance, VmState};
use crate::program::{Instruction, Program};

pub const OPSTACK_SIZE: usize = 1024;
pub const OPSTACK_MASK: usize = OPSTACK_SIZE - 1;

/// Reserved at the top of the data region for the module's own stack.
pub const PROGRAM_STACK_SIZE: u32 = 0x10000;

/// Frame built below the program stack on every host call.
const ENTRY_FRAME: i32 = 8 + 4 * MAX_VMMAIN_ARGS as i32;

/// Saved return address that ends the outermost call.
const RETURN_SENTINEL: i32 = -1;

/// One operand-stack slot. Floats travel as raw bits and are only
/// reinterpreted by the float operations.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Word(pub u32);

impl Word {
    #[inline] pub fn from_i32(v: i32) -> Self { Self(v as u32) }
    #[inline] pub fn as_i32(self) -> i32 { self.0 as i32 }
    #[inline] pub fn from_u32(v: u32) -> Self { Self(v) }
    #[inline] pub fn as_u32(self) -> u32 { self.0 }
    #[inline] pub fn from_f32(v: f32) -> Self { Self(v.to_bits()) }
    #[inline] pub fn as_f32(self) -> f32 { f32::from_bits(self.0) }
}

pub(crate) struct OpStack {
    slots: Box<[Word; OPSTACK_SIZE]>,
    top: usize,
}

impl OpStack {
    fn new() -> Self { Self { slots: Box::new([Word::default(); OPSTACK_SIZE]), top: 0 } }

    #[inline(always)]
    fn push(&mut self, w: Word) -> Result<(), &'static str> {
        if self.top >= OPSTACK_SIZE { return Err(OPSTACK_OVERFLOW); }
        self.slots[self.top & OPSTACK_MASK] = w;
        self.top += 1;
        Ok(())
    }

    #[inline(always)]
    fn pop(&mut self) -> Result<Word, &'static str> {
        if self.top == 0 { return Err(OPSTACK_UNDERFLOW); }
        self.top -= 1;
        Ok(self.slots[self.top & OPSTACK_MASK])
    }

    #[inline]
    pub(crate) fn depth(&self) -> usize { self.top }
}

macro_rules! binary {
    ($name:ident, $type:ident, $op:tt) => {
        paste! {
            #[inline(always)]
            pub(crate) fn $name(&mut self) -> Result<(), Error> {
                let b = self.pop()?.[<as_ $type>]();
                let a = self.pop()?.[<as_ $type>]();
                self.push(Word::[<from_ $type>](a $op b))
            }
        }
    };
    ($name:ident, $type:ident, .$method:ident) => {
        paste! {
            #[inline(always)]
            pub(crate) fn $name(&mut self) -> Result<(), Error> {
                let b = self.pop()?.[<as_ $type>]();
                let a = self.pop()?.[<as_ $type>]();
                self.push(Word::[<from_ $type>](a.$method(b)))
            }
        }
    };
}

macro_rules! unary {
    ($name:ident, $type:ident, $f:expr) => {
        paste! {
            #[inline(always)]
            pub(crate) fn $name(&mut self) -> Result<(), Error> {
                let a = self.pop()?.[<as_ $type>]();
                self.push(Word::[<from_ $type>]($f(a)))
            }
        }
    };
}

macro_rules! compare {
    ($name:ident, $type:ident, $op:tt) => {
        paste! {
            #[inline(always)]
            pub(crate) fn $name(&mut self, target: i32) -> Result<(), Error> {
                let b = self.pop()?.[<as_ $type>]();
                let a = self.pop()?.[<as_ $type>]();
                if a $op b { self.pc = target as usize; }
                Ok(())
            }
        }
    };
}

macro_rules! divide {
    ($name:ident, $type:ident, $method:ident) => {
        paste! {
            #[inline(always)]
            pub(crate) fn $name(&mut self) -> Result<(), Error> {
                let b = self.pop()?.[<as_ $type>]();
                let a = self.pop()?.[<as_ $type>]();
                if b == 0 { return Err(self.fault(DIVIDE_BY_ZERO)); }
                self.push(Word::[<from_ $type>](a.$method(b)))
            }
        }
    };
}

macro_rules! load {
    ($name:ident, $method:ident) => {
        #[inline(always)]
        pub(crate) fn $name(&mut self) -> Result<(), Error> {
            let addr = self.pop()?.as_u32();
            let v = self.inst.memory.$method(addr) as u32;
            self.push(Word::from_u32(v))
        }
    };
}

macro_rules! store {
    ($name:ident, $method:ident, $type:ty) => {
        #[inline(always)]
        pub(crate) fn $name(&mut self) -> Result<(), Error> {
            let v = self.pop()?.as_u32();
            let addr = self.pop()?.as_u32();
            self.inst.memory.$method(addr, v as $type);
            Ok(())
        }
    };
}

/// Per-call execution state shared by every strategy. Each operation below
/// is the one definition of its semantics; strategies only differ in how
/// they sequence them.
pub(crate) struct Machine<'a> {
    pub inst: &'a mut Instance,
    pub host: &'a mut dyn SystemCalls,
    pub program: Rc<Program>,
    pub stack: OpStack,
    /// Next instruction to execute.
    pub pc: usize,
    /// Instruction currently executing, for diagnostics.
    pub cur: usize,
    /// Program stack pointer.
    pub ps: i32,
}

pub(crate) enum Flow {
    Next,
    Done,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(inst: &'a mut Instance, host: &'a mut dyn SystemCalls) -> Self {
        let program = inst.program.clone();
        let ps = inst.program_stack;
        Self { inst, host, program, stack: OpStack::new(), pc: 0, cur: 0, ps }
    }

    /// Builds the entry frame for a host call and points at instruction 0.
    pub(crate) fn begin(&mut self, args: &CallArgs) -> Result<(), Error> {
        match self.ps.checked_sub(ENTRY_FRAME) {
            Some(ps) if ps >= self.inst.stack_bottom => self.ps = ps,
            _ => return Err(self.fault(STACK_OVERFLOW)),
        }
        let ps = self.ps as u32;
        for (i, &w) in args.words().iter().enumerate() {
            self.inst.memory.store_i32(ps.wrapping_add(8 + 4 * i as u32), w);
        }
        self.inst.memory.store_i32(ps.wrapping_add(4), 0);
        self.inst.memory.store_i32(ps, RETURN_SENTINEL);
        self.pc = 0;
        Ok(())
    }

    /// The call result is the single value the module left on the operand
    /// stack.
    pub(crate) fn finish(&mut self) -> Result<i32, Error> {
        if self.stack.depth() != 1 { return Err(self.fault(OPSTACK_CORRUPTED)); }
        Ok(self.pop()?.as_i32())
    }

    pub(crate) fn fault(&mut self, message: &'static str) -> Error {
        self.inst.record_fault(message, self.cur, &self.program)
    }

    #[inline(always)]
    pub(crate) fn fetch(&mut self) -> Result<Instruction, Error> {
        let Some(&ins) = self.program.code.get(self.pc) else {
            self.cur = self.pc;
            return Err(self.fault(PC_OUT_OF_RANGE));
        };
        self.cur = self.pc;
        self.pc += 1;
        #[cfg(feature = "vm_debug")]
        trace!(vm = %self.inst.name(), pc = self.cur, op = %ins.op, operand = ins.operand, ps = self.ps, depth = self.stack.depth());
        Ok(ins)
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, w: Word) -> Result<(), Error> {
        match self.stack.push(w) {
            Ok(()) => Ok(()),
            Err(msg) => Err(self.fault(msg)),
        }
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self) -> Result<Word, Error> {
        match self.stack.pop() {
            Ok(w) => Ok(w),
            Err(msg) => Err(self.fault(msg)),
        }
    }

    #[inline(always)]
    pub(crate) fn push_i32(&mut self, v: i32) -> Result<(), Error> { self.push(Word::from_i32(v)) }

    /// Fails the way a push would, without pushing.
    #[inline(always)]
    pub(crate) fn ensure_room(&mut self) -> Result<(), Error> {
        if self.stack.depth() >= OPSTACK_SIZE { return Err(self.fault(OPSTACK_OVERFLOW)); }
        Ok(())
    }

    pub(crate) fn break_point(&mut self) {
        self.inst.break_count += 1;
    }

    pub(crate) fn undefined(&mut self) -> Error { self.fault(BAD_INSTRUCTION) }

    #[inline(always)]
    pub(crate) fn enter(&mut self, frame: i32) -> Result<(), Error> {
        self.ps = self.ps.wrapping_sub(frame);
        if self.ps < self.inst.stack_bottom { return Err(self.fault(STACK_OVERFLOW)); }
        if self.inst.profiling {
            let offset = self.program.offset_of(self.cur);
            if let Some(symbols) = self.inst.symbols.as_mut() { symbols.record_call(offset); }
        }
        Ok(())
    }

    /// Pops the frame and returns to the saved instruction. `Done` once the
    /// outermost frame is left.
    #[inline(always)]
    pub(crate) fn leave(&mut self, frame: i32) -> Result<Flow, Error> {
        self.ps = self.ps.wrapping_add(frame);
        let ret = self.inst.memory.load_i32(self.ps as u32);
        if ret == RETURN_SENTINEL { return Ok(Flow::Done); }
        if !self.program.is_instruction(ret) { return Err(self.fault(PC_OUT_OF_RANGE_LEAVE)); }
        self.pc = ret as usize;
        Ok(Flow::Next)
    }

    #[inline(always)]
    pub(crate) fn call(&mut self) -> Result<(), Error> {
        let target = self.pop()?.as_i32();
        self.call_to(target)
    }

    /// Saves the return instruction and transfers to `target`; negative
    /// targets are system calls.
    pub(crate) fn call_to(&mut self, target: i32) -> Result<(), Error> {
        self.inst.memory.store_i32(self.ps as u32, self.pc as i32);
        if target < 0 { return self.system_call(target); }
        if !self.program.is_instruction(target) { return Err(self.fault(PC_OUT_OF_RANGE_CALL)); }
        self.pc = target as usize;
        Ok(())
    }

    fn system_call(&mut self, target: i32) -> Result<(), Error> {
        let ps = self.ps as u32;
        let number = -1 - target;
        let stomped = self.inst.memory.load_i32(ps.wrapping_add(4));
        self.inst.memory.store_i32(ps.wrapping_add(4), number);

        let mut words = [0i32; MAX_VMSYSCALL_ARGS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.inst.memory.load_i32(ps.wrapping_add(4 + 4 * i as u32));
        }
        let args = SyscallArgs::from_words(words);

        // Nested calls build their frames below ours.
        self.inst.program_stack = self.ps.wrapping_sub(4);
        let result = {
            let mut ctx = VmContext::bytecode(self.inst);
            self.host.system_call(&mut ctx, &args)
        };
        self.inst.program_stack = self.ps;

        let r = result?;
        if self.inst.state == VmState::Faulted {
            return Err(self.inst.last_fault().map(Error::Fault).unwrap_or(Error::unavailable(INSTANCE_FAULTED)));
        }
        self.inst.memory.store_i32(ps.wrapping_add(4), stomped);
        self.push_i32(r)
    }

    pub(crate) fn jump_to(&mut self, target: i32) -> Result<(), Error> {
        let legal = match &self.inst.jump_table {
            Some(table) => table.allows(target),
            None => self.program.is_instruction(target),
        };
        if !legal { return Err(self.fault(ILLEGAL_JUMP)); }
        self.pc = target as usize;
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn jump(&mut self) -> Result<(), Error> {
        let target = self.pop()?.as_i32();
        self.jump_to(target)
    }

    #[inline(always)]
    pub(crate) fn local(&mut self, offset: i32) -> Result<(), Error> {
        self.push_i32(self.ps.wrapping_add(offset))
    }

    #[inline(always)]
    pub(crate) fn arg(&mut self, offset: i32) -> Result<(), Error> {
        let v = self.pop()?.as_i32();
        self.inst.memory.store_i32(self.ps.wrapping_add(offset) as u32, v);
        Ok(())
    }

    pub(crate) fn block_copy(&mut self, n: i32) -> Result<(), Error> {
        let src = self.pop()?.as_u32();
        let dest = self.pop()?.as_u32();
        match self.inst.memory.block_copy(dest, src, n as u32) {
            Ok(()) => Ok(()),
            Err(msg) => Err(self.fault(msg)),
        }
    }

    load!(load1, load_u8);
    load!(load2, load_u16);
    load!(load4, load_u32);
    store!(store1, store_u8, u8);
    store!(store2, store_u16, u16);
    store!(store4, store_u32, u32);

    compare!(eq, i32, ==);
    compare!(ne, i32, !=);
    compare!(lti, i32, <);
    compare!(lei, i32, <=);
    compare!(gti, i32, >);
    compare!(gei, i32, >=);
    compare!(ltu, u32, <);
    compare!(leu, u32, <=);
    compare!(gtu, u32, >);
    compare!(geu, u32, >=);
    compare!(eqf, f32, ==);
    compare!(nef, f32, !=);
    compare!(ltf, f32, <);
    compare!(lef, f32, <=);
    compare!(gtf, f32, >);
    compare!(gef, f32, >=);

    unary!(sex8, i32, |x: i32| x as i8 as i32);
    unary!(sex16, i32, |x: i32| x as i16 as i32);
    unary!(negi, i32, |x: i32| x.wrapping_neg());
    unary!(bcom, u32, |x: u32| !x);
    unary!(negf, f32, |x: f32| -x);

    binary!(add, i32, .wrapping_add);
    binary!(sub, i32, .wrapping_sub);
    binary!(muli, i32, .wrapping_mul);
    binary!(mulu, u32, .wrapping_mul);
    divide!(divi, i32, wrapping_div);
    divide!(divu, u32, wrapping_div);
    divide!(modi, i32, wrapping_rem);
    divide!(modu, u32, wrapping_rem);
    binary!(band, u32, &);
    binary!(bor, u32, |);
    binary!(bxor, u32, ^);
    binary!(lsh, u32, .wrapping_shl);
    binary!(rshu, u32, .wrapping_shr);
    binary!(addf, f32, +);
    binary!(subf, f32, -);
    binary!(mulf, f32, *);
    binary!(divf, f32, /);

    #[inline(always)]
    pub(crate) fn rshi(&mut self) -> Result<(), Error> {
        let b = self.pop()?.as_u32();
        let a = self.pop()?.as_i32();
        self.push_i32(a.wrapping_shr(b))
    }

    #[inline(always)]
    pub(crate) fn cvif(&mut self) -> Result<(), Error> {
        let a = self.pop()?.as_i32();
        self.push(Word::from_f32(a as f32))
    }

    /// Truncates toward zero, saturating at the integer range; NaN gives 0.
    #[inline(always)]
    pub(crate) fn cvfi(&mut self) -> Result<(), Error> {
        let a = self.pop()?.as_f32();
        self.push_i32(a as i32)
    }
}
