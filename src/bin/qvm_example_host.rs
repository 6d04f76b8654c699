use qvm::asm::{Asm, ImageBuilder};
use qvm::opcode::Opcode;
use qvm::{traps, FormatVersion, MemoryImageSource, SyscallArgs, SystemCalls, VmConfig, VmContext, VmManager};

mod utils;
use utils::init_logging;

const G_PRINT: i32 = 1;
const G_ADD: i32 = 2;
const G_CALL_BACK: i32 = 3;

const FRAME: i32 = 24;
const GREETING_PTR: i32 = 4;

#[derive(Default)]
struct Host {
    calls: u32,
}

impl SystemCalls for Host {
    fn system_call(&mut self, vm: &mut VmContext<'_>, args: &SyscallArgs) -> Result<i32, qvm::Error> {
        self.calls += 1;
        if let Some(r) = traps::dispatch(vm, args) { return Ok(r); }
        match args.number() {
            G_PRINT => {
                let text = vm.string(args.int(1)).unwrap_or_default();
                print!("  [Host Print] {text}");
                Ok(0)
            }
            G_ADD => {
                let (a, b) = (args.int(1), args.int(2));
                println!("  [Host Add] {a} + {b} = {}", a.wrapping_add(b));
                Ok(a.wrapping_add(b))
            }
            G_CALL_BACK => {
                println!("  [Host] calling back into {} at level {}", vm.name(), vm.call_level());
                vm.call(self, 1, &[args.int(1), args.int(2)])
            }
            _ => Ok(0),
        }
    }
}

/// vmMain(command, a, b):
///   0 -> prints a greeting
///   1 -> a + b, computed by the host
///   2 -> (a + b) + 1, with the addition done by a nested call back in
fn build_module() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut asm = Asm::new();
    let (print, add, nested) = (asm.label(), asm.label(), asm.label());

    asm.enter(FRAME);
    asm.param(FRAME, 0).konst(0).op_label(Opcode::Eq, print);
    asm.param(FRAME, 0).konst(1).op_label(Opcode::Eq, add);
    asm.param(FRAME, 0).konst(2).op_label(Opcode::Eq, nested);
    asm.konst(-1).leave(FRAME);

    asm.place(print);
    asm.konst(GREETING_PTR).arg(8).syscall(G_PRINT).leave(FRAME);

    asm.place(add);
    asm.param(FRAME, 1).arg(8).param(FRAME, 2).arg(12).syscall(G_ADD).leave(FRAME);

    asm.place(nested);
    asm.param(FRAME, 1).arg(8).param(FRAME, 2).arg(12).syscall(G_CALL_BACK);
    asm.konst(1).op(Opcode::Add).leave(FRAME);

    let mut data = vec![0u8; GREETING_PTR as usize];
    data.extend_from_slice(b"hello from bytecode\n\0");
    Ok(ImageBuilder::new(FormatVersion::Extended, asm.finish()?).data(&data).bss(64).build())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(false);

    let mut source = MemoryImageSource::new();
    source.insert("demo", build_module()?);
    let mut manager = VmManager::new(VmConfig::default(), source);
    let mut host = Host::default();

    manager.create("demo")?;
    println!("print -> {}", manager.call("demo", &mut host, 0, &[])?);
    println!("add(3, 4) -> {}", manager.call("demo", &mut host, 1, &[3, 4])?);
    println!("nested(3, 4) -> {}", manager.call("demo", &mut host, 2, &[3, 4])?);

    manager.restart("demo")?;
    println!("after restart, add(20, 22) -> {}", manager.call("demo", &mut host, 1, &[20, 22])?);

    print!("{}", manager.report());
    println!("Total system calls: {}", host.calls);
    println!("Last vm: {}", manager.last().as_deref().unwrap_or("none"));
    Ok(())
}
