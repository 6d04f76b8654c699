use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qvm::asm::{Asm, ImageBuilder};
use qvm::opcode::Opcode;
use qvm::{Error, ExecutionMode, FormatVersion, Instance, SyscallArgs, VmContext};

const FRAME: i32 = 32;
const MODES: [ExecutionMode; 2] = [ExecutionMode::Interpreted, ExecutionMode::Compiled];

/// vmMain(n) returns fib(n), recursively.
fn fib_image() -> Vec<u8> {
    let mut asm = Asm::new();
    let (fib, recurse) = (asm.label(), asm.label());
    asm.enter(FRAME).param(FRAME, 0).arg(8).call(fib).leave(FRAME);

    asm.place(fib).enter(FRAME);
    asm.param(FRAME, 0).konst(2).op_label(Opcode::Gei, recurse);
    asm.param(FRAME, 0).leave(FRAME);
    asm.place(recurse);
    asm.param(FRAME, 0).konst(1).op(Opcode::Sub).arg(8).call(fib);
    asm.param(FRAME, 0).konst(2).op(Opcode::Sub).arg(8).call(fib);
    asm.op(Opcode::Add).leave(FRAME);
    build(&asm)
}

/// vmMain(n) makes n host calls and returns the last result.
fn syscall_loop_image() -> Vec<u8> {
    let mut asm = Asm::new();
    let (top, done) = (asm.label(), asm.label());
    asm.enter(FRAME);
    asm.local(24).param(FRAME, 0).op(Opcode::Store4);
    asm.local(28).konst(0).op(Opcode::Store4);
    asm.place(top);
    asm.local(24).op(Opcode::Load4).konst(0).op_label(Opcode::Lei, done);
    asm.local(28).local(24).op(Opcode::Load4).arg(8).syscall(1).op(Opcode::Store4);
    asm.local(24).local(24).op(Opcode::Load4).konst(1).op(Opcode::Sub).op(Opcode::Store4);
    asm.konst(0).konst(0).op_label(Opcode::Eq, top);
    asm.place(done).local(28).op(Opcode::Load4).leave(FRAME);
    build(&asm)
}

fn build(asm: &Asm) -> Vec<u8> {
    let code = asm.finish().expect("assemble benchmark module");
    ImageBuilder::new(FormatVersion::Legacy, code).bss(0x1000).build()
}

fn host(_: &mut VmContext<'_>, args: &SyscallArgs) -> Result<i32, Error> {
    Ok(args.int(1).wrapping_add(1))
}

fn run(c: &mut Criterion, group_name: &str, bytes: &[u8], arg: i32) {
    for mode in MODES {
        let mut inst = Instance::new(group_name, bytes, mode).expect("load benchmark module");
        let t0 = Instant::now();
        let once = inst.call(&mut host, 0, &[arg]).expect("run once");
        println!("{group_name} {mode} single-run: elapsed={:.6}s result={once}", t0.elapsed().as_secs_f64());
    }

    let mut group = c.benchmark_group(group_name);
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(1));
    group.throughput(Throughput::Elements(1));
    for mode in MODES {
        let mut inst = Instance::new(group_name, bytes, mode).expect("load benchmark module");
        group.bench_with_input(BenchmarkId::from_parameter(mode), &arg, |b, &arg| {
            b.iter(|| black_box(inst.call(&mut host, 0, &[black_box(arg)]).expect("call")));
        });
    }
    group.finish();
}

fn bench_fib(c: &mut Criterion) {
    run(c, "fib", &fib_image(), 20);
}

fn bench_syscalls(c: &mut Criterion) {
    run(c, "syscall_loop", &syscall_loop_image(), 10_000);
}

criterion_group!(benches, bench_fib, bench_syscalls);
criterion_main!(benches);
