//! System calls every module gets regardless of which subsystem hosts it.
//! Hosts route numbers in this range here and handle the rest themselves.

use tracing::{info, warn};

use crate::bridge::{SyscallArgs, VmContext};
use crate::sandbox::{SandboxMemory, VmPtr};

pub const TRAP_MEMSET: i32 = 100;
pub const TRAP_MEMCPY: i32 = 101;
pub const TRAP_STRNCPY: i32 = 102;
pub const TRAP_SIN: i32 = 103;
pub const TRAP_COS: i32 = 104;
pub const TRAP_ATAN2: i32 = 105;
pub const TRAP_SQRT: i32 = 106;
pub const TRAP_MATRIXMULTIPLY: i32 = 107;
pub const TRAP_ANGLEVECTORS: i32 = 108;
pub const TRAP_PERPENDICULARVECTOR: i32 = 109;
pub const TRAP_FLOOR: i32 = 110;
pub const TRAP_CEIL: i32 = 111;
pub const TRAP_TESTPRINTINT: i32 = 112;
pub const TRAP_TESTPRINTFLOAT: i32 = 113;

pub fn is_shared(number: i32) -> bool { (TRAP_MEMSET..=TRAP_TESTPRINTFLOAT).contains(&number) }

#[inline]
fn float_result(v: f32) -> i32 { v.to_bits() as i32 }

fn read_vec3(mem: &SandboxMemory, ptr: VmPtr) -> [f32; 3] {
    [0, 4, 8].map(|o| mem.load_f32(ptr.0.wrapping_add(o)))
}

fn write_vec3(mem: &mut SandboxMemory, ptr: VmPtr, v: [f32; 3]) {
    if ptr.is_null() { return; }
    for (i, x) in v.into_iter().enumerate() {
        mem.store_f32(ptr.0.wrapping_add(4 * i as u32), x);
    }
}

/// Handles one of the shared system calls. `None` when `args` names a call
/// outside the shared range.
pub fn dispatch(vm: &mut VmContext<'_>, args: &SyscallArgs) -> Option<i32> {
    let r = match args.number() {
        TRAP_MEMSET => memset(vm, args),
        TRAP_MEMCPY => memcpy(vm, args),
        TRAP_STRNCPY => strncpy(vm, args),
        TRAP_SIN => float_result(args.float(1).sin()),
        TRAP_COS => float_result(args.float(1).cos()),
        TRAP_ATAN2 => float_result(args.float(1).atan2(args.float(2))),
        TRAP_SQRT => float_result(args.float(1).sqrt()),
        TRAP_FLOOR => float_result(args.float(1).floor()),
        TRAP_CEIL => float_result(args.float(1).ceil()),
        TRAP_MATRIXMULTIPLY => matrix_multiply(vm, args),
        TRAP_ANGLEVECTORS => angle_vectors(vm, args),
        TRAP_PERPENDICULARVECTOR => perpendicular_vector(vm, args),
        TRAP_TESTPRINTINT => {
            info!(vm = %vm.name(), text = ?vm.string(args.int(1)), value = args.int(2), "test print");
            0
        }
        TRAP_TESTPRINTFLOAT => {
            info!(vm = %vm.name(), text = ?vm.string(args.int(1)), value = args.float(2), "test print");
            0
        }
        _ => return None,
    };
    Some(r)
}

/// `memset(dest, value, count)`; returns `dest`.
fn memset(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let (dest, value, count) = (args.ptr(1), args.int(2) as u8, args.int(3));
    let Some(region) = vm.memory_mut().and_then(|m| m.slice_mut(dest, count.max(0) as usize)) else {
        warn!(dest = dest.0, count, "memset out of range");
        return 0;
    };
    region.fill(value);
    dest.as_i32()
}

/// `memcpy(dest, src, count)`; returns `dest`.
fn memcpy(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let (dest, src, count) = (args.int(1) as u32, args.int(2) as u32, args.int(3));
    let ok = count >= 0 && !args.ptr(1).is_null() && !args.ptr(2).is_null()
        && vm.memory_mut().is_some_and(|m| m.block_copy(dest, src, count as u32).is_ok());
    if !ok {
        warn!(dest, src, count, "memcpy out of range");
        return 0;
    }
    dest as i32
}

/// `strncpy(dest, src, count)`: copies up to `count` bytes of `src`,
/// padding with zeros. Returns `dest`.
fn strncpy(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let (dest, src, count) = (args.ptr(1), args.ptr(2), args.int(3).max(0) as usize);
    let Some(mem) = vm.memory_mut() else { return 0 };
    let Some(text) = mem.c_str(src).map(|s| s[..s.len().min(count)].to_vec()) else {
        warn!(src = src.0, "strncpy from null");
        return 0;
    };
    let Some(region) = mem.slice_mut(dest, count) else {
        warn!(dest = dest.0, count, "strncpy out of range");
        return 0;
    };
    region.fill(0);
    region[..text.len()].copy_from_slice(&text);
    dest.as_i32()
}

/// `MatrixMultiply(in1[3][3], in2[3][3], out[3][3])`.
fn matrix_multiply(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let (a, b, out) = (args.ptr(1), args.ptr(2), args.ptr(3));
    let Some(mem) = vm.memory_mut() else { return 0 };
    if a.is_null() || b.is_null() || out.is_null() { return 0; }
    let row = |m: &SandboxMemory, p: VmPtr, r: u32| read_vec3(m, VmPtr(p.0.wrapping_add(12 * r)));
    let ma = [row(mem, a, 0), row(mem, a, 1), row(mem, a, 2)];
    let mb = [row(mem, b, 0), row(mem, b, 1), row(mem, b, 2)];
    for (r, ra) in ma.iter().enumerate() {
        let v = [0, 1, 2].map(|c| ra[0] * mb[0][c] + ra[1] * mb[1][c] + ra[2] * mb[2][c]);
        write_vec3(mem, VmPtr(out.0.wrapping_add(12 * r as u32)), v);
    }
    0
}

/// `AngleVectors(angles, forward, right, up)`; any output may be null.
fn angle_vectors(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let Some(mem) = vm.memory_mut() else { return 0 };
    if args.ptr(1).is_null() { return 0; }
    let [pitch, yaw, roll] = read_vec3(mem, args.ptr(1)).map(f32::to_radians);
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();
    let (sr, cr) = roll.sin_cos();

    write_vec3(mem, args.ptr(2), [cp * cy, cp * sy, -sp]);
    write_vec3(mem, args.ptr(3), [
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    ]);
    write_vec3(mem, args.ptr(4), [
        cr * sp * cy + sr * sy,
        cr * sp * sy - sr * cy,
        cr * cp,
    ]);
    0
}

/// `PerpendicularVector(dst, src)` for a unit-length `src`.
fn perpendicular_vector(vm: &mut VmContext<'_>, args: &SyscallArgs) -> i32 {
    let (dst, src) = (args.ptr(1), args.ptr(2));
    let Some(mem) = vm.memory_mut() else { return 0 };
    if src.is_null() { return 0; }
    let v = read_vec3(mem, src);

    // Project the least aligned axis onto the plane normal to `src`.
    let axis = (0..3).min_by(|&i, &j| v[i].abs().total_cmp(&v[j].abs())).unwrap_or(0);
    let mut t = [0.0f32; 3];
    t[axis] = 1.0;
    let d = t[0] * v[0] + t[1] * v[1] + t[2] * v[2];
    let mut p = [t[0] - d * v[0], t[1] - d * v[1], t[2] - d * v[2]];
    let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    if len > 0.0 { p = p.map(|x| x / len); }
    write_vec3(mem, dst, p);
    0
}
