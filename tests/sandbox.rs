use qvm::error::BLOCK_COPY_OUT_OF_RANGE;
use qvm::{SandboxMemory, VmPtr};

#[test]
fn rounds_size_up_to_a_power_of_two() {
    assert_eq!(SandboxMemory::new(0).len(), 4);
    assert_eq!(SandboxMemory::new(5).len(), 8);
    assert_eq!(SandboxMemory::new(4096).len(), 4096);
    assert_eq!(SandboxMemory::new(4097).mask(), 8191);
}

#[test]
fn wraps_every_address_into_the_region() {
    let mut mem = SandboxMemory::new(256);
    mem.store_i32(0x10, 0x1234_5678);
    assert_eq!(mem.load_i32(0x10 + 256), 0x1234_5678);
    assert_eq!(mem.load_i32(0xffff_ff10), 0x1234_5678);
    assert_eq!(mem.wrap(0xdead_beef), 0xef);
    assert!(mem.contains(255));
    assert!(!mem.contains(256));
}

#[test]
fn aligns_loads_and_stores_down_to_their_width() {
    let mut mem = SandboxMemory::new(64);
    mem.store_u32(0x13, 0xaabb_ccdd);
    assert_eq!(mem.load_u32(0x10), 0xaabb_ccdd);
    assert_eq!(mem.load_u16(0x13), 0xaabb);
    assert_eq!(mem.load_u8(0x13), 0xaa);
    assert_eq!(mem.load_u8(0x10), 0xdd);

    mem.store_u16(0x21, 0x1122);
    assert_eq!(mem.load_u8(0x20), 0x22);
    assert_eq!(mem.load_u8(0x21), 0x11);
}

#[test]
fn float_round_trips_through_raw_bits() {
    let mut mem = SandboxMemory::new(16);
    mem.store_f32(4, -2.5);
    assert_eq!(mem.load_u32(4), (-2.5f32).to_bits());
    assert_eq!(mem.load_f32(4), -2.5);
}

#[test]
fn block_copy_rejects_ranges_that_only_fit_after_wrapping() {
    let mut mem = SandboxMemory::new(64);
    let len = mem.len();
    assert_eq!(mem.block_copy(len - 1, 0, 2), Err(BLOCK_COPY_OUT_OF_RANGE));
    assert_eq!(mem.block_copy(0, len - 1, 2), Err(BLOCK_COPY_OUT_OF_RANGE));
    assert_eq!(mem.block_copy(len, 0, 0), Err(BLOCK_COPY_OUT_OF_RANGE));
    assert_eq!(mem.block_copy(0, 8, u32::MAX), Err(BLOCK_COPY_OUT_OF_RANGE));
}

#[test]
fn block_copy_moves_bytes_and_allows_overlap() {
    let mut mem = SandboxMemory::new(64);
    mem.write_bytes(VmPtr(8), b"abcdef").unwrap();
    mem.block_copy(32, 8, 6).unwrap();
    assert_eq!(mem.slice(VmPtr(32), 6).unwrap(), b"abcdef");

    mem.block_copy(10, 8, 6).unwrap();
    assert_eq!(mem.slice(VmPtr(8), 8).unwrap(), b"ababcdef");
}

#[test]
fn resolves_pointers_for_the_host() {
    let mut mem = SandboxMemory::new(32);
    assert_eq!(mem.resolve(VmPtr::NULL), None);
    assert_eq!(mem.resolve(VmPtr(40)), Some(8));
    assert_eq!(mem.to_vm(31), Some(VmPtr(31)));
    assert_eq!(mem.to_vm(32), None);

    assert!(mem.slice(VmPtr(30), 4).is_none());
    assert!(mem.slice_mut(VmPtr(28), 4).is_some());

    mem.write_bytes(VmPtr(4), b"hi\0there").unwrap();
    assert_eq!(mem.string(VmPtr(4)).as_deref(), Some("hi"));
    assert_eq!(mem.string(VmPtr::NULL), None);

    let view = mem.slice(VmPtr(6), 2).unwrap();
    assert_eq!(mem.offset_of(view), Some(VmPtr(6)));
    assert_eq!(mem.offset_of(b"elsewhere"), None);
}

#[test]
fn unterminated_strings_stop_at_the_end_of_the_region() {
    let mut mem = SandboxMemory::new(8);
    mem.write_bytes(VmPtr(4), b"abcd").unwrap();
    assert_eq!(mem.c_str(VmPtr(4)), Some(&b"abcd"[..]));
}
