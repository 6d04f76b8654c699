use crate::error::*;
use crate::header::ModuleImage;

/// Smallest region: one aligned word, so word accesses never overrun.
pub const MIN_SIZE: u32 = 4;

/// A module-relative address. Zero means "no pointer".
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmPtr(pub u32);

impl VmPtr {
    pub const NULL: VmPtr = VmPtr(0);

    #[inline] pub fn from_i32(v: i32) -> Self { VmPtr(v as u32) }
    #[inline] pub fn as_i32(self) -> i32 { self.0 as i32 }
    #[inline] pub fn is_null(self) -> bool { self.0 == 0 }
}

macro_rules! impl_access {
    ($type:ty, $size:literal, $load_name:ident, $store_name:ident) => {
        #[inline(always)]
        pub fn $load_name(&self, addr: u32) -> $type {
            let at = self.wrap(addr) & !($size - 1);
            let mut raw = [0u8; $size];
            raw.copy_from_slice(&self.data[at..at + $size]);
            <$type>::from_le_bytes(raw)
        }
        #[inline(always)]
        pub fn $store_name(&mut self, addr: u32, v: $type) {
            let at = self.wrap(addr) & !($size - 1);
            self.data[at..at + $size].copy_from_slice(&v.to_le_bytes());
        }
    };
}

/// The module's data region. The length is always a power of two and every
/// module-supplied address goes through [`SandboxMemory::wrap`].
#[derive(Clone, PartialEq, Eq)]
pub struct SandboxMemory {
    data: Vec<u8>,
    mask: u32,
}

impl std::fmt::Debug for SandboxMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxMemory").field("len", &self.data.len()).field("mask", &self.mask).finish()
    }
}

impl SandboxMemory {
    /// Zero-filled region of `size` bytes, rounded up to a power of two of
    /// at least one word.
    pub fn new(size: u32) -> Self {
        let size = size.max(MIN_SIZE).next_power_of_two();
        Self { data: vec![0; size as usize], mask: size - 1 }
    }

    pub fn from_image(image: &ModuleImage<'_>) -> Self {
        let mut mem = Self::new(image.data_size());
        mem.data[..image.data.len()].copy_from_slice(image.data);
        mem
    }

    /// Zeroes the region in place and copies the image's data segments in.
    /// The caller has already checked that the sizes match.
    pub(crate) fn reset(&mut self, image: &ModuleImage<'_>) {
        self.data.fill(0);
        self.data[..image.data.len()].copy_from_slice(image.data);
    }

    /// Drops the backing allocation down to the minimum size.
    pub(crate) fn release(&mut self) {
        *self = Self::new(MIN_SIZE);
    }

    #[inline] pub fn len(&self) -> u32 { self.mask + 1 }
    #[inline] pub fn is_empty(&self) -> bool { false }
    #[inline] pub fn mask(&self) -> u32 { self.mask }
    #[inline] pub fn as_bytes(&self) -> &[u8] { &self.data }

    /// The single masking point for module-controlled addresses.
    #[inline(always)]
    pub fn wrap(&self, addr: u32) -> usize { (addr & self.mask) as usize }

    #[inline]
    pub fn contains(&self, addr: u32) -> bool { addr & self.mask == addr }

    /// Host-side view of a module pointer. `None` for the null pointer,
    /// otherwise an index that is always inside the region.
    #[inline]
    pub fn resolve(&self, ptr: VmPtr) -> Option<usize> {
        if ptr.is_null() { return None; }
        Some(self.wrap(ptr.0))
    }

    /// Inverse of [`resolve`](Self::resolve) for an index into the region.
    #[inline]
    pub fn to_vm(&self, index: usize) -> Option<VmPtr> {
        (index < self.data.len()).then_some(VmPtr(index as u32))
    }

    /// Module offset of a slice borrowed from this region.
    pub fn offset_of(&self, bytes: &[u8]) -> Option<VmPtr> {
        let base = self.data.as_ptr() as usize;
        let at = bytes.as_ptr() as usize;
        if at < base || at + bytes.len() > base + self.data.len() { return None; }
        Some(VmPtr((at - base) as u32))
    }

    /// `len` bytes at `ptr`. Unlike single loads this rejects ranges that
    /// would run past the end of the region instead of wrapping them.
    pub fn slice(&self, ptr: VmPtr, len: usize) -> Option<&[u8]> {
        let start = self.resolve(ptr)?;
        let end = start.checked_add(len)?;
        self.data.get(start..end)
    }

    pub fn slice_mut(&mut self, ptr: VmPtr, len: usize) -> Option<&mut [u8]> {
        let start = self.resolve(ptr)?;
        let end = start.checked_add(len)?;
        self.data.get_mut(start..end)
    }

    /// NUL-terminated string at `ptr`, cut at the end of the region.
    pub fn c_str(&self, ptr: VmPtr) -> Option<&[u8]> {
        let start = self.resolve(ptr)?;
        let rest = &self.data[start..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    pub fn string(&self, ptr: VmPtr) -> Option<String> {
        self.c_str(ptr).map(|s| String::from_utf8_lossy(s).into_owned())
    }

    impl_access!(u8,  1, load_u8,  store_u8);
    impl_access!(u16, 2, load_u16, store_u16);
    impl_access!(u32, 4, load_u32, store_u32);

    #[inline(always)]
    pub fn load_i32(&self, addr: u32) -> i32 { self.load_u32(addr) as i32 }
    #[inline(always)]
    pub fn store_i32(&mut self, addr: u32, v: i32) { self.store_u32(addr, v as u32) }
    #[inline(always)]
    pub fn load_f32(&self, addr: u32) -> f32 { f32::from_bits(self.load_u32(addr)) }
    #[inline(always)]
    pub fn store_f32(&mut self, addr: u32, v: f32) { self.store_u32(addr, v.to_bits()) }

    /// Copies `n` bytes from `src` to `dest`. Both ranges must already be in
    /// bounds before masking; anything that only fits after wrap-around is
    /// rejected.
    pub fn block_copy(&mut self, dest: u32, src: u32, n: u32) -> Result<(), &'static str> {
        let dest_end = dest.checked_add(n).ok_or(BLOCK_COPY_OUT_OF_RANGE)?;
        let src_end = src.checked_add(n).ok_or(BLOCK_COPY_OUT_OF_RANGE)?;
        if !self.contains(dest) || !self.contains(src) || !self.contains(dest_end) || !self.contains(src_end) {
            return Err(BLOCK_COPY_OUT_OF_RANGE);
        }
        let (dest, src, n) = (dest as usize, src as usize, n as usize);
        self.data.copy_within(src..src + n, dest);
        Ok(())
    }

    pub fn write_bytes(&mut self, ptr: VmPtr, bytes: &[u8]) -> Option<()> {
        self.slice_mut(ptr, bytes.len())?.copy_from_slice(bytes);
        Some(())
    }
}
