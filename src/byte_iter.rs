use crate::error::*;

/// Little-endian cursor over an image or code segment.
#[derive(Clone, Copy)]
pub struct ByteIter<'a> {
    pub bytes: &'a [u8],
    pub idx: usize,
}

impl<'a> ByteIter<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8], idx: usize) -> Self { Self { bytes, idx } }
    #[inline]
    pub fn empty(&self) -> bool { self.idx >= self.bytes.len() }
    #[inline]
    pub fn has_n_left(&self, n: usize) -> bool { self.idx.saturating_add(n) <= self.bytes.len() }
    #[inline]
    pub fn cur(&self) -> usize { self.idx }
    #[inline]
    pub fn read_u8(&mut self, err: &'static str) -> Result<u8, Error> {
        if self.idx >= self.bytes.len() { return Err(Error::load(err)); }
        let b = self.bytes[self.idx];
        self.idx += 1;
        Ok(b)
    }
    #[inline]
    pub fn read_i32(&mut self, err: &'static str) -> Result<i32, Error> {
        if !self.has_n_left(4) { return Err(Error::load(err)); }
        let b = &self.bytes[self.idx..self.idx + 4];
        self.idx += 4;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    #[inline]
    pub fn slice_from(&self, start: usize, len: usize, err: &'static str) -> Result<&'a [u8], Error> {
        let end = start.checked_add(len).ok_or(Error::load(err))?;
        if end > self.bytes.len() { return Err(Error::load(err)); }
        Ok(&self.bytes[start..end])
    }
}
