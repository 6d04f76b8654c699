use tracing::{debug, warn};

use crate::byte_iter::ByteIter;
use crate::error::*;
use crate::sandbox::MIN_SIZE;

pub const VM_MAGIC: i32 = 0x1272_1444;
pub const VM_MAGIC_VER2: i32 = 0x1272_1445;

pub const LEGACY_HEADER_SIZE: usize = 32;
pub const EXTENDED_HEADER_SIZE: usize = 36;

/// Largest data region an image may ask for.
pub const MAX_DATA_SIZE: u32 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    /// 1.32b layout, no jump table.
    Legacy,
    /// Carries a jump-table segment.
    Extended,
}

impl FormatVersion {
    pub fn from_magic(magic: i32) -> Option<Self> {
        match magic {
            VM_MAGIC => Some(FormatVersion::Legacy),
            VM_MAGIC_VER2 => Some(FormatVersion::Extended),
            _ => None,
        }
    }

    pub fn magic(self) -> i32 {
        match self {
            FormatVersion::Legacy => VM_MAGIC,
            FormatVersion::Extended => VM_MAGIC_VER2,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            FormatVersion::Legacy => LEGACY_HEADER_SIZE,
            FormatVersion::Extended => EXTENDED_HEADER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    pub version: FormatVersion,
    pub instruction_count: i32,
    pub code_offset: i32,
    pub code_length: i32,
    pub data_offset: i32,
    pub data_length: i32,
    pub lit_length: i32,
    pub bss_length: i32,
    /// Always zero for legacy images.
    pub jtrg_length: i32,
}

impl ModuleHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let mut it = ByteIter::new(bytes, 0);
        let magic = it.read_i32(IMAGE_TRUNCATED)?;
        let Some(version) = FormatVersion::from_magic(magic) else {
            warn!(magic, "{}", BAD_MAGIC);
            return Err(Error::load(BAD_MAGIC));
        };
        if bytes.len() < version.header_size() { return Err(Error::load(IMAGE_TRUNCATED)); }

        let mut header = ModuleHeader {
            version,
            instruction_count: it.read_i32(IMAGE_TRUNCATED)?,
            code_offset: it.read_i32(IMAGE_TRUNCATED)?,
            code_length: it.read_i32(IMAGE_TRUNCATED)?,
            data_offset: it.read_i32(IMAGE_TRUNCATED)?,
            data_length: it.read_i32(IMAGE_TRUNCATED)?,
            lit_length: it.read_i32(IMAGE_TRUNCATED)?,
            bss_length: it.read_i32(IMAGE_TRUNCATED)?,
            jtrg_length: 0,
        };
        if version == FormatVersion::Extended {
            header.jtrg_length = it.read_i32(IMAGE_TRUNCATED)?;
        }
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.jtrg_length < 0 || self.bss_length < 0 || self.data_length < 0
            || self.lit_length < 0 || self.code_length <= 0 || self.instruction_count < 0
            || self.code_offset < 0 || self.data_offset < 0 {
            warn!(header = ?self, "{}", BAD_HEADER);
            return Err(Error::load(BAD_HEADER));
        }
        let total = self.data_length as u64 + self.lit_length as u64 + self.bss_length as u64;
        if total > MAX_DATA_SIZE as u64 { return Err(Error::load(DATA_TOO_LARGE)); }
        Ok(())
    }

    /// Size of the sandbox region: initialised, literal and bss data rounded
    /// up to a power of two (never below one word).
    pub fn data_size(&self) -> u32 {
        let total = self.data_length as u32 + self.lit_length as u32 + self.bss_length as u32;
        total.max(MIN_SIZE).next_power_of_two()
    }

    pub fn jump_table_count(&self) -> usize { (self.jtrg_length as usize & !3) >> 2 }
}

/// A parsed image: header plus borrowed segment bytes.
pub struct ModuleImage<'a> {
    pub header: ModuleHeader,
    pub code: &'a [u8],
    /// Initialised data immediately followed by literal data.
    pub data: &'a [u8],
    pub jump_targets: Vec<i32>,
}

impl<'a> ModuleImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        let header = ModuleHeader::parse(bytes)?;
        let it = ByteIter::new(bytes, 0);

        let code = it.slice_from(header.code_offset as usize, header.code_length as usize, SEGMENT_OUT_OF_IMAGE)?;
        let data_len = header.data_length as usize + header.lit_length as usize;
        let data = it.slice_from(header.data_offset as usize, data_len, SEGMENT_OUT_OF_IMAGE)?;

        let mut jump_targets = Vec::new();
        if header.version == FormatVersion::Extended {
            let count = header.jump_table_count();
            debug!(count, "loading jump table targets");
            let mut jt = ByteIter::new(bytes, header.data_offset as usize + data_len);
            if !jt.has_n_left(count * 4) { return Err(Error::load(SEGMENT_OUT_OF_IMAGE)); }
            jump_targets.reserve_exact(count);
            for _ in 0..count {
                jump_targets.push(jt.read_i32(SEGMENT_OUT_OF_IMAGE)?);
            }
        }

        Ok(Self { header, code, data, jump_targets })
    }

    pub fn data_size(&self) -> u32 { self.header.data_size() }
}
