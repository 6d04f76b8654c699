use nohash_hasher::IntSet;

use crate::error::*;
use crate::program::Program;

/// Whitelist of instruction numbers an indirect `JUMP` may land on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpTable {
    targets: IntSet<u32>,
    /// Entry count as declared by the image, used for restart checks.
    declared: usize,
}

impl JumpTable {
    /// Builds the whitelist from the image's jump-table entries plus every
    /// statically resolved `CONST n; JUMP` target in `program`.
    pub fn build(entries: &[i32], program: &Program) -> Result<Self, Error> {
        let mut targets = IntSet::default();
        targets.reserve(entries.len());
        for &entry in entries {
            if !program.is_instruction(entry) { return Err(Error::load(BAD_JUMP_TABLE_ENTRY)); }
            targets.insert(entry as u32);
        }
        targets.extend(program.direct_jump_targets());
        Ok(Self { targets, declared: entries.len() })
    }

    #[inline]
    pub fn allows(&self, target: i32) -> bool { target >= 0 && self.targets.contains(&(target as u32)) }

    pub fn declared_len(&self) -> usize { self.declared }

    pub fn len(&self) -> usize { self.targets.len() }
    pub fn is_empty(&self) -> bool { self.targets.is_empty() }
}
