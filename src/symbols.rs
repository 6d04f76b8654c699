use std::fmt::{Display, Formatter};

use tracing::{debug, warn};

use crate::program::Program;

/// One named function in the code segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Byte offset in the code segment.
    pub offset: u32,
    pub name: String,
    pub calls: u64,
}

/// Code-segment symbols of one instance, ordered by offset, with
/// per-function invocation counters.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

/// A row of [`SymbolTable::report`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub name: String,
    pub calls: u64,
    pub percent: f64,
}

impl Display for ProfileEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>9} {:>6.2}% {}", self.calls, self.percent, self.name)
    }
}

impl SymbolTable {
    /// Parses `segment value name` records. Values are instruction numbers
    /// in hex; records outside the code segment or past the last
    /// instruction are skipped, as is a trailing partial record.
    pub fn parse(text: &str, program: &Program) -> Self {
        let mut symbols = Vec::new();
        let mut words = text.split_whitespace();
        while let (Some(segment), Some(value), Some(name)) = (words.next(), words.next(), words.next()) {
            if segment != "0" { continue; }
            let Ok(n) = u32::from_str_radix(value.trim_start_matches("0x"), 16) else {
                warn!(value, name, "unparsable symbol value");
                continue;
            };
            let Some(&offset) = program.offsets.get(n as usize) else {
                warn!(instruction = n, name, "symbol past the end of the program");
                continue;
            };
            symbols.push(Symbol { offset, name: name.to_string(), calls: 0 });
        }
        symbols.sort_by_key(|s| s.offset);
        debug!(count = symbols.len(), "loaded symbols");
        Self { symbols }
    }

    pub fn len(&self) -> usize { self.symbols.len() }
    pub fn is_empty(&self) -> bool { self.symbols.is_empty() }
    pub fn symbols(&self) -> &[Symbol] { &self.symbols }

    fn index_at(&self, offset: u32) -> Option<usize> {
        self.symbols.partition_point(|s| s.offset <= offset).checked_sub(1)
    }

    /// Nearest symbol at or before `offset`, as `name` or `name+delta`.
    pub fn lookup(&self, offset: u32) -> Option<String> {
        let sym = &self.symbols[self.index_at(offset)?];
        let delta = offset - sym.offset;
        Some(if delta == 0 { sym.name.clone() } else { format!("{}+{}", sym.name, delta) })
    }

    /// Counts a call into the function containing `offset`.
    pub fn record_call(&mut self, offset: u32) {
        if let Some(i) = self.index_at(offset) { self.symbols[i].calls += 1; }
    }

    /// Called functions by invocation count, highest first. Counters are
    /// reset afterwards.
    pub fn report(&mut self) -> Vec<ProfileEntry> {
        let total: u64 = self.symbols.iter().map(|s| s.calls).sum();
        let mut rows: Vec<ProfileEntry> = self.symbols.iter()
            .filter(|s| s.calls > 0)
            .map(|s| ProfileEntry {
                name: s.name.clone(),
                calls: s.calls,
                percent: 100.0 * s.calls as f64 / total as f64,
            })
            .collect();
        rows.sort_by(|a, b| b.calls.cmp(&a.calls));
        self.reset_counters();
        rows
    }

    pub fn reset_counters(&mut self) {
        for s in &mut self.symbols { s.calls = 0; }
    }
}
