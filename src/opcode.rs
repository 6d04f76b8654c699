#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    Undef = 0,
    Ignore,
    Break,
    Enter,
    Leave,
    Call,
    Push,
    Pop,
    Const,
    Local,
    Jump,
    Eq,
    Ne,
    Lti,
    Lei,
    Gti,
    Gei,
    Ltu,
    Leu,
    Gtu,
    Geu,
    Eqf,
    Nef,
    Ltf,
    Lef,
    Gtf,
    Gef,
    Load1,
    Load2,
    Load4,
    Store1,
    Store2,
    Store4,
    Arg,
    BlockCopy,
    Sex8,
    Sex16,
    Negi,
    Add,
    Sub,
    Divi,
    Divu,
    Modi,
    Modu,
    Muli,
    Mulu,
    Band,
    Bor,
    Bxor,
    Bcom,
    Lsh,
    Rshi,
    Rshu,
    Negf,
    Addf,
    Subf,
    Divf,
    Mulf,
    Cvif,
    Cvfi = 59,
}

const ALL: [Opcode; 60] = {
    use Opcode::*;
    [
        Undef, Ignore, Break, Enter, Leave, Call, Push, Pop, Const, Local, Jump,
        Eq, Ne, Lti, Lei, Gti, Gei, Ltu, Leu, Gtu, Geu, Eqf, Nef, Ltf, Lef, Gtf, Gef,
        Load1, Load2, Load4, Store1, Store2, Store4, Arg, BlockCopy,
        Sex8, Sex16, Negi, Add, Sub, Divi, Divu, Modi, Modu, Muli, Mulu,
        Band, Bor, Bxor, Bcom, Lsh, Rshi, Rshu,
        Negf, Addf, Subf, Divf, Mulf, Cvif, Cvfi,
    ]
};

const NAMES: [&str; 60] = [
    "UNDEF", "IGNORE", "BREAK", "ENTER", "LEAVE", "CALL", "PUSH", "POP", "CONST", "LOCAL", "JUMP",
    "EQ", "NE", "LTI", "LEI", "GTI", "GEI", "LTU", "LEU", "GTU", "GEU", "EQF", "NEF", "LTF", "LEF", "GTF", "GEF",
    "LOAD1", "LOAD2", "LOAD4", "STORE1", "STORE2", "STORE4", "ARG", "BLOCK_COPY",
    "SEX8", "SEX16", "NEGI", "ADD", "SUB", "DIVI", "DIVU", "MODI", "MODU", "MULI", "MULU",
    "BAND", "BOR", "BXOR", "BCOM", "LSH", "RSHI", "RSHU",
    "NEGF", "ADDF", "SUBF", "DIVF", "MULF", "CVIF", "CVFI",
];

impl Opcode {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> { ALL.get(byte as usize).copied() }

    pub fn from_name(name: &str) -> Option<Self> {
        NAMES.iter().position(|n| n.eq_ignore_ascii_case(name)).map(|i| ALL[i])
    }

    #[inline]
    pub fn name(self) -> &'static str { NAMES[self as usize] }

    /// Width in bytes of the immediate that follows the opcode byte.
    #[inline]
    pub fn operand_size(self) -> usize {
        use Opcode::*;
        match self {
            Enter | Leave | Const | Local | BlockCopy => 4,
            op if op.is_branch() => 4,
            Arg => 1,
            _ => 0,
        }
    }

    /// Conditional branches, whose operand is an instruction number.
    #[inline]
    pub fn is_branch(self) -> bool { (Opcode::Eq as u8..=Opcode::Gef as u8).contains(&(self as u8)) }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}
