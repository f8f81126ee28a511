//! Core IR, error types, and stage wiring for the C64 decompiler.
//!
//! This library turns a textual 6502 disassembly of a Commodore 64 program into
//! an approximate structured program: counted loops, conditionals, switch-like
//! dispatches and subroutine calls, rendered as classic line-numbered BASIC,
//! structured modern BASIC, or a curly-brace C-like dialect.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use c64_decompiler::{
//!     emit::Target,
//!     pipeline::{Options, Pipeline},
//!     symbols::{SymbolPaths, SymbolSources},
//! };
//!
//! // Load the four symbol tables (missing files degrade to generated names)
//! let sources = SymbolSources::load(&SymbolPaths::from_dir("symbols"));
//!
//! // Decompile a listing to structured BASIC
//! let pipeline = Pipeline::new(sources, Options { target: Target::ModernBasic, ..Options::default() });
//! let listing = std::fs::read_to_string("demos/border_flash.asm").unwrap();
//! let text = pipeline.run(&listing).unwrap();
//! println!("{}", text);
//! ```

pub mod parser;
pub mod symbols;
pub mod cfg;
pub mod translate;
pub mod pattern;
pub mod ast;
pub mod emit;
pub mod format;
pub mod pipeline;
mod large_tests;

/// A 16-bit address in the C64 memory map
pub type Address = u16;

use std::fmt;

/// Highest zero-page address
pub const ZERO_PAGE_END: Address = 0x00FF;

/// First address of the I/O area (VIC-II, SID, colour RAM, CIAs)
pub const IO_START: Address = 0xD000;

/// Last address of the I/O area
pub const IO_END: Address = 0xDFFF;

/// One of the three programmer-visible 6502 registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Register {
    A,
    X,
    Y,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::A => write!(f, "A"),
            Register::X => write!(f, "X"),
            Register::Y => write!(f, "Y"),
        }
    }
}

/// Index register of an indexed addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    X,
    Y,
}

impl From<Index> for Register {
    fn from(index: Index) -> Self {
        match index {
            Index::X => Register::X,
            Index::Y => Register::Y,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Register::from(*self), f)
    }
}

macro_rules! mnemonics {
    ($($variant:ident => $text:literal),* $(,)?) => {
        /// A 6502 instruction mnemonic.
        ///
        /// The documented instruction set gets one variant each; anything else the
        /// disassembler printed (illegal opcodes, assembler directives) is kept
        /// verbatim in `Other` so later stages can still report it.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Mnemonic {
            $($variant,)*
            Other(String),
        }

        impl Mnemonic {
            /// Parse a mnemonic token, case-insensitively.
            pub fn parse(token: &str) -> Self {
                let upper = token.to_ascii_uppercase();
                match upper.as_str() {
                    $($text => Mnemonic::$variant,)*
                    _ => Mnemonic::Other(upper),
                }
            }

            /// Upper-case spelling of the mnemonic
            pub fn as_str(&self) -> &str {
                match self {
                    $(Mnemonic::$variant => $text,)*
                    Mnemonic::Other(text) => text,
                }
            }
        }
    };
}

mnemonics! {
    Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS", Beq => "BEQ",
    Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL", Brk => "BRK", Bvc => "BVC",
    Bvs => "BVS", Clc => "CLC", Cld => "CLD", Cli => "CLI", Clv => "CLV", Cmp => "CMP",
    Cpx => "CPX", Cpy => "CPY", Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR",
    Inc => "INC", Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
    Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA", Pha => "PHA",
    Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL", Ror => "ROR", Rti => "RTI",
    Rts => "RTS", Sbc => "SBC", Sec => "SEC", Sed => "SED", Sei => "SEI", Sta => "STA",
    Stx => "STX", Sty => "STY", Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA",
    Txs => "TXS", Tya => "TYA",
}

impl Mnemonic {
    /// Returns true for the eight relative branches
    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            Mnemonic::Bcc
                | Mnemonic::Bcs
                | Mnemonic::Beq
                | Mnemonic::Bmi
                | Mnemonic::Bne
                | Mnemonic::Bpl
                | Mnemonic::Bvc
                | Mnemonic::Bvs
        )
    }

    /// Returns true for RTS and RTI
    pub fn is_return(&self) -> bool {
        matches!(self, Mnemonic::Rts | Mnemonic::Rti)
    }

    /// Returns true if the operand of this mnemonic names code rather than data
    pub fn is_control_flow(&self) -> bool {
        self.is_conditional_branch() || matches!(self, Mnemonic::Jmp | Mnemonic::Jsr)
    }

    /// Returns true if a basic block must be closed after this instruction
    pub fn ends_block(&self) -> bool {
        self.is_conditional_branch() || self.is_return() || *self == Mnemonic::Jmp
    }

    /// Register written by a load (LDA/LDX/LDY)
    pub fn loaded_register(&self) -> Option<Register> {
        match self {
            Mnemonic::Lda => Some(Register::A),
            Mnemonic::Ldx => Some(Register::X),
            Mnemonic::Ldy => Some(Register::Y),
            _ => None,
        }
    }

    /// Register read by a store (STA/STX/STY)
    pub fn stored_register(&self) -> Option<Register> {
        match self {
            Mnemonic::Sta => Some(Register::A),
            Mnemonic::Stx => Some(Register::X),
            Mnemonic::Sty => Some(Register::Y),
            _ => None,
        }
    }

    /// Register compared by CMP/CPX/CPY
    pub fn compared_register(&self) -> Option<Register> {
        match self {
            Mnemonic::Cmp => Some(Register::A),
            Mnemonic::Cpx => Some(Register::X),
            Mnemonic::Cpy => Some(Register::Y),
            _ => None,
        }
    }

    /// Register and delta of an increment/decrement of X or Y
    pub fn register_step(&self) -> Option<(Register, i16)> {
        match self {
            Mnemonic::Inx => Some((Register::X, 1)),
            Mnemonic::Dex => Some((Register::X, -1)),
            Mnemonic::Iny => Some((Register::Y, 1)),
            Mnemonic::Dey => Some((Register::Y, -1)),
            _ => None,
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand of one instruction, with the addressing mode kept intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Implied addressing (RTS, INX, ...)
    None,
    /// Accumulator addressing (`ASL A`)
    Accumulator,
    /// `#$hh`
    Immediate(u8),
    /// `$hh` / `$hhhh`, or a decimal branch target
    Absolute(Address),
    /// `$hhhh,X` / `$hhhh,Y`
    Indexed { base: Address, index: Index },
    /// `($hh),Y` (index Y) or `($hh,X)` (index X)
    IndirectIndexed { zp: u8, index: Index },
    /// `($hhhh)`, only used by JMP
    Indirect(Address),
    /// A label the listing did not define
    Symbolic(String),
}

impl Operand {
    /// Memory address named by the operand, if any
    pub fn address(&self) -> Option<Address> {
        match self {
            Operand::Absolute(address) | Operand::Indirect(address) => Some(*address),
            Operand::Indexed { base, .. } => Some(*base),
            Operand::IndirectIndexed { zp, .. } => Some(*zp as Address),
            _ => None,
        }
    }

    /// Returns true for addressing modes that compute their address at runtime
    pub fn is_computed(&self) -> bool {
        matches!(self, Operand::Indexed { .. } | Operand::IndirectIndexed { .. })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Accumulator => write!(f, "A"),
            Operand::Immediate(value) => write!(f, "#${:02X}", value),
            Operand::Absolute(address) if *address <= ZERO_PAGE_END => write!(f, "${:02X}", address),
            Operand::Absolute(address) => write!(f, "${:04X}", address),
            Operand::Indexed { base, index } if *base <= ZERO_PAGE_END => write!(f, "${:02X},{}", base, index),
            Operand::Indexed { base, index } => write!(f, "${:04X},{}", base, index),
            Operand::IndirectIndexed { zp, index: Index::Y } => write!(f, "(${:02X}),Y", zp),
            Operand::IndirectIndexed { zp, index: Index::X } => write!(f, "(${:02X},X)", zp),
            Operand::Indirect(address) => write!(f, "(${:04X})", address),
            Operand::Symbolic(label) => write!(f, "{}", label),
        }
    }
}

/// One parsed instruction. Immutable once the parser hands it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Address of the instruction
    pub address: Address,
    /// Instruction mnemonic
    pub mnemonic: Mnemonic,
    /// Operand with its addressing mode
    pub operand: Operand,
}

impl Instruction {
    /// Create a new instruction
    pub fn new(address: Address, mnemonic: Mnemonic, operand: Operand) -> Self {
        Self { address, mnemonic, operand }
    }

    /// Encoded length in bytes, derived from mnemonic and addressing mode
    pub fn size(&self) -> u16 {
        if self.mnemonic.is_conditional_branch() {
            return 2;
        }
        if matches!(self.mnemonic, Mnemonic::Jmp | Mnemonic::Jsr) {
            return 3;
        }
        match &self.operand {
            Operand::None | Operand::Accumulator => 1,
            Operand::Immediate(_) | Operand::IndirectIndexed { .. } => 2,
            Operand::Absolute(address) | Operand::Indexed { base: address, .. } => {
                if *address <= ZERO_PAGE_END { 2 } else { 3 }
            }
            Operand::Indirect(_) | Operand::Symbolic(_) => 3,
        }
    }

    /// Address of the instruction that follows in memory
    pub fn next_address(&self) -> Address {
        self.address.wrapping_add(self.size())
    }

    /// Code address this instruction transfers control to (JMP/JSR/Bxx with a known address)
    pub fn target(&self) -> Option<Address> {
        match (&self.operand, self.mnemonic.is_control_flow()) {
            (Operand::Absolute(address), true) => Some(*address),
            _ => None,
        }
    }

    /// Data address read or written by this instruction (the vector for `JMP ($hhhh)`)
    pub fn data_address(&self) -> Option<Address> {
        match &self.operand {
            Operand::Indirect(address) => Some(*address),
            _ if self.mnemonic.is_control_flow() => None,
            operand => operand.address(),
        }
    }

    /// Returns true if a basic block must be closed after this instruction
    pub fn ends_block(&self) -> bool {
        self.mnemonic.ends_block()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "${:04X}: {}", self.address, self.mnemonic),
            _ => write!(f, "${:04X}: {} {}", self.address, self.mnemonic, self.operand),
        }
    }
}

/// One basic block: a straight-line run closed by a jump, branch or return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Address of the first instruction
    pub start: Address,
    /// Address of the last instruction
    pub end: Address,
    /// Instructions within this basic block
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Create a block from a non-empty instruction run
    pub fn new(instructions: Vec<Instruction>) -> Option<Self> {
        let start = instructions.first()?.address;
        let end = instructions.last()?.address;
        Some(Self { start, end, instructions })
    }

    /// Get the last instruction in the block
    pub fn last_instruction(&self) -> &Instruction {
        // A block is never empty, see `new`
        &self.instructions[self.instructions.len() - 1]
    }

    /// The closing jump/branch/return, if the block has one
    pub fn terminator(&self) -> Option<&Instruction> {
        let last = self.last_instruction();
        last.ends_block().then_some(last)
    }

    /// Instructions before the terminator
    pub fn body(&self) -> &[Instruction] {
        match self.terminator() {
            Some(_) => &self.instructions[..self.instructions.len() - 1],
            None => &self.instructions,
        }
    }

    /// Position of the instruction at `address` within the block
    pub fn index_of(&self, address: Address) -> Option<usize> {
        self.instructions.iter().position(|insn| insn.address == address)
    }

    /// Returns true if an instruction of this block starts at `address`
    pub fn contains(&self, address: Address) -> bool {
        self.index_of(address).is_some()
    }

    /// Successor addresses: the resolved target, plus the fall-through for
    /// conditional branches. Returns have none.
    pub fn successors(&self) -> Vec<Address> {
        let last = self.last_instruction();
        if last.mnemonic.is_return() {
            return Vec::new();
        }
        if last.mnemonic == Mnemonic::Jmp {
            return last.target().into_iter().collect();
        }
        if last.mnemonic.is_conditional_branch() {
            let mut succs: Vec<Address> = last.target().into_iter().collect();
            succs.push(last.next_address());
            return succs;
        }
        vec![last.next_address()]
    }
}

/// Pipeline stage, used to name structural failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Symbols,
    Cfg,
    Ast,
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Parse => write!(f, "parse"),
            Stage::Symbols => write!(f, "symbol resolution"),
            Stage::Cfg => write!(f, "basic-block"),
            Stage::Ast => write!(f, "AST"),
            Stage::Emit => write!(f, "emit"),
        }
    }
}

/// Error type for decompilation runs
#[derive(Debug, thiserror::Error)]
pub enum DecompileError {
    /// A stage produced nothing the next stage could work with
    #[error("{stage} stage failed: {reason}")]
    Stage { stage: Stage, reason: String },

    /// Input exceeds the configured instruction ceiling
    #[error("Input has {count} instructions, above the ceiling of {limit}")]
    TooManyInstructions { count: usize, limit: usize },

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecompileError {
    /// Structural failure of `stage`
    pub fn stage(stage: Stage, reason: impl Into<String>) -> Self {
        DecompileError::Stage { stage, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(address: Address, mnemonic: Mnemonic, operand: Operand) -> Instruction {
        Instruction::new(address, mnemonic, operand)
    }

    #[test]
    fn test_mnemonic_parse() {
        assert_eq!(Mnemonic::parse("lda"), Mnemonic::Lda);
        assert_eq!(Mnemonic::parse("BNE"), Mnemonic::Bne);
        assert_eq!(Mnemonic::parse("lax"), Mnemonic::Other("LAX".to_string()));
        assert_eq!(Mnemonic::Other("LAX".to_string()).to_string(), "LAX");
    }

    #[test]
    fn test_instruction_sizes() {
        assert_eq!(insn(0xC000, Mnemonic::Inx, Operand::None).size(), 1);
        assert_eq!(insn(0xC000, Mnemonic::Lda, Operand::Immediate(5)).size(), 2);
        assert_eq!(insn(0xC000, Mnemonic::Sta, Operand::Absolute(0xFB)).size(), 2);
        assert_eq!(insn(0xC000, Mnemonic::Sta, Operand::Absolute(0xD020)).size(), 3);
        assert_eq!(insn(0xC000, Mnemonic::Bne, Operand::Absolute(0xC100)).size(), 2);
        assert_eq!(insn(0xC000, Mnemonic::Jsr, Operand::Absolute(0x10)).size(), 3);
        assert_eq!(insn(0xC000, Mnemonic::Lda, Operand::IndirectIndexed { zp: 0xFB, index: Index::Y }).size(), 2);
    }

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::Immediate(0x0A).to_string(), "#$0A");
        assert_eq!(Operand::Indexed { base: 0x0400, index: Index::X }.to_string(), "$0400,X");
        assert_eq!(Operand::IndirectIndexed { zp: 0xFB, index: Index::Y }.to_string(), "($FB),Y");
        assert_eq!(Operand::IndirectIndexed { zp: 0x20, index: Index::X }.to_string(), "($20,X)");
        assert_eq!(insn(0xC000, Mnemonic::Rts, Operand::None).to_string(), "$C000: RTS");
    }

    #[test]
    fn test_target_and_data_address() {
        let jsr = insn(0xC000, Mnemonic::Jsr, Operand::Absolute(0xFFD2));
        assert_eq!(jsr.target(), Some(0xFFD2));
        assert_eq!(jsr.data_address(), None);

        let sta = insn(0xC003, Mnemonic::Sta, Operand::Indexed { base: 0x0400, index: Index::X });
        assert_eq!(sta.target(), None);
        assert_eq!(sta.data_address(), Some(0x0400));

        let jmp = insn(0xC006, Mnemonic::Jmp, Operand::Indirect(0x0314));
        assert_eq!(jmp.target(), None);
        assert_eq!(jmp.data_address(), Some(0x0314));
    }

    #[test]
    fn test_basic_block_operations() {
        let block = BasicBlock::new(vec![
            insn(0xC000, Mnemonic::Lda, Operand::Immediate(1)),
            insn(0xC002, Mnemonic::Cmp, Operand::Immediate(2)),
            insn(0xC004, Mnemonic::Beq, Operand::Absolute(0xC010)),
        ])
        .unwrap();

        assert_eq!(block.start, 0xC000);
        assert_eq!(block.end, 0xC004);
        assert_eq!(block.terminator().unwrap().mnemonic, Mnemonic::Beq);
        assert_eq!(block.body().len(), 2);
        assert_eq!(block.successors(), vec![0xC010, 0xC006]);
        assert!(block.contains(0xC002));
        assert!(!block.contains(0xC003));
    }

    #[test]
    fn test_return_has_no_successors() {
        let block = BasicBlock::new(vec![insn(0xC000, Mnemonic::Rts, Operand::None)]).unwrap();
        assert!(block.successors().is_empty());
        assert!(BasicBlock::new(Vec::new()).is_none());
    }

    #[test]
    fn test_stage_error_display() {
        let err = DecompileError::stage(Stage::Parse, "no instructions");
        assert_eq!(err.to_string(), "parse stage failed: no instructions");
    }
}
