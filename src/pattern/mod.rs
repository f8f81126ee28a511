//! Structural pattern recognition over basic blocks.
//!
//! A detector looks at a window of blocks starting at the current one and
//! either claims a prefix of it or declines. Detectors run in a fixed priority
//! order and the first claim wins; a block nobody claims yields a `None` match.

pub mod branches;
pub mod layout;
pub mod loops;
pub mod traits;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::ast::CmpOp;
use crate::symbols::SymbolTable;
use crate::{Address, BasicBlock, Operand, Register};

/// Kind of structure a match describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PatternKind {
    ForIncrement,
    ForDecrement,
    While,
    DoUntil,
    If,
    NestedIf,
    Switch,
    Struct,
    Macro,
    UnrolledLoop,
    BitField,
    GlobalVar,
    Pointer,
    Timer,
    EventHandler,
    SubroutineCall,
    Goto,
    Interrupt,
    None,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PatternKind::ForIncrement => "counted loop (increment)",
            PatternKind::ForDecrement => "counted loop (decrement)",
            PatternKind::While => "while loop",
            PatternKind::DoUntil => "do-until loop",
            PatternKind::If => "conditional",
            PatternKind::NestedIf => "conditional chain",
            PatternKind::Switch => "dispatch",
            PatternKind::Struct => "record initialisation",
            PatternKind::Macro => "repeated code",
            PatternKind::UnrolledLoop => "unrolled loop",
            PatternKind::BitField => "bit field",
            PatternKind::GlobalVar => "global variable access",
            PatternKind::Pointer => "pointer access",
            PatternKind::Timer => "timer setup",
            PatternKind::EventHandler => "input handler",
            PatternKind::SubroutineCall => "subroutine call",
            PatternKind::Goto => "jump",
            PatternKind::Interrupt => "interrupt handler",
            PatternKind::None => "plain code",
        };
        f.write_str(text)
    }
}

/// Blocks a detector may look at: the current block and everything after it
/// up to the end of the enclosing routine.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub blocks: &'a [BasicBlock],
    pub symbols: &'a SymbolTable,
}

impl<'a> Window<'a> {
    pub fn new(blocks: &'a [BasicBlock], symbols: &'a SymbolTable) -> Self {
        Window { blocks, symbols }
    }

    pub fn first(&self) -> Option<&'a BasicBlock> {
        self.blocks.first()
    }

    /// Window starting `n` blocks later
    pub fn skip(&self, n: usize) -> Window<'a> {
        Window { blocks: self.blocks.get(n..).unwrap_or(&[]), symbols: self.symbols }
    }
}

/// Result of pattern recognition for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'a> {
    pub kind: PatternKind,
    /// Counted, tested or dispatched register
    pub register: Option<Register>,
    /// Loop initial value or tested value
    pub primary_value: Option<Operand>,
    /// Loop bound and step, or case values
    pub operands: Vec<Operand>,
    /// Loop condition
    pub comparison: Option<CmpOp>,
    /// Branch targets the structure refers to
    pub targets: Vec<Address>,
    /// Blocks claimed by the match
    pub blocks: &'a [BasicBlock],
    /// Instructions the structure absorbs instead of translating
    pub control: BTreeSet<Address>,
    /// Address the structured node is placed at
    pub anchor: Address,
}

impl<'a> PatternMatch<'a> {
    /// A match of `kind` covering `blocks`
    pub fn new(kind: PatternKind, blocks: &'a [BasicBlock]) -> Self {
        PatternMatch {
            kind,
            register: None,
            primary_value: None,
            operands: Vec::new(),
            comparison: None,
            targets: Vec::new(),
            blocks,
            control: BTreeSet::new(),
            anchor: blocks.first().map(|block| block.start).unwrap_or_default(),
        }
    }

    /// The `None` match for the first block of a window
    pub fn none(window: &Window<'a>) -> Self {
        PatternMatch::new(PatternKind::None, window.blocks.get(..1).unwrap_or(&[]))
    }

    /// Returns true if the instruction at `address` is absorbed by the structure
    pub fn absorbs(&self, address: Address) -> bool {
        self.control.contains(&address)
    }
}

/// A pure structural detector
pub type Detector = for<'a> fn(&Window<'a>) -> Option<PatternMatch<'a>>;

/// All detectors, highest priority first
pub const DETECTORS: &[Detector] = &[
    loops::detect_for,
    loops::detect_while,
    branches::detect_if,
    branches::detect_switch,
    branches::detect_call,
    layout::detect_struct,
    layout::detect_repetition,
    traits::detect_bit_field,
    traits::detect_global_var,
    traits::detect_pointer,
    traits::detect_timer,
    traits::detect_event_handler,
    traits::detect_interrupt,
];

/// Best match for the first block of `window`
pub fn match_patterns<'a>(window: &Window<'a>) -> PatternMatch<'a> {
    let found = DETECTORS.iter().find_map(|detect| detect(window)).unwrap_or_else(|| PatternMatch::none(window));
    if let Some(block) = window.first() {
        log::trace!("Block ${:04X}: {} ({} block(s))", block.start, found.kind, found.blocks.len());
    }
    found
}


#[cfg(test)]
mod tests {
    use super::test_support::analyse;
    use super::*;

    #[test]
    fn test_unclaimed_block_is_none() {
        let (blocks, symbols) = analyse("$C000: NOP\n$C001: RTS\n");
        let found = match_patterns(&Window::new(&blocks, &symbols));
        assert_eq!(found.kind, PatternKind::None);
        assert_eq!(found.blocks.len(), 1);
        assert!(found.control.is_empty());
    }

    #[test]
    fn test_for_wins_over_later_detectors() {
        // The body also stores to a hardware register
        let (blocks, symbols) = analyse(
            "$C000: LDX #$00\n\
             $C002: STX $D020\n\
             $C005: INX\n\
             $C006: CPX #$10\n\
             $C008: BNE $C002\n\
             $C00A: RTS\n",
        );
        let found = match_patterns(&Window::new(&blocks, &symbols));
        assert_eq!(found.kind, PatternKind::ForIncrement);
    }

    #[test]
    fn test_empty_window() {
        let symbols = SymbolTable::default();
        let found = match_patterns(&Window::new(&[], &symbols));
        assert_eq!(found.kind, PatternKind::None);
        assert!(found.blocks.is_empty());
    }
}
