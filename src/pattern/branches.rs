//! Forward conditionals, dispatch chains, calls and jumps.

use crate::ast::CmpOp;
use crate::{Address, BasicBlock, Instruction, Mnemonic, Register};

use super::loops::loop_test;
use super::{PatternKind, PatternMatch, Window};

/// A block ending in `CMP value; BEQ/BNE target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Test<'a> {
    pub compare: &'a Instruction,
    pub branch: &'a Instruction,
    pub register: Register,
    pub target: Address,
}

impl Test<'_> {
    /// Comparison under which the branch is taken
    pub fn taken_when(&self) -> CmpOp {
        if self.branch.mnemonic == Mnemonic::Beq {
            CmpOp::Eq
        } else {
            CmpOp::Ne
        }
    }
}

pub fn test_block(block: &BasicBlock) -> Option<Test<'_>> {
    let (compare, branch, register) = loop_test(block)?;
    Some(Test { compare, branch, register, target: branch.target()? })
}

fn falls_into(previous: &BasicBlock, next: &BasicBlock) -> bool {
    previous.last_instruction().next_address() == next.start
}

/// Header of a loop closed by a `JMP` in the following block
fn is_loop_header(blocks: &[BasicBlock]) -> bool {
    match (blocks.first(), blocks.get(1).and_then(BasicBlock::terminator)) {
        (Some(header), Some(jump)) => jump.mnemonic == Mnemonic::Jmp && jump.target() == Some(header.start),
        _ => false,
    }
}

/// Number of blocks in the dispatch chain starting at `blocks[0]`, or 0.
///
/// A chain is a `CMP; BEQ` block followed by blocks holding nothing but
/// `CMP; BEQ` on the same register.
pub fn dispatch_run(blocks: &[BasicBlock]) -> usize {
    let Some(first) = blocks.first().and_then(test_block) else { return 0 };
    if first.branch.mnemonic != Mnemonic::Beq {
        return 0;
    }

    let mut run = 1;
    for pair in blocks.windows(2) {
        let next = &pair[1];
        match test_block(next) {
            Some(test)
                if next.instructions.len() == 2
                    && test.branch.mnemonic == Mnemonic::Beq
                    && test.register == first.register
                    && falls_into(&pair[0], next) =>
            {
                run += 1
            }
            _ => break,
        }
    }

    if run >= 2 {
        run
    } else {
        0
    }
}

/// One forward test block is an If, a run of them a NestedIf. Declines loop
/// headers and dispatch chains.
pub fn detect_if<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let blocks = window.blocks;
    let mut tests = Vec::new();

    while tests.len() < blocks.len() {
        let rest = &blocks[tests.len()..];
        let Some(test) = test_block(&rest[0]) else { break };
        if test.target <= rest[0].end || is_loop_header(rest) || dispatch_run(rest) > 0 {
            break;
        }
        if let Some(previous) = tests.len().checked_sub(1).map(|index| &blocks[index]) {
            if !falls_into(previous, &rest[0]) {
                break;
            }
        }
        tests.push(test);
    }

    let first = tests.first()?;
    let kind = if tests.len() == 1 { PatternKind::If } else { PatternKind::NestedIf };

    let mut found = PatternMatch::new(kind, &blocks[..tests.len()]);
    found.register = Some(first.register);
    found.primary_value = Some(first.compare.operand.clone());
    found.comparison = Some(first.taken_when());
    found.operands = tests.iter().map(|test| test.compare.operand.clone()).collect();
    found.targets = tests.iter().map(|test| test.target).collect();
    found.control = tests.iter().flat_map(|test| [test.compare.address, test.branch.address]).collect();
    Some(found)
}

/// Two or more `CMP; BEQ` pairs on one register
pub fn detect_switch<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let run = dispatch_run(window.blocks);
    if run == 0 {
        return None;
    }
    let blocks = &window.blocks[..run];
    let tests: Vec<Test<'a>> = blocks.iter().filter_map(test_block).collect();

    let mut found = PatternMatch::new(PatternKind::Switch, blocks);
    found.register = tests.first().map(|test| test.register);
    found.operands = tests.iter().map(|test| test.compare.operand.clone()).collect();
    found.targets = tests.iter().map(|test| test.target).collect();
    found.control = tests.iter().flat_map(|test| [test.compare.address, test.branch.address]).collect();
    Some(found)
}

/// A block that is just a call to a named routine, or just a jump
pub fn detect_call<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let block = window.first()?;

    if let [call] = block.body() {
        let target = call.target().filter(|_| call.mnemonic == Mnemonic::Jsr)?;
        window.symbols.name(target)?;
        let mut found = PatternMatch::new(PatternKind::SubroutineCall, std::slice::from_ref(block));
        found.targets = vec![target];
        return Some(found);
    }

    if let [jump] = block.instructions.as_slice() {
        let target = jump.target().filter(|_| jump.mnemonic == Mnemonic::Jmp)?;
        let mut found = PatternMatch::new(PatternKind::Goto, std::slice::from_ref(block));
        found.targets = vec![target];
        return Some(found);
    }

    None
}
