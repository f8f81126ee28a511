//! Data layout and repetition: record initialisation, repeated code.

use std::collections::BTreeSet;
use std::mem::{discriminant, Discriminant};

use crate::{BasicBlock, Index, Instruction, Mnemonic, Operand, IO_START};

use super::{PatternKind, PatternMatch, Window};

/// A block of `LDA`/`STA` storing into two or more consecutive RAM addresses
pub fn detect_struct<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let block = window.first()?;
    let body = block.body();
    if body.len() < 2 {
        return None;
    }

    let mut fields = BTreeSet::new();
    for insn in body {
        match (&insn.mnemonic, &insn.operand) {
            (Mnemonic::Sta, Operand::Absolute(address)) => {
                fields.insert(*address);
            }
            (Mnemonic::Lda, Operand::Immediate(_) | Operand::Absolute(_)) => {}
            _ => return None,
        }
    }

    let (first, last) = (*fields.first()?, *fields.last()?);
    if fields.len() < 2 || last >= IO_START || usize::from(last - first) + 1 != fields.len() {
        return None;
    }

    let mut found = PatternMatch::new(PatternKind::Struct, std::slice::from_ref(block));
    found.primary_value = Some(Operand::Absolute(first));
    found.operands = fields.into_iter().map(Operand::Absolute).collect();
    Some(found)
}

/// An operand position that differs between repeated blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    /// Instruction index within each block
    pub position: usize,
    /// Operand in each block, in order
    pub values: Vec<Operand>,
    /// Constant difference between consecutive values, if there is one
    pub stride: Option<i32>,
}

impl Variation {
    /// Returns true if the operand can be written as `first + I * stride`
    pub fn is_foldable(&self) -> bool {
        self.stride.is_some() && matches!(self.values.first(), Some(Operand::Immediate(_) | Operand::Absolute(_)))
    }
}

fn operand_shape(operand: &Operand) -> (Discriminant<Operand>, Option<Index>) {
    let index = match operand {
        Operand::Indexed { index, .. } | Operand::IndirectIndexed { index, .. } => Some(*index),
        _ => None,
    };
    (discriminant(operand), index)
}

fn same_shape(a: &Instruction, b: &Instruction) -> bool {
    a.mnemonic == b.mnemonic && operand_shape(&a.operand) == operand_shape(&b.operand)
}

fn numeric(operand: &Operand) -> Option<i32> {
    match operand {
        Operand::Immediate(value) => Some(i32::from(*value)),
        Operand::Absolute(address) | Operand::Indexed { base: address, .. } => Some(i32::from(*address)),
        _ => None,
    }
}

/// Number of consecutive blocks shaped like `blocks[0]`
fn shape_run(blocks: &[BasicBlock]) -> usize {
    let Some(first) = blocks.first() else { return 0 };
    if first.body().len() < 2 {
        return 0;
    }

    let mut run = 1;
    for pair in blocks.windows(2) {
        let (previous, next) = (&pair[0], &pair[1]);
        let shaped = next.instructions.len() == first.instructions.len()
            && next.instructions.iter().zip(&first.instructions).all(|(a, b)| same_shape(a, b))
            && previous.last_instruction().next_address() == next.start;
        if !shaped {
            break;
        }
        run += 1;
    }
    run
}

/// Operand positions that differ across `blocks`.
///
/// Returns `None` if the blocks differ in shape or a control-flow operand varies.
pub fn variations(blocks: &[BasicBlock]) -> Option<Vec<Variation>> {
    let first = blocks.first()?;
    let mut found = Vec::new();

    for (position, insn) in first.instructions.iter().enumerate() {
        let values: Vec<Operand> = blocks
            .iter()
            .map(|block| block.instructions.get(position).map(|other| other.operand.clone()))
            .collect::<Option<_>>()?;
        if values.iter().all(|value| *value == insn.operand) {
            continue;
        }
        if insn.mnemonic.is_control_flow() {
            return None;
        }

        let stride = values.iter().map(numeric).collect::<Option<Vec<i32>>>().and_then(|numbers| {
            let stride = numbers[1] - numbers[0];
            (stride != 0 && numbers.windows(2).all(|pair| pair[1] - pair[0] == stride)).then_some(stride)
        });
        found.push(Variation { position, values, stride });
    }

    Some(found)
}

/// Two or more consecutive blocks of identical shape.
///
/// Folds into an unrolled counted loop when every varying operand moves by a
/// constant stride and the blocks only end in conditional branches; otherwise
/// into a parameterised macro.
pub fn detect_repetition<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let run = shape_run(window.blocks);
    if run < 2 {
        return None;
    }
    let blocks = &window.blocks[..run];
    let varying = variations(blocks)?;

    let loopable = blocks
        .iter()
        .all(|block| block.terminator().map_or(true, |insn| insn.mnemonic.is_conditional_branch()));
    let kind = if loopable && varying.iter().all(Variation::is_foldable) {
        PatternKind::UnrolledLoop
    } else if varying
        .iter()
        .all(|variation| matches!(variation.values[0], Operand::Immediate(_) | Operand::Absolute(_) | Operand::Indexed { .. }))
    {
        PatternKind::Macro
    } else {
        return None;
    };

    let mut found = PatternMatch::new(kind, blocks);
    found.operands = vec![Operand::Immediate(u8::try_from(run).unwrap_or(u8::MAX))];
    Some(found)
}
