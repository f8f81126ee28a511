//! Basic-block partitioning of an address-ordered instruction stream.

use std::collections::BTreeSet;

use crate::{Address, BasicBlock, Instruction};

/// Split `instructions` into basic blocks.
///
/// A block is closed after every JMP, conditional branch, RTS and RTI, and
/// before any gap in the address sequence. Branch targets do not start new
/// blocks; label placement works per instruction.
///
/// # Arguments
/// * `instructions` - Parsed instructions in ascending address order
///
/// # Returns
/// Blocks in address order, covering every instruction exactly once
pub fn build_blocks(instructions: &[Instruction]) -> Vec<BasicBlock> {
    log::debug!("Partitioning {} instructions into basic blocks", instructions.len());

    let mut blocks = Vec::new();
    let mut current: Vec<Instruction> = Vec::new();

    for insn in instructions {
        if let Some(previous) = current.last() {
            if previous.next_address() != insn.address {
                blocks.extend(BasicBlock::new(std::mem::take(&mut current)));
            }
        }

        current.push(insn.clone());

        if insn.ends_block() {
            blocks.extend(BasicBlock::new(std::mem::take(&mut current)));
        }
    }
    blocks.extend(BasicBlock::new(current));

    log::debug!("Built {} basic blocks", blocks.len());
    blocks
}

/// Index of the block whose first instruction is at `address`
pub fn block_starting_at(blocks: &[BasicBlock], address: Address) -> Option<usize> {
    blocks.binary_search_by_key(&address, |block| block.start).ok()
}

/// Index of the block holding an instruction at `address`
pub fn block_containing(blocks: &[BasicBlock], address: Address) -> Option<usize> {
    let candidate = blocks.partition_point(|block| block.start <= address).checked_sub(1)?;
    blocks[candidate].contains(address).then_some(candidate)
}

/// Jump and branch targets that land on no parsed instruction.
///
/// These keep their generated names but have no block; the emitter renders
/// gotos to them as references to undefined labels.
pub fn external_targets(blocks: &[BasicBlock]) -> BTreeSet<Address> {
    let targets: BTreeSet<Address> = blocks
        .iter()
        .flat_map(|block| block.instructions.iter())
        .filter(|insn| insn.mnemonic != crate::Mnemonic::Jsr)
        .filter_map(Instruction::target)
        .filter(|target| block_containing(blocks, *target).is_none())
        .collect();

    for target in &targets {
        log::warn!("Branch target ${:04X} is outside the parsed listing", target);
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::Mnemonic;

    fn blocks_of(listing: &str) -> Vec<BasicBlock> {
        build_blocks(&parser::parse(listing).instructions)
    }

    #[test]
    fn test_blocks_close_after_control_flow() {
        let blocks = blocks_of(
            "$C000: LDX #$00\n\
             $C002: INX\n\
             $C003: CPX #$0A\n\
             $C005: BNE $C002\n\
             $C007: JSR $FFD2\n\
             $C00A: RTS\n",
        );

        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].end), (0xC000, 0xC005));
        assert_eq!(blocks[0].successors(), vec![0xC002, 0xC007]);
        assert_eq!((blocks[1].start, blocks[1].end), (0xC007, 0xC00A));
        assert!(blocks[1].successors().is_empty());
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        let parsed = parser::parse(
            "$C000: LDA #$01\n\
             $C002: BEQ $C008\n\
             $C004: JMP $C000\n\
             $C007: NOP\n\
             $C008: RTI\n\
             $C009: NOP\n",
        );
        let blocks = build_blocks(&parsed.instructions);

        let flattened: Vec<&Instruction> = blocks.iter().flat_map(|b| b.instructions.iter()).collect();
        assert_eq!(flattened.len(), parsed.instructions.len());
        for (block_insn, insn) in flattened.iter().zip(&parsed.instructions) {
            assert_eq!(*block_insn, insn);
        }
        assert!(blocks.windows(2).all(|pair| pair[0].end < pair[1].start));
    }

    #[test]
    fn test_gap_closes_block() {
        let blocks = blocks_of("$C000: NOP\n$C010: NOP\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].successors(), vec![0xC001]);
    }

    #[test]
    fn test_block_lookup() {
        let blocks = blocks_of("$C000: NOP\n$C001: BNE $C000\n$C003: RTS\n");
        assert_eq!(block_starting_at(&blocks, 0xC003), Some(1));
        assert_eq!(block_starting_at(&blocks, 0xC001), None);
        assert_eq!(block_containing(&blocks, 0xC001), Some(0));
        assert_eq!(block_containing(&blocks, 0xC002), None);
        assert_eq!(block_containing(&blocks, 0xBFFF), None);
    }

    #[test]
    fn test_external_targets() {
        let blocks = blocks_of("$C000: BNE $C100\n$C002: JSR $FFD2\n$C005: JMP $C000\n");
        let external = external_targets(&blocks);
        assert_eq!(external.into_iter().collect::<Vec<_>>(), vec![0xC100]);
        assert_eq!(blocks[1].last_instruction().mnemonic, Mnemonic::Jmp);
    }

    #[test]
    fn test_empty_input() {
        assert!(build_blocks(&[]).is_empty());
    }
}
