//! Loop detectors: counted loops, top-tested and bottom-tested loops.

use crate::ast::CmpOp;
use crate::{BasicBlock, Instruction, Mnemonic, Operand, Register};

use super::{PatternKind, PatternMatch, Window};

/// Returns true if `insn` overwrites `register`
pub(crate) fn writes_register(insn: &Instruction, register: Register) -> bool {
    if insn.mnemonic.loaded_register() == Some(register) {
        return true;
    }
    if matches!(insn.mnemonic.register_step(), Some((stepped, _)) if stepped == register) {
        return true;
    }
    match register {
        Register::X => matches!(insn.mnemonic, Mnemonic::Tax | Mnemonic::Tsx),
        Register::Y => matches!(insn.mnemonic, Mnemonic::Tay),
        Register::A => matches!(
            insn.mnemonic,
            Mnemonic::Txa
                | Mnemonic::Tya
                | Mnemonic::Pla
                | Mnemonic::Adc
                | Mnemonic::Sbc
                | Mnemonic::And
                | Mnemonic::Ora
                | Mnemonic::Eor
        ),
    }
}

fn is_value(operand: &Operand) -> bool {
    !matches!(operand, Operand::None | Operand::Accumulator | Operand::Indirect(_))
}

/// Counted loop: `LDX #init`, body, `INX`/`DEX` run, optional `CPX bound`,
/// `BNE` back to the first body instruction. Without a compare the loop runs
/// down (or up) to zero.
pub fn detect_for<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let block = window.first()?;
    let branch = block.terminator()?;
    if branch.mnemonic != Mnemonic::Bne {
        return None;
    }
    let top_index = block.index_of(branch.target()?)?;
    let insns = &block.instructions;
    let branch_index = insns.len() - 1;

    let (init_index, init) = insns[..top_index]
        .iter()
        .enumerate()
        .rev()
        .find(|(_, insn)| matches!(insn.mnemonic, Mnemonic::Ldx | Mnemonic::Ldy))?;
    let register = init.mnemonic.loaded_register()?;
    if !is_value(&init.operand) {
        return None;
    }
    if insns[init_index + 1..top_index].iter().any(|insn| writes_register(insn, register)) {
        return None;
    }

    let compare = branch_index
        .checked_sub(1)
        .map(|index| &insns[index])
        .filter(|insn| insn.mnemonic.compared_register() == Some(register) && is_value(&insn.operand));
    let steps_end = if compare.is_some() { branch_index - 1 } else { branch_index };
    if steps_end < top_index {
        return None;
    }

    // The step run sits right before the compare (or the branch)
    let mut steps_start = steps_end;
    let mut step: i16 = 0;
    while steps_start > top_index {
        match insns[steps_start - 1].mnemonic.register_step() {
            Some((stepped, delta)) if stepped == register => {
                step += delta;
                steps_start -= 1;
            }
            _ => break,
        }
    }
    if step == 0 {
        return None;
    }
    if insns[top_index..steps_start].iter().any(|insn| writes_register(insn, register)) {
        return None;
    }

    let bound = compare.map(|insn| insn.operand.clone()).unwrap_or(Operand::Immediate(0));
    let kind = if step > 0 { PatternKind::ForIncrement } else { PatternKind::ForDecrement };

    let mut found = PatternMatch::new(kind, std::slice::from_ref(block));
    found.register = Some(register);
    found.primary_value = Some(init.operand.clone());
    found.operands = vec![bound, Operand::Immediate(step.unsigned_abs() as u8)];
    found.comparison = Some(CmpOp::Ne);
    found.targets = vec![insns[top_index].address];
    found.anchor = init.address;
    found.control.insert(init.address);
    found.control.extend(insns[steps_start..steps_end].iter().map(|insn| insn.address));
    found.control.extend(compare.map(|insn| insn.address));
    found.control.insert(branch.address);
    Some(found)
}

/// `CMP value; BEQ/BNE target` closing a block
pub(crate) fn loop_test(block: &BasicBlock) -> Option<(&Instruction, &Instruction, Register)> {
    let branch = block.terminator()?;
    if !matches!(branch.mnemonic, Mnemonic::Beq | Mnemonic::Bne) {
        return None;
    }
    let compare = block.instructions.len().checked_sub(2).map(|index| &block.instructions[index])?;
    let register = compare.mnemonic.compared_register()?;
    is_value(&compare.operand).then_some((compare, branch, register))
}

/// Top-tested (header block tests and exits, body block jumps back) or
/// bottom-tested (one block branching back into itself) loop.
pub fn detect_while<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    detect_top_tested(window).or_else(|| detect_bottom_tested(window))
}

fn detect_top_tested<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let header = window.blocks.first()?;
    let body = window.blocks.get(1)?;
    let (compare, branch, register) = loop_test(header)?;

    let jump = body.terminator()?;
    if jump.mnemonic != Mnemonic::Jmp || jump.target() != Some(header.start) {
        return None;
    }
    let exit = jump.next_address();
    if branch.target() != Some(exit) {
        return None;
    }

    // BNE leaves unless equal (while equal); BEQ leaves once equal (until equal)
    let kind = if branch.mnemonic == Mnemonic::Bne { PatternKind::While } else { PatternKind::DoUntil };

    let mut found = PatternMatch::new(kind, &window.blocks[..2]);
    found.register = Some(register);
    found.primary_value = Some(compare.operand.clone());
    found.comparison = Some(CmpOp::Eq);
    found.targets = vec![header.start, exit];
    found.control.extend([compare.address, branch.address, jump.address]);
    Some(found)
}

fn detect_bottom_tested<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    let block = window.first()?;
    let (compare, branch, register) = loop_test(block)?;
    let target = branch.target()?;
    let top_index = block.index_of(target)?;
    if top_index + 1 >= block.instructions.len() {
        return None;
    }

    let until = if branch.mnemonic == Mnemonic::Bne { CmpOp::Eq } else { CmpOp::Ne };

    let mut found = PatternMatch::new(PatternKind::DoUntil, std::slice::from_ref(block));
    found.register = Some(register);
    found.primary_value = Some(compare.operand.clone());
    found.comparison = Some(until);
    found.targets = vec![target];
    found.anchor = target;
    found.control.extend([compare.address, branch.address]);
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::test_support::analyse;
    use crate::Address;

    fn addresses(found: &PatternMatch<'_>) -> Vec<Address> {
        found.control.iter().copied().collect()
    }

    #[test]
    fn test_counted_loop() {
        let (blocks, symbols) = analyse(
            "$C000: LDX #$00\n\
             $C002: INX\n\
             $C003: CPX #$0A\n\
             $C005: BNE $C002\n\
             $C007: RTS\n",
        );
        let found = detect_for(&Window::new(&blocks, &symbols)).unwrap();

        assert_eq!(found.kind, PatternKind::ForIncrement);
        assert_eq!(found.register, Some(Register::X));
        assert_eq!(found.primary_value, Some(Operand::Immediate(0)));
        assert_eq!(found.operands, vec![Operand::Immediate(10), Operand::Immediate(1)]);
        assert_eq!(found.targets, vec![0xC002]);
        assert_eq!(addresses(&found), vec![0xC000, 0xC002, 0xC003, 0xC005]);
    }

    #[test]
    fn test_countdown_without_compare() {
        let (blocks, symbols) = analyse(
            "$C000: LDY #$08\n\
             $C002: LDA $0400,Y\n\
             $C005: STA $0800,Y\n\
             $C008: DEY\n\
             $C009: BNE $C002\n\
             $C00B: RTS\n",
        );
        let found = detect_for(&Window::new(&blocks, &symbols)).unwrap();

        assert_eq!(found.kind, PatternKind::ForDecrement);
        assert_eq!(found.register, Some(Register::Y));
        assert_eq!(found.operands, vec![Operand::Immediate(0), Operand::Immediate(1)]);
        assert!(!found.absorbs(0xC002));
        assert!(found.absorbs(0xC008));
    }

    #[test]
    fn test_net_step() {
        let (blocks, symbols) = analyse(
            "$C000: LDX #$00\n\
             $C002: STA $0400,X\n\
             $C005: INX\n\
             $C006: INX\n\
             $C007: CPX #$28\n\
             $C009: BNE $C002\n",
        );
        let found = detect_for(&Window::new(&blocks, &symbols)).unwrap();
        assert_eq!(found.operands[1], Operand::Immediate(2));
    }

    #[test]
    fn test_counter_clobbered_in_body() {
        let (blocks, symbols) = analyse(
            "$C000: LDX #$00\n\
             $C002: TAX\n\
             $C003: INX\n\
             $C004: CPX #$0A\n\
             $C006: BNE $C002\n",
        );
        assert!(detect_for(&Window::new(&blocks, &symbols)).is_none());
    }

    #[test]
    fn test_top_tested_loop() {
        let (blocks, symbols) = analyse(
            "$C000: LDA $DC01\n\
             $C003: CMP #$FF\n\
             $C005: BNE $C00B\n\
             $C007: INC $D020\n\
             $C00A: JMP $C000\n\
             $C00D: RTS\n",
        );
        // Exit is the instruction after the JMP
        assert!(detect_while(&Window::new(&blocks, &symbols)).is_none());

        let (blocks, symbols) = analyse(
            "$C000: LDA $DC01\n\
             $C003: CMP #$FF\n\
             $C005: BNE $C00D\n\
             $C007: INC $D020\n\
             $C00A: JMP $C000\n\
             $C00D: RTS\n",
        );
        let found = detect_while(&Window::new(&blocks, &symbols)).unwrap();
        assert_eq!(found.kind, PatternKind::While);
        assert_eq!(found.blocks.len(), 2);
        assert_eq!(found.comparison, Some(CmpOp::Eq));
        assert_eq!(found.primary_value, Some(Operand::Immediate(0xFF)));
        assert_eq!(addresses(&found), vec![0xC003, 0xC005, 0xC00A]);
    }

    #[test]
    fn test_top_tested_until() {
        let (blocks, symbols) = analyse(
            "$C000: LDA $DC00\n\
             $C003: CMP #$6F\n\
             $C005: BEQ $C00D\n\
             $C007: INC $D021\n\
             $C00A: JMP $C000\n\
             $C00D: RTS\n",
        );
        let found = detect_while(&Window::new(&blocks, &symbols)).unwrap();
        assert_eq!(found.kind, PatternKind::DoUntil);
        assert_eq!(found.register, Some(Register::A));
    }

    #[test]
    fn test_bottom_tested_loop() {
        let (blocks, symbols) = analyse(
            "$C000: SEI\n\
             $C001: LDA $D012\n\
             $C004: CMP #$FF\n\
             $C006: BNE $C001\n\
             $C008: RTS\n",
        );
        let found = detect_while(&Window::new(&blocks, &symbols)).unwrap();
        assert_eq!(found.kind, PatternKind::DoUntil);
        assert_eq!(found.comparison, Some(CmpOp::Eq));
        assert_eq!(found.anchor, 0xC001);
        assert_eq!(found.blocks.len(), 1);
    }

    #[test]
    fn test_forward_branch_is_not_a_loop() {
        let (blocks, symbols) = analyse(
            "$C000: LDA $FB\n\
             $C002: CMP #$01\n\
             $C004: BEQ $C010\n\
             $C006: RTS\n",
        );
        let window = Window::new(&blocks, &symbols);
        assert!(detect_for(&window).is_none());
        assert!(detect_while(&window).is_none());
    }
}
