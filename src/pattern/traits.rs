//! Single-block traits: what a block does to memory and hardware.

use crate::{Address, BasicBlock, Instruction, Mnemonic, Operand, IO_END, IO_START};

use super::{PatternKind, PatternMatch, Window};

/// Lowest address treated as a global variable
const GLOBAL_START: Address = 0xC000;

/// Keyboard/joystick ports of CIA 1
const INPUT_PORTS: [Address; 2] = [0xDC00, 0xDC01];

/// IRQ/BRK/NMI vectors in RAM, and the hardware vectors
const INTERRUPT_VECTORS: [Address; 4] = [0x0314, 0x0315, 0x0318, 0x0319];
const HARDWARE_VECTORS: std::ops::RangeInclusive<Address> = 0xFFFA..=0xFFFF;

fn is_timer_register(address: Address) -> bool {
    matches!(address, 0xDC04..=0xDC07 | 0xDD04..=0xDD07 | 0xDC0E..=0xDC0F | 0xDD0E..=0xDD0F)
}

fn is_store(insn: &Instruction) -> bool {
    insn.mnemonic.stored_register().is_some()
}

fn is_load(insn: &Instruction) -> bool {
    insn.mnemonic.loaded_register().is_some()
}

/// A single-block match if any instruction satisfies `predicate`
fn trait_match<'a>(
    window: &Window<'a>,
    kind: PatternKind,
    predicate: impl Fn(&Instruction) -> bool,
) -> Option<PatternMatch<'a>> {
    let block: &'a BasicBlock = window.first()?;
    let hit = block.instructions.iter().find(|insn| predicate(insn))?;

    let mut found = PatternMatch::new(kind, std::slice::from_ref(block));
    found.primary_value = Some(hit.operand.clone());
    Some(found)
}

/// `AND`/`ORA`/`EOR` with an immediate mask, or `BIT`
pub fn detect_bit_field<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::BitField, |insn| match insn.mnemonic {
        Mnemonic::And | Mnemonic::Ora | Mnemonic::Eor => matches!(insn.operand, Operand::Immediate(_)),
        Mnemonic::Bit => true,
        _ => false,
    })
}

/// `LDA`/`STA` at $C000 or above, outside the I/O area
pub fn is_global_access(insn: &Instruction) -> bool {
    let io = IO_START..=IO_END;
    matches!(insn.mnemonic, Mnemonic::Lda | Mnemonic::Sta)
        && matches!(insn.operand, Operand::Absolute(address) if address >= GLOBAL_START && !io.contains(&address))
}

pub fn detect_global_var<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::GlobalVar, is_global_access)
}

/// Indirect-indexed addressing through a zero-page pointer
pub fn detect_pointer<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::Pointer, |insn| matches!(insn.operand, Operand::IndirectIndexed { .. }))
}

/// Store to a CIA timer latch or control register
pub fn detect_timer<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::Timer, |insn| {
        is_store(insn) && insn.data_address().is_some_and(is_timer_register)
    })
}

/// Read of a CIA 1 input port
pub fn detect_event_handler<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::EventHandler, |insn| {
        (is_load(insn) || insn.mnemonic == Mnemonic::Bit)
            && insn.data_address().is_some_and(|address| INPUT_PORTS.contains(&address))
    })
}

/// `BRK`, `RTI`, or a store to an interrupt vector
pub fn detect_interrupt<'a>(window: &Window<'a>) -> Option<PatternMatch<'a>> {
    trait_match(window, PatternKind::Interrupt, |insn| match insn.mnemonic {
        Mnemonic::Brk | Mnemonic::Rti => true,
        _ => {
            is_store(insn)
                && insn
                    .data_address()
                    .is_some_and(|address| INTERRUPT_VECTORS.contains(&address) || HARDWARE_VECTORS.contains(&address))
        }
    })
}
