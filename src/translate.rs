//! One instruction in, one generic AST node out.
//!
//! Registers are named `A`, `X`, `Y` and `SP`; flags `FLAGS` (the result of the
//! last compare/test), `CARRY`, `OVERFLOW`, `DECIMAL` and `IRQ_DISABLE`; the
//! hardware stack is `STACK`. ADC and SBC ignore the carry.

use crate::ast::{memory_ref, pointer_ref, AstNode, NodeKind};
use crate::symbols::{generated_data_name, SymbolKind, SymbolTable};
use crate::{Address, Index, Instruction, Mnemonic, Operand};

/// Name of a data address
pub fn data_name(address: Address, symbols: &SymbolTable) -> String {
    match symbols.name(address) {
        Some(name) => name.to_string(),
        None => generated_data_name(address),
    }
}

/// Readable value of an operand, or `None` if it names no value
pub fn operand_value(operand: &Operand, symbols: &SymbolTable) -> Option<String> {
    match operand {
        Operand::Immediate(value) => Some(value.to_string()),
        Operand::Absolute(address) => Some(data_name(*address, symbols)),
        Operand::Indexed { base, index } => Some(memory_ref(&data_name(*base, symbols), &index.to_string())),
        Operand::IndirectIndexed { zp, index: Index::Y } => {
            Some(pointer_ref(&data_name(*zp as Address, symbols), "Y"))
        }
        Operand::IndirectIndexed { zp, index: Index::X } => {
            Some(pointer_ref(&format!("{} + X", data_name(*zp as Address, symbols)), "0"))
        }
        Operand::Accumulator => Some("A".to_string()),
        Operand::Symbolic(label) => Some(label.clone()),
        Operand::None | Operand::Indirect(_) => None,
    }
}

/// Writable location of an operand (no immediates)
fn operand_location(operand: &Operand, symbols: &SymbolTable) -> Option<String> {
    match operand {
        Operand::Immediate(_) => None,
        operand => operand_value(operand, symbols),
    }
}

/// Target of a read-modify-write instruction: the accumulator or memory
fn shift_location(operand: &Operand, symbols: &SymbolTable) -> Option<String> {
    match operand {
        Operand::None | Operand::Accumulator => Some("A".to_string()),
        operand => operand_location(operand, symbols),
    }
}

/// Condition under which a conditional branch is taken
pub fn branch_condition(mnemonic: &Mnemonic) -> Option<[&'static str; 3]> {
    let condition = match mnemonic {
        Mnemonic::Beq => ["FLAGS", "=", "0"],
        Mnemonic::Bne => ["FLAGS", "<>", "0"],
        Mnemonic::Bmi => ["FLAGS", "<", "0"],
        Mnemonic::Bpl => ["FLAGS", ">=", "0"],
        Mnemonic::Bcc => ["CARRY", "=", "0"],
        Mnemonic::Bcs => ["CARRY", "=", "1"],
        Mnemonic::Bvc => ["OVERFLOW", "=", "0"],
        Mnemonic::Bvs => ["OVERFLOW", "=", "1"],
        _ => return None,
    };
    Some(condition)
}

fn assign(dest: impl Into<String>, src: impl Into<String>) -> AstNode {
    AstNode::new(NodeKind::Assign).with_params([dest.into(), src.into()])
}

fn update(dest: &str, op: &str, rhs: impl Into<String>) -> AstNode {
    AstNode::new(NodeKind::Assign).with_params([dest.to_string(), dest.to_string(), op.to_string(), rhs.into()])
}

fn code_label(insn: &Instruction, symbols: &SymbolTable) -> Option<String> {
    match &insn.operand {
        Operand::Absolute(address) => Some(symbols.code_name(*address)),
        Operand::Symbolic(label) => Some(label.clone()),
        _ => None,
    }
}

/// Translate one instruction.
///
/// Unknown mnemonics, and operands the mnemonic cannot take, give a single
/// `Raw` node with the original text.
pub fn translate(insn: &Instruction, symbols: &SymbolTable) -> AstNode {
    let node = translate_rule(insn, symbols).unwrap_or_else(|| {
        log::debug!("No translation for {}", insn);
        AstNode::raw(raw_text(insn))
    });
    node.at(insn.address)
}

/// Original instruction text without the address
pub fn raw_text(insn: &Instruction) -> String {
    match insn.operand {
        Operand::None => insn.mnemonic.to_string(),
        _ => format!("{} {}", insn.mnemonic, insn.operand),
    }
}

fn translate_rule(insn: &Instruction, symbols: &SymbolTable) -> Option<AstNode> {
    use Mnemonic::*;

    let implied = matches!(insn.operand, Operand::None);
    let value = || operand_value(&insn.operand, symbols).filter(|_| !matches!(insn.operand, Operand::Accumulator));
    let location = || operand_location(&insn.operand, symbols).filter(|_| !matches!(insn.operand, Operand::Accumulator));

    let node = match &insn.mnemonic {
        Lda | Ldx | Ldy => {
            let register = insn.mnemonic.loaded_register()?;
            assign(register.to_string(), value()?)
        }
        Sta | Stx | Sty => {
            let register = insn.mnemonic.stored_register()?;
            assign(location()?, register.to_string())
        }

        Tax if implied => assign("X", "A"),
        Tay if implied => assign("Y", "A"),
        Txa if implied => assign("A", "X"),
        Tya if implied => assign("A", "Y"),
        Tsx if implied => assign("X", "SP"),
        Txs if implied => assign("SP", "X"),

        Inx | Iny | Dex | Dey if implied => {
            let (register, step) = insn.mnemonic.register_step()?;
            let op = if step > 0 { "+" } else { "-" };
            update(&register.to_string(), op, "1")
        }
        Inc => update(&location()?, "+", "1"),
        Dec => update(&location()?, "-", "1"),

        Adc => update("A", "+", value()?),
        Sbc => update("A", "-", value()?),
        And => update("A", "AND", value()?),
        Ora => update("A", "OR", value()?),
        Eor => update("A", "XOR", value()?),

        Asl | Rol => update(&shift_location(&insn.operand, symbols)?, "*", "2"),
        Lsr | Ror => update(&shift_location(&insn.operand, symbols)?, "/", "2"),

        Cmp | Cpx | Cpy => {
            let register = insn.mnemonic.compared_register()?;
            AstNode::new(NodeKind::Expr).with_value("FLAGS").with_params([register.to_string(), "-".to_string(), value()?])
        }
        Bit => AstNode::new(NodeKind::Expr).with_value("FLAGS").with_params(["A".to_string(), "AND".to_string(), location()?]),

        Clc if implied => assign("CARRY", "0"),
        Sec if implied => assign("CARRY", "1"),
        Clv if implied => assign("OVERFLOW", "0"),
        Cld if implied => assign("DECIMAL", "0"),
        Sed if implied => assign("DECIMAL", "1"),
        Cli if implied => assign("IRQ_DISABLE", "0"),
        Sei if implied => assign("IRQ_DISABLE", "1"),

        Pha if implied => assign("STACK", "A"),
        Php if implied => assign("STACK", "FLAGS"),
        Pla if implied => assign("A", "STACK"),
        Plp if implied => assign("FLAGS", "STACK"),

        Jsr => match &insn.operand {
            Operand::Absolute(address) if symbols.kind(*address) == Some(SymbolKind::KernalCall) => {
                AstNode::new(NodeKind::KernalCall).with_value(symbols.code_name(*address)).with_params([address.to_string()])
            }
            _ => AstNode::new(NodeKind::SubCall).with_value(code_label(insn, symbols)?),
        },
        Jmp => AstNode::new(NodeKind::Goto).with_value(code_label(insn, symbols)?),

        Bcc | Bcs | Beq | Bmi | Bne | Bpl | Bvc | Bvs => {
            let condition = branch_condition(&insn.mnemonic)?;
            AstNode::new(NodeKind::Goto).with_value(code_label(insn, symbols)?).with_params(condition)
        }

        Rts if implied => AstNode::new(NodeKind::Return),
        Rti if implied => AstNode::new(NodeKind::Return).with_value("interrupt"),

        _ => return None,
    };

    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{self, parse_line};
    use crate::symbols::{SymbolEntry, SymbolSources};
    use rstest::rstest;

    fn table_for(listing: &str) -> SymbolTable {
        let mut sources = SymbolSources::default();
        sources.hardware.insert(0xD020, SymbolEntry { name: "BORDER_COLOR".to_string(), description: None });
        sources.routines.insert(0xFFD2, SymbolEntry { name: "CHROUT".to_string(), description: None });
        SymbolTable::resolve(&parser::parse(listing).candidates, &sources)
    }

    fn translate_line(text: &str) -> AstNode {
        let insn = parse_line(text).unwrap();
        translate(&insn, &table_for(text))
    }

    #[rstest]
    #[case("$C000: LDA #$05", NodeKind::Assign, "", &["A", "5"])]
    #[case("$C000: STA $D020", NodeKind::Assign, "", &["BORDER_COLOR", "A"])]
    #[case("$C000: STA $0400,X", NodeKind::Assign, "", &["[VAR_0400 + X]", "A"])]
    #[case("$C000: LDA ($FB),Y", NodeKind::Assign, "", &["A", "[(ZVAR_FB) + Y]"])]
    #[case("$C000: INX", NodeKind::Assign, "", &["X", "X", "+", "1"])]
    #[case("$C000: DEY", NodeKind::Assign, "", &["Y", "Y", "-", "1"])]
    #[case("$C000: ADC #$01", NodeKind::Assign, "", &["A", "A", "+", "1"])]
    #[case("$C000: EOR #$FF", NodeKind::Assign, "", &["A", "A", "XOR", "255"])]
    #[case("$C000: ASL A", NodeKind::Assign, "", &["A", "A", "*", "2"])]
    #[case("$C000: LSR $FB", NodeKind::Assign, "", &["ZVAR_FB", "ZVAR_FB", "/", "2"])]
    #[case("$C000: CPX #$0A", NodeKind::Expr, "FLAGS", &["X", "-", "10"])]
    #[case("$C000: SEC", NodeKind::Assign, "", &["CARRY", "1"])]
    #[case("$C000: PHA", NodeKind::Assign, "", &["STACK", "A"])]
    #[case("$C000: JSR $FFD2", NodeKind::KernalCall, "CHROUT", &["65490"])]
    #[case("$C000: JSR $C100", NodeKind::SubCall, "SUB_C100", &[])]
    #[case("$C000: JMP $C000", NodeKind::Goto, "LABEL_C000", &[])]
    #[case("$C000: BNE $C000", NodeKind::Goto, "LABEL_C000", &["FLAGS", "<>", "0"])]
    #[case("$C000: BCS $C000", NodeKind::Goto, "LABEL_C000", &["CARRY", "=", "1"])]
    #[case("$C000: RTS", NodeKind::Return, "", &[])]
    #[case("$C000: RTI", NodeKind::Return, "interrupt", &[])]
    fn test_translation_rules(
        #[case] line: &str,
        #[case] kind: NodeKind,
        #[case] value: &str,
        #[case] params: &[&str],
    ) {
        let node = translate_line(line);
        assert_eq!(node.kind, kind);
        assert_eq!(node.value, value);
        assert_eq!(node.params, params.iter().map(|p| p.to_string()).collect::<Vec<_>>());
        assert_eq!(node.address, Some(0xC000));
    }

    #[rstest]
    #[case("$C000: LAX $10", "LAX $10")]
    #[case("$C000: NOP", "NOP")]
    #[case("$C000: BRK", "BRK")]
    #[case("$C000: STA #$05", "STA #$05")]
    #[case("$C000: INX $10", "INX $10")]
    #[case("$C000: JMP ($0314)", "JMP ($0314)")]
    fn test_untranslatable_becomes_raw(#[case] line: &str, #[case] text: &str) {
        let node = translate_line(line);
        assert_eq!(node.kind, NodeKind::Raw);
        assert_eq!(node.value, text);
        assert!(node.children.is_empty());
    }
}
