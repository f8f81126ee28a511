//! Structured BASIC with named labels, `SUB` procedures and block loops.

use crate::ast::builder::MAIN;
use crate::ast::{AstNode, CmpOp, Decompilation, NodeKind};

use super::{basic_read, basic_write, external_calls, loop_range, EmissionContext, Rendered, RenderStrategy};

const FIELD_SEPARATOR: &str = ".";

/// Registers and flags the translated code assigns
pub(crate) const MACHINE_STATE: [&str; 11] =
    ["A", "X", "Y", "SP", "I", "FLAGS", "CARRY", "OVERFLOW", "DECIMAL", "IRQ_DISABLE", "STACK"];

pub struct ModernBasic;

impl ModernBasic {
    fn signature(node: &AstNode) -> String {
        if node.params.is_empty() {
            node.value.clone()
        } else {
            format!("{} ({})", node.value, node.params.join(", "))
        }
    }

    fn struct_types(unit: &Decompilation) -> Vec<String> {
        let mut lines = Vec::new();
        unit.program.walk(&mut |node| {
            if node.kind == NodeKind::StructDef {
                lines.push(format!("TYPE {}_T", node.value));
                lines.extend(node.params.iter().map(|field| format!("    {} AS INTEGER", field)));
                lines.push("END TYPE".to_string());
                lines.push(format!("DIM SHARED {} AS {}_T", node.value, node.value));
            }
        });
        lines
    }
}

impl RenderStrategy for ModernBasic {
    fn read(&self, value: &str) -> String {
        basic_read(value, FIELD_SEPARATOR)
    }

    fn write(&self, dest: &str, value: &str) -> String {
        basic_write(dest, value, FIELD_SEPARATOR)
    }

    fn compare_op(&self, op: CmpOp) -> &'static str {
        op.as_str()
    }

    fn binary_op(&self, op: &str) -> String {
        op.to_string()
    }

    fn label_definition(&self, label: &str) -> Option<String> {
        Some(format!("{}:", label))
    }

    fn comment(&self, text: &str) -> String {
        format!("' {}", text)
    }

    fn preamble(&self, unit: &Decompilation) -> Vec<String> {
        let mut lines = vec![self.comment("Decompiled C64 program"), String::new()];

        for function in unit.program.children.iter().filter(|function| function.value != MAIN) {
            lines.push(format!("DECLARE SUB {}", Self::signature(function)));
        }
        for name in unit.kernal_calls.values().cloned().chain(external_calls(unit)) {
            lines.push(format!("DECLARE SUB {} ()", name));
        }

        let state: Vec<String> = MACHINE_STATE.iter().map(|name| format!("{} AS INTEGER", name)).collect();
        lines.push(format!("DIM SHARED {}", state.join(", ")));
        for variable in unit.variables.values() {
            if variable.indexed {
                lines.push(format!("DIM SHARED {}(255) AS INTEGER", variable.name));
            } else {
                lines.push(format!("DIM SHARED {} AS INTEGER", variable.name));
            }
        }
        lines.extend(Self::struct_types(unit));
        lines.push(String::new());
        lines
    }

    fn postamble(&self, unit: &Decompilation) -> Vec<String> {
        let mut lines = Vec::new();
        for (address, name) in &unit.kernal_calls {
            lines.push(String::new());
            lines.push(format!("SUB {}", name));
            lines.push(format!("    {}", self.comment(&format!("ROM routine at ${:04X}", address))));
            lines.push("END SUB".to_string());
        }
        for name in external_calls(unit) {
            lines.push(String::new());
            lines.push(format!("SUB {}", name));
            lines.push(format!("    {}", self.comment("outside the listing")));
            lines.push("END SUB".to_string());
        }
        lines
    }

    fn function(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        if node.value == MAIN {
            return Rendered::inline(Vec::new());
        }
        Rendered::block(
            vec![String::new(), format!("SUB {}", Self::signature(node))],
            vec!["END SUB".to_string()],
        )
    }

    fn for_loop(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let (init, last, step) = loop_range(node);
        let mut head = format!("FOR {} = {} TO {}", node.value, self.read(&init), self.read(&last));
        if step != 1 {
            head.push_str(&format!(" STEP {}", step));
        }
        Rendered::block(vec![head], vec![format!("NEXT {}", node.value)])
    }

    fn while_loop(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec![format!("DO WHILE {}", self.condition(&node.params))], vec!["LOOP".to_string()])
    }

    fn do_until(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec!["DO".to_string()], vec![format!("LOOP UNTIL {}", self.condition(&node.params))])
    }

    fn if_goto(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("IF {} THEN GOTO {}", self.condition(&node.params), node.value))
    }

    fn switch(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec![format!("SELECT CASE {}", self.read(&node.value))], vec!["END SELECT".to_string()])
    }

    fn case(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let constant = node.params.get(1).map(|value| self.read(value)).unwrap_or_default();
        Rendered::block(vec![format!("CASE {}", constant)], Vec::new())
    }

    fn sub_call(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        if node.params.is_empty() {
            Rendered::line(format!("CALL {}", node.value))
        } else {
            let args: Vec<String> = node.params.iter().map(|arg| self.read(arg)).collect();
            Rendered::line(format!("CALL {}({})", node.value, args.join(", ")))
        }
    }

    fn kernal_call(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("CALL {}", node.value))
    }

    fn goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        if node.params.is_empty() {
            Rendered::line(format!("GOTO {}", node.value))
        } else {
            self.if_goto(node, ctx)
        }
    }

    fn return_(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        match node.value.as_str() {
            "exit" => Rendered::line("END"),
            "interrupt" => Rendered::line(format!("EXIT SUB {}", self.comment("RTI"))),
            _ => Rendered::line("EXIT SUB"),
        }
    }

    // SELECT CASE does not fall through
    fn break_(&self, _node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::build;
    use crate::emit::{render, Target};
    use crate::pattern::test_support::analyse;

    fn modern(listing: &str) -> String {
        let (blocks, symbols) = analyse(listing);
        render(&build(&blocks, &symbols), Target::ModernBasic).unwrap()
    }

    #[test]
    fn test_counted_loop() {
        let text = modern(
            "$C000: LDX #$00\n\
             $C002: INX\n\
             $C003: CPX #$0A\n\
             $C005: BNE $C002\n\
             $C007: RTS\n",
        );
        assert!(text.contains("FOR X = 0 TO 9\n"), "{}", text);
        assert!(text.contains("NEXT X\n"));
        assert!(text.contains("END\n"));
        assert!(text.contains("DIM SHARED A AS INTEGER"));
    }

    #[test]
    fn test_wrapping_loops_run_256_times() {
        let text = modern(
            "$C000: LDA #$20\n\
             $C002: LDX #$00\n\
             $C004: STA $0400,X\n\
             $C007: INX\n\
             $C008: BNE $C004\n\
             $C00A: RTS\n",
        );
        assert!(text.contains("FOR X = 0 TO 255\n"), "{}", text);
        assert!(!text.contains("TO -1"));

        let text = modern(
            "$C000: LDX #$00\n\
             $C002: STA $0400,X\n\
             $C005: DEX\n\
             $C006: BNE $C002\n\
             $C008: RTS\n",
        );
        assert!(text.contains("FOR X = 256 TO 1 STEP -1\n"), "{}", text);
    }

    #[test]
    fn test_top_tested_until_tests_first() {
        let text = modern(
            "$C000: LDA $DC00\n\
             $C003: CMP #$6F\n\
             $C005: BEQ $C00D\n\
             $C007: INC $D021\n\
             $C00A: JMP $C000\n\
             $C00D: RTS\n",
        );
        assert!(!text.contains("LOOP UNTIL"), "{}", text);
        let test = text.find("DO WHILE A <> 111\n").unwrap();
        let load = text.find("A = VAR_DC00\n").unwrap();
        let body = text.find("VAR_D021 = VAR_D021 + 1\n").unwrap();
        assert!(load < test && test < body);
        assert!(text.contains("    VAR_D021 = VAR_D021 + 1\n    A = VAR_DC00\nLOOP\n"));
    }

    #[test]
    fn test_subroutines_and_stubs() {
        let text = modern(
            "$C000: JSR $C007\n\
             $C003: JSR $FFD2\n\
             $C006: RTS\n\
             $C007: LDA #$05\n\
             $C009: STA $D020\n\
             $C00C: RTS\n",
        );
        assert!(text.contains("DECLARE SUB SUB_C007\n"), "{}", text);
        assert!(text.contains("CALL SUB_C007\n"));
        assert!(text.contains("CALL CHROUT\n"));
        assert!(text.contains("SUB SUB_C007\n"));
        assert!(text.contains("    BORDER_COLOR = A\n"));
        assert!(text.contains("    EXIT SUB\nEND SUB\n"));
        assert!(text.contains("SUB CHROUT\n    ' ROM routine at $FFD2\nEND SUB\n"));
    }

    #[test]
    fn test_while_and_select() {
        let text = modern(
            "$C000: LDA $DC01\n\
             $C003: CMP #$FF\n\
             $C005: BNE $C00D\n\
             $C007: INC $D020\n\
             $C00A: JMP $C000\n\
             $C00D: RTS\n",
        );
        assert!(text.contains("DO WHILE A = 255\n"), "{}", text);
        assert!(text.contains("    BORDER_COLOR = BORDER_COLOR + 1\n"));
        assert!(text.contains("LOOP\n"));

        let text = modern(
            "$C000: LDA $C5\n\
             $C002: CMP #$01\n\
             $C004: BEQ $C00E\n\
             $C006: CMP #$02\n\
             $C008: BEQ $C012\n\
             $C00A: CMP #$03\n\
             $C00C: BEQ $C00E\n\
             $C00E: INC $D020\n\
             $C011: RTS\n\
             $C012: DEC $D020\n\
             $C015: RTS\n",
        );
        assert!(text.contains("SELECT CASE A\n"), "{}", text);
        assert!(text.contains("    CASE 2\n        GOTO LABEL_C012\n"));
        assert!(text.contains("END SELECT\n"));
        assert!(text.contains("LABEL_C012:\n"));
    }

    #[test]
    fn test_pointer_and_indexed_access() {
        let text = modern(
            "$C000: LDY #$00\n\
             $C002: LDA ($FB),Y\n\
             $C004: STA $0400,Y\n\
             $C007: RTS\n",
        );
        assert!(text.contains("A = PEEK(ZVAR_FB + Y)"), "{}", text);
        assert!(text.contains("VAR_0400(Y) = A"));
        assert!(text.contains("DIM SHARED VAR_0400(255) AS INTEGER"));
    }
}
