//! C-like output: memory is a byte array, registers are globals and every
//! routine is a `void` function.

use crate::ast::builder::MAIN;
use crate::ast::{AstNode, CmpOp, Decompilation, NodeKind, ValueRef};

use super::{external_calls, EmissionContext, Rendered, RenderStrategy};

/// Byte-wide machine state
const BYTE_STATE: [&str; 9] = ["A", "X", "Y", "SP", "CARRY", "OVERFLOW", "DECIMAL", "IRQ_DISABLE", "STACK"];

pub struct Curly;

impl Curly {
    fn signature(node: &AstNode) -> String {
        if node.value == MAIN {
            return "int main(void)".to_string();
        }
        if node.params.is_empty() {
            format!("void {}(void)", node.value)
        } else {
            let params: Vec<String> = node.params.iter().map(|param| format!("int {}", param)).collect();
            format!("void {}({})", node.value, params.join(", "))
        }
    }
}

impl RenderStrategy for Curly {
    fn read(&self, value: &str) -> String {
        match ValueRef::parse(value) {
            ValueRef::Plain(text) => text.to_string(),
            ValueRef::Indexed { base, index } => format!("(&{})[{}]", base, index),
            ValueRef::Pointer { base, index } => format!("mem[{} + {}]", base, index),
        }
    }

    fn write(&self, dest: &str, value: &str) -> String {
        format!("{} = {};", self.read(dest), value)
    }

    fn compare_op(&self, op: CmpOp) -> &'static str {
        match op {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            other => other.as_str(),
        }
    }

    fn binary_op(&self, op: &str) -> String {
        match op {
            "AND" => "&".to_string(),
            "OR" => "|".to_string(),
            "XOR" => "^".to_string(),
            other => other.to_string(),
        }
    }

    fn label_definition(&self, label: &str) -> Option<String> {
        Some(format!("{}:;", label))
    }

    fn comment(&self, text: &str) -> String {
        format!("/* {} */", text)
    }

    fn preamble(&self, unit: &Decompilation) -> Vec<String> {
        let mut lines = vec![
            self.comment("Decompiled C64 program"),
            "#include <stdint.h>".to_string(),
            String::new(),
            "static uint8_t mem[65536];".to_string(),
            format!("static uint8_t {};", BYTE_STATE.join(", ")),
            "static int16_t FLAGS;".to_string(),
            "static int I;".to_string(),
        ];

        if !unit.variables.is_empty() {
            lines.push(String::new());
        }
        lines.extend(
            unit.variables
                .values()
                .map(|variable| format!("#define {} mem[0x{:04X}]", variable.name, variable.address)),
        );

        unit.program.walk(&mut |node| {
            if node.kind == NodeKind::StructDef {
                lines.push(format!("static struct {{ uint8_t {}; }} {};", node.params.join(", "), node.value));
            }
        });

        lines.push(String::new());
        for (address, name) in &unit.kernal_calls {
            lines.push(format!("extern void {}(void); {}", name, self.comment(&format!("${:04X}", address))));
        }
        for name in external_calls(unit) {
            lines.push(format!("extern void {}(void);", name));
        }
        for function in unit.program.children.iter().filter(|function| function.value != MAIN) {
            lines.push(format!("{};", Self::signature(function)));
        }
        lines
    }

    fn function(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec![String::new(), format!("{} {{", Self::signature(node))], vec!["}".to_string()])
    }

    fn for_loop(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let counter = &node.value;
        let param = |index: usize| node.params.get(index).map(|value| self.read(value)).unwrap_or_default();
        let step = match node.params.get(2).map(String::as_str) {
            Some("1") | None => format!("{}++", counter),
            Some("-1") => format!("{}--", counter),
            Some(step) => format!("{} += {}", counter, step),
        };
        let (init, bound) = (param(0), param(1));

        // Distinct constants: the first test always passes, so `for` matches
        let distinct = matches!(
            (init.parse::<i32>(), bound.parse::<i32>()),
            (Ok(first), Ok(end)) if first != end
        );
        if distinct {
            return Rendered::block(
                vec![format!("for ({} = {}; {} != {}; {}) {{", counter, init, counter, bound, step)],
                vec!["}".to_string()],
            );
        }
        // The byte counter may start on its bound and wrap through all 256 values
        Rendered::block(
            vec![format!("{} = {};", counter, init), "do {".to_string()],
            vec![format!("    {};", step), format!("}} while ({} != {});", counter, bound)],
        )
    }

    fn while_loop(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec![format!("while ({}) {{", self.condition(&node.params))], vec!["}".to_string()])
    }

    fn do_until(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(
            vec!["do {".to_string()],
            vec![format!("}} while ({});", self.inverted_condition(&node.params))],
        )
    }

    fn if_goto(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("if ({}) goto {};", self.condition(&node.params), node.value))
    }

    fn switch(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::block(vec![format!("switch ({}) {{", self.read(&node.value))], vec!["}".to_string()])
    }

    fn case(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let constant = node.params.get(1).map(|value| self.read(value)).unwrap_or_default();
        Rendered::block(vec![format!("case {}:", constant)], Vec::new())
    }

    fn sub_call(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let args: Vec<String> = node.params.iter().map(|arg| self.read(arg)).collect();
        Rendered::line(format!("{}({});", node.value, args.join(", ")))
    }

    fn kernal_call(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("{}();", node.value))
    }

    fn goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        if node.params.is_empty() {
            Rendered::line(format!("goto {};", node.value))
        } else {
            self.if_goto(node, ctx)
        }
    }

    fn return_(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        match node.value.as_str() {
            "exit" => Rendered::line("return 0;"),
            "interrupt" => Rendered::line(format!("return; {}", self.comment("RTI"))),
            _ => Rendered::line("return;"),
        }
    }

    fn break_(&self, _node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line("break;")
    }
}
