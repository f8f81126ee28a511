//! Line-numbered BASIC: every jump is a line number, subroutines are `GOSUB`
//! targets and ROM routines are reached with `SYS`.

use crate::ast::{AstNode, CmpOp, Decompilation, NodeKind};

use super::{basic_read, basic_write, loop_range, EmissionContext, Rendered, RenderStrategy};

/// Struct fields become plain variables: `S.F0` is written `S_F0`
const FIELD_SEPARATOR: &str = "_";

pub struct ClassicBasic;

impl ClassicBasic {
    fn line_or_zero(line: Option<u32>) -> String {
        line.unwrap_or(0).to_string()
    }

    /// Whether control can run off the end of `node`'s children
    fn falls_off(node: &AstNode) -> bool {
        match node.children.last() {
            Some(last) => !matches!(last.kind, NodeKind::Return) && !(last.kind == NodeKind::Goto && last.params.is_empty()),
            None => true,
        }
    }
}

impl RenderStrategy for ClassicBasic {
    fn numbered(&self) -> bool {
        true
    }

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

    fn jump_target(&self, label: &str, ctx: &EmissionContext) -> String {
        ctx.label_line(label).map(|line| line.to_string()).unwrap_or_else(|| label.to_string())
    }

    fn label_definition(&self, _label: &str) -> Option<String> {
        None
    }

    fn comment(&self, text: &str) -> String {
        format!("REM {}", text)
    }

    fn preamble(&self, unit: &Decompilation) -> Vec<String> {
        let mut lines = vec![self.comment("DECOMPILED C64 PROGRAM")];
        lines.extend(
            unit.variables
                .values()
                .filter(|variable| variable.indexed)
                .map(|variable| format!("DIM {}(255)", variable.name)),
        );
        lines
    }

    fn function(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let heading = if node.params.is_empty() {
            format!("==== {} ====", node.value)
        } else {
            format!("==== {} ({}) ====", node.value, node.params.join(", "))
        };
        let mut rendered = Rendered::inline(vec![self.comment(&heading)]);
        if Self::falls_off(node) {
            let leave = if node.value == crate::ast::builder::MAIN { "END" } else { "RETURN" };
            rendered.close.push(leave.to_string());
        }
        rendered
    }

    fn for_loop(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let (init, last, step) = loop_range(node);
        let mut head = format!("FOR {} = {} TO {}", node.value, self.read(&init), self.read(&last));
        if step != 1 {
            head.push_str(&format!(" STEP {}", step));
        }
        Rendered { close: vec![format!("NEXT {}", node.value)], ..Rendered::inline(vec![head]) }
    }

    fn while_loop(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        let exit = Self::line_or_zero(ctx.node_end());
        let top = Self::line_or_zero(ctx.node_start());
        Rendered {
            close: vec![format!("GOTO {}", top)],
            ..Rendered::inline(vec![format!("IF {} THEN {}", self.inverted_condition(&node.params), exit)])
        }
    }

    fn do_until(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        let top = Self::line_or_zero(ctx.node_start());
        Rendered {
            close: vec![format!("IF {} THEN {}", self.inverted_condition(&node.params), top)],
            ..Rendered::inline(Vec::new())
        }
    }

    fn if_goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("IF {} THEN {}", self.condition(&node.params), self.jump_target(&node.value, ctx)))
    }

    fn switch(&self, _node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::inline(Vec::new())
    }

    fn case(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        let [subject, constant] = node.params.as_slice() else {
            return Rendered::line(self.comment("CASE"));
        };
        let target = match node.children.first() {
            Some(action) if action.kind == NodeKind::Goto => self.jump_target(&action.value, ctx),
            _ => Self::line_or_zero(ctx.enclosing_end(NodeKind::Switch)),
        };
        Rendered::line(format!("IF {} = {} THEN {}", self.read(subject), self.read(constant), target))
    }

    fn sub_call(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        let target = ctx.function_line(&node.value).map(|line| line.to_string()).unwrap_or_else(|| node.value.clone());
        let mut statements: Vec<String> = node
            .params
            .iter()
            .enumerate()
            .map(|(index, arg)| format!("P{} = {}", index + 1, self.read(arg)))
            .collect();
        statements.push(format!("GOSUB {}", target));
        Rendered::line(statements.join(": "))
    }

    fn kernal_call(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        match node.params.first() {
            Some(address) => Rendered::line(format!("SYS {}: {}", address, self.comment(&node.value))),
            None => Rendered::line(self.comment(&format!("SYS {}", node.value))),
        }
    }

    fn goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered {
        let target = self.jump_target(&node.value, ctx);
        if node.params.is_empty() {
            Rendered::line(format!("GOTO {}", target))
        } else {
            Rendered::line(format!("IF {} THEN {}", self.condition(&node.params), target))
        }
    }

    fn return_(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        match node.value.as_str() {
            "exit" => Rendered::line("END"),
            "interrupt" => Rendered::line(format!("RETURN: {}", self.comment("RTI"))),
            _ => Rendered::line("RETURN"),
        }
    }

    fn break_(&self, _node: &AstNode, ctx: &EmissionContext) -> Rendered {
        Rendered::line(format!("GOTO {}", Self::line_or_zero(ctx.enclosing_end(NodeKind::Switch))))
    }
}
