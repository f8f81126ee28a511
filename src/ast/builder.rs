//! Builds the `Program` tree from basic blocks, pattern matches and the
//! per-opcode translator.

use std::collections::{BTreeMap, BTreeSet};

use crate::pattern::branches::{test_block, Test};
use crate::pattern::layout::{variations, Variation};
use crate::pattern::traits::is_global_access;
use crate::pattern::{match_patterns, PatternKind, PatternMatch, Window};
use crate::symbols::{SymbolKind, SymbolTable};
use crate::translate::{data_name, operand_value, translate};
use crate::{Address, BasicBlock, Instruction, Mnemonic, Operand};

use super::{memory_ref, pointer_ref, AstNode, Decompilation, NodeKind, Variable};

/// Name of the entry routine holding code before the first subroutine
pub const MAIN: &str = "MAIN";

/// Counter of folded unrolled loops
const UNROLL_COUNTER: &str = "I";

/// Per-run state of the AST builder.
#[derive(Debug)]
pub struct DecompileContext<'a> {
    symbols: &'a SymbolTable,
    variables: BTreeMap<Address, Variable>,
    globals: BTreeSet<Address>,
    macros: Vec<AstNode>,
    kernal_calls: BTreeMap<Address, String>,
}

impl<'a> DecompileContext<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        DecompileContext {
            symbols,
            variables: BTreeMap::new(),
            globals: BTreeSet::new(),
            macros: Vec::new(),
            kernal_calls: BTreeMap::new(),
        }
    }

    /// Memoized name of a data address
    pub fn variable(&mut self, address: Address) -> &mut Variable {
        let symbols = self.symbols;
        self.variables.entry(address).or_insert_with(|| Variable {
            name: data_name(address, symbols),
            address,
            kind: symbols.kind(address),
            indexed: false,
            pointer: false,
        })
    }

    /// Record the data locations and ROM calls of one instruction
    fn note(&mut self, insn: &Instruction) {
        if insn.mnemonic == Mnemonic::Jsr {
            if let Some(target) = insn.target() {
                if self.symbols.kind(target) == Some(SymbolKind::KernalCall) {
                    self.kernal_calls.insert(target, self.symbols.code_name(target));
                }
            }
            return;
        }
        match insn.operand {
            Operand::Indexed { base, .. } => self.variable(base).indexed = true,
            Operand::IndirectIndexed { zp, .. } => self.variable(zp as Address).pointer = true,
            Operand::Indirect(address) => {
                self.variable(address);
            }
            Operand::Absolute(address) if !insn.mnemonic.is_control_flow() => {
                self.variable(address);
            }
            _ => {}
        }
    }

    fn translate(&self, insn: &Instruction) -> AstNode {
        translate(insn, self.symbols)
    }

    fn value(&self, operand: &Operand) -> String {
        operand_value(operand, self.symbols).unwrap_or_default()
    }

    /// Translate the instructions of `blocks` the match does not absorb
    fn plain(&self, found: &PatternMatch<'_>, filter: impl Fn(&Instruction) -> bool) -> Vec<AstNode> {
        found
            .blocks
            .iter()
            .flat_map(|block| block.instructions.iter())
            .filter(|insn| !found.absorbs(insn.address) && filter(insn))
            .map(|insn| self.translate(insn))
            .collect()
    }

    /// Structured nodes for one routine's blocks
    pub fn build_segment(&mut self, segment: &[BasicBlock]) -> Vec<AstNode> {
        let mut nodes = Vec::new();
        let mut index = 0;

        while index < segment.len() {
            let found = match_patterns(&Window::new(&segment[index..], self.symbols));
            for insn in found.blocks.iter().flat_map(|block| block.instructions.iter()) {
                self.note(insn);
            }
            self.render(&found, &mut nodes);
            index += found.blocks.len().max(1);
        }

        nodes
    }

    fn render(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        match found.kind {
            PatternKind::ForIncrement | PatternKind::ForDecrement => self.render_for(found, out),
            PatternKind::While => self.render_while(found, out),
            PatternKind::DoUntil => self.render_do_until(found, out),
            PatternKind::If | PatternKind::NestedIf => self.render_tests(found, out),
            PatternKind::Switch => self.render_switch(found, out),
            PatternKind::Struct => self.render_struct(found, out),
            PatternKind::UnrolledLoop => self.render_unrolled(found, out),
            PatternKind::Macro => self.render_macro(found, out),
            PatternKind::GlobalVar => {
                for insn in found.blocks.iter().flat_map(|block| block.instructions.iter()) {
                    let Some(address) = insn.operand.address().filter(|_| is_global_access(insn)) else { continue };
                    if self.globals.insert(address) {
                        let name = self.variable(address).name.clone();
                        out.push(AstNode::new(NodeKind::GlobalVar).with_value(name).with_params([format!("${:04X}", address)]));
                    }
                }
                out.extend(self.plain(found, |_| true));
            }
            PatternKind::BitField
            | PatternKind::Pointer
            | PatternKind::Timer
            | PatternKind::EventHandler
            | PatternKind::Interrupt => {
                let children = self.plain(found, |_| true);
                out.push(AstNode::new(NodeKind::Block).with_value(found.kind.to_string()).with_children(children));
            }
            PatternKind::SubroutineCall | PatternKind::Goto | PatternKind::None => {
                out.extend(self.plain(found, |_| true));
            }
        }
    }

    fn condition(&self, found: &PatternMatch<'_>) -> Vec<String> {
        let register = found.register.map(|register| register.to_string()).unwrap_or_default();
        let op = found.comparison.map(|op| op.to_string()).unwrap_or_default();
        let value = found.primary_value.as_ref().map(|operand| self.value(operand)).unwrap_or_default();
        vec![register, op, value]
    }

    fn render_for(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let top = found.targets.first().copied().unwrap_or(found.anchor);
        out.extend(self.plain(found, |insn| insn.address < top));
        let children = self.plain(found, |insn| insn.address >= top);

        let init = found.primary_value.as_ref().map(|operand| self.value(operand)).unwrap_or_default();
        let (bound, step) = match found.operands.as_slice() {
            [bound, Operand::Immediate(step)] => (self.value(bound), i16::from(*step)),
            _ => (String::from("0"), 1),
        };
        let step = if found.kind == PatternKind::ForDecrement { -step } else { step };
        let register = found.register.map(|register| register.to_string()).unwrap_or_default();

        out.push(
            AstNode::new(NodeKind::For)
                .with_value(register)
                .with_params([init, bound, step.to_string()])
                .with_children(children)
                .at(found.anchor),
        );
    }

    fn render_while(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let condition = self.condition(found);
        self.render_top_tested(found, condition, out);
    }

    /// Header block tested before every pass, body block jumping back
    fn render_top_tested(&mut self, found: &PatternMatch<'_>, condition: Vec<String>, out: &mut Vec<AstNode>) {
        let [header, body] = found.blocks else {
            out.extend(self.plain(found, |_| true));
            return;
        };
        let header_nodes = self.plain(found, |insn| header.contains(insn.address));
        let mut children = self.plain(found, |insn| body.contains(insn.address));

        // The header recomputes the tested value before every test
        out.extend(header_nodes.iter().cloned());
        children.extend(header_nodes);

        out.push(AstNode::new(NodeKind::While).with_params(condition).with_children(children).at(found.anchor));
    }

    fn render_do_until(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        if found.blocks.len() == 2 {
            // Exit test at the top: loop while the until-condition does not hold
            let mut condition = self.condition(found);
            if let Some(op) = found.comparison {
                condition[1] = op.invert().to_string();
            }
            self.render_top_tested(found, condition, out);
            return;
        }

        let anchor = found.anchor;
        out.extend(self.plain(found, |insn| insn.address < anchor));
        let children = self.plain(found, |insn| insn.address >= anchor);

        out.push(
            AstNode::new(NodeKind::DoUntil)
                .with_params(self.condition(found))
                .with_children(children)
                .at(anchor),
        );
    }

    fn if_node(&self, test: &Test<'_>) -> AstNode {
        AstNode::new(NodeKind::If)
            .with_value(self.symbols.code_name(test.target))
            .with_params([test.register.to_string(), test.taken_when().to_string(), self.value(&test.compare.operand)])
            .at(test.compare.address)
    }

    fn render_tests(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let mut nodes = Vec::new();
        for block in found.blocks {
            nodes.extend(self.plain(found, |insn| block.contains(insn.address)));
            if let Some(test) = test_block(block) {
                nodes.push(self.if_node(&test));
            }
        }

        if found.kind == PatternKind::NestedIf {
            out.push(AstNode::new(NodeKind::NestedIf).with_children(nodes));
        } else {
            out.extend(nodes);
        }
    }

    fn render_switch(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let Some(first) = found.blocks.first() else { return };
        let Some(last) = found.blocks.last() else { return };
        let exit = last.last_instruction().next_address();

        out.extend(self.plain(found, |insn| first.contains(insn.address)));

        let tests: Vec<Test<'_>> = found.blocks.iter().filter_map(test_block).collect();
        let subject = found.register.map(|register| register.to_string()).unwrap_or_default();
        let cases = tests
            .iter()
            .map(|test| {
                let action = if test.target == exit {
                    AstNode::new(NodeKind::Break)
                } else {
                    AstNode::new(NodeKind::Goto).with_value(self.symbols.code_name(test.target))
                };
                AstNode::new(NodeKind::Case)
                    .with_params([subject.clone(), self.value(&test.compare.operand)])
                    .with_children(vec![action])
                    .at(test.compare.address)
            })
            .collect();

        let anchor = tests.first().map(|test| test.compare.address).unwrap_or(first.start);
        out.push(AstNode::new(NodeKind::Switch).with_value(subject).with_children(cases).at(anchor));
    }

    fn render_struct(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let Some(Operand::Absolute(base)) = found.primary_value else {
            out.extend(self.plain(found, |_| true));
            return;
        };
        let Some(block) = found.blocks.first() else { return };
        let name = format!("STRUCT_{:04X}", base);
        let fields: Vec<String> = (0..found.operands.len()).map(|index| format!("F{}", index)).collect();

        let children = block
            .body()
            .iter()
            .map(|insn| match (&insn.mnemonic, &insn.operand) {
                (Mnemonic::Sta, Operand::Absolute(address)) => AstNode::new(NodeKind::Assign)
                    .with_params([format!("{}.F{}", name, address - base), "A".to_string()])
                    .at(insn.address),
                _ => self.translate(insn),
            })
            .collect();

        out.push(
            AstNode::new(NodeKind::StructDef)
                .with_value(name)
                .with_params(fields)
                .with_children(children)
                .at(block.start),
        );
        out.extend(block.terminator().map(|insn| self.translate(insn)));
    }

    /// `first + I * stride` for a foldable variation
    fn folded(&mut self, variation: &Variation) -> String {
        let stride = variation.stride.unwrap_or(1);
        let index = match stride {
            1 => UNROLL_COUNTER.to_string(),
            _ => format!("{} * {}", UNROLL_COUNTER, stride),
        };
        match variation.values.first() {
            Some(Operand::Immediate(0)) => index,
            Some(Operand::Immediate(first)) => format!("{} + {}", first, index),
            Some(Operand::Absolute(first)) => {
                let variable = self.variable(*first);
                variable.indexed = true;
                memory_ref(&variable.name, &index)
            }
            _ => index,
        }
    }

    fn substitute(node: &mut AstNode, old: &str, new: &str) {
        for param in node.params.iter_mut().filter(|param| *param == old) {
            *param = new.to_string();
        }
    }

    fn render_unrolled(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let Some(first) = found.blocks.first() else { return };
        let varying = variations(found.blocks).unwrap_or_default();

        let mut children = Vec::new();
        for (position, insn) in first.instructions.iter().enumerate() {
            let mut node = self.translate(insn);
            if let Some(variation) = varying.iter().find(|variation| variation.position == position) {
                let new = self.folded(variation);
                Self::substitute(&mut node, &self.value(&insn.operand), &new);
            }
            children.push(node);
        }

        out.push(
            AstNode::new(NodeKind::For)
                .with_value(UNROLL_COUNTER)
                .with_params(["0".to_string(), found.blocks.len().to_string(), "1".to_string()])
                .with_children(children)
                .at(first.start),
        );
    }

    fn render_macro(&mut self, found: &PatternMatch<'_>, out: &mut Vec<AstNode>) {
        let Some(first) = found.blocks.first() else { return };
        let varying = variations(found.blocks).unwrap_or_default();
        let name = format!("MACRO_{:04X}", first.start);
        let params: Vec<String> = (1..=varying.len()).map(|index| format!("P{}", index)).collect();

        let mut body = Vec::new();
        for (position, insn) in first.body().iter().enumerate() {
            let mut node = self.translate(insn);
            node.address = None;
            if let Some((slot, _)) = varying.iter().enumerate().find(|(_, variation)| variation.position == position) {
                let param = &params[slot];
                let new = match &insn.operand {
                    Operand::Immediate(_) => param.clone(),
                    Operand::Indexed { index, .. } => pointer_ref(param, &index.to_string()),
                    _ => pointer_ref(param, "0"),
                };
                Self::substitute(&mut node, &self.value(&insn.operand), &new);
            }
            body.push(node);
        }

        for (instance, block) in found.blocks.iter().enumerate() {
            let args = varying.iter().map(|variation| match &variation.values[instance] {
                Operand::Immediate(value) => value.to_string(),
                operand => operand.address().map(|address| address.to_string()).unwrap_or_default(),
            });
            out.push(AstNode::new(NodeKind::SubCall).with_value(name.clone()).with_params(args).at(block.start));
            out.extend(block.terminator().map(|insn| self.translate(insn)));
        }

        self.macros.push(AstNode::new(NodeKind::Function).with_value(name).with_params(params).with_children(body));
    }
}

/// `[start, end)` block ranges of the routines: a new one at every
/// subroutine entry
fn function_spans(blocks: &[BasicBlock], symbols: &SymbolTable) -> Vec<(usize, usize)> {
    let starts: Vec<usize> = (0..blocks.len())
        .filter(|index| *index == 0 || symbols.is_subroutine(blocks[*index].start))
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| (*start, starts.get(i + 1).copied().unwrap_or(blocks.len())))
        .collect()
}

/// A plain `Return` in the entry routine ends the program
fn mark_exit(node: &mut AstNode) {
    if node.kind == NodeKind::Return && node.value.is_empty() {
        node.value = "exit".to_string();
    }
    for child in &mut node.children {
        mark_exit(child);
    }
}

/// Jump and branch targets, with their names
fn label_targets(blocks: &[BasicBlock], symbols: &SymbolTable) -> BTreeMap<Address, String> {
    blocks
        .iter()
        .flat_map(|block| block.instructions.iter())
        .filter(|insn| insn.mnemonic != Mnemonic::Jsr)
        .filter_map(Instruction::target)
        .map(|target| (target, symbols.code_name(target)))
        .collect()
}

/// Put each label on the first node, in document order, built from its address
fn place_labels(node: &mut AstNode, pending: &mut BTreeMap<Address, String>) {
    if !matches!(node.kind, NodeKind::Program | NodeKind::Function) {
        if let Some(name) = node.address.and_then(|address| pending.remove(&address)) {
            node.label = Some(name);
        }
    }
    for child in &mut node.children {
        place_labels(child, pending);
    }
}

/// Build the program tree for `blocks`
pub fn build(blocks: &[BasicBlock], symbols: &SymbolTable) -> Decompilation {
    let mut context = DecompileContext::new(symbols);
    let mut functions = Vec::new();
    let mut subroutines = BTreeMap::new();

    for (start, end) in function_spans(blocks, symbols) {
        let segment = &blocks[start..end];
        let entry = segment[0].start;
        let is_main = !symbols.is_subroutine(entry);
        let name = if is_main { MAIN.to_string() } else { symbols.code_name(entry) };

        let mut function = AstNode::new(NodeKind::Function)
            .with_value(name.clone())
            .with_children(context.build_segment(segment))
            .at(entry);
        if is_main {
            mark_exit(&mut function);
        } else {
            if symbols.is_recursive(entry) {
                log::debug!("{} calls itself", name);
            }
            subroutines.insert(entry, name);
        }
        functions.push(function);
    }
    functions.append(&mut context.macros);

    let mut program = AstNode::new(NodeKind::Program).with_children(functions);
    let mut pending = label_targets(blocks, symbols);
    place_labels(&mut program, &mut pending);
    for (address, name) in &pending {
        log::debug!("No node at ${:04X} to carry label {}", address, name);
    }

    log::debug!(
        "Built AST: {} routines, {} variables, {} ROM calls",
        program.children.len(),
        context.variables.len(),
        context.kernal_calls.len()
    );

    Decompilation { program, subroutines, kernal_calls: context.kernal_calls, variables: context.variables }
}
