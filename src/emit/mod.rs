//! Multi-target code emission.
//!
//! One generic walker visits the program tree in document order and asks a
//! [`RenderStrategy`] for the lines of every node. Each dialect implements the
//! strategy once; the `json` target serializes the tree instead.

mod classic;
mod curly;
mod modern;

pub use self::classic::ClassicBasic;
pub use self::curly::Curly;
pub use self::modern::ModernBasic;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::ast::{AstNode, CmpOp, Decompilation, NodeKind, ValueRef};
use crate::{DecompileError, Stage};

/// Output dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Target {
    /// Line-numbered BASIC with GOSUB and SYS
    ClassicBasic,
    /// Structured BASIC with SUB, DO … LOOP and SELECT CASE (default)
    ModernBasic,
    /// C-like curly-brace dialect
    Curly,
    /// The AST itself, as JSON
    Json,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::ClassicBasic => write!(f, "classic-basic"),
            Target::ModernBasic => write!(f, "modern-basic"),
            Target::Curly => write!(f, "curly"),
            Target::Json => write!(f, "json"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "classic-basic" | "classic" | "basic-v2" => Ok(Target::ClassicBasic),
            "modern-basic" | "modern" | "qbasic" => Ok(Target::ModernBasic),
            "curly" | "c" => Ok(Target::Curly),
            "json" => Ok(Target::Json),
            _ => Err(format!("Unknown target: {}", s)),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::ModernBasic
    }
}

impl Target {
    /// All available targets
    pub fn available_targets() -> &'static [Self] {
        &[Target::ClassicBasic, Target::ModernBasic, Target::Curly, Target::Json]
    }

    /// File extension for output files
    pub fn file_extension(&self) -> &'static str {
        match self {
            Target::ClassicBasic => "bas",
            Target::ModernBasic => "bas",
            Target::Curly => "c",
            Target::Json => "json",
        }
    }

    /// Rendering strategy; `None` for the JSON dump
    pub fn get_strategy(&self) -> Option<Box<dyn RenderStrategy>> {
        match self {
            Target::ClassicBasic => Some(Box::new(ClassicBasic)),
            Target::ModernBasic => Some(Box::new(ModernBasic)),
            Target::Curly => Some(Box::new(Curly)),
            Target::Json => None,
        }
    }
}

/// Lines a strategy produces for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Lines before the children
    pub open: Vec<String>,
    /// Lines after the children
    pub close: Vec<String>,
    /// Whether to emit the children
    pub descend: bool,
    /// Whether children are indented one level
    pub indent: bool,
}

impl Rendered {
    /// Nothing at all
    pub fn empty() -> Self {
        Rendered::default()
    }

    /// A single statement line
    pub fn line(text: impl Into<String>) -> Self {
        Rendered { open: vec![text.into()], ..Rendered::default() }
    }

    /// Statement lines, no children
    pub fn lines(lines: Vec<String>) -> Self {
        Rendered { open: lines, ..Rendered::default() }
    }

    /// Opening and closing lines around indented children
    pub fn block(open: Vec<String>, close: Vec<String>) -> Self {
        Rendered { open, close, descend: true, indent: true }
    }

    /// Opening lines, then children at the same level
    pub fn inline(open: Vec<String>) -> Self {
        Rendered { open, close: Vec::new(), descend: true, indent: false }
    }
}

/// Line positions of one emission pass, for dialects that jump by line number
#[derive(Debug, Clone, Default)]
pub struct Layout {
    spans: Vec<(u32, u32)>,
    label_lines: BTreeMap<String, u32>,
    function_lines: BTreeMap<String, u32>,
}

/// First line number of numbered dialects
pub const FIRST_LINE: u32 = 10;

/// Line number increment of numbered dialects
pub const LINE_STEP: u32 = 10;

/// Mutable state of one `render` call.
#[derive(Debug)]
pub struct EmissionContext {
    pub target: Target,
    pub line_counter: u32,
    pub indent: usize,
    /// Labels some emitted Goto/If/Case refers to
    pub used_labels: BTreeSet<String>,
    /// Labels defined so far
    pub defined_labels: BTreeSet<String>,
    pub output: String,
    numbered: bool,
    current: usize,
    enclosing: Vec<(NodeKind, usize)>,
    layout: Layout,
    previous: Option<Layout>,
}

impl EmissionContext {
    pub fn new(target: Target, numbered: bool, used_labels: BTreeSet<String>, previous: Option<Layout>) -> Self {
        EmissionContext {
            target,
            line_counter: FIRST_LINE,
            indent: 0,
            used_labels,
            defined_labels: BTreeSet::new(),
            output: String::new(),
            numbered,
            current: 0,
            enclosing: Vec::new(),
            layout: Layout::default(),
            previous,
        }
    }

    /// Append one output line
    pub fn emit_line(&mut self, text: &str) {
        if self.numbered {
            self.output.push_str(&format!("{} {}\n", self.line_counter, text));
            self.line_counter += LINE_STEP;
        } else if text.is_empty() {
            self.output.push('\n');
        } else {
            self.output.push_str(&"    ".repeat(self.indent));
            self.output.push_str(text);
            self.output.push('\n');
        }
    }

    fn open_node(&mut self) -> usize {
        let index = self.layout.spans.len();
        self.layout.spans.push((self.line_counter, self.line_counter));
        self.current = index;
        index
    }

    fn close_node(&mut self, index: usize) {
        if let Some(span) = self.layout.spans.get_mut(index) {
            span.1 = self.line_counter;
        }
    }

    fn previous_span(&self, index: usize) -> Option<(u32, u32)> {
        self.previous.as_ref().and_then(|layout| layout.spans.get(index)).copied()
    }

    /// First line of the node being rendered, from the previous pass
    pub fn node_start(&self) -> Option<u32> {
        self.previous_span(self.current).map(|span| span.0)
    }

    /// Line after the node being rendered, from the previous pass
    pub fn node_end(&self) -> Option<u32> {
        self.previous_span(self.current).map(|span| span.1)
    }

    /// Line after the innermost enclosing node of `kind`, from the previous pass
    pub fn enclosing_end(&self, kind: NodeKind) -> Option<u32> {
        let (_, index) = self.enclosing.iter().rev().find(|(enclosing, _)| *enclosing == kind)?;
        self.previous_span(*index).map(|span| span.1)
    }

    /// Line a label was defined at, from the previous pass
    pub fn label_line(&self, label: &str) -> Option<u32> {
        self.previous.as_ref()?.label_lines.get(label).copied()
    }

    /// First line of a routine, from the previous pass
    pub fn function_line(&self, name: &str) -> Option<u32> {
        self.previous.as_ref()?.function_lines.get(name).copied()
    }

    fn into_layout(self) -> Layout {
        self.layout
    }
}

/// Per-dialect rendering, one method per node kind.
pub trait RenderStrategy {
    /// Whether the dialect numbers its lines (and so needs two passes)
    fn numbered(&self) -> bool {
        false
    }

    /// Readable form of an operand string
    fn read(&self, value: &str) -> String;

    /// Statement storing `value` into `dest`
    fn write(&self, dest: &str, value: &str) -> String;

    fn compare_op(&self, op: CmpOp) -> &'static str;

    fn binary_op(&self, op: &str) -> String;

    /// `lhs op rhs` condition
    fn condition(&self, params: &[String]) -> String {
        match params {
            [lhs, op, rhs] => match op.parse::<CmpOp>() {
                Ok(op) => format!("{} {} {}", self.read(lhs), self.compare_op(op), self.read(rhs)),
                Err(_) => format!("{} {} {}", self.read(lhs), op, self.read(rhs)),
            },
            _ => String::from("1"),
        }
    }

    /// Negated `lhs op rhs` condition
    fn inverted_condition(&self, params: &[String]) -> String {
        match params {
            [lhs, op, rhs] => match op.parse::<CmpOp>() {
                Ok(op) => self.condition(&[lhs.clone(), op.invert().to_string(), rhs.clone()]),
                Err(_) => self.condition(params),
            },
            _ => String::from("0"),
        }
    }

    /// `src` or `lhs op rhs`
    fn expression(&self, params: &[String]) -> String {
        match params {
            [value] => self.read(value),
            [lhs, op, rhs] => format!("{} {} {}", self.read(lhs), self.binary_op(op), self.read(rhs)),
            _ => params.join(" "),
        }
    }

    /// Text of a jump target
    fn jump_target(&self, label: &str, _ctx: &EmissionContext) -> String {
        label.to_string()
    }

    /// Line defining `label`, if the dialect writes one
    fn label_definition(&self, label: &str) -> Option<String>;

    /// Declarations before the code
    fn preamble(&self, unit: &Decompilation) -> Vec<String>;

    /// Definitions after the code
    fn postamble(&self, _unit: &Decompilation) -> Vec<String> {
        Vec::new()
    }

    fn function(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn for_loop(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn while_loop(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn do_until(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn if_goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn switch(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn case(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn sub_call(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn kernal_call(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn goto(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn return_(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn break_(&self, node: &AstNode, ctx: &EmissionContext) -> Rendered;
    fn comment(&self, text: &str) -> String;

    fn nested_if(&self, _node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::inline(Vec::new())
    }

    fn assign(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        match node.params.split_first() {
            Some((dest, rest)) if !rest.is_empty() => Rendered::line(self.write(dest, &self.expression(rest))),
            _ => Rendered::line(self.comment(&node.params.join(" "))),
        }
    }

    fn expr(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(self.write(&node.value, &self.expression(&node.params)))
    }

    fn struct_def(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::inline(vec![self.comment(&format!("{} {{ {} }}", node.value, node.params.join(", ")))])
    }

    fn global_var(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        let at = node.params.first().map(String::as_str).unwrap_or("?");
        Rendered::line(self.comment(&format!("global {} at {}", node.value, at)))
    }

    fn raw(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::line(self.comment(&node.value))
    }

    fn block(&self, node: &AstNode, _ctx: &EmissionContext) -> Rendered {
        Rendered::inline(vec![self.comment(&node.value)])
    }
}

/// Kind-based dispatch to the strategy
fn dispatch(strategy: &dyn RenderStrategy, node: &AstNode, ctx: &EmissionContext) -> Rendered {
    match node.kind {
        NodeKind::Program => Rendered::inline(Vec::new()),
        NodeKind::Function => strategy.function(node, ctx),
        NodeKind::For => strategy.for_loop(node, ctx),
        NodeKind::While => strategy.while_loop(node, ctx),
        NodeKind::DoUntil => strategy.do_until(node, ctx),
        NodeKind::If => strategy.if_goto(node, ctx),
        NodeKind::NestedIf => strategy.nested_if(node, ctx),
        NodeKind::Switch => strategy.switch(node, ctx),
        NodeKind::Case => strategy.case(node, ctx),
        NodeKind::SubCall => strategy.sub_call(node, ctx),
        NodeKind::KernalCall => strategy.kernal_call(node, ctx),
        NodeKind::Goto => strategy.goto(node, ctx),
        NodeKind::Return => strategy.return_(node, ctx),
        NodeKind::Assign => strategy.assign(node, ctx),
        NodeKind::Expr => strategy.expr(node, ctx),
        NodeKind::StructDef => strategy.struct_def(node, ctx),
        NodeKind::GlobalVar => strategy.global_var(node, ctx),
        NodeKind::Raw => strategy.raw(node, ctx),
        NodeKind::Break => strategy.break_(node, ctx),
        NodeKind::Block => strategy.block(node, ctx),
    }
}

fn emit_node(strategy: &dyn RenderStrategy, node: &AstNode, ctx: &mut EmissionContext) {
    let index = ctx.open_node();

    if let Some(label) = node.label.as_ref().filter(|label| ctx.used_labels.contains(*label)) {
        ctx.layout.label_lines.insert(label.clone(), ctx.line_counter);
        ctx.defined_labels.insert(label.clone());
        if let Some(line) = strategy.label_definition(label) {
            ctx.emit_line(&line);
        }
    }
    if node.kind == NodeKind::Function {
        ctx.layout.function_lines.insert(node.value.clone(), ctx.line_counter);
    }

    let rendered = dispatch(strategy, node, ctx);
    for line in &rendered.open {
        ctx.emit_line(line);
    }
    if rendered.descend {
        ctx.enclosing.push((node.kind, index));
        if rendered.indent {
            ctx.indent += 1;
        }
        for child in &node.children {
            emit_node(strategy, child, ctx);
        }
        if rendered.indent {
            ctx.indent -= 1;
        }
        ctx.enclosing.pop();
    }
    for line in &rendered.close {
        ctx.emit_line(line);
    }

    ctx.close_node(index);
}

fn emit_program(strategy: &dyn RenderStrategy, unit: &Decompilation, ctx: &mut EmissionContext) {
    for line in strategy.preamble(unit) {
        ctx.emit_line(&line);
    }
    emit_node(strategy, &unit.program, ctx);
    for line in strategy.postamble(unit) {
        ctx.emit_line(&line);
    }
}

/// Labels named by Goto, If and Case nodes
pub fn referenced_labels(program: &AstNode) -> BTreeSet<String> {
    let mut labels = BTreeSet::new();
    program.walk(&mut |node| {
        if matches!(node.kind, NodeKind::Goto | NodeKind::If) && !node.value.is_empty() {
            labels.insert(node.value.clone());
        }
    });
    labels
}

/// Routines that are called but have no body in the program
pub fn external_calls(unit: &Decompilation) -> BTreeSet<String> {
    let defined: BTreeSet<&str> = unit.program.children.iter().map(|function| function.value.as_str()).collect();
    let mut calls = BTreeSet::new();
    unit.program.walk(&mut |node| {
        if node.kind == NodeKind::SubCall && !defined.contains(node.value.as_str()) {
            calls.insert(node.value.clone());
        }
    });
    calls
}

/// Counted range of a `For` node: first value, last value and step.
///
/// The counter is a byte and the bound is tested after the step, so a bound
/// at or behind the first value is only reached by wrapping around 256.
pub(crate) fn loop_range(node: &AstNode) -> (String, String, i32) {
    let param = |index: usize| node.params.get(index).cloned().unwrap_or_else(|| "0".to_string());
    let step: i32 = node.params.get(2).and_then(|step| step.parse().ok()).unwrap_or(1);
    let (init, bound) = (param(0), param(1));

    match (init.parse::<i32>(), bound.parse::<i32>()) {
        (Ok(first), Ok(end)) if step > 0 => {
            let end = if end > first { end } else { end + 256 };
            (init, (end - step).to_string(), step)
        }
        (Ok(first), Ok(end)) => {
            let first = if first > end { first } else { first + 256 };
            (first.to_string(), (end - step).to_string(), step)
        }
        _ if step < 0 => (init, format!("{} + {}", bound, -step), step),
        _ => (init, format!("{} - {}", bound, step), step),
    }
}

/// Render `unit` in the dialect of `target`
pub fn render(unit: &Decompilation, target: Target) -> Result<String, DecompileError> {
    if unit.program.kind != NodeKind::Program {
        return Err(DecompileError::stage(Stage::Emit, "tree is not rooted at a Program node"));
    }

    let Some(strategy) = target.get_strategy() else {
        let mut text = serde_json::to_string_pretty(unit)?;
        text.push('\n');
        return Ok(text);
    };

    let used = referenced_labels(&unit.program);
    let mut ctx = EmissionContext::new(target, strategy.numbered(), used.clone(), None);
    emit_program(strategy.as_ref(), unit, &mut ctx);

    if strategy.numbered() {
        // Second pass with every line number known
        let layout = ctx.into_layout();
        ctx = EmissionContext::new(target, true, used, Some(layout));
        emit_program(strategy.as_ref(), unit, &mut ctx);
    }

    for label in ctx.used_labels.difference(&ctx.defined_labels) {
        log::warn!("Jump to undefined label {}", label);
    }

    log::debug!("Rendered {} bytes of {}", ctx.output.len(), target);
    Ok(ctx.output)
}

/// Shared operand rendering for the BASIC dialects
pub(crate) fn basic_read(value: &str, field_separator: &str) -> String {
    match ValueRef::parse(value) {
        ValueRef::Plain(text) => text.replace('.', field_separator),
        ValueRef::Indexed { base, index } => format!("{}({})", base, index),
        ValueRef::Pointer { base, index } => format!("PEEK({} + {})", base, index),
    }
}

pub(crate) fn basic_write(dest: &str, value: &str, field_separator: &str) -> String {
    match ValueRef::parse(dest) {
        ValueRef::Pointer { base, index } => format!("POKE {} + {}, {}", base, index, value),
        _ => format!("{} = {}", basic_read(dest, field_separator), value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;
    use crate::pattern::test_support::analyse;
    use rstest::rstest;

    const COUNTED: &str = "\
        $C000: LDX #$00\n\
        $C002: INX\n\
        $C003: CPX #$0A\n\
        $C005: BNE $C002\n\
        $C007: RTS\n";

    fn unit_for(listing: &str) -> Decompilation {
        let (blocks, symbols) = analyse(listing);
        build(&blocks, &symbols)
    }

    #[test]
    fn test_target_parse_and_display() {
        for target in Target::available_targets() {
            assert_eq!(target.to_string().parse::<Target>(), Ok(*target));
        }
        assert_eq!("C".parse::<Target>(), Ok(Target::Curly));
        assert!("pascal".parse::<Target>().is_err());
        assert_eq!(Target::default(), Target::ModernBasic);
        assert_eq!(Target::Curly.file_extension(), "c");
    }

    #[test]
    fn test_loop_range() {
        let node = AstNode::new(NodeKind::For).with_value("X").with_params(["0", "10", "1"]);
        assert_eq!(loop_range(&node), ("0".to_string(), "9".to_string(), 1));

        let node = AstNode::new(NodeKind::For).with_value("Y").with_params(["8", "0", "-1"]);
        assert_eq!(loop_range(&node), ("8".to_string(), "1".to_string(), -1));

        let node = AstNode::new(NodeKind::For).with_value("X").with_params(["0", "ZVAR_FB", "1"]);
        assert_eq!(loop_range(&node).1, "ZVAR_FB - 1");
    }

    #[rstest]
    #[case(["0", "0", "1"], ("0", "255", 1))]
    #[case(["0", "0", "-1"], ("256", "1", -1))]
    #[case(["200", "10", "1"], ("200", "265", 1))]
    #[case(["5", "10", "-1"], ("261", "11", -1))]
    #[case(["0", "0", "2"], ("0", "254", 2))]
    fn test_loop_range_wraps_at_256(#[case] params: [&str; 3], #[case] expected: (&str, &str, i32)) {
        let node = AstNode::new(NodeKind::For).with_value("X").with_params(params);
        let (init, last, step) = loop_range(&node);
        assert_eq!((init.as_str(), last.as_str(), step), expected);
    }

    #[rstest]
    #[case(Target::ClassicBasic)]
    #[case(Target::ModernBasic)]
    #[case(Target::Curly)]
    #[case(Target::Json)]
    fn test_render_is_deterministic(#[case] target: Target) {
        let unit = unit_for(COUNTED);
        let first = render(&unit, target).unwrap();
        let second = render(&unit, target).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_unreferenced_labels_are_elided() {
        // LABEL_C002 is only used by the absorbed loop branch
        let unit = unit_for(COUNTED);
        for target in [Target::ModernBasic, Target::Curly] {
            let text = render(&unit, target).unwrap();
            assert!(!text.contains("LABEL_C002"), "{}", text);
        }
    }

    #[test]
    fn test_referenced_labels_are_defined_once() {
        let unit = unit_for(
            "$C000: LDA $FB\n\
             $C002: CMP #$01\n\
             $C004: BNE $C009\n\
             $C006: INC $D020\n\
             $C009: RTS\n",
        );
        assert_eq!(referenced_labels(&unit.program).into_iter().collect::<Vec<_>>(), vec!["LABEL_C009"]);

        let text = render(&unit, Target::ModernBasic).unwrap();
        assert_eq!(text.matches("LABEL_C009:").count(), 1);
        let text = render(&unit, Target::Curly).unwrap();
        assert_eq!(text.matches("LABEL_C009:;").count(), 1);
        assert!(text.contains("goto LABEL_C009;"));
    }

    #[test]
    fn test_json_target() {
        let unit = unit_for(COUNTED);
        let text = render(&unit, Target::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["program"]["kind"], "Program");
        assert_eq!(value["program"]["children"][0]["value"], "MAIN");
    }

    #[test]
    fn test_non_program_root_is_an_error() {
        let mut unit = unit_for(COUNTED);
        unit.program.kind = NodeKind::Block;
        assert!(matches!(render(&unit, Target::Curly), Err(DecompileError::Stage { stage: Stage::Emit, .. })));
    }

    #[test]
    fn test_basic_operands() {
        assert_eq!(basic_read("[SCREEN + X]", "_"), "SCREEN(X)");
        assert_eq!(basic_read("[(ZVAR_FB) + Y]", "_"), "PEEK(ZVAR_FB + Y)");
        assert_eq!(basic_read("STRUCT_C100.F0", "_"), "STRUCT_C100_F0");
        assert_eq!(basic_write("[(ZVAR_FB) + Y]", "A", "."), "POKE ZVAR_FB + Y, A");
        assert_eq!(basic_write("BORDER_COLOR", "5", "."), "BORDER_COLOR = 5");
    }
}
