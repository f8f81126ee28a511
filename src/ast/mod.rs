//! The generic program tree shared by all emitters.
//!
//! Node fields follow fixed conventions per kind:
//!
//! | kind        | `value`              | `params`                              |
//! |-------------|----------------------|---------------------------------------|
//! | `Goto`/`If` | target label         | condition `lhs, op, rhs` (empty: always) |
//! | `For`       | counter register     | `init, bound, step`                   |
//! | `While`/`DoUntil` |                | condition `lhs, op, rhs`              |
//! | `Assign`    |                      | `dest, src` or `dest, lhs, op, rhs`   |
//! | `Expr`      | flag written         | `lhs, op, rhs`                        |
//! | `Switch`    | subject              |                                       |
//! | `Case`      |                      | `subject, constant`                   |
//! | `SubCall`/`KernalCall` | routine name | arguments                          |
//! | `Function`  | routine name         | parameter names                       |
//! | `StructDef` | struct name          | field names                           |
//! | `GlobalVar` | variable name        | `address`                             |
//! | `Raw`       | original text        |                                       |
//! | `Block`     | what the block is    |                                       |
//!
//! Operand strings are identifiers, decimal numbers, or memory references
//! built with [`memory_ref`] and [`pointer_ref`].

pub mod builder;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::symbols::SymbolKind;
use crate::Address;

pub use builder::{build, DecompileContext};

/// Kind of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Program,
    For,
    While,
    DoUntil,
    If,
    NestedIf,
    Switch,
    Case,
    SubCall,
    Goto,
    Return,
    Assign,
    Expr,
    StructDef,
    GlobalVar,
    Raw,
    Function,
    KernalCall,
    Break,
    Block,
}

/// One node of the program tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AstNode {
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AstNode>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    /// Label defined at this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    /// Address of the instruction the node came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

impl AstNode {
    pub fn new(kind: NodeKind) -> Self {
        AstNode { kind, children: Vec::new(), value: String::new(), label: None, params: Vec::new(), address: None }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_children(mut self, children: Vec<AstNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn at(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// A `Raw` node carrying untranslated text
    pub fn raw(text: impl Into<String>) -> Self {
        AstNode::new(NodeKind::Raw).with_value(text)
    }

    /// Visit this node and all descendants in document order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a AstNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Count nodes of `kind` in this subtree
    pub fn count(&self, kind: NodeKind) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if node.kind == kind {
                count += 1;
            }
        });
        count
    }

    /// Condition triple of an `If`/`Goto`/`While`/`DoUntil`/`Expr` node
    pub fn condition(&self) -> Option<(&str, CmpOp, &str)> {
        match self.params.as_slice() {
            [lhs, op, rhs] => Some((lhs.as_str(), op.parse().ok()?, rhs.as_str())),
            _ => None,
        }
    }
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
        }
    }

    /// Logical negation
    pub fn invert(&self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CmpOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(CmpOp::Eq),
            "<>" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            ">=" => Ok(CmpOp::Ge),
            ">" => Ok(CmpOp::Gt),
            "<=" => Ok(CmpOp::Le),
            _ => Err(format!("Unknown comparison operator: {}", s)),
        }
    }
}

/// `[base + index]`: element `index` of the memory starting at `base`
pub fn memory_ref(base: &str, index: &str) -> String {
    format!("[{} + {}]", base, index)
}

/// `[(base) + index]`: element `index` of the memory `base` points to
pub fn pointer_ref(base: &str, index: &str) -> String {
    format!("[({}) + {}]", base, index)
}

/// A parsed operand string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef<'a> {
    Plain(&'a str),
    Indexed { base: &'a str, index: &'a str },
    Pointer { base: &'a str, index: &'a str },
}

impl<'a> ValueRef<'a> {
    pub fn parse(text: &'a str) -> Self {
        let Some(inner) = text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) else {
            return ValueRef::Plain(text);
        };
        let Some((base, index)) = inner.rsplit_once(" + ") else {
            return ValueRef::Plain(text);
        };
        match base.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')) {
            Some(base) => ValueRef::Pointer { base, index },
            None => ValueRef::Indexed { base, index },
        }
    }
}

/// A data location referenced by the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub address: Address,
    /// Kind from the symbol table; `None` for generated names
    pub kind: Option<SymbolKind>,
    /// Used with an index register
    pub indexed: bool,
    /// Used as a zero-page pointer
    pub pointer: bool,
}

/// Output of the AST builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decompilation {
    /// The single `Program` root
    pub program: AstNode,
    /// Subroutine entries with a body in the listing, for forward declarations
    pub subroutines: BTreeMap<Address, String>,
    /// KERNAL/ROM routines called, for stub declarations
    pub kernal_calls: BTreeMap<Address, String>,
    /// Data locations, for variable declarations
    pub variables: BTreeMap<Address, Variable>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ref_parse() {
        assert_eq!(ValueRef::parse("A"), ValueRef::Plain("A"));
        assert_eq!(ValueRef::parse(&memory_ref("SCREEN", "X")), ValueRef::Indexed { base: "SCREEN", index: "X" });
        assert_eq!(ValueRef::parse(&pointer_ref("ZVAR_FB", "Y")), ValueRef::Pointer { base: "ZVAR_FB", index: "Y" });
        assert_eq!(
            ValueRef::parse(&pointer_ref("PTR + X", "0")),
            ValueRef::Pointer { base: "PTR + X", index: "0" }
        );
    }

    #[test]
    fn test_cmp_op_round_trip_and_invert() {
        for op in [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Ge, CmpOp::Gt, CmpOp::Le] {
            assert_eq!(op.as_str().parse::<CmpOp>(), Ok(op));
            assert_eq!(op.invert().invert(), op);
        }
        assert!("=>".parse::<CmpOp>().is_err());
    }

    #[test]
    fn test_node_builders_and_walk() {
        let node = AstNode::new(NodeKind::Function)
            .with_value("MAIN")
            .with_children(vec![
                AstNode::new(NodeKind::Goto).with_value("LOOP").with_params(["FLAGS", "<>", "0"]),
                AstNode::raw("LAX $10"),
            ]);

        assert_eq!(node.count(NodeKind::Raw), 1);
        assert_eq!(node.children[0].condition(), Some(("FLAGS", CmpOp::Ne, "0")));
        assert_eq!(node.children[1].condition(), None);

        let mut kinds = Vec::new();
        node.walk(&mut |n| kinds.push(n.kind));
        assert_eq!(kinds, vec![NodeKind::Function, NodeKind::Goto, NodeKind::Raw]);
    }
}
