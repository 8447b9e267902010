//! Typed AST for the expression language.
//!
//! Nodes are immutable and shared through `Rc`. Each node carries two
//! pieces of metadata computed at construction time:
//!
//! - `constant`: the value depends only on the AST structure, never on the
//!   scope, locals, or a stateful filter.
//! - `to_watch`: the set of sub-expressions whose values determine this
//!   node's value. `SelfRef` means the node has no simpler inputs and must
//!   be watched as a whole.
//!
//! A constant node always has an empty watch set.

use std::rc::Rc;

use super::value::Value;

/// Shared reference to an AST node.
pub type AstRef = Rc<AstNode>;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Short-circuit logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// An object literal entry. Keys are identifiers or literals in the
/// source; both normalize to their string spelling.
#[derive(Debug, Clone)]
pub struct Property {
    pub key: String,
    pub value: AstRef,
}

/// The watch set of a node.
#[derive(Debug, Clone)]
pub enum ToWatch {
    /// No simpler inputs; watch the node itself.
    SelfRef,
    /// The resolved set of input sub-expressions.
    Nodes(Vec<AstRef>),
}

impl ToWatch {
    pub fn is_self(&self) -> bool {
        matches!(self, ToWatch::SelfRef)
    }
}

/// The node variants of the expression language.
#[derive(Debug, Clone)]
pub enum AstKind {
    Program { body: Vec<AstRef> },
    Literal { value: Value },
    ArrayExpr { elements: Vec<AstRef> },
    ObjectExpr { properties: Vec<Property> },
    Identifier { name: String },
    ThisExpr,
    MemberNonComputed { object: AstRef, property: String },
    MemberComputed { object: AstRef, property: AstRef },
    Call { callee: AstRef, args: Vec<AstRef> },
    Filter { name: String, args: Vec<AstRef> },
    Assignment { left: AstRef, right: AstRef },
    Unary { op: UnaryOp, arg: AstRef },
    Binary { op: BinaryOp, left: AstRef, right: AstRef },
    Logical { op: LogicalOp, left: AstRef, right: AstRef },
    Conditional { test: AstRef, consequent: AstRef, alternate: AstRef },
    /// Placeholder for the right-hand side of a synthetic assignment.
    ValueParameter,
}

/// An AST node with its analysis metadata.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstKind,
    pub constant: bool,
    pub to_watch: ToWatch,
}

/// Resolve a node's watch set to concrete nodes. A `SelfRef` resolves to
/// the node itself.
pub fn watchables(node: &AstRef) -> Vec<AstRef> {
    match &node.to_watch {
        ToWatch::SelfRef => vec![node.clone()],
        ToWatch::Nodes(nodes) => nodes.clone(),
    }
}

/// Flat-map the watch sets of non-constant children.
fn collect_watchables<'a>(children: impl Iterator<Item = &'a AstRef>) -> Vec<AstRef> {
    let mut out = Vec::new();
    for child in children {
        if !child.constant {
            out.extend(watchables(child));
        }
    }
    out
}

impl AstNode {
    fn build(kind: AstKind, constant: bool, to_watch: ToWatch) -> AstRef {
        // A constant value needs no inputs.
        let to_watch = if constant {
            ToWatch::Nodes(Vec::new())
        } else {
            to_watch
        };
        Rc::new(AstNode {
            kind,
            constant,
            to_watch,
        })
    }

    pub fn program(body: Vec<AstRef>) -> AstRef {
        let constant = body.iter().all(|n| n.constant);
        Self::build(AstKind::Program { body }, constant, ToWatch::Nodes(Vec::new()))
    }

    pub fn literal(value: Value) -> AstRef {
        Self::build(AstKind::Literal { value }, true, ToWatch::Nodes(Vec::new()))
    }

    pub fn array(elements: Vec<AstRef>) -> AstRef {
        let constant = elements.iter().all(|n| n.constant);
        let to_watch = ToWatch::Nodes(collect_watchables(elements.iter()));
        Self::build(AstKind::ArrayExpr { elements }, constant, to_watch)
    }

    pub fn object(properties: Vec<Property>) -> AstRef {
        let constant = properties.iter().all(|p| p.value.constant);
        let to_watch = ToWatch::Nodes(collect_watchables(properties.iter().map(|p| &p.value)));
        Self::build(AstKind::ObjectExpr { properties }, constant, to_watch)
    }

    pub fn identifier(name: impl Into<String>) -> AstRef {
        Self::build(
            AstKind::Identifier { name: name.into() },
            false,
            ToWatch::SelfRef,
        )
    }

    pub fn this() -> AstRef {
        Self::build(AstKind::ThisExpr, false, ToWatch::Nodes(Vec::new()))
    }

    pub fn member(object: AstRef, property: impl Into<String>) -> AstRef {
        let constant = object.constant;
        Self::build(
            AstKind::MemberNonComputed {
                object,
                property: property.into(),
            },
            constant,
            ToWatch::SelfRef,
        )
    }

    pub fn member_computed(object: AstRef, property: AstRef) -> AstRef {
        let constant = object.constant && property.constant;
        Self::build(
            AstKind::MemberComputed { object, property },
            constant,
            ToWatch::SelfRef,
        )
    }

    pub fn call(callee: AstRef, args: Vec<AstRef>) -> AstRef {
        Self::build(AstKind::Call { callee, args }, false, ToWatch::SelfRef)
    }

    /// A filter application. `stateful` comes from the registry entry; a
    /// stateful filter is never constant and is watched as a whole.
    pub fn filter(name: impl Into<String>, args: Vec<AstRef>, stateful: bool) -> AstRef {
        let constant = !stateful && args.iter().all(|a| a.constant);
        let to_watch = if stateful {
            ToWatch::SelfRef
        } else {
            ToWatch::Nodes(collect_watchables(args.iter()))
        };
        Self::build(
            AstKind::Filter {
                name: name.into(),
                args,
            },
            constant,
            to_watch,
        )
    }

    pub fn assignment(left: AstRef, right: AstRef) -> AstRef {
        let constant = left.constant && right.constant;
        Self::build(
            AstKind::Assignment { left, right },
            constant,
            ToWatch::SelfRef,
        )
    }

    pub fn unary(op: UnaryOp, arg: AstRef) -> AstRef {
        let constant = arg.constant;
        let to_watch = ToWatch::Nodes(collect_watchables(std::iter::once(&arg)));
        Self::build(AstKind::Unary { op, arg }, constant, to_watch)
    }

    pub fn binary(op: BinaryOp, left: AstRef, right: AstRef) -> AstRef {
        let constant = left.constant && right.constant;
        let to_watch = ToWatch::Nodes(collect_watchables([&left, &right].into_iter()));
        Self::build(AstKind::Binary { op, left, right }, constant, to_watch)
    }

    pub fn logical(op: LogicalOp, left: AstRef, right: AstRef) -> AstRef {
        let constant = left.constant && right.constant;
        Self::build(
            AstKind::Logical { op, left, right },
            constant,
            ToWatch::SelfRef,
        )
    }

    pub fn conditional(test: AstRef, consequent: AstRef, alternate: AstRef) -> AstRef {
        let constant = test.constant && consequent.constant && alternate.constant;
        Self::build(
            AstKind::Conditional {
                test,
                consequent,
                alternate,
            },
            constant,
            ToWatch::SelfRef,
        )
    }

    pub fn value_parameter() -> AstRef {
        Self::build(AstKind::ValueParameter, false, ToWatch::Nodes(Vec::new()))
    }
}

// ============================================================================
// Program-level analyses
// ============================================================================

/// Whether the program is a literal: an empty body, or a single literal,
/// array, or object expression.
pub fn is_literal(program: &AstRef) -> bool {
    match &program.kind {
        AstKind::Program { body } => match body.as_slice() {
            [] => true,
            [only] => matches!(
                only.kind,
                AstKind::Literal { .. } | AstKind::ArrayExpr { .. } | AstKind::ObjectExpr { .. }
            ),
            _ => false,
        },
        _ => false,
    }
}

/// The input set of a single-statement program: the sub-expressions whose
/// values determine the program's value. Empty when the expression must be
/// watched as a whole (or has multiple statements).
pub fn inputs(program: &AstRef) -> Vec<AstRef> {
    match &program.kind {
        AstKind::Program { body } => match body.as_slice() {
            [only] => match &only.to_watch {
                ToWatch::SelfRef => Vec::new(),
                ToWatch::Nodes(nodes) => nodes.clone(),
            },
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// If the program's single statement is an assignable expression
/// (identifier or member access), return a synthetic assignment with a
/// value-parameter placeholder on the right.
pub fn assignable_ast(program: &AstRef) -> Option<AstRef> {
    match &program.kind {
        AstKind::Program { body } => match body.as_slice() {
            [only] if matches!(
                only.kind,
                AstKind::Identifier { .. }
                    | AstKind::MemberComputed { .. }
                    | AstKind::MemberNonComputed { .. }
            ) =>
            {
                Some(AstNode::assignment(only.clone(), AstNode::value_parameter()))
            }
            _ => None,
        },
        _ => None,
    }
}

// ============================================================================
// Shared sentinel nodes
// ============================================================================

thread_local! {
    static THIS_NODE: AstRef = AstNode::this();
    static NULL_NODE: AstRef = AstNode::literal(Value::Null);
    static TRUE_NODE: AstRef = AstNode::literal(Value::Bool(true));
    static FALSE_NODE: AstRef = AstNode::literal(Value::Bool(false));
    static UNDEFINED_NODE: AstRef = AstNode::literal(Value::Undefined);
}

/// Resolve the reserved constant names to their shared sentinel nodes.
pub fn constant_name(name: &str) -> Option<AstRef> {
    match name {
        "this" => Some(THIS_NODE.with(Rc::clone)),
        "null" => Some(NULL_NODE.with(Rc::clone)),
        "true" => Some(TRUE_NODE.with(Rc::clone)),
        "false" => Some(FALSE_NODE.with(Rc::clone)),
        "undefined" => Some(UNDEFINED_NODE.with(Rc::clone)),
        _ => None,
    }
}
