use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use super::attrs::AttrMask;
use super::criteria::Criterion;
use super::error::CompileError;
use super::value::TypedValue;

/// Comparison operator of a compiled condition.
///
/// `Like`/`Unlike` are pattern comparators: `==`/`!=` are promoted to them when the
/// operand contains wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    Unlike,
}

impl Comparator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq | Comparator::Like => "==",
            Comparator::Ne | Comparator::Unlike => "!=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }

    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Comparator::Gt | Comparator::Ge | Comparator::Lt | Comparator::Le
        )
    }

    /// True for the comparators that succeed on equality (`==`, pattern match).
    #[must_use]
    pub fn is_positive(self) -> bool {
        matches!(self, Comparator::Eq | Comparator::Like)
    }

    /// Whether `lhs op rhs` holds given `lhs.cmp(rhs)`.
    #[must_use]
    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering;
        match self {
            Comparator::Eq | Comparator::Like => ord == Ordering::Equal,
            Comparator::Ne | Comparator::Unlike => ord != Ordering::Equal,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Ge => ord != Ordering::Less,
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Le => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Flags set on a compiled condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CompareFlags(u8);

impl CompareFlags {
    pub const NONE: CompareFlags = CompareFlags(0);
    /// The pattern used `**` and may span directory levels.
    pub const ANY_LEVEL: CompareFlags = CompareFlags(1 << 0);
    pub const CASE_INSENSITIVE: CompareFlags = CompareFlags(1 << 1);

    #[must_use]
    pub fn contains(self, other: CompareFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, other: CompareFlags) -> CompareFlags {
        CompareFlags(self.0 | other.0)
    }
}

/// A compiled `criterion op value` condition.
#[derive(Debug)]
pub struct CompareTriplet {
    pub criterion: Criterion,
    pub op: Comparator,
    pub value: TypedValue,
    /// Extended attribute name, status manager name, or status-manager attribute.
    pub attr_name: Option<String>,
    pub flags: CompareFlags,
    pub attribute: AttrMask,
}

impl fmt::Display for CompareTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.criterion, self.attr_name.as_deref()) {
            (Criterion::Xattr, Some(attr)) => write!(f, "xattr.{attr}")?,
            (Criterion::SmInfo, Some(attr)) => f.write_str(attr)?,
            (c, _) => write!(f, "{c}")?,
        }
        write!(f, " {} {}", self.op, self.value)
    }
}

/// Index of a node inside an [`ExprArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Edge from a parent to a child node.
///
/// `Borrowed` edges point at a node owned by another expression (a file class body
/// aliased into a rule); walks that visit owned nodes exactly once skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Owned(NodeId),
    Borrowed(NodeId),
}

impl Edge {
    #[must_use]
    pub fn node(self) -> NodeId {
        match self {
            Edge::Owned(id) | Edge::Borrowed(id) => id,
        }
    }

    #[must_use]
    pub fn is_owned(self) -> bool {
        matches!(self, Edge::Owned(_))
    }

    /// The same node, seen as an alias.
    #[must_use]
    pub fn borrowed(self) -> Edge {
        Edge::Borrowed(self.node())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::And => f.write_str("AND"),
            BinaryOp::Or => f.write_str("OR"),
        }
    }
}

#[derive(Debug)]
pub struct ConstLeaf(AtomicBool);

impl ConstLeaf {
    #[must_use]
    pub fn new(v: bool) -> Self {
        Self(AtomicBool::new(v))
    }

    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn set(&self, v: bool) {
        self.0.store(v, AtomicOrdering::Relaxed);
    }
}

/// Typed expression node.
#[derive(Debug)]
pub enum ExprNode {
    Constant(ConstLeaf),
    Condition(CompareTriplet),
    Unary { op: UnaryOp, child: Edge },
    Binary { op: BinaryOp, left: Edge, right: Edge },
}

/// Storage for every node of a compiled policy set. Nodes are never removed; the
/// arena is dropped as a whole.
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn push(&mut self, node: ExprNode, line: u32) -> Result<NodeId, CompileError> {
        let id = u32::try_from(self.nodes.len()).map_err(|_| CompileError::OutOfMemory { line })?;
        self.nodes
            .try_reserve(1)
            .map_err(|_| CompileError::OutOfMemory { line })?;
        self.nodes.push(node);
        Ok(NodeId(id))
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    /// Nodes reachable from `root` through owned edges, each listed once.
    #[must_use]
    pub fn owned_nodes(&self, root: Edge) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(edge) = stack.pop() {
            let Edge::Owned(id) = edge else { continue };
            out.push(id);
            match self.get(id) {
                ExprNode::Unary { child, .. } => stack.push(*child),
                ExprNode::Binary { left, right, .. } => {
                    stack.push(*right);
                    stack.push(*left);
                }
                ExprNode::Constant(_) | ExprNode::Condition(_) => {}
            }
        }
        out
    }

    /// Attributes the expression at `root` may need, aliased class bodies included.
    #[must_use]
    pub fn required_attrs(&self, root: Edge) -> AttrMask {
        let mut mask = AttrMask::EMPTY;
        let mut stack = vec![root.node()];
        while let Some(id) = stack.pop() {
            match self.get(id) {
                ExprNode::Condition(t) => mask |= t.attribute,
                ExprNode::Unary { child, .. } => stack.push(child.node()),
                ExprNode::Binary { left, right, .. } => {
                    stack.push(left.node());
                    stack.push(right.node());
                }
                ExprNode::Constant(_) => {}
            }
        }
        mask
    }

    /// Canonical rendering of the expression at `root`.
    #[must_use]
    pub fn display(&self, root: Edge) -> ExprDisplay<'_> {
        ExprDisplay { arena: self, root }
    }
}

/// Display adapter returned by [`ExprArena::display`].
pub struct ExprDisplay<'a> {
    arena: &'a ExprArena,
    root: Edge,
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sub = |edge: Edge| ExprDisplay {
            arena: self.arena,
            root: edge,
        };
        match self.arena.get(self.root.node()) {
            ExprNode::Constant(c) => f.write_str(if c.get() { "TRUE" } else { "FALSE" }),
            ExprNode::Condition(t) => write!(f, "{t}"),
            ExprNode::Unary {
                op: UnaryOp::Not,
                child,
            } => write!(f, "(NOT {})", sub(*child)),
            ExprNode::Binary { op, left, right } => {
                write!(f, "({} {op} {})", sub(*left), sub(*right))
            }
        }
    }
}

/// A single compiled expression with its own arena.
#[derive(Debug)]
pub struct Expression {
    pub(crate) arena: ExprArena,
    pub(crate) root: Edge,
}

impl Expression {
    #[must_use]
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    #[must_use]
    pub fn root(&self) -> Edge {
        self.root
    }

    /// Attributes this expression may need.
    #[must_use]
    pub fn required_attrs(&self) -> AttrMask {
        self.arena.required_attrs(self.root)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arena.display(self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::SizeLeaf;

    fn size_gt(arena: &mut ExprArena, v: u64) -> NodeId {
        arena
            .push(
                ExprNode::Condition(CompareTriplet {
                    criterion: Criterion::Size,
                    op: Comparator::Gt,
                    value: TypedValue::Size(SizeLeaf::new(v)),
                    attr_name: None,
                    flags: CompareFlags::NONE,
                    attribute: AttrMask::SIZE,
                }),
                1,
            )
            .unwrap()
    }

    #[test]
    fn comparator_symbols() {
        assert_eq!(Comparator::Like.to_string(), "==");
        assert_eq!(Comparator::Unlike.to_string(), "!=");
        assert_eq!(Comparator::Ge.to_string(), ">=");
    }

    #[test]
    fn comparator_holds() {
        use std::cmp::Ordering;
        assert!(Comparator::Ge.holds(Ordering::Equal));
        assert!(!Comparator::Gt.holds(Ordering::Equal));
        assert!(Comparator::Ne.holds(Ordering::Less));
        assert!(Comparator::Le.holds(Ordering::Less));
    }

    #[test]
    fn display_is_fully_parenthesized() {
        let mut arena = ExprArena::new();
        let a = size_gt(&mut arena, 1024);
        let b = size_gt(&mut arena, 2048);
        let not_b = arena
            .push(
                ExprNode::Unary {
                    op: UnaryOp::Not,
                    child: Edge::Owned(b),
                },
                1,
            )
            .unwrap();
        let and = arena
            .push(
                ExprNode::Binary {
                    op: BinaryOp::And,
                    left: Edge::Owned(a),
                    right: Edge::Owned(not_b),
                },
                1,
            )
            .unwrap();
        assert_eq!(
            arena.display(Edge::Owned(and)).to_string(),
            "(size > 1KB AND (NOT size > 2KB))"
        );
    }

    #[test]
    fn owned_walk_skips_borrowed_edges() {
        let mut arena = ExprArena::new();
        let class_body = size_gt(&mut arena, 1);
        let cond = size_gt(&mut arena, 2);
        let rule = arena
            .push(
                ExprNode::Binary {
                    op: BinaryOp::Or,
                    left: Edge::Borrowed(class_body),
                    right: Edge::Owned(cond),
                },
                1,
            )
            .unwrap();
        let owned = arena.owned_nodes(Edge::Owned(rule));
        assert_eq!(owned, vec![rule, cond]);
        assert_eq!(arena.required_attrs(Edge::Owned(rule)), AttrMask::SIZE);
    }

    #[test]
    fn constant_leaf_updates() {
        let c = ConstLeaf::new(false);
        c.set(true);
        assert!(c.get());
    }
}
