use std::collections::VecDeque;
use std::fmt;

use tracing::warn;

use super::error::CompileError;

/// Relational operator as written in policy text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for SyntaxOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyntaxOp::Eq => "==",
            SyntaxOp::Ne => "!=",
            SyntaxOp::Gt => ">",
            SyntaxOp::Ge => ">=",
            SyntaxOp::Lt => "<",
            SyntaxOp::Le => "<=",
        };
        f.write_str(s)
    }
}

/// Boolean connective requested by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// Parenthesized group: passes its operand through.
    Identity,
    Not,
    And,
    Or,
}

/// Set connective over file class names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Not,
    Union,
    Inter,
}

/// Untyped boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BoolExpr {
    pub line: u32,
    pub node: BoolNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoolNode {
    Constant(bool),
    Condition {
        var: String,
        op: SyntaxOp,
        value: String,
        args: Vec<String>,
    },
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
}

/// Untyped set expression over class names.
#[derive(Debug, Clone, PartialEq)]
pub struct SetExpr {
    pub line: u32,
    pub node: SetNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetNode {
    Singleton(String),
    Not(Box<SetExpr>),
    Union(Box<SetExpr>, Box<SetExpr>),
    Inter(Box<SetExpr>, Box<SetExpr>),
}

/// Node of the generic item tree.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericItem {
    pub line: u32,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Block {
        name: String,
        id: Option<String>,
        children: Vec<GenericItem>,
    },
    Assignment {
        name: String,
        value: String,
        args: Vec<String>,
    },
    Bool(BoolExpr),
    Set(SetExpr),
}

impl ItemKind {
    /// Short description used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ItemKind::Block { name, .. } => format!("block '{name}'"),
            ItemKind::Assignment { name, .. } => format!("parameter '{name}'"),
            ItemKind::Bool(_) => "boolean expression".to_owned(),
            ItemKind::Set(_) => "set expression".to_owned(),
        }
    }
}

/// List of items under construction. [`ItemTreeBuilder::append_to_list`] prepends, so a
/// list filled by successive calls holds items in reverse call order.
pub type ItemList = VecDeque<GenericItem>;

/// Constructors driven by the token consumer. Every item is stamped with the line the
/// builder is positioned at.
#[derive(Debug, Clone, Copy)]
pub struct ItemTreeBuilder {
    line: u32,
}

impl Default for ItemTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemTreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { line: 1 }
    }

    #[must_use]
    pub fn at_line(line: u32) -> Self {
        Self { line }
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn new_list(&self) -> ItemList {
        VecDeque::new()
    }

    /// Prepend `item` to `list`.
    pub fn append_to_list(&self, list: &mut ItemList, item: GenericItem) {
        list.push_front(item);
    }

    #[must_use]
    pub fn create_block(
        &self,
        name: &str,
        id: Option<&str>,
        children: Option<ItemList>,
    ) -> GenericItem {
        self.item(ItemKind::Block {
            name: name.to_owned(),
            id: id.map(str::to_owned),
            children: children.map(Vec::from).unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn create_assignment(&self, name: &str, value: &str) -> GenericItem {
        self.item(ItemKind::Assignment {
            name: name.to_owned(),
            value: value.to_owned(),
            args: Vec::new(),
        })
    }

    #[must_use]
    pub fn create_condition(&self, var: &str, op: SyntaxOp, value: &str) -> GenericItem {
        self.bool_item(BoolNode::Condition {
            var: var.to_owned(),
            op,
            value: value.to_owned(),
            args: Vec::new(),
        })
    }

    #[must_use]
    pub fn create_constant(&self, value: bool) -> GenericItem {
        self.bool_item(BoolNode::Constant(value))
    }

    /// Apply a unary boolean operator. `Identity` returns `expr` unchanged.
    ///
    /// # Errors
    ///
    /// [`CompileError::StructureMismatch`] when `expr` is not a boolean expression or
    /// `op` is not unary.
    pub fn create_unary_bool(
        &self,
        op: BoolOp,
        expr: GenericItem,
    ) -> Result<GenericItem, CompileError> {
        let inner = self.expect_bool(expr)?;
        match op {
            BoolOp::Identity => Ok(GenericItem {
                line: inner.line,
                kind: ItemKind::Bool(inner),
            }),
            BoolOp::Not => Ok(self.bool_item(BoolNode::Not(Box::new(inner)))),
            BoolOp::And | BoolOp::Or => Err(self.mismatch("unary boolean operator expected")),
        }
    }

    /// # Errors
    ///
    /// [`CompileError::StructureMismatch`] when an operand is not a boolean expression or
    /// `op` is not binary.
    pub fn create_binary_bool(
        &self,
        op: BoolOp,
        left: GenericItem,
        right: GenericItem,
    ) -> Result<GenericItem, CompileError> {
        let l = Box::new(self.expect_bool(left)?);
        let r = Box::new(self.expect_bool(right)?);
        match op {
            BoolOp::And => Ok(self.bool_item(BoolNode::And(l, r))),
            BoolOp::Or => Ok(self.bool_item(BoolNode::Or(l, r))),
            BoolOp::Identity | BoolOp::Not => {
                Err(self.mismatch("binary boolean operator expected"))
            }
        }
    }

    #[must_use]
    pub fn create_set_singleton(&self, name: &str) -> GenericItem {
        self.set_item(SetNode::Singleton(name.to_owned()))
    }

    /// # Errors
    ///
    /// [`CompileError::StructureMismatch`] when `set` is not a set expression or `op` is
    /// not unary.
    pub fn create_set_unary(
        &self,
        op: SetOp,
        set: GenericItem,
    ) -> Result<GenericItem, CompileError> {
        let inner = self.expect_set(set)?;
        match op {
            SetOp::Not => Ok(self.set_item(SetNode::Not(Box::new(inner)))),
            SetOp::Union | SetOp::Inter => Err(self.mismatch("unary set operator expected")),
        }
    }

    /// # Errors
    ///
    /// [`CompileError::StructureMismatch`] when an operand is not a set expression or
    /// `op` is not binary.
    pub fn create_set_binary(
        &self,
        op: SetOp,
        left: GenericItem,
        right: GenericItem,
    ) -> Result<GenericItem, CompileError> {
        let l = Box::new(self.expect_set(left)?);
        let r = Box::new(self.expect_set(right)?);
        match op {
            SetOp::Union => Ok(self.set_item(SetNode::Union(l, r))),
            SetOp::Inter => Ok(self.set_item(SetNode::Inter(l, r))),
            SetOp::Not => Err(self.mismatch("binary set operator expected")),
        }
    }

    /// Attach an argument list to an assignment or a condition.
    ///
    /// # Errors
    ///
    /// [`CompileError::StructureMismatch`] for any other item.
    pub fn attach_arg_list(
        &self,
        item: &mut GenericItem,
        args: Vec<String>,
    ) -> Result<(), CompileError> {
        match &mut item.kind {
            ItemKind::Assignment { args: slot, .. }
            | ItemKind::Bool(BoolExpr {
                node: BoolNode::Condition { args: slot, .. },
                ..
            }) => {
                *slot = args;
                Ok(())
            }
            other => Err(CompileError::StructureMismatch {
                line: item.line,
                message: format!("arguments are not expected for {}", other.describe()),
            }),
        }
    }

    fn item(&self, kind: ItemKind) -> GenericItem {
        GenericItem {
            line: self.line,
            kind,
        }
    }

    fn bool_item(&self, node: BoolNode) -> GenericItem {
        self.item(ItemKind::Bool(BoolExpr {
            line: self.line,
            node,
        }))
    }

    fn set_item(&self, node: SetNode) -> GenericItem {
        self.item(ItemKind::Set(SetExpr {
            line: self.line,
            node,
        }))
    }

    fn expect_bool(&self, item: GenericItem) -> Result<BoolExpr, CompileError> {
        match item.kind {
            ItemKind::Bool(b) => Ok(b),
            other => Err(self.mismatch(&format!(
                "boolean expression expected, found {}",
                other.describe()
            ))),
        }
    }

    fn expect_set(&self, item: GenericItem) -> Result<SetExpr, CompileError> {
        match item.kind {
            ItemKind::Set(s) => Ok(s),
            other => Err(self.mismatch(&format!(
                "set expression expected, found {}",
                other.describe()
            ))),
        }
    }

    fn mismatch(&self, message: &str) -> CompileError {
        CompileError::StructureMismatch {
            line: self.line,
            message: message.to_owned(),
        }
    }
}

/// Resolve a `$VAR` reference (name given without the `$`).
///
/// Unset or non-unicode variables resolve to the empty string; the second element
/// reports that a warning was emitted.
#[must_use]
pub fn resolve_env(name: &str) -> (String, bool) {
    match std::env::var(name) {
        Ok(v) => (v, false),
        Err(e) => {
            warn!(target: "fspolicy::compile", variable = name, error = %e, "environment variable resolves to empty string");
            (String::new(), true)
        }
    }
}
