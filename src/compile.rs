use std::collections::HashMap;

use tracing::{trace, warn};

use crate::glob;
use crate::types::{
    AttrMask, BinaryOp, BoolExpr, BoolNode, ClassId, CompareFlags, CompareTriplet, Comparator,
    CompileError, CompiledPolicySet, ConstLeaf, CriteriaCatalog, CriteriaFlags, Criterion, Edge,
    EngineConfig, ExprArena, ExprNode, Expression, FileClass, IntLeaf, Lookup, ObjectType,
    ResolvedCriterion, SetExpr, SetNode, SizeLeaf, StatusManager, StatusRegistry, StrValue,
    SyntaxOp, TypeLeaf, TypedValue, UnaryOp, ValueType, parse_duration, parse_integer, parse_size,
};

const TARGET: &str = "fspolicy::compile";

/// Everything a condition needs to be compiled.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub catalog: &'a CriteriaCatalog,
    /// Status manager of the policy the expression belongs to, if any.
    pub status: Option<&'a dyn StatusManager>,
    pub config: &'a EngineConfig,
}

impl<'a> CompileContext<'a> {
    #[must_use]
    pub fn new(catalog: &'a CriteriaCatalog, config: &'a EngineConfig) -> Self {
        Self {
            catalog,
            status: None,
            config,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<&'a dyn StatusManager>) -> Self {
        self.status = status;
        self
    }
}

fn comparator(op: SyntaxOp) -> Comparator {
    match op {
        SyntaxOp::Eq => Comparator::Eq,
        SyntaxOp::Ne => Comparator::Ne,
        SyntaxOp::Gt => Comparator::Gt,
        SyntaxOp::Ge => Comparator::Ge,
        SyntaxOp::Lt => Comparator::Lt,
        SyntaxOp::Le => Comparator::Le,
    }
}

/// Compile a single `criterion op value` condition.
///
/// `==`/`!=` against a value containing wildcards become pattern comparators.
///
/// # Errors
///
/// [`CompileError::UnknownCriterion`], [`CompileError::IllegalOperator`] or
/// [`CompileError::InvalidValue`]; [`CompileError::StructureMismatch`] if `expr` is not a
/// condition.
pub fn compile_condition(
    expr: BoolExpr,
    ctx: &CompileContext<'_>,
) -> Result<CompareTriplet, CompileError> {
    let line = expr.line;
    let BoolNode::Condition {
        var,
        op,
        value,
        args,
    } = expr.node
    else {
        return Err(CompileError::StructureMismatch {
            line,
            message: "condition expected".into(),
        });
    };

    let resolved = match ctx.catalog.lookup(&var, ctx.status) {
        Lookup::Found(r) => r,
        Lookup::NoSuchCriterion => {
            return Err(CompileError::UnknownCriterion { line, name: var });
        }
    };

    if !args.is_empty() {
        warn!(target: TARGET, line, criterion = %var, "arguments ignored for condition");
    }

    let op = comparator(op);
    if op.is_ordering() && !resolved.flags.contains(CriteriaFlags::COMPARABLE) {
        return Err(CompileError::IllegalOperator {
            line,
            criterion: var,
            op: op.to_string(),
        });
    }

    let invalid = |reason: String| CompileError::InvalidValue {
        line,
        criterion: var.clone(),
        literal: value.clone(),
        reason,
    };

    let mut flags = CompareFlags::NONE;
    let mut op = op;
    let typed = match resolved.value_type {
        ValueType::String => {
            let (s, f, promoted) = compile_string(&resolved, op, &value, ctx).map_err(invalid)?;
            flags = f;
            op = promoted;
            TypedValue::Str(s)
        }
        ValueType::Size => {
            let v = parse_size(&value)
                .ok_or_else(|| invalid("size expected, e.g. 10MB".into()))?;
            check_numeric(&resolved, i128::from(v)).map_err(invalid)?;
            TypedValue::Size(SizeLeaf::new(v))
        }
        ValueType::Integer => {
            let v = parse_integer(&value).ok_or_else(|| invalid("integer expected".into()))?;
            check_numeric(&resolved, i128::from(v)).map_err(invalid)?;
            TypedValue::Integer(IntLeaf::new(v))
        }
        ValueType::Duration => {
            let v = parse_duration(&value)
                .ok_or_else(|| invalid("duration expected, e.g. 2d or 30min".into()))?;
            check_numeric(&resolved, i128::from(v)).map_err(invalid)?;
            TypedValue::Duration(IntLeaf::new(v))
        }
        ValueType::Type => {
            let t = ObjectType::from_config_name(&value).ok_or_else(|| {
                invalid("type expected: file, dir, symlink, chr, blk, fifo or sock".into())
            })?;
            TypedValue::Type(TypeLeaf::new(t))
        }
    };

    trace!(target: TARGET, line, criterion = %var, op = %op, value = %typed, "condition compiled");

    Ok(CompareTriplet {
        criterion: resolved.criterion,
        op,
        value: typed,
        attr_name: resolved.attr_name,
        flags,
        attribute: resolved.attribute,
    })
}

fn check_numeric(r: &ResolvedCriterion, v: i128) -> Result<(), String> {
    if r.flags.contains(CriteriaFlags::POSITIVE) && v < 0 {
        return Err("positive value expected".into());
    }
    if r.flags.contains(CriteriaFlags::NOT_ZERO) && v == 0 {
        return Err("null value not allowed".into());
    }
    Ok(())
}

fn compile_string(
    r: &ResolvedCriterion,
    op: Comparator,
    value: &str,
    ctx: &CompileContext<'_>,
) -> Result<(StrValue, CompareFlags, Comparator), String> {
    let f = r.flags;
    let mut literal = value.to_owned();

    if f.contains(CriteriaFlags::NOT_EMPTY) && literal.is_empty() {
        return Err("empty string not allowed".into());
    }
    if f.contains(CriteriaFlags::NO_SLASH) && literal.contains('/') {
        return Err("'/' not allowed".into());
    }
    if f.contains(CriteriaFlags::REMOVE_FINAL_SLASH) {
        while literal.len() > 1 && literal.ends_with('/') {
            literal.pop();
        }
    }

    let wildcards = glob::has_wildcards(&literal);
    if wildcards && f.contains(CriteriaFlags::NO_WILDCARDS) {
        return Err("wildcards not allowed".into());
    }

    let mut flags = CompareFlags::NONE;
    if r.criterion != Criterion::Xattr && literal.contains("**") {
        if !f.contains(CriteriaFlags::ALLOW_ANY_DEPTH) {
            return Err("double star wildcard (**) not expected".into());
        }
        if glob::check_any_level(&literal)? {
            flags = flags.with(CompareFlags::ANY_LEVEL);
        }
    }

    if r.criterion == Criterion::Status {
        if let Some(sm) = ctx.status {
            if !literal.is_empty() && !sm.statuses().iter().any(|s| *s == literal) {
                return Err(format!(
                    "status expected for {}: {}",
                    sm.name(),
                    sm.statuses().join(", ")
                ));
            }
        }
    }

    let op = match op {
        Comparator::Eq if wildcards => Comparator::Like,
        Comparator::Ne if wildcards => Comparator::Unlike,
        other => other,
    };

    let path_like = matches!(r.criterion, Criterion::Tree | Criterion::Path);
    let case_insensitive =
        f.contains(CriteriaFlags::CASE_INSENSITIVE) || r.criterion == Criterion::FileClass;
    if case_insensitive {
        flags = flags.with(CompareFlags::CASE_INSENSITIVE);
    }

    let relative = !literal.starts_with('/')
        && !(flags.contains(CompareFlags::ANY_LEVEL) && literal.starts_with('*'));
    let pattern = if path_like && relative {
        format!("{}/{}", ctx.config.root(), literal)
    } else {
        literal.clone()
    };

    let matcher = if path_like || wildcards {
        Some(glob::compile(&pattern, path_like, case_insensitive).map_err(|e| e.to_string())?)
    } else {
        None
    };

    Ok((
        StrValue {
            literal,
            pattern,
            matcher,
        },
        flags,
        op,
    ))
}

fn lower_bool(
    arena: &mut ExprArena,
    expr: BoolExpr,
    ctx: &CompileContext<'_>,
) -> Result<Edge, CompileError> {
    let line = expr.line;
    let node = match expr.node {
        BoolNode::Constant(value) => ExprNode::Constant(ConstLeaf::new(value)),
        BoolNode::Condition { .. } => ExprNode::Condition(compile_condition(expr, ctx)?),
        BoolNode::Not(inner) => ExprNode::Unary {
            op: UnaryOp::Not,
            child: lower_bool(arena, *inner, ctx)?,
        },
        BoolNode::And(l, r) => ExprNode::Binary {
            op: BinaryOp::And,
            left: lower_bool(arena, *l, ctx)?,
            right: lower_bool(arena, *r, ctx)?,
        },
        BoolNode::Or(l, r) => ExprNode::Binary {
            op: BinaryOp::Or,
            left: lower_bool(arena, *l, ctx)?,
            right: lower_bool(arena, *r, ctx)?,
        },
    };
    Ok(Edge::Owned(arena.push(node, line)?))
}

/// Compile a boolean expression into its own arena.
///
/// # Errors
///
/// Returns the first [`CompileError`] raised by one of its conditions.
pub fn compile_bool_expr(
    expr: BoolExpr,
    ctx: &CompileContext<'_>,
) -> Result<Expression, CompileError> {
    let mut arena = ExprArena::new();
    let root = lower_bool(&mut arena, expr, ctx)?;
    Ok(Expression { arena, root })
}

/// Incremental builder of a [`CompiledPolicySet`]: expressions, classes and set
/// expressions over those classes all land in one arena.
///
/// # Example
///
/// ```
/// use fspolicy::{
///     CriteriaCatalog, EngineConfig, ItemTreeBuilder, PolicyCompiler, StatusRegistry, SyntaxOp,
///     ItemKind,
/// };
///
/// let catalog = CriteriaCatalog::new();
/// let registry = StatusRegistry::new();
/// let mut compiler = PolicyCompiler::new(&catalog, &registry, EngineConfig::new("/fs"));
///
/// let b = ItemTreeBuilder::new();
/// let ItemKind::Bool(cond) = b.create_condition("name", SyntaxOp::Eq, "*.tmp").kind else {
///     unreachable!()
/// };
/// let body = compiler.compile_bool_expr(cond, None).unwrap();
/// compiler.define_class("tmp", body, true, 1).unwrap();
///
/// let ItemKind::Set(set) = b.create_set_singleton("TMP").kind else { unreachable!() };
/// let alias = compiler.compile_set_expr(set).unwrap();
/// assert!(!alias.is_owned());
///
/// let compiled = compiler.finish();
/// assert_eq!(compiled.classes().len(), 1);
/// ```
#[derive(Debug)]
pub struct PolicyCompiler<'a> {
    pub(crate) catalog: &'a CriteriaCatalog,
    pub(crate) registry: &'a StatusRegistry,
    pub(crate) set: CompiledPolicySet,
}

impl<'a> PolicyCompiler<'a> {
    #[must_use]
    pub fn new(
        catalog: &'a CriteriaCatalog,
        registry: &'a StatusRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            set: CompiledPolicySet {
                arena: ExprArena::new(),
                classes: Vec::new(),
                class_index: HashMap::new(),
                policies: Vec::new(),
                config,
            },
        }
    }

    /// Compile `expr` into the shared arena.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] raised by one of its conditions.
    pub fn compile_bool_expr(
        &mut self,
        expr: BoolExpr,
        status: Option<&dyn StatusManager>,
    ) -> Result<Edge, CompileError> {
        let ctx = CompileContext {
            catalog: self.catalog,
            status,
            config: &self.set.config,
        };
        lower_bool(&mut self.set.arena, expr, &ctx)
    }

    /// Compile a set expression over already defined classes. Class bodies are
    /// aliased, never copied.
    ///
    /// # Errors
    ///
    /// [`CompileError::UnknownFileClass`] for an undefined class name.
    pub fn compile_set_expr(&mut self, set: SetExpr) -> Result<Edge, CompileError> {
        let line = set.line;
        let node = match set.node {
            SetNode::Singleton(name) => {
                let class = self.class_id(&name).ok_or(CompileError::UnknownFileClass {
                    line,
                    name,
                })?;
                return Ok(self.set.classes[class.0].definition.borrowed());
            }
            SetNode::Not(inner) => ExprNode::Unary {
                op: UnaryOp::Not,
                child: self.compile_set_expr(*inner)?,
            },
            SetNode::Union(l, r) => ExprNode::Binary {
                op: BinaryOp::Or,
                left: self.compile_set_expr(*l)?,
                right: self.compile_set_expr(*r)?,
            },
            SetNode::Inter(l, r) => ExprNode::Binary {
                op: BinaryOp::And,
                left: self.compile_set_expr(*l)?,
                right: self.compile_set_expr(*r)?,
            },
        };
        Ok(Edge::Owned(self.set.arena.push(node, line)?))
    }

    /// Constant expression, used for rules without a condition.
    ///
    /// # Errors
    ///
    /// [`CompileError::OutOfMemory`] if the arena cannot grow.
    pub fn constant(&mut self, value: bool, line: u32) -> Result<Edge, CompileError> {
        let id = self
            .set
            .arena
            .push(ExprNode::Constant(ConstLeaf::new(value)), line)?;
        Ok(Edge::Owned(id))
    }

    /// Register a class whose body was compiled into this builder.
    ///
    /// # Errors
    ///
    /// [`CompileError::DuplicateName`] if the (case-insensitive) name is taken.
    pub fn define_class(
        &mut self,
        name: &str,
        definition: Edge,
        matchable: bool,
        line: u32,
    ) -> Result<ClassId, CompileError> {
        let key = name.to_ascii_lowercase();
        if self.set.class_index.contains_key(&key) {
            return Err(CompileError::DuplicateName {
                line,
                kind: "fileclass",
                name: name.to_owned(),
            });
        }
        let attributes = self.set.arena.required_attrs(definition);
        if attributes.contains(AttrMask::LAST_ACCESS) || attributes.contains(AttrMask::LAST_MOD) {
            warn!(
                target: TARGET,
                line,
                class = name,
                "time-based conditions should be specified in policy rules instead of fileclass definitions"
            );
        }
        let id = ClassId(self.set.classes.len());
        self.set.classes.push(FileClass {
            name: name.to_owned(),
            definition,
            attributes,
            matchable,
            line,
        });
        self.set.class_index.insert(key, id);
        Ok(id)
    }

    #[must_use]
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.set.class_index.get(&name.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn finish(self) -> CompiledPolicySet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, ItemTreeBuilder, StaticStatusManager};

    fn cond(var: &str, op: SyntaxOp, value: &str) -> BoolExpr {
        match ItemTreeBuilder::at_line(3)
            .create_condition(var, op, value)
            .kind
        {
            ItemKind::Bool(b) => b,
            _ => unreachable!(),
        }
    }

    fn compile(var: &str, op: SyntaxOp, value: &str) -> Result<CompareTriplet, CompileError> {
        let catalog = CriteriaCatalog::new();
        let config = EngineConfig::new("/fs");
        compile_condition(cond(var, op, value), &CompileContext::new(&catalog, &config))
    }

    #[test]
    fn size_with_suffix() {
        let t = compile("size", SyntaxOp::Gt, "10MB").unwrap();
        assert_eq!(t.criterion, Criterion::Size);
        assert_eq!(t.op, Comparator::Gt);
        assert_eq!(t.value.as_size(), Some(10 << 20));
        assert_eq!(t.attribute, AttrMask::SIZE);
    }

    #[test]
    fn unknown_criterion() {
        let err = compile("colour", SyntaxOp::Eq, "red").unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownCriterion {
                line: 3,
                name: "colour".into()
            }
        );
    }

    #[test]
    fn double_star_allowed_in_xattr_values() {
        let t = compile("xattr.user.tag", SyntaxOp::Eq, "a**x").unwrap();
        assert_eq!(t.criterion, Criterion::Xattr);
        assert_eq!(t.op, Comparator::Like);
        assert!(!t.flags.contains(CompareFlags::ANY_LEVEL));
        assert!(compile("owner", SyntaxOp::Eq, "a**x").is_err());
    }

    #[test]
    fn ordering_rejected_for_categorical() {
        let err = compile("owner", SyntaxOp::Gt, "root").unwrap_err();
        assert!(matches!(err, CompileError::IllegalOperator { line: 3, .. }));
        let err = compile("type", SyntaxOp::Le, "file").unwrap_err();
        assert!(matches!(err, CompileError::IllegalOperator { .. }));
    }

    #[test]
    fn invalid_values_echo_literal() {
        let err = compile("size", SyntaxOp::Gt, "ten").unwrap_err();
        match err {
            CompileError::InvalidValue { literal, criterion, .. } => {
                assert_eq!(literal, "ten");
                assert_eq!(criterion, "size");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(compile("depth", SyntaxOp::Gt, "-1").is_err());
        assert!(compile("last_access", SyntaxOp::Gt, "-1d").is_err());
        assert!(compile("type", SyntaxOp::Eq, "pipe").is_err());
    }

    #[test]
    fn wildcard_promotes_comparator() {
        let t = compile("name", SyntaxOp::Eq, "*.tmp").unwrap();
        assert_eq!(t.op, Comparator::Like);
        let t = compile("name", SyntaxOp::Ne, "core.?").unwrap();
        assert_eq!(t.op, Comparator::Unlike);
        let t = compile("name", SyntaxOp::Eq, "plain").unwrap();
        assert_eq!(t.op, Comparator::Eq);
        assert!(t.value.as_str().unwrap().matcher.is_none());
    }

    #[test]
    fn name_rejects_slash_and_empty() {
        assert!(compile("name", SyntaxOp::Eq, "a/b").is_err());
        assert!(compile("name", SyntaxOp::Eq, "").is_err());
    }

    #[test]
    fn any_depth_only_for_path_criteria() {
        let t = compile("path", SyntaxOp::Eq, "a/**/*.log").unwrap();
        assert!(t.flags.contains(CompareFlags::ANY_LEVEL));
        assert_eq!(t.value.as_str().unwrap().pattern(), "/fs/a/**/*.log");
        assert!(compile("owner", SyntaxOp::Eq, "a/**/*.log").is_err());
        assert!(compile("path", SyntaxOp::Eq, "a/**x").is_err());
        assert!(compile("tree", SyntaxOp::Eq, "a/**x").is_err());
    }

    #[test]
    fn leading_double_star_is_not_prefixed() {
        let t = compile("tree", SyntaxOp::Eq, "**/scratch").unwrap();
        assert_eq!(t.value.as_str().unwrap().pattern(), "**/scratch");
    }

    #[test]
    fn path_trailing_slash_removed() {
        let t = compile("tree", SyntaxOp::Eq, "/fs/home/").unwrap();
        assert_eq!(t.value.as_str().unwrap().literal(), "/fs/home");
        let t = compile("tree", SyntaxOp::Eq, "/").unwrap();
        assert_eq!(t.value.as_str().unwrap().literal(), "/");
    }

    #[test]
    fn status_needs_manager_and_valid_value() {
        let catalog = CriteriaCatalog::new();
        let config = EngineConfig::default();
        let sm = StaticStatusManager::new("lhsm").status("archived");
        let ctx = CompileContext::new(&catalog, &config).with_status(Some(&sm));

        let t = compile_condition(cond("status", SyntaxOp::Eq, "archived"), &ctx).unwrap();
        assert_eq!(t.attr_name.as_deref(), Some("lhsm"));
        assert!(compile_condition(cond("status", SyntaxOp::Eq, ""), &ctx).is_ok());
        assert!(compile_condition(cond("status", SyntaxOp::Eq, "lost"), &ctx).is_err());
        assert!(compile_condition(cond("status", SyntaxOp::Eq, "arch*"), &ctx).is_err());

        let no_sm = CompileContext::new(&catalog, &config);
        assert!(matches!(
            compile_condition(cond("status", SyntaxOp::Eq, "archived"), &no_sm),
            Err(CompileError::UnknownCriterion { .. })
        ));
    }

    #[test]
    fn set_expression_aliases_class_bodies() {
        let catalog = CriteriaCatalog::new();
        let registry = StatusRegistry::new();
        let mut c = PolicyCompiler::new(&catalog, &registry, EngineConfig::default());
        let a = c
            .compile_bool_expr(cond("owner", SyntaxOp::Eq, "alice"), None)
            .unwrap();
        c.define_class("A", a, true, 1).unwrap();
        let b = c
            .compile_bool_expr(cond("size", SyntaxOp::Gt, "1G"), None)
            .unwrap();
        c.define_class("B", b, true, 2).unwrap();

        let builder = ItemTreeBuilder::new();
        let ItemKind::Set(set) = builder
            .create_set_binary(
                crate::types::SetOp::Inter,
                builder.create_set_singleton("a"),
                builder.create_set_singleton("b"),
            )
            .unwrap()
            .kind
        else {
            unreachable!()
        };
        let inter = c.compile_set_expr(set).unwrap();
        let set = c.finish();
        assert_eq!(set.to_display_string(inter), "(owner == \"alice\" AND size > 1GB)");
        // only the intersection node is owned by the new expression
        assert_eq!(set.arena().owned_nodes(inter).len(), 1);
    }

    #[test]
    fn unknown_class_in_set() {
        let catalog = CriteriaCatalog::new();
        let registry = StatusRegistry::new();
        let mut c = PolicyCompiler::new(&catalog, &registry, EngineConfig::default());
        let ItemKind::Set(set) = ItemTreeBuilder::at_line(8).create_set_singleton("nope").kind
        else {
            unreachable!()
        };
        assert_eq!(
            c.compile_set_expr(set).unwrap_err().to_string(),
            "line 8: unknown fileclass 'nope'"
        );
    }

    #[test]
    fn duplicate_class_names_are_case_insensitive() {
        let catalog = CriteriaCatalog::new();
        let registry = StatusRegistry::new();
        let mut c = PolicyCompiler::new(&catalog, &registry, EngineConfig::default());
        let e = c.constant(true, 1).unwrap();
        c.define_class("Logs", e, true, 1).unwrap();
        let e = c.constant(true, 2).unwrap();
        assert!(matches!(
            c.define_class("LOGS", e, true, 2),
            Err(CompileError::DuplicateName { line: 2, .. })
        ));
    }
}
