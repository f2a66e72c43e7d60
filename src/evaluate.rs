use std::fmt;

use tracing::{error, trace, warn};

use crate::glob;
use crate::types::{
    AttrKind, AttrValue, AttributeProvider, BinaryOp, CompareTriplet, Comparator, Criterion, Edge,
    EntryId, ExprArena, ExprNode, Expression, ObjectType, StatusManager, StrValue, TimeModifier,
    TypedValue, UnaryOp, Verdict, XattrReader,
};

const TARGET: &str = "fspolicy::eval";

/// Per-call evaluation settings.
///
/// `tolerant` silences missing-attribute warnings; it is used by pre-filters that
/// run on partial attribute sets on purpose.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    now: i64,
    time_modifier: Option<TimeModifier>,
    status: Option<&'a dyn StatusManager>,
    xattr: Option<&'a dyn XattrReader>,
    tolerant: bool,
}

impl fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("now", &self.now)
            .field("time_modifier", &self.time_modifier)
            .field("status", &self.status.map(|s| s.name()))
            .field("xattr", &self.xattr.is_some())
            .field("tolerant", &self.tolerant)
            .finish()
    }
}

impl Default for EvalContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> EvalContext<'a> {
    /// Context evaluated against the current wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::at(chrono::Utc::now().timestamp())
    }

    /// Context with a fixed reference time (seconds since the epoch).
    #[must_use]
    pub fn at(now: i64) -> Self {
        Self {
            now,
            time_modifier: None,
            status: None,
            xattr: None,
            tolerant: false,
        }
    }

    #[must_use]
    pub fn with_time_modifier(mut self, modifier: Option<TimeModifier>) -> Self {
        self.time_modifier = modifier;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<&'a dyn StatusManager>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_xattr_reader(mut self, reader: &'a dyn XattrReader) -> Self {
        self.xattr = Some(reader);
        self
    }

    #[must_use]
    pub fn tolerant(mut self, tolerant: bool) -> Self {
        self.tolerant = tolerant;
        self
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.now
    }

    #[must_use]
    pub fn is_tolerant(&self) -> bool {
        self.tolerant
    }

    #[must_use]
    pub fn status(&self) -> Option<&'a dyn StatusManager> {
        self.status
    }
}

/// Evaluate the expression at `root` against an entry.
///
/// `Borrowed` edges are followed like owned ones: aliased class bodies are part of the
/// expression for evaluation purposes.
#[must_use]
pub fn evaluate(
    arena: &ExprArena,
    root: Edge,
    entry: &EntryId,
    attrs: &dyn AttributeProvider,
    ctx: &EvalContext<'_>,
) -> Verdict {
    match arena.get(root.node()) {
        ExprNode::Constant(c) => Verdict::from(c.get()),
        ExprNode::Condition(t) => {
            let verdict = eval_condition(t, entry, attrs, ctx);
            trace!(target: TARGET, entry = %entry, condition = %t, %verdict, "condition evaluated");
            verdict
        }
        ExprNode::Unary {
            op: UnaryOp::Not,
            child,
        } => evaluate(arena, *child, entry, attrs, ctx).negate(),
        ExprNode::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => evaluate(arena, *left, entry, attrs, ctx)
            .and_then(|| evaluate(arena, *right, entry, attrs, ctx)),
        ExprNode::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => evaluate(arena, *left, entry, attrs, ctx)
            .or_else(|| evaluate(arena, *right, entry, attrs, ctx)),
    }
}

impl Expression {
    /// Evaluate this expression against an entry.
    #[must_use]
    pub fn evaluate(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        evaluate(&self.arena, self.root, entry, attrs, ctx)
    }
}

fn attr_kind(t: &CompareTriplet) -> AttrKind<'_> {
    let named = t.attr_name.as_deref().unwrap_or_default();
    match t.criterion {
        Criterion::Tree | Criterion::Path | Criterion::Xattr => AttrKind::FullPath,
        Criterion::Name | Criterion::IName => AttrKind::Name,
        Criterion::Type => AttrKind::Type,
        Criterion::Owner => AttrKind::Owner,
        Criterion::Group => AttrKind::Group,
        Criterion::Size => AttrKind::Size,
        Criterion::Depth => AttrKind::Depth,
        Criterion::DirCount => AttrKind::DirCount,
        Criterion::LastAccess => AttrKind::LastAccess,
        Criterion::LastMod => AttrKind::LastMod,
        Criterion::LastMdChange => AttrKind::LastMdChange,
        Criterion::Creation => AttrKind::Creation,
        Criterion::RmTime => AttrKind::RmTime,
        Criterion::Pool => AttrKind::Pool,
        Criterion::OstIndex => AttrKind::OstIndices,
        Criterion::FileClass => AttrKind::FileClass,
        Criterion::Status => AttrKind::Status(named),
        Criterion::SmInfo => AttrKind::SmInfo(named),
    }
}

/// Object types a criterion applies to; other types never match it.
fn applies_to(criterion: Criterion) -> Option<&'static [ObjectType]> {
    match criterion {
        Criterion::Pool => Some(&[ObjectType::File, ObjectType::Directory]),
        Criterion::OstIndex => Some(&[ObjectType::File]),
        Criterion::DirCount => Some(&[ObjectType::Directory]),
        _ => None,
    }
}

fn missing(entry: &EntryId, what: &dyn fmt::Display, ctx: &EvalContext<'_>) -> Verdict {
    if !ctx.tolerant {
        warn!(target: TARGET, entry = %entry, attribute = %what, "missing attribute for evaluating condition");
    }
    Verdict::MissingAttribute
}

fn eval_condition(
    t: &CompareTriplet,
    entry: &EntryId,
    attrs: &dyn AttributeProvider,
    ctx: &EvalContext<'_>,
) -> Verdict {
    match t.criterion {
        Criterion::Xattr => return eval_xattr(t, entry, attrs, ctx),
        Criterion::Status => return eval_status(t, entry, attrs, ctx),
        Criterion::RmTime | Criterion::SmInfo if ctx.status.is_none() => {
            error!(target: TARGET, entry = %entry, condition = %t, "status manager required to evaluate condition");
            return Verdict::Error;
        }
        _ => {}
    }

    if let Some(types) = applies_to(t.criterion) {
        if let Some(AttrValue::Type(ty)) = attrs.get_attr(AttrKind::Type) {
            if !types.contains(&ty) {
                return Verdict::NoMatch;
            }
        }
    }

    let kind = attr_kind(t);
    let Some(value) = attrs.get_attr(kind) else {
        return missing(entry, &kind, ctx);
    };

    match (&t.value, value) {
        (TypedValue::Str(s), AttrValue::Str(v)) => {
            let hit = match t.criterion {
                Criterion::Tree => tree_hit(s, v),
                Criterion::FileClass => v
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .any(|c| str_hit(s, c, true)),
                Criterion::IName => str_hit(s, v, true),
                _ => str_hit(s, v, false),
            };
            Verdict::from(hit == t.op.is_positive())
        }
        (TypedValue::Size(leaf), AttrValue::Uint(v)) => {
            Verdict::from(t.op.holds(v.cmp(&leaf.get())))
        }
        (TypedValue::Integer(leaf), AttrValue::Int(v)) => {
            Verdict::from(t.op.holds(v.cmp(&leaf.get())))
        }
        (TypedValue::Integer(leaf), AttrValue::Indices(indices)) => {
            let hit = indices.iter().any(|i| i64::from(*i) == leaf.get());
            Verdict::from(hit == t.op.is_positive())
        }
        (TypedValue::Duration(leaf), AttrValue::Time(at)) => compare_age(t.op, leaf.get(), at, ctx),
        (TypedValue::Type(leaf), AttrValue::Type(ty)) => {
            Verdict::from((ty == leaf.get()) == t.op.is_positive())
        }
        (expected, got) => {
            error!(target: TARGET, entry = %entry, condition = %t, expected = %expected.value_type(), got = ?got, "attribute type does not match condition");
            Verdict::Error
        }
    }
}

fn str_hit(s: &StrValue, v: &str, case_insensitive: bool) -> bool {
    match &s.matcher {
        Some(m) => m.is_match(v),
        None if case_insensitive => s.literal.eq_ignore_ascii_case(v),
        None => s.literal == v,
    }
}

/// `tree` holds for entries below the pattern (leading-directory match on the parent)
/// and for the pattern itself.
fn tree_hit(s: &StrValue, path: &str) -> bool {
    match &s.matcher {
        Some(m) => glob::matches_leading_dir(m, glob::parent_dir(path)) || m.is_match(path),
        None => s.literal == path,
    }
}

/// Compare the age of a timestamp against a duration threshold.
///
/// A zero timestamp means the attribute was never set: `== 0` and `!= 0` test for that
/// and any other comparison fails.
fn compare_age(op: Comparator, threshold: i64, at: i64, ctx: &EvalContext<'_>) -> Verdict {
    if threshold == 0 && matches!(op, Comparator::Eq | Comparator::Ne) {
        return Verdict::from((at == 0) == (op == Comparator::Eq));
    }
    if at == 0 {
        return Verdict::NoMatch;
    }
    let threshold = ctx
        .time_modifier
        .map_or(threshold, |m| m.apply(threshold));
    let age = ctx.now.saturating_sub(at);
    Verdict::from(op.holds(age.cmp(&threshold)))
}

fn eval_status(
    t: &CompareTriplet,
    entry: &EntryId,
    attrs: &dyn AttributeProvider,
    ctx: &EvalContext<'_>,
) -> Verdict {
    let manager = t.attr_name.as_deref().unwrap_or_default();
    let from_manager = || {
        ctx.status
            .filter(|sm| sm.name().eq_ignore_ascii_case(manager))
            .and_then(|sm| sm.current_status(entry))
    };
    let current = match attrs.get_attr(AttrKind::Status(manager)) {
        Some(AttrValue::Str(s)) => s,
        Some(other) => {
            error!(target: TARGET, entry = %entry, value = ?other, "status attribute is not a string");
            return Verdict::Error;
        }
        None => from_manager().unwrap_or_default(),
    };
    let literal = t.value.as_str().map_or("", StrValue::literal);
    Verdict::from((current == literal) == t.op.is_positive())
}

fn eval_xattr(
    t: &CompareTriplet,
    entry: &EntryId,
    attrs: &dyn AttributeProvider,
    ctx: &EvalContext<'_>,
) -> Verdict {
    let name = t.attr_name.as_deref().unwrap_or_default();
    let Some(reader) = ctx.xattr else {
        return missing(entry, &format_args!("xattr.{name}"), ctx);
    };
    let key = match attrs.get_attr(AttrKind::FullPath) {
        Some(AttrValue::Str(path)) => path,
        _ => entry.as_str(),
    };
    let value = match reader.get_xattr(key, name) {
        Ok(v) => v,
        Err(e) if e.is_absent() => String::new(),
        Err(e) => {
            error!(target: TARGET, entry = %entry, attribute = name, error = %e, "failed to read extended attribute");
            return Verdict::Error;
        }
    };
    let Some(s) = t.value.as_str() else {
        return Verdict::Error;
    };
    Verdict::from(str_hit(s, &value, false) == t.op.is_positive())
}
