#![allow(dead_code)]

use fspolicy::{AttrSet, ObjectType, Verdict};
use proptest::prelude::*;

// --- Fixed attribute schema ---
// size        : u64, 0..2GB
// depth       : 0..20
// owner       : one of {"root", "alice", "bob"}
// type        : file, dir or symlink
// last_access : 1..=100 days ago

pub const NOW: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;

const OWNERS: &[&str] = &["root", "alice", "bob"];
const TYPES: &[(&str, ObjectType)] = &[
    ("file", ObjectType::File),
    ("dir", ObjectType::Directory),
    ("symlink", ObjectType::Symlink),
];
const SIZES: &[(&str, u64)] = &[("0", 0), ("1KB", 1 << 10), ("1MB", 1 << 20), ("1GB", 1 << 30)];
const OPS: &[&str] = &["==", "!=", ">", ">=", "<", "<="];

fn holds<T: Ord>(lhs: T, op: &str, rhs: T) -> bool {
    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        _ => lhs <= rhs,
    }
}

/// Attribute values of one entry; `None` fields are not available.
#[derive(Debug, Clone, PartialEq)]
pub struct GenAttrs {
    pub size: Option<u64>,
    pub depth: Option<u32>,
    pub owner: Option<&'static str>,
    pub object_type: Option<ObjectType>,
    pub age_days: Option<i64>,
}

impl GenAttrs {
    #[must_use]
    pub fn to_attr_set(&self) -> AttrSet {
        let mut attrs = AttrSet::new();
        if let Some(v) = self.size {
            attrs = attrs.with_size(v);
        }
        if let Some(v) = self.depth {
            attrs = attrs.with_depth(v);
        }
        if let Some(v) = self.owner {
            attrs = attrs.with_owner(v);
        }
        if let Some(v) = self.object_type {
            attrs = attrs.with_type(v);
        }
        if let Some(v) = self.age_days {
            attrs = attrs.with_last_access(NOW - v * DAY);
        }
        attrs
    }

    /// Copy with the fields selected by `drop` removed.
    #[must_use]
    pub fn without(&self, drop: [bool; 5]) -> GenAttrs {
        GenAttrs {
            size: self.size.filter(|_| !drop[0]),
            depth: self.depth.filter(|_| !drop[1]),
            owner: self.owner.filter(|_| !drop[2]),
            object_type: self.object_type.filter(|_| !drop[3]),
            age_days: self.age_days.filter(|_| !drop[4]),
        }
    }
}

/// Generate a complete entry.
pub fn arb_full_attrs() -> impl Strategy<Value = GenAttrs> {
    (
        prop_oneof![Just(0_u64), Just(1 << 10), Just(1 << 20), 0_u64..(2 << 30)],
        0_u32..20,
        prop::sample::select(OWNERS),
        prop::sample::select(TYPES),
        1_i64..=100,
    )
        .prop_map(|(size, depth, owner, (_, t), age)| GenAttrs {
            size: Some(size),
            depth: Some(depth),
            owner: Some(owner),
            object_type: Some(t),
            age_days: Some(age),
        })
}

/// Generate an entry where any attribute may be missing.
pub fn arb_partial_attrs() -> impl Strategy<Value = GenAttrs> {
    (arb_full_attrs(), any::<[bool; 5]>()).prop_map(|(full, drop)| full.without(drop))
}

/// Leaf condition over the schema.
#[derive(Debug, Clone)]
pub enum GenLeaf {
    Size(&'static str, usize),
    Depth(&'static str, u32),
    Owner(bool, &'static str),
    Type(bool, usize),
    LastAccess(&'static str, i64),
    Const(bool),
}

impl GenLeaf {
    fn to_text(&self) -> String {
        let eq = |b: bool| if b { "==" } else { "!=" };
        match self {
            GenLeaf::Size(op, i) => format!("size {op} {}", SIZES[*i].0),
            GenLeaf::Depth(op, v) => format!("depth {op} {v}"),
            GenLeaf::Owner(is_eq, o) => format!("owner {} {o}", eq(*is_eq)),
            GenLeaf::Type(is_eq, i) => format!("type {} {}", eq(*is_eq), TYPES[*i].0),
            GenLeaf::LastAccess(op, d) => format!("last_access {op} {d}d"),
            GenLeaf::Const(b) => b.to_string(),
        }
    }

    fn model(&self, a: &GenAttrs) -> Verdict {
        let hit = match self {
            GenLeaf::Size(op, i) => a.size.map(|v| holds(v, op, SIZES[*i].1)),
            GenLeaf::Depth(op, t) => a.depth.map(|v| holds(v, op, *t)),
            GenLeaf::Owner(is_eq, o) => a.owner.map(|v| (v == *o) == *is_eq),
            GenLeaf::Type(is_eq, i) => a.object_type.map(|v| (v == TYPES[*i].1) == *is_eq),
            GenLeaf::LastAccess(op, d) => a.age_days.map(|v| holds(v * DAY, op, d * DAY)),
            GenLeaf::Const(b) => Some(*b),
        };
        match hit {
            None => Verdict::MissingAttribute,
            Some(true) => Verdict::Match,
            Some(false) => Verdict::NoMatch,
        }
    }
}

/// Boolean expression tree with a reference three-valued evaluator.
#[derive(Debug, Clone)]
pub enum GenExpr {
    Leaf(GenLeaf),
    Not(Box<GenExpr>),
    And(Box<GenExpr>, Box<GenExpr>),
    Or(Box<GenExpr>, Box<GenExpr>),
}

impl GenExpr {
    /// Policy text for the expression, fully parenthesized.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            GenExpr::Leaf(l) => l.to_text(),
            GenExpr::Not(e) => format!("not ({})", e.to_text()),
            GenExpr::And(a, b) => format!("({}) and ({})", a.to_text(), b.to_text()),
            GenExpr::Or(a, b) => format!("({}) or ({})", a.to_text(), b.to_text()),
        }
    }

    /// Left-to-right evaluation: the right operand is only looked at when the left
    /// one does not settle the result, and an undecided left operand is final.
    #[must_use]
    pub fn model(&self, a: &GenAttrs) -> Verdict {
        match self {
            GenExpr::Leaf(l) => l.model(a),
            GenExpr::Not(e) => match e.model(a) {
                Verdict::Match => Verdict::NoMatch,
                Verdict::NoMatch => Verdict::Match,
                other => other,
            },
            GenExpr::And(x, y) => match x.model(a) {
                Verdict::Match => y.model(a),
                other => other,
            },
            GenExpr::Or(x, y) => match x.model(a) {
                Verdict::NoMatch => y.model(a),
                other => other,
            },
        }
    }
}

fn arb_leaf() -> impl Strategy<Value = GenLeaf> {
    let op = || prop::sample::select(OPS);
    prop_oneof![
        (op(), 0..SIZES.len()).prop_map(|(o, i)| GenLeaf::Size(o, i)),
        (op(), 0_u32..20).prop_map(|(o, v)| GenLeaf::Depth(o, v)),
        (any::<bool>(), prop::sample::select(OWNERS)).prop_map(|(e, o)| GenLeaf::Owner(e, o)),
        (any::<bool>(), 0..TYPES.len()).prop_map(|(e, i)| GenLeaf::Type(e, i)),
        (op(), 1_i64..=100).prop_map(|(o, d)| GenLeaf::LastAccess(o, d)),
        any::<bool>().prop_map(GenLeaf::Const),
    ]
}

/// Generate an expression tree of bounded depth.
pub fn arb_expr(max_depth: u32) -> impl Strategy<Value = GenExpr> {
    arb_leaf()
        .prop_map(GenExpr::Leaf)
        .prop_recursive(max_depth, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| GenExpr::And(Box::new(a), Box::new(b))),
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| GenExpr::Or(Box::new(a), Box::new(b))),
                inner.prop_map(|e| GenExpr::Not(Box::new(e))),
            ]
        })
}

/// A generated policy: an optional scope, two classes, one ignore rule, one rule per
/// class and an optional default rule.
#[derive(Debug, Clone)]
pub struct GenPolicy {
    pub scope: Option<GenExpr>,
    pub classes: [GenExpr; 2],
    pub ignore: GenExpr,
    pub conditions: [GenExpr; 2],
    pub default: Option<GenExpr>,
}

impl GenPolicy {
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (i, c) in self.classes.iter().enumerate() {
            text.push_str(&format!("FileClass c{i} {{ definition {{ {} }} }}\n", c.to_text()));
        }
        match &self.scope {
            Some(scope) => text.push_str(&format!(
                "define_policy p {{ scope {{ {} }} }}\n",
                scope.to_text()
            )),
            None => text.push_str("define_policy p { }\n"),
        }
        text.push_str("p_rules {\n");
        text.push_str(&format!("  ignore {{ {} }}\n", self.ignore.to_text()));
        for (i, c) in self.conditions.iter().enumerate() {
            text.push_str(&format!(
                "  rule r{i} {{ target_fileclass = c{i}; condition {{ {} }} }}\n",
                c.to_text()
            ));
        }
        if let Some(d) = &self.default {
            text.push_str(&format!("  rule default {{ condition {{ {} }} }}\n", d.to_text()));
        }
        text.push_str("}\n");
        text
    }
}

pub fn arb_policy() -> impl Strategy<Value = GenPolicy> {
    (
        arb_expr(2),
        arb_expr(2),
        arb_expr(2),
        arb_expr(2),
        arb_expr(2),
        prop::option::of(arb_expr(2)),
        prop::option::of(arb_expr(1)),
    )
        .prop_map(|(c0, c1, ignore, r0, r1, default, scope)| GenPolicy {
            scope,
            classes: [c0, c1],
            ignore,
            conditions: [r0, r1],
            default,
        })
}
