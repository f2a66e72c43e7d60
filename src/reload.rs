//! Live update of numeric thresholds from a freshly compiled policy set.
//!
//! Two expressions are structurally equal when they have the same shape, connectives,
//! criteria and comparators; only leaf values may differ. Numeric leaves are atomics,
//! so an update is a series of single-word stores that concurrent evaluations can
//! observe at any point.

use std::fmt;

use tracing::{info, warn};

use crate::types::{
    ClassId, CompareTriplet, CompiledPolicySet, Criterion, Edge, ExprArena, ExprNode, Expression,
    Policy, PolicyRule, TypedValue,
};

const TARGET: &str = "fspolicy::reload";

/// Result of [`diff_structural`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    StructurallyEqual,
    Differs,
}

impl Structure {
    #[must_use]
    pub fn is_equal(self) -> bool {
        self == Structure::StructurallyEqual
    }
}

fn same_condition(a: &CompareTriplet, b: &CompareTriplet) -> bool {
    if a.criterion != b.criterion || a.value.value_type() != b.value.value_type() {
        return false;
    }
    match a.criterion {
        // xattr name and operator changes are reported on update, not rejected
        Criterion::Xattr => true,
        Criterion::SmInfo | Criterion::Status => a.op == b.op && a.attr_name == b.attr_name,
        _ => a.op == b.op && a.flags == b.flags,
    }
}

/// Compare the shapes of two expressions.
///
/// Aliased class bodies are compared too; an aliased edge never matches an owned
/// one.
#[must_use]
pub fn diff_structural(
    old: &ExprArena,
    old_root: Edge,
    new: &ExprArena,
    new_root: Edge,
) -> Structure {
    let mut stack = vec![(old_root, new_root)];
    while let Some((a, b)) = stack.pop() {
        if a.is_owned() != b.is_owned() {
            return Structure::Differs;
        }
        let same = match (old.get(a.node()), new.get(b.node())) {
            (ExprNode::Constant(_), ExprNode::Constant(_)) => true,
            (ExprNode::Condition(x), ExprNode::Condition(y)) => same_condition(x, y),
            (
                ExprNode::Unary { op: op_a, child: ca },
                ExprNode::Unary { op: op_b, child: cb },
            ) => {
                stack.push((*ca, *cb));
                op_a == op_b
            }
            (
                ExprNode::Binary {
                    op: op_a,
                    left: la,
                    right: ra,
                },
                ExprNode::Binary {
                    op: op_b,
                    left: lb,
                    right: rb,
                },
            ) => {
                stack.push((*ra, *rb));
                stack.push((*la, *lb));
                op_a == op_b
            }
            _ => false,
        };
        if !same {
            return Structure::Differs;
        }
    }
    Structure::StructurallyEqual
}

fn update_leaf(target: &CompareTriplet, source: &CompareTriplet) -> bool {
    let before = target.to_string();
    let changed = match (&target.value, &source.value) {
        (TypedValue::Size(t), TypedValue::Size(s)) => {
            let changed = t.get() != s.get();
            t.set(s.get());
            changed
        }
        (TypedValue::Integer(t), TypedValue::Integer(s))
        | (TypedValue::Duration(t), TypedValue::Duration(s)) => {
            let changed = t.get() != s.get();
            t.set(s.get());
            changed
        }
        (TypedValue::Type(t), TypedValue::Type(s)) => {
            let changed = t.get() != s.get();
            t.set(s.get());
            changed
        }
        (TypedValue::Str(t), TypedValue::Str(s)) => {
            if target.criterion == Criterion::Xattr {
                if t.literal() != s.literal()
                    || target.attr_name != source.attr_name
                    || target.op != source.op
                {
                    warn!(target: TARGET, old = %target, new = %source, "xattr condition changed, but it cannot be modified dynamically");
                }
            } else if t.literal() != s.literal() {
                warn!(target: TARGET, old = %target, new = %source, "condition changed on '{}' but this cannot be modified dynamically", target.criterion);
            }
            false
        }
        _ => false,
    };
    if changed {
        info!(target: TARGET, old = %before, new = %target, "criteria value updated");
    }
    changed
}

/// Copy numeric leaf values of `new` into `old`.
///
/// Both expressions must be structurally equal; when they are not, nothing is
/// written and `false` is returned. Aliased class bodies are skipped: they are
/// updated with their class. Returns whether any value changed.
#[must_use]
pub fn apply_numeric_update(
    old: &ExprArena,
    old_root: Edge,
    new: &ExprArena,
    new_root: Edge,
) -> bool {
    if !diff_structural(old, old_root, new, new_root).is_equal() {
        warn!(
            target: TARGET,
            old = %old.display(old_root),
            new = %new.display(new_root),
            "expression structure changed: configuration changed but not applied"
        );
        return false;
    }

    let mut changed = false;
    let mut stack = vec![(old_root, new_root)];
    while let Some((a, b)) = stack.pop() {
        let Edge::Owned(id) = a else { continue };
        match (old.get(id), new.get(b.node())) {
            (ExprNode::Constant(x), ExprNode::Constant(y)) => {
                if x.get() != y.get() {
                    x.set(y.get());
                    changed = true;
                }
            }
            (ExprNode::Condition(x), ExprNode::Condition(y)) => changed |= update_leaf(x, y),
            (ExprNode::Unary { child: ca, .. }, ExprNode::Unary { child: cb, .. }) => {
                stack.push((*ca, *cb));
            }
            (
                ExprNode::Binary {
                    left: la,
                    right: ra,
                    ..
                },
                ExprNode::Binary {
                    left: lb,
                    right: rb,
                    ..
                },
            ) => {
                stack.push((*ra, *rb));
                stack.push((*la, *lb));
            }
            _ => {}
        }
    }
    changed
}

impl Expression {
    #[must_use]
    pub fn diff_structural(&self, new: &Expression) -> Structure {
        diff_structural(&self.arena, self.root, &new.arena, new.root)
    }

    /// See [`apply_numeric_update`].
    #[must_use]
    pub fn apply_numeric_update(&self, new: &Expression) -> bool {
        apply_numeric_update(&self.arena, self.root, &new.arena, new.root)
    }
}

/// What [`CompiledPolicySet::reload_from`] did, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    updated: Vec<String>,
    rejected: Vec<String>,
}

impl ReloadReport {
    /// Items whose values changed.
    #[must_use]
    pub fn updated(&self) -> &[String] {
        &self.updated
    }

    /// Items whose change could not be applied; the live version is kept.
    #[must_use]
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// Nothing was rejected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject(&mut self, item: String, reason: &str) {
        warn!(target: TARGET, item = %item, reason, "configuration changed but not applied");
        self.rejected.push(item);
    }
}

impl fmt::Display for ReloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} updated, {} rejected",
            self.updated.len(),
            self.rejected.len()
        )?;
        for item in &self.rejected {
            write!(f, "\n  rejected: {item}")?;
        }
        Ok(())
    }
}

impl CompiledPolicySet {
    /// Apply the numeric changes of `new` to this live set.
    ///
    /// Classes, scopes, ignore rules and rule conditions are matched by name.
    /// Anything added, removed, retargeted or reshaped is rejected and keeps its
    /// live version.
    #[must_use]
    pub fn reload_from(&self, new: &CompiledPolicySet) -> ReloadReport {
        let mut report = ReloadReport::default();

        if self.config != new.config {
            report.reject("engine configuration".into(), "filesystem root changed");
        }

        for class in &self.classes {
            let item = format!("fileclass {}", class.name);
            let Some(fresh) = new.class_by_name(&class.name) else {
                report.reject(item, "removed");
                continue;
            };
            if class.matchable != fresh.matchable {
                report.reject(item.clone(), "report flag changed");
            }
            self.update_edge(new, class.definition, fresh.definition, item, &mut report);
        }
        for fresh in &new.classes {
            if self.class_by_name(&fresh.name).is_none() {
                report.reject(format!("fileclass {}", fresh.name), "added");
            }
        }

        for policy in &self.policies {
            let Some(fresh) = new
                .policies
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(&policy.name))
            else {
                report.reject(format!("policy {}", policy.name), "removed");
                continue;
            };
            self.reload_policy(new, policy, fresh, &mut report);
        }
        for fresh in &new.policies {
            if !self
                .policies
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&fresh.name))
            {
                report.reject(format!("policy {}", fresh.name), "added");
            }
        }

        info!(target: TARGET, updated = report.updated.len(), rejected = report.rejected.len(), "policies reloaded");
        report
    }

    fn update_edge(
        &self,
        new: &CompiledPolicySet,
        live: Edge,
        fresh: Edge,
        item: String,
        report: &mut ReloadReport,
    ) {
        if !diff_structural(&self.arena, live, &new.arena, fresh).is_equal() {
            report.reject(item, "only numerical values can be modified dynamically");
        } else if apply_numeric_update(&self.arena, live, &new.arena, fresh) {
            info!(target: TARGET, item = %item, now = %self.arena.display(live), "expression updated");
            report.updated.push(item);
        }
    }

    fn class_names(&self, ids: &[ClassId]) -> Vec<String> {
        ids.iter()
            .map(|&c| self.class(c).name.to_ascii_lowercase())
            .collect()
    }

    fn reload_policy(
        &self,
        new: &CompiledPolicySet,
        policy: &Policy,
        fresh: &Policy,
        report: &mut ReloadReport,
    ) {
        let name = &policy.name;

        let live_sm = policy.status_manager().map(|s| s.name().to_owned());
        let fresh_sm = fresh.status_manager().map(|s| s.name().to_owned());
        if live_sm != fresh_sm {
            report.reject(format!("policy {name}: status manager"), "changed");
        }

        match (policy.scope, fresh.scope) {
            (None, None) => {}
            (Some(live), Some(f)) => {
                self.update_edge(new, live, f, format!("policy {name}: scope"), report);
            }
            _ => report.reject(format!("policy {name}: scope"), "added or removed"),
        }

        if self.class_names(&policy.ignore_classes) != new.class_names(&fresh.ignore_classes) {
            report.reject(format!("policy {name}: ignore_fileclass"), "list changed");
        }

        let item = format!("policy {name}: ignore rules");
        if policy.ignore.len() != fresh.ignore.len() {
            report.reject(item, "rule count changed");
        } else if policy
            .ignore
            .iter()
            .zip(&fresh.ignore)
            .any(|(l, f)| !diff_structural(&self.arena, *l, &new.arena, *f).is_equal())
        {
            report.reject(item, "only numerical values can be modified dynamically");
        } else {
            for (i, (l, f)) in policy.ignore.iter().zip(&fresh.ignore).enumerate() {
                if apply_numeric_update(&self.arena, *l, &new.arena, *f) {
                    report.updated.push(format!("policy {name}: ignore rule #{i}"));
                }
            }
        }

        let fresh_rules: Vec<&PolicyRule> =
            fresh.rules.iter().chain(fresh.default_rule.as_ref()).collect();
        let live_rules: Vec<&PolicyRule> =
            policy.rules.iter().chain(policy.default_rule.as_ref()).collect();

        for rule in &live_rules {
            let item = format!("policy {name}: rule {}", rule.id);
            let Some(f) = fresh_rules.iter().find(|r| r.id.eq_ignore_ascii_case(&rule.id)) else {
                report.reject(item, "removed");
                continue;
            };
            if self.class_names(&rule.targets) != new.class_names(&f.targets) {
                report.reject(item, "target fileclasses changed");
                continue;
            }
            self.update_edge(new, rule.condition, f.condition, item, report);
        }
        for f in &fresh_rules {
            if !live_rules.iter().any(|r| r.id.eq_ignore_ascii_case(&f.id)) {
                report.reject(format!("policy {name}: rule {}", f.id), "added");
            }
        }

        let live_order: Vec<&str> = policy.rules.iter().map(|r| r.id.as_str()).collect();
        let fresh_order: Vec<&str> = fresh.rules.iter().map(|r| r.id.as_str()).collect();
        if live_order.len() == fresh_order.len()
            && live_order
                .iter()
                .zip(&fresh_order)
                .any(|(a, b)| !a.eq_ignore_ascii_case(b))
        {
            report.reject(format!("policy {name}: rule order"), "changed");
        }
    }
}
