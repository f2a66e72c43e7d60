//! Per-entry policy decisions: class membership, rule selection, whitelists, scope
//! and the partial-attribute pre-filter.

use tracing::{debug, error, trace, warn};

use crate::evaluate::{evaluate, EvalContext};
use crate::types::{
    AttrSet, AttributeProvider, ClassId, CompiledPolicySet, Edge, EntryId, FileClass, Policy,
    PolicyRule, Verdict,
};

const TARGET: &str = "fspolicy::policy";

/// A policy of a [`CompiledPolicySet`], ready to be matched against entries.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRef<'a> {
    set: &'a CompiledPolicySet,
    policy: &'a Policy,
}

/// Rule picked by [`PolicyRef::select_rule`].
#[derive(Debug, Clone, Copy)]
pub struct SelectedRule<'a> {
    pub rule: &'a PolicyRule,
    /// Target class that selected the rule; `None` for the default rule.
    pub fileclass: Option<&'a FileClass>,
}

/// Outcome of [`CompiledPolicySet::match_classes`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassMembership {
    classes: Vec<String>,
    decided: bool,
}

impl ClassMembership {
    /// Matching class names, in declaration order.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Whether at least one class could be decided (or no class is declared).
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.decided
    }

    /// Value of the membership attribute: comma-separated names, or `None` when
    /// classification was inconclusive.
    #[must_use]
    pub fn to_attribute(&self) -> Option<String> {
        self.decided.then(|| self.classes.join(","))
    }

    /// Store the membership attribute into `attrs` (cleared when inconclusive).
    pub fn apply_to(&self, attrs: &mut AttrSet) {
        attrs.set_fileclass(self.to_attribute());
    }
}

impl CompiledPolicySet {
    /// Case-insensitive policy lookup.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<PolicyRef<'_>> {
        self.policies
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|policy| PolicyRef { set: self, policy })
    }

    /// Evaluate the body of a class.
    #[must_use]
    pub fn class_matches(
        &self,
        class: ClassId,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        evaluate(&self.arena, self.class(class).definition, entry, attrs, ctx)
    }

    /// Evaluate every reportable class against an entry.
    ///
    /// Classes that do not report membership count as decided. The result is
    /// inconclusive only when classes are declared and none could be decided.
    #[must_use]
    pub fn match_classes(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> ClassMembership {
        let class_ctx = ctx.with_status(None).tolerant(true);
        let mut classes = Vec::new();
        let mut decided = 0_usize;

        for class in &self.classes {
            if !class.matchable {
                decided += 1;
                continue;
            }
            match evaluate(&self.arena, class.definition, entry, attrs, &class_ctx) {
                Verdict::Match => {
                    decided += 1;
                    classes.push(class.name.clone());
                }
                Verdict::NoMatch => decided += 1,
                Verdict::MissingAttribute => {
                    if !ctx.is_tolerant() {
                        warn!(target: TARGET, entry = %entry, class = %class.name, "attribute is missing for checking fileclass");
                    }
                }
                Verdict::Error => {
                    error!(target: TARGET, entry = %entry, class = %class.name, "error while checking fileclass");
                }
            }
        }

        let membership = ClassMembership {
            classes,
            decided: self.classes.is_empty() || decided > 0,
        };
        trace!(target: TARGET, entry = %entry, classes = ?membership.to_attribute(), "classes matched");
        membership
    }
}

impl<'a> PolicyRef<'a> {
    #[must_use]
    pub fn policy(&self) -> &'a Policy {
        self.policy
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.policy.name
    }

    /// `ctx` with the policy's status manager, which takes precedence over the one
    /// `ctx` carries.
    fn scoped<'c>(&'c self, ctx: &EvalContext<'c>) -> EvalContext<'c> {
        let status = self.policy.status_manager().or(ctx.status());
        ctx.with_status(status)
    }

    fn eval(
        &self,
        edge: Edge,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        evaluate(&self.set.arena, edge, entry, attrs, ctx)
    }

    /// Pick the rule that applies to an entry.
    ///
    /// The first rule (in declaration order) with a matching target class wins,
    /// whatever its condition; otherwise the default rule, if any. The condition of
    /// the selected rule is not evaluated here: see [`PolicyRef::evaluate_rule`].
    #[must_use]
    pub fn select_rule(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Option<SelectedRule<'a>> {
        let (set, policy) = (self.set, self.policy);
        let ctx = self.scoped(ctx);
        let mut inconclusive = false;

        for rule in &policy.rules {
            for &target in &rule.targets {
                let class = set.class(target);
                match self.eval(class.definition, entry, attrs, &ctx) {
                    Verdict::Match => {
                        trace!(target: TARGET, entry = %entry, class = %class.name, rule = %rule.id, policy = %self.policy.name, "entry matches target fileclass");
                        return Some(SelectedRule {
                            rule,
                            fileclass: Some(class),
                        });
                    }
                    Verdict::NoMatch => {}
                    Verdict::MissingAttribute => {
                        inconclusive = true;
                        if !ctx.is_tolerant() {
                            warn!(target: TARGET, entry = %entry, class = %class.name, rule = %rule.id, policy = %self.policy.name, "attributes are missing to check if entry matches fileclass");
                        }
                    }
                    Verdict::Error => {
                        inconclusive = true;
                        error!(target: TARGET, entry = %entry, class = %class.name, rule = %rule.id, policy = %self.policy.name, "error while checking if entry matches fileclass");
                    }
                }
            }
        }

        if let Some(rule) = &policy.default_rule {
            return Some(SelectedRule {
                rule,
                fileclass: None,
            });
        }
        if inconclusive {
            debug!(target: TARGET, entry = %entry, policy = %self.policy.name, "no target fileclass matched, some could not be checked");
        } else {
            debug!(target: TARGET, entry = %entry, policy = %self.policy.name, "entry matches no policy case");
        }
        None
    }

    /// Rule targeting the class named `class_name` (the default rule targets no class).
    #[must_use]
    pub fn class_policy_case(&self, class_name: &str) -> Option<&'a PolicyRule> {
        let (set, policy) = (self.set, self.policy);
        let found = policy.rules.iter().find(|rule| {
            rule.targets
                .iter()
                .any(|&c| set.class(c).name.eq_ignore_ascii_case(class_name))
        });
        if found.is_none() {
            warn!(target: TARGET, class = class_name, policy = %self.policy.name, "saved fileclass is no longer used in policy, refresh needed");
        }
        found
    }

    /// Whether `class_name` is listed in the policy's `ignore_fileclass`.
    #[must_use]
    pub fn is_class_ignored(&self, class_name: &str) -> bool {
        self.policy
            .ignore_classes
            .iter()
            .any(|&c| self.set.class(c).name.eq_ignore_ascii_case(class_name))
    }

    /// Evaluate the condition of `rule`.
    #[must_use]
    pub fn evaluate_rule(
        &self,
        rule: &PolicyRule,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        self.eval(rule.condition, entry, attrs, &self.scoped(ctx))
    }

    /// Evaluate the policy scope; a policy without scope applies everywhere.
    #[must_use]
    pub fn evaluate_scope(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        let Some(scope) = self.policy.scope else {
            return Verdict::Match;
        };
        let verdict = self.eval(scope, entry, attrs, &self.scoped(ctx));
        trace!(target: TARGET, entry = %entry, policy = %self.policy.name, %verdict, "scope checked");
        verdict
    }

    /// Whitelist test: ignore rules, then ignored classes.
    ///
    /// `Match` as soon as one of them matches. Otherwise `Error` if any raised an
    /// error, `MissingAttribute` if any was inconclusive, else `NoMatch`.
    #[must_use]
    pub fn is_whitelisted(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        let ctx = self.scoped(ctx);
        let ignored_classes = self
            .policy
            .ignore_classes
            .iter()
            .map(|&c| self.set.class(c).definition);
        let mut result = Verdict::NoMatch;

        for edge in self.policy.ignore.iter().copied().chain(ignored_classes) {
            match self.eval(edge, entry, attrs, &ctx) {
                Verdict::Match => {
                    trace!(target: TARGET, entry = %entry, policy = %self.policy.name, rule = %self.set.to_display_string(edge), "entry is whitelisted");
                    return Verdict::Match;
                }
                Verdict::NoMatch => {}
                Verdict::MissingAttribute => {
                    if !ctx.is_tolerant() {
                        warn!(target: TARGET, entry = %entry, policy = %self.policy.name, rule = %self.set.to_display_string(edge), "attribute is missing for checking whitelist rule");
                    }
                    if result != Verdict::Error {
                        result = Verdict::MissingAttribute;
                    }
                }
                Verdict::Error => {
                    error!(target: TARGET, entry = %entry, policy = %self.policy.name, rule = %self.set.to_display_string(edge), "error while checking whitelist rule");
                    result = Verdict::Error;
                }
            }
        }
        result
    }

    /// Whether an entry could match any rule of the policy, from possibly partial
    /// attributes: scope, then whitelist, then rules. Never `NoMatch` when a full
    /// evaluation could match.
    #[must_use]
    pub fn policy_match_all(
        &self,
        entry: &EntryId,
        attrs: &dyn AttributeProvider,
        ctx: &EvalContext<'_>,
    ) -> Verdict {
        let ctx = self.scoped(ctx).tolerant(true);

        let scope_unknown = match self.evaluate_scope(entry, attrs, &ctx) {
            Verdict::Match => false,
            Verdict::NoMatch => return Verdict::NoMatch,
            Verdict::MissingAttribute => true,
            Verdict::Error => return Verdict::Error,
        };
        let mut inconclusive = match self.is_whitelisted(entry, attrs, &ctx) {
            Verdict::Match => return Verdict::NoMatch,
            Verdict::MissingAttribute => true,
            Verdict::NoMatch => scope_unknown,
            Verdict::Error => return Verdict::Error,
        };
        let settle = |inconclusive: bool| {
            if inconclusive {
                Verdict::MissingAttribute
            } else {
                Verdict::Match
            }
        };

        for rule in &self.policy.rules {
            let mut class_match = false;
            let mut class_missing = false;
            for &target in &rule.targets {
                match self.eval(self.set.class(target).definition, entry, attrs, &ctx) {
                    Verdict::Match => class_match = true,
                    Verdict::NoMatch => {}
                    Verdict::MissingAttribute => class_missing = true,
                    Verdict::Error => return Verdict::Error,
                }
                if class_match || class_missing {
                    break;
                }
            }
            if !class_match && !class_missing {
                continue;
            }

            match self.eval(rule.condition, entry, attrs, &ctx) {
                Verdict::Match => return settle(inconclusive || class_missing),
                Verdict::MissingAttribute => return Verdict::MissingAttribute,
                Verdict::Error => {
                    warn!(target: TARGET, entry = %entry, rule = %rule.id, policy = %self.policy.name, "error checking rule condition");
                    return Verdict::Error;
                }
                Verdict::NoMatch => {}
            }
            // this rule would be selected, and its condition fails
            if class_match {
                return Verdict::NoMatch;
            }
            inconclusive = true;
        }

        let Some(default) = &self.policy.default_rule else {
            return if inconclusive {
                Verdict::MissingAttribute
            } else {
                Verdict::NoMatch
            };
        };
        match self.eval(default.condition, entry, attrs, &ctx) {
            Verdict::Match => settle(inconclusive),
            Verdict::NoMatch if inconclusive => Verdict::MissingAttribute,
            other => other,
        }
    }
}
