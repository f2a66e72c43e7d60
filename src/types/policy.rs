use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::attrs::AttrMask;
use super::config::EngineConfig;
use super::expr::{Edge, ExprArena};
use super::status::StatusManager;

/// Id of the fallback rule of a policy.
pub const DEFAULT_RULE_ID: &str = "default";

/// Rescaling of duration thresholds applied by a policy run.
///
/// A threshold `t` becomes `max(t * factor, floor)`, except that thresholds already at
/// or below `floor` are left untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeModifier {
    pub factor: f64,
    /// Seconds.
    pub floor: i64,
}

impl TimeModifier {
    #[must_use]
    pub fn new(factor: f64, floor: i64) -> Self {
        Self { factor, floor }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn apply(&self, threshold: i64) -> i64 {
        if threshold <= self.floor {
            return threshold;
        }
        let scaled = (threshold as f64 * self.factor) as i64;
        scaled.max(self.floor)
    }
}

/// Index of a class in [`CompiledPolicySet::classes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) usize);

/// Named, reusable boolean expression.
#[derive(Debug)]
pub struct FileClass {
    pub(crate) name: String,
    pub(crate) definition: Edge,
    pub(crate) attributes: AttrMask,
    pub(crate) matchable: bool,
    pub(crate) line: u32,
}

impl FileClass {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn definition(&self) -> Edge {
        self.definition
    }

    /// Attributes needed to evaluate the definition.
    #[must_use]
    pub fn attributes(&self) -> AttrMask {
        self.attributes
    }

    /// Whether the class takes part in class membership (`report = yes`).
    #[must_use]
    pub fn is_matchable(&self) -> bool {
        self.matchable
    }

    /// Line of the `FileClass` block.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }
}

/// One case of a policy: target classes plus a condition.
#[derive(Debug)]
pub struct PolicyRule {
    pub(crate) id: String,
    pub(crate) targets: Vec<ClassId>,
    pub(crate) condition: Edge,
    pub(crate) attributes: AttrMask,
    pub(crate) line: u32,
}

impl PolicyRule {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn targets(&self) -> &[ClassId] {
        &self.targets
    }

    #[must_use]
    pub fn condition(&self) -> Edge {
        self.condition
    }

    /// Attributes needed by the condition.
    #[must_use]
    pub fn attributes(&self) -> AttrMask {
        self.attributes
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.id.eq_ignore_ascii_case(DEFAULT_RULE_ID)
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }
}

/// A named policy: scope, whitelist and ordered rules.
#[derive(Debug)]
pub struct Policy {
    pub(crate) name: String,
    pub(crate) status: Option<Arc<dyn StatusManager>>,
    pub(crate) scope: Option<Edge>,
    pub(crate) ignore: Vec<Edge>,
    pub(crate) ignore_classes: Vec<ClassId>,
    pub(crate) rules: Vec<PolicyRule>,
    pub(crate) default_rule: Option<PolicyRule>,
}

impl Policy {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordinary rules in declaration order; the default rule is not included.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    #[must_use]
    pub fn default_rule(&self) -> Option<&PolicyRule> {
        self.default_rule.as_ref()
    }

    #[must_use]
    pub fn status_manager(&self) -> Option<&dyn StatusManager> {
        self.status.as_deref()
    }

    #[must_use]
    pub fn scope(&self) -> Option<Edge> {
        self.scope
    }

    #[must_use]
    pub fn ignore_rules(&self) -> &[Edge] {
        &self.ignore
    }

    #[must_use]
    pub fn ignore_classes(&self) -> &[ClassId] {
        &self.ignore_classes
    }
}

/// Result of compiling a policy file: one arena shared by every class, whitelist,
/// scope and rule condition. Read-only once built, apart from numeric leaves updated
/// by reload.
#[derive(Debug, Default)]
pub struct CompiledPolicySet {
    pub(crate) arena: ExprArena,
    pub(crate) classes: Vec<FileClass>,
    pub(crate) class_index: HashMap<String, ClassId>,
    pub(crate) policies: Vec<Policy>,
    pub(crate) config: EngineConfig,
}

impl CompiledPolicySet {
    #[must_use]
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    #[must_use]
    pub fn classes(&self) -> &[FileClass] {
        &self.classes
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> &FileClass {
        &self.classes[id.0]
    }

    /// Case-insensitive class lookup.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&FileClass> {
        self.class_index
            .get(&name.to_ascii_lowercase())
            .map(|id| self.class(*id))
    }

    #[must_use]
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(&name.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render the expression at `edge` in canonical form.
    #[must_use]
    pub fn to_display_string(&self, edge: Edge) -> String {
        self.arena.display(edge).to_string()
    }
}

impl fmt::Display for CompiledPolicySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in &self.classes {
            writeln!(f, "FileClass {}: {}", class.name, self.arena.display(class.definition))?;
        }
        for policy in &self.policies {
            if let Some(scope) = policy.scope {
                writeln!(f, "{} scope: {}", policy.name, self.arena.display(scope))?;
            }
            for edge in &policy.ignore {
                writeln!(f, "{} ignore: {}", policy.name, self.arena.display(*edge))?;
            }
            for rule in policy.rules.iter().chain(policy.default_rule.as_ref()) {
                let targets: Vec<&str> = rule
                    .targets
                    .iter()
                    .map(|c| self.class(*c).name.as_str())
                    .collect();
                writeln!(
                    f,
                    "{} rule {} [{}]: {}",
                    policy.name,
                    rule.id,
                    targets.join(","),
                    self.arena.display(rule.condition)
                )?;
            }
        }
        Ok(())
    }
}
