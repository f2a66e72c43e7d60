//! Walk of a policy file's item tree: file classes, policy declarations and rule
//! sections, in that order.

use tracing::{debug, info, warn};

use crate::compile::PolicyCompiler;
use crate::types::{
    ClassId, CompileError, CompiledPolicySet, CriteriaCatalog, DEFAULT_RULE_ID, EngineConfig,
    GenericItem, ItemKind, Policy, PolicyRule, StatusRegistry,
};

const TARGET: &str = "fspolicy::policy";

const FILECLASS_BLOCK: &str = "FileClass";
const FILESETS_BLOCKS: [&str; 2] = ["Filesets", "FileClasses"];
const DEFINE_POLICY_BLOCK: &str = "define_policy";
const RULES_SUFFIXES: [&str; 2] = ["_rules", "_policies"];

fn is(name: &str, expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected)
}

/// Parse a yes/no setting.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "enabled" | "1" => Some(true),
        "no" | "false" | "off" | "disabled" | "0" => Some(false),
        _ => None,
    }
}

/// Compile a full policy file.
///
/// File classes are compiled first so rules may reference classes declared after
/// them. Blocks unrelated to policies are skipped.
///
/// # Errors
///
/// The first [`CompileError`] met, with the line of the offending item.
pub fn compile_policy_text(
    items: Vec<GenericItem>,
    catalog: &CriteriaCatalog,
    registry: &StatusRegistry,
    config: EngineConfig,
) -> Result<CompiledPolicySet, CompileError> {
    let mut compiler = PolicyCompiler::new(catalog, registry, config);
    let mut deferred = Vec::new();

    for item in items {
        let line = item.line;
        match item.kind {
            ItemKind::Block { name, id, children } if is(&name, FILECLASS_BLOCK) => {
                load_class(&mut compiler, id, children, line)?;
            }
            ItemKind::Block { name, children, .. }
                if FILESETS_BLOCKS.iter().any(|b| is(&name, b)) =>
            {
                for child in children {
                    let child_line = child.line;
                    match child.kind {
                        ItemKind::Block { name, id, children } if is(&name, FILECLASS_BLOCK) => {
                            load_class(&mut compiler, id, children, child_line)?;
                        }
                        other => {
                            return Err(CompileError::UnexpectedItem {
                                line: child_line,
                                found: other.describe(),
                                context: format!("block '{name}'"),
                            });
                        }
                    }
                }
            }
            ItemKind::Block { name, id, children } if is(&name, DEFINE_POLICY_BLOCK) => {
                declare_policy(&mut compiler, id, children, line)?;
            }
            ItemKind::Block { name, children, .. } => deferred.push((name, children, line)),
            other => debug!(target: TARGET, line, item = %other.describe(), "ignoring top-level item"),
        }
    }

    let mut loaded = vec![false; compiler.set.policies.len()];
    for (name, children, line) in deferred {
        let lower = name.to_ascii_lowercase();
        let Some(policy_name) = RULES_SUFFIXES.iter().find_map(|s| lower.strip_suffix(s)) else {
            debug!(target: TARGET, line, block = %name, "ignoring block");
            continue;
        };
        let Some(idx) = compiler
            .set
            .policies
            .iter()
            .position(|p| is(&p.name, policy_name))
        else {
            return Err(CompileError::UnexpectedItem {
                line,
                found: format!("block '{name}'"),
                context: format!("configuration: no policy '{policy_name}' declared"),
            });
        };
        if loaded[idx] {
            return Err(CompileError::DuplicateName {
                line,
                kind: "rules block",
                name,
            });
        }
        loaded[idx] = true;
        load_rules(&mut compiler, idx, children, line)?;
    }

    let set = compiler.finish();
    info!(
        target: TARGET,
        classes = set.classes().len(),
        policies = set.policies().len(),
        nodes = set.arena().len(),
        "policies compiled"
    );
    Ok(set)
}

/// Take the only child of `block`, which must be an expression.
fn single_child(
    children: Vec<GenericItem>,
    block: &str,
    line: u32,
) -> Result<GenericItem, CompileError> {
    let mut iter = children.into_iter();
    let Some(first) = iter.next() else {
        return Err(CompileError::MissingItem {
            line,
            item: "expression".into(),
            context: format!("block '{block}'"),
        });
    };
    if let Some(extra) = iter.next() {
        return Err(CompileError::UnexpectedItem {
            line: extra.line,
            found: extra.kind.describe(),
            context: format!("block '{block}': a single expression is expected"),
        });
    }
    Ok(first)
}

fn load_class(
    compiler: &mut PolicyCompiler<'_>,
    id: Option<String>,
    children: Vec<GenericItem>,
    line: u32,
) -> Result<ClassId, CompileError> {
    let Some(name) = id else {
        return Err(CompileError::MissingItem {
            line,
            item: "fileclass name".into(),
            context: format!("block '{FILECLASS_BLOCK}'"),
        });
    };
    if compiler.class_id(&name).is_some() {
        return Err(CompileError::DuplicateName {
            line,
            kind: "fileclass",
            name,
        });
    }

    let mut definition = None;
    let mut matchable = true;
    for child in children {
        let child_line = child.line;
        match child.kind {
            ItemKind::Block {
                name: block,
                children,
                ..
            } if is(&block, "definition") => {
                if definition.is_some() {
                    return Err(CompileError::DuplicateName {
                        line: child_line,
                        kind: "definition for fileclass",
                        name,
                    });
                }
                let body = single_child(children, &block, child_line)?;
                let edge = match body.kind {
                    ItemKind::Bool(expr) => compiler.compile_bool_expr(expr, None)?,
                    ItemKind::Set(set) => compiler.compile_set_expr(set)?,
                    other => {
                        return Err(CompileError::UnexpectedItem {
                            line: body.line,
                            found: other.describe(),
                            context: format!("definition of fileclass '{name}'"),
                        });
                    }
                };
                definition = Some(edge);
            }
            ItemKind::Assignment {
                name: param, value, ..
            } if is(&param, "report") || is(&param, "match") => {
                matchable = parse_bool(&value).ok_or_else(|| CompileError::InvalidSetting {
                    line: child_line,
                    name: param,
                    value,
                    reason: "boolean expected (yes/no)".into(),
                })?;
            }
            ItemKind::Assignment { name: param, .. } => {
                if !param.to_ascii_lowercase().ends_with("_hints") {
                    warn!(target: TARGET, line = child_line, class = %name, parameter = %param, "unknown parameter in fileclass");
                }
            }
            other => {
                return Err(CompileError::UnexpectedItem {
                    line: child_line,
                    found: other.describe(),
                    context: format!("fileclass '{name}'"),
                });
            }
        }
    }

    let Some(definition) = definition else {
        return Err(CompileError::MissingItem {
            line,
            item: "definition".into(),
            context: format!("fileclass '{name}'"),
        });
    };
    let id = compiler.define_class(&name, definition, matchable, line)?;
    debug!(target: TARGET, line, class = %name, "fileclass defined");
    Ok(id)
}

fn declare_policy(
    compiler: &mut PolicyCompiler<'_>,
    id: Option<String>,
    children: Vec<GenericItem>,
    line: u32,
) -> Result<(), CompileError> {
    let mut name = id;
    let mut status = None;
    let mut scope_expr = None;

    for child in children {
        let child_line = child.line;
        match child.kind {
            ItemKind::Assignment {
                name: param, value, ..
            } if is(&param, "name") => name = Some(value),
            ItemKind::Assignment {
                name: param, value, ..
            } if is(&param, "status_manager") => {
                if is(&value, "none") {
                    status = None;
                } else {
                    status = Some(compiler.registry.get(&value).ok_or_else(|| {
                        CompileError::InvalidSetting {
                            line: child_line,
                            name: param,
                            value,
                            reason: "no such status manager".into(),
                        }
                    })?);
                }
            }
            ItemKind::Assignment { name: param, .. } => {
                debug!(target: TARGET, line = child_line, parameter = %param, "policy parameter ignored");
            }
            ItemKind::Block {
                name: block,
                children,
                ..
            } if is(&block, "scope") => {
                if scope_expr.is_some() {
                    return Err(CompileError::DuplicateName {
                        line: child_line,
                        kind: "block",
                        name: block,
                    });
                }
                scope_expr = Some(single_child(children, &block, child_line)?);
            }
            other => {
                return Err(CompileError::UnexpectedItem {
                    line: child_line,
                    found: other.describe(),
                    context: format!("block '{DEFINE_POLICY_BLOCK}'"),
                });
            }
        }
    }

    let Some(name) = name else {
        return Err(CompileError::MissingItem {
            line,
            item: "name".into(),
            context: format!("block '{DEFINE_POLICY_BLOCK}'"),
        });
    };
    if compiler.set.policies.iter().any(|p| is(&p.name, &name)) {
        return Err(CompileError::DuplicateName {
            line,
            kind: "policy",
            name,
        });
    }

    let scope = match scope_expr {
        None => None,
        Some(item) => match item.kind {
            ItemKind::Bool(expr) => Some(compiler.compile_bool_expr(expr, status.as_deref())?),
            other => {
                return Err(CompileError::UnexpectedItem {
                    line: item.line,
                    found: other.describe(),
                    context: format!("scope of policy '{name}'"),
                });
            }
        },
    };

    debug!(target: TARGET, line, policy = %name, status_manager = ?status.as_ref().map(|s| s.name().to_owned()), "policy declared");
    compiler.set.policies.push(Policy {
        name,
        status,
        scope,
        ignore: Vec::new(),
        ignore_classes: Vec::new(),
        rules: Vec::new(),
        default_rule: None,
    });
    Ok(())
}

fn load_rules(
    compiler: &mut PolicyCompiler<'_>,
    idx: usize,
    children: Vec<GenericItem>,
    line: u32,
) -> Result<(), CompileError> {
    let status = compiler.set.policies[idx].status.clone();
    let policy_name = compiler.set.policies[idx].name.clone();

    for child in children {
        let child_line = child.line;
        match child.kind {
            ItemKind::Block {
                name: block,
                children,
                ..
            } if is(&block, "ignore") => {
                let body = single_child(children, &block, child_line)?;
                let expr = match body.kind {
                    ItemKind::Bool(expr) => expr,
                    other => {
                        return Err(CompileError::UnexpectedItem {
                            line: body.line,
                            found: other.describe(),
                            context: format!("ignore block of policy '{policy_name}'"),
                        });
                    }
                };
                let edge = compiler.compile_bool_expr(expr, status.as_deref())?;
                compiler.set.policies[idx].ignore.push(edge);
            }
            ItemKind::Assignment {
                name: param, value, ..
            } if is(&param, "ignore_fileclass") => {
                let class = compiler
                    .class_id(&value)
                    .ok_or_else(|| CompileError::UnknownFileClass {
                        line: child_line,
                        name: value.clone(),
                    })?;
                let policy = &mut compiler.set.policies[idx];
                if policy.rules.iter().any(|r| r.targets.contains(&class)) {
                    return Err(CompileError::ConflictingClass {
                        line: child_line,
                        class: value,
                        policy: policy_name,
                    });
                }
                if !policy.ignore_classes.contains(&class) {
                    policy.ignore_classes.push(class);
                }
            }
            ItemKind::Block {
                name: block,
                id,
                children,
            } if is(&block, "rule") || is(&block, "policy") => {
                load_rule(compiler, idx, id, children, child_line)?;
            }
            other => {
                return Err(CompileError::UnexpectedItem {
                    line: child_line,
                    found: other.describe(),
                    context: format!("rules of policy '{policy_name}'"),
                });
            }
        }
    }

    let policy = &compiler.set.policies[idx];
    if policy.rules.is_empty() && policy.default_rule.is_none() {
        warn!(target: TARGET, line, policy = %policy_name, "no rule defined for policy");
    }
    Ok(())
}

fn load_rule(
    compiler: &mut PolicyCompiler<'_>,
    idx: usize,
    id: Option<String>,
    children: Vec<GenericItem>,
    line: u32,
) -> Result<(), CompileError> {
    let policy_name = compiler.set.policies[idx].name.clone();
    let status = compiler.set.policies[idx].status.clone();
    let Some(id) = id else {
        return Err(CompileError::MissingItem {
            line,
            item: "rule id".into(),
            context: format!("rules of policy '{policy_name}'"),
        });
    };

    let is_default = is(&id, DEFAULT_RULE_ID);
    {
        let policy = &compiler.set.policies[idx];
        let taken = policy
            .rules
            .iter()
            .chain(policy.default_rule.as_ref())
            .any(|r| is(&r.id, &id));
        if taken {
            return Err(CompileError::DuplicateName {
                line,
                kind: "rule",
                name: id,
            });
        }
    }

    let mut targets = Vec::new();
    let mut condition = None;
    for child in children {
        let child_line = child.line;
        match child.kind {
            ItemKind::Assignment {
                name: param, value, ..
            } if is(&param, "target_fileclass") => {
                if is_default {
                    return Err(CompileError::InvalidSetting {
                        line: child_line,
                        name: param,
                        value,
                        reason: "no target_fileclass expected for the default rule".into(),
                    });
                }
                let class = compiler
                    .class_id(&value)
                    .ok_or_else(|| CompileError::UnknownFileClass {
                        line: child_line,
                        name: value.clone(),
                    })?;
                let policy = &compiler.set.policies[idx];
                if targets.contains(&class)
                    || policy.rules.iter().any(|r| r.targets.contains(&class))
                {
                    return Err(CompileError::DuplicateName {
                        line: child_line,
                        kind: "target fileclass",
                        name: value,
                    });
                }
                if policy.ignore_classes.contains(&class) {
                    return Err(CompileError::ConflictingClass {
                        line: child_line,
                        class: value,
                        policy: policy_name,
                    });
                }
                targets.push(class);
            }
            ItemKind::Block {
                name: block,
                children,
                ..
            } if is(&block, "condition") => {
                if condition.is_some() {
                    return Err(CompileError::DuplicateName {
                        line: child_line,
                        kind: "condition for rule",
                        name: id,
                    });
                }
                let body = single_child(children, &block, child_line)?;
                let expr = match body.kind {
                    ItemKind::Bool(expr) => expr,
                    other => {
                        return Err(CompileError::UnexpectedItem {
                            line: body.line,
                            found: other.describe(),
                            context: format!("condition of rule '{id}'"),
                        });
                    }
                };
                condition = Some(compiler.compile_bool_expr(expr, status.as_deref())?);
            }
            other => {
                debug!(target: TARGET, line = child_line, rule = %id, item = %other.describe(), "rule parameter ignored");
            }
        }
    }

    if !is_default && targets.is_empty() {
        warn!(target: TARGET, line, policy = %policy_name, rule = %id, "rule has no target fileclass and will never be selected");
    }

    let condition = match condition {
        Some(c) => c,
        None => {
            warn!(target: TARGET, line, policy = %policy_name, rule = %id, "no condition in rule: it matches every entry");
            compiler.constant(true, line)?
        }
    };

    let rule = PolicyRule {
        attributes: compiler.set.arena.required_attrs(condition),
        id,
        targets,
        condition,
        line,
    };
    let policy = &mut compiler.set.policies[idx];
    if is_default {
        policy.default_rule = Some(rule);
    } else {
        policy.rules.push(rule);
    }
    Ok(())
}
