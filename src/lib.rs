//! Compiler and three-valued matcher for filesystem policy rules.
//!
//! Policy text is parsed into a generic item tree, compiled into typed expressions
//! sharing one arena, and evaluated against entry attributes with `Match`,
//! `NoMatch`, `MissingAttribute` or `Error` as the outcome.

mod compile;
mod engine;
mod error;
mod evaluate;
mod glob;
mod loader;
mod matching;
mod parse;
mod reload;
mod types;

pub use compile::{compile_bool_expr, compile_condition, CompileContext, PolicyCompiler};
pub use engine::PolicyEngine;
pub use error::PolicyError;
pub use evaluate::{evaluate, EvalContext};
pub use loader::compile_policy_text;
pub use matching::{ClassMembership, PolicyRef, SelectedRule};
pub use parse::{parse_bool_expr, parse_policy_text, parse_set_expr, ParseError};
pub use reload::{apply_numeric_update, diff_structural, ReloadReport, Structure};
pub use types::{
    format_duration, format_size, parse_duration, parse_integer, parse_size, resolve_env,
    AttrKind, AttrMask, AttrSet, AttrValue, AttributeDef, AttributeProvider, BinaryOp, BoolExpr,
    BoolNode, BoolOp, ClassId, CompareFlags, CompareTriplet, Comparator, CompileError,
    CompiledPolicySet, ConstLeaf, CriteriaCatalog, CriteriaDescriptor, CriteriaFlags, Criterion,
    Edge, EngineConfig, EntryId, ExprArena, ExprDisplay, ExprNode, Expression, FileClass,
    GenericItem, IntLeaf, ItemKind, ItemList, ItemTreeBuilder, Lookup, NodeId, ObjectType, Policy,
    PolicyRule, ResolvedCriterion, SetExpr, SetNode, SetOp, SizeLeaf, SmValue,
    StaticStatusManager, StatusManager, StatusRegistry, StrValue, SyntaxOp, TimeModifier,
    TypeLeaf, TypedValue, UnaryOp, ValueType, Verdict, XattrError, XattrReader, DEFAULT_RULE_ID,
};
