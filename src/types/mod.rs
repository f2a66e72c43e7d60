mod attrs;
mod config;
mod criteria;
mod error;
mod expr;
mod item;
mod policy;
mod status;
mod value;
mod verdict;

pub use attrs::{AttrKind, AttrMask, AttrSet, AttrValue, AttributeProvider, EntryId, SmValue};
pub use config::EngineConfig;
pub use criteria::{
    CriteriaCatalog, CriteriaDescriptor, CriteriaFlags, Criterion, Lookup, ResolvedCriterion,
};
pub use error::CompileError;
pub use expr::{
    BinaryOp, CompareFlags, CompareTriplet, Comparator, ConstLeaf, Edge, ExprArena, ExprDisplay,
    ExprNode, Expression, NodeId, UnaryOp,
};
pub use item::{
    BoolExpr, BoolNode, BoolOp, GenericItem, ItemKind, ItemList, ItemTreeBuilder, SetExpr,
    SetNode, SetOp, SyntaxOp, resolve_env,
};
pub use policy::{
    ClassId, CompiledPolicySet, DEFAULT_RULE_ID, FileClass, Policy, PolicyRule, TimeModifier,
};
pub use status::{
    AttributeDef, StaticStatusManager, StatusManager, StatusRegistry, XattrError, XattrReader,
};
pub use value::{
    IntLeaf, ObjectType, SizeLeaf, StrValue, TypeLeaf, TypedValue, ValueType, format_duration,
    format_size, parse_duration, parse_integer, parse_size,
};
pub use verdict::Verdict;
