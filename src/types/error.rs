use thiserror::Error;

/// Errors raised while turning a generic item tree into compiled expressions and
/// policies. Every variant carries the source line of the offending item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: unknown or unsupported criteria '{name}'")]
    UnknownCriterion { line: u32, name: String },

    #[error("line {line}: illegal comparator '{op}' for criteria '{criterion}': == or != expected")]
    IllegalOperator {
        line: u32,
        criterion: String,
        op: String,
    },

    #[error("line {line}: invalid value \"{literal}\" for criteria '{criterion}': {reason}")]
    InvalidValue {
        line: u32,
        criterion: String,
        literal: String,
        reason: String,
    },

    #[error("line {line}: unknown fileclass '{name}'")]
    UnknownFileClass { line: u32, name: String },

    #[error("line {line}: {message}")]
    StructureMismatch { line: u32, message: String },

    #[error("line {line}: out of memory while compiling expression")]
    OutOfMemory { line: u32 },

    #[error("line {line}: unexpected {found} in {context}")]
    UnexpectedItem {
        line: u32,
        found: String,
        context: String,
    },

    #[error("line {line}: duplicate {kind} '{name}'")]
    DuplicateName {
        line: u32,
        kind: &'static str,
        name: String,
    },

    #[error("line {line}: missing '{item}' in {context}")]
    MissingItem {
        line: u32,
        item: String,
        context: String,
    },

    #[error("line {line}: invalid value \"{value}\" for '{name}': {reason}")]
    InvalidSetting {
        line: u32,
        name: String,
        value: String,
        reason: String,
    },

    #[error("line {line}: fileclass '{class}' is both ignored and targeted in policy '{policy}'")]
    ConflictingClass {
        line: u32,
        class: String,
        policy: String,
    },
}

impl CompileError {
    /// Source line the error refers to.
    #[must_use]
    pub fn line(&self) -> u32 {
        match self {
            CompileError::UnknownCriterion { line, .. }
            | CompileError::IllegalOperator { line, .. }
            | CompileError::InvalidValue { line, .. }
            | CompileError::UnknownFileClass { line, .. }
            | CompileError::StructureMismatch { line, .. }
            | CompileError::OutOfMemory { line }
            | CompileError::UnexpectedItem { line, .. }
            | CompileError::DuplicateName { line, .. }
            | CompileError::MissingItem { line, .. }
            | CompileError::InvalidSetting { line, .. }
            | CompileError::ConflictingClass { line, .. } => *line,
        }
    }
}
