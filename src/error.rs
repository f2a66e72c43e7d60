use thiserror::Error;

use crate::parse::ParseError;
use crate::CompileError;

/// Unified error type covering parsing, compilation, and I/O.
///
/// Returned by convenience loaders like
/// [`PolicyEngine::from_text()`](crate::PolicyEngine::from_text)
/// and [`PolicyEngine::from_file()`](crate::PolicyEngine::from_file).
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_transparent() {
        let err: PolicyError = CompileError::UnknownFileClass {
            line: 4,
            name: "tmp".into(),
        }
        .into();
        assert_eq!(err.to_string(), "line 4: unknown fileclass 'tmp'");

        let err: PolicyError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PolicyError::Io(_)));
    }
}
