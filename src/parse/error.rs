use std::fmt;

/// Errors produced when parsing policy text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    line: u32,
    column: u32,
    message: String,
}

impl ParseError {
    pub(crate) fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }

    /// 1-based line of the offending input.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 1-based column, in characters.
    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ParseError::new(3, 14, "expected `;`");
        assert_eq!(err.to_string(), "parse error at line 3, column 14: expected `;`");
    }
}
