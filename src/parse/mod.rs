//! Text front end: turns policy text into a generic item tree.

mod error;
mod grammar;

pub use error::ParseError;

use crate::types::{BoolExpr, GenericItem, SetExpr};
use grammar::Grammar;

/// Parse policy text into its top-level items.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid policy syntax.
pub fn parse_policy_text(input: &str) -> Result<Vec<GenericItem>, ParseError> {
    Grammar::new(input).parse_items()
}

/// Parse a standalone boolean expression such as `size > 1GB and owner == "bob"`.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a boolean expression.
pub fn parse_bool_expr(input: &str) -> Result<BoolExpr, ParseError> {
    Grammar::new(input).parse_bool()
}

/// Parse a standalone set expression over file class names.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a set expression.
pub fn parse_set_expr(input: &str) -> Result<SetExpr, ParseError> {
    Grammar::new(input).parse_set()
}
