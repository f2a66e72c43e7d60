use std::fmt;

/// Outcome of evaluating an expression against an entry.
///
/// `MissingAttribute` and `Error` are ordinary values: a caller must never apply a
/// policy action on either of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[must_use]
pub enum Verdict {
    Match,
    NoMatch,
    MissingAttribute,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Match => "match",
            Verdict::NoMatch => "no match",
            Verdict::MissingAttribute => "missing attribute",
            Verdict::Error => "error",
        };
        f.write_str(s)
    }
}

impl From<bool> for Verdict {
    fn from(b: bool) -> Self {
        if b {
            Verdict::Match
        } else {
            Verdict::NoMatch
        }
    }
}

impl Verdict {
    #[must_use]
    pub fn is_match(self) -> bool {
        self == Verdict::Match
    }

    /// True for `Match` and `NoMatch`.
    #[must_use]
    pub fn is_decided(self) -> bool {
        matches!(self, Verdict::Match | Verdict::NoMatch)
    }

    /// Logical negation. Undecided verdicts pass through.
    pub fn negate(self) -> Verdict {
        match self {
            Verdict::Match => Verdict::NoMatch,
            Verdict::NoMatch => Verdict::Match,
            other => other,
        }
    }

    /// Conjunction with a lazily evaluated right-hand side.
    ///
    /// Evaluation is left to right: `rhs` is only called when `self` is `Match`,
    /// and an undecided left operand is the result as is.
    pub fn and_then(self, rhs: impl FnOnce() -> Verdict) -> Verdict {
        match self {
            Verdict::Match => rhs(),
            other => other,
        }
    }

    /// Disjunction with a lazily evaluated right-hand side.
    ///
    /// `rhs` is only called when `self` is `NoMatch`.
    pub fn or_else(self, rhs: impl FnOnce() -> Verdict) -> Verdict {
        match self {
            Verdict::NoMatch => rhs(),
            other => other,
        }
    }

    pub fn and(self, rhs: Verdict) -> Verdict {
        self.and_then(|| rhs)
    }

    pub fn or(self, rhs: Verdict) -> Verdict {
        self.or_else(|| rhs)
    }
}
