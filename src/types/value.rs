use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering as AtomicOrdering};

use globset::GlobMatcher;

/// Value type a criterion expects on the right-hand side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Size,
    Integer,
    Duration,
    Type,
}

impl ValueType {
    /// Numeric types support ordering comparators.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Size | ValueType::Integer | ValueType::Duration)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::String => "string",
            ValueType::Size => "size",
            ValueType::Integer => "integer",
            ValueType::Duration => "duration",
            ValueType::Type => "type",
        };
        f.write_str(s)
    }
}

/// Filesystem object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ObjectType {
    File = 0,
    Directory = 1,
    Symlink = 2,
    CharDevice = 3,
    BlockDevice = 4,
    Fifo = 5,
    Socket = 6,
}

impl ObjectType {
    const ALL: [ObjectType; 7] = [
        ObjectType::File,
        ObjectType::Directory,
        ObjectType::Symlink,
        ObjectType::CharDevice,
        ObjectType::BlockDevice,
        ObjectType::Fifo,
        ObjectType::Socket,
    ];

    /// Parse a type name as written in policy text.
    #[must_use]
    pub fn from_config_name(name: &str) -> Option<ObjectType> {
        let t = match name.to_ascii_lowercase().as_str() {
            "file" => ObjectType::File,
            "dir" | "directory" => ObjectType::Directory,
            "symlink" => ObjectType::Symlink,
            "chr" | "char" => ObjectType::CharDevice,
            "blk" | "block" => ObjectType::BlockDevice,
            "fifo" => ObjectType::Fifo,
            "sock" | "socket" => ObjectType::Socket,
            _ => return None,
        };
        Some(t)
    }

    #[must_use]
    pub fn config_name(self) -> &'static str {
        match self {
            ObjectType::File => "file",
            ObjectType::Directory => "directory",
            ObjectType::Symlink => "symlink",
            ObjectType::CharDevice => "chr",
            ObjectType::BlockDevice => "blk",
            ObjectType::Fifo => "fifo",
            ObjectType::Socket => "sock",
        }
    }

    fn from_u8(raw: u8) -> ObjectType {
        Self::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or(ObjectType::File)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// Unsigned numeric leaf that can be rewritten in place while readers evaluate.
#[derive(Debug, Default)]
pub struct SizeLeaf(AtomicU64);

impl SizeLeaf {
    #[must_use]
    pub fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn set(&self, v: u64) {
        self.0.store(v, AtomicOrdering::Relaxed);
    }
}

/// Signed numeric leaf (integers and durations in seconds).
#[derive(Debug, Default)]
pub struct IntLeaf(AtomicI64);

impl IntLeaf {
    #[must_use]
    pub fn new(v: i64) -> Self {
        Self(AtomicI64::new(v))
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn set(&self, v: i64) {
        self.0.store(v, AtomicOrdering::Relaxed);
    }
}

#[derive(Debug)]
pub struct TypeLeaf(AtomicU8);

impl TypeLeaf {
    #[must_use]
    pub fn new(t: ObjectType) -> Self {
        Self(AtomicU8::new(t as u8))
    }

    #[must_use]
    pub fn get(&self) -> ObjectType {
        ObjectType::from_u8(self.0.load(AtomicOrdering::Relaxed))
    }

    pub(crate) fn set(&self, t: ObjectType) {
        self.0.store(t as u8, AtomicOrdering::Relaxed);
    }
}

/// A string operand. `literal` is what the user wrote (after normalization) and is
/// used for display; `matcher` is the compiled glob when the operator is a pattern match.
#[derive(Debug)]
pub struct StrValue {
    pub(crate) literal: String,
    pub(crate) pattern: String,
    pub(crate) matcher: Option<GlobMatcher>,
}

impl StrValue {
    #[must_use]
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Effective pattern after path prefixing and any-level rewriting.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Typed right-hand side of a comparison.
#[derive(Debug)]
pub enum TypedValue {
    Str(StrValue),
    Size(SizeLeaf),
    Integer(IntLeaf),
    Duration(IntLeaf),
    Type(TypeLeaf),
}

impl TypedValue {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Str(_) => ValueType::String,
            TypedValue::Size(_) => ValueType::Size,
            TypedValue::Integer(_) => ValueType::Integer,
            TypedValue::Duration(_) => ValueType::Duration,
            TypedValue::Type(_) => ValueType::Type,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&StrValue> {
        match self {
            TypedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_size(&self) -> Option<u64> {
        match self {
            TypedValue::Size(v) => Some(v.get()),
            _ => None,
        }
    }

    /// Integer or duration payload.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(v) | TypedValue::Duration(v) => Some(v.get()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_type(&self) -> Option<ObjectType> {
        match self {
            TypedValue::Type(v) => Some(v.get()),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Str(s) => write_quoted(f, &s.literal),
            TypedValue::Size(v) => f.write_str(&format_size(v.get())),
            TypedValue::Integer(v) => write!(f, "{}", v.get()),
            TypedValue::Duration(v) => f.write_str(&format_duration(v.get())),
            TypedValue::Type(v) => write!(f, "{}", v.get()),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

// -- Literal parsing --------------------------------------------------------

const SIZE_UNITS: [(&str, &str, u64); 6] = [
    ("e", "eb", 1 << 60),
    ("p", "pb", 1 << 50),
    ("t", "tb", 1 << 40),
    ("g", "gb", 1 << 30),
    ("m", "mb", 1 << 20),
    ("k", "kb", 1 << 10),
];

const DURATION_UNITS: [(&[&str], i64); 6] = [
    (&["y", "year", "years"], 365 * 86_400),
    (&["w", "week", "weeks"], 7 * 86_400),
    (&["d", "day", "days"], 86_400),
    (&["h", "hour", "hours"], 3_600),
    (&["min", "m", "mins", "minute", "minutes"], 60),
    (&["s", "sec", "secs", "second", "seconds"], 1),
];

fn split_number(literal: &str) -> Option<(&str, &str)> {
    let literal = literal.trim();
    let digits_end = literal
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map_or(literal.len(), |(i, _)| i);
    let (num, suffix) = literal.split_at(digits_end);
    if num.is_empty() || num == "-" || num == "+" {
        return None;
    }
    Some((num, suffix.trim()))
}

/// Parse a size such as `10MB`, `4k` or `512`. Units are powers of 1024.
#[must_use]
pub fn parse_size(literal: &str) -> Option<u64> {
    let (num, suffix) = split_number(literal)?;
    let n: u64 = num.parse().ok()?;
    let suffix = suffix.to_ascii_lowercase();
    let mult = if suffix.is_empty() || suffix == "b" {
        1
    } else {
        SIZE_UNITS
            .iter()
            .find(|(short, long, _)| suffix == *short || suffix == *long)
            .map(|(_, _, m)| *m)?
    };
    n.checked_mul(mult)
}

/// Parse a duration such as `2d`, `30min` or `3600`. A bare number is in seconds.
#[must_use]
pub fn parse_duration(literal: &str) -> Option<i64> {
    let (num, suffix) = split_number(literal)?;
    let n: i64 = num.parse().ok()?;
    if suffix.is_empty() {
        return Some(n);
    }
    let suffix = suffix.to_ascii_lowercase();
    let mult = DURATION_UNITS
        .iter()
        .find(|(names, _)| names.contains(&suffix.as_str()))
        .map(|(_, m)| *m)?;
    n.checked_mul(mult)
}

#[must_use]
pub fn parse_integer(literal: &str) -> Option<i64> {
    literal.trim().parse().ok()
}

/// Render a size with the largest unit that divides it exactly.
#[must_use]
pub fn format_size(v: u64) -> String {
    if v == 0 {
        return "0".to_owned();
    }
    for (_, long, mult) in SIZE_UNITS {
        if v % mult == 0 {
            return format!("{}{}", v / mult, long.to_ascii_uppercase());
        }
    }
    v.to_string()
}

/// Render a duration with the largest unit that divides it exactly.
#[must_use]
pub fn format_duration(v: i64) -> String {
    if v == 0 {
        return "0".to_owned();
    }
    for (names, mult) in DURATION_UNITS {
        if v % mult == 0 {
            return format!("{}{}", v / mult, names[0]);
        }
    }
    format!("{v}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("10MB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("10m"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1kB"), Some(1024));
        assert_eq!(parse_size("2G"), Some(2 << 30));
        assert_eq!(parse_size("3b"), Some(3));
        assert_eq!(parse_size("1EB"), Some(1 << 60));
    }

    #[test]
    fn size_rejects_garbage() {
        assert_eq!(parse_size("MB"), None);
        assert_eq!(parse_size("10XB"), None);
        assert_eq!(parse_size("-1"), None);
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("100EB"), None);
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("2d"), Some(2 * 86_400));
        assert_eq!(parse_duration("30min"), Some(1_800));
        assert_eq!(parse_duration("1h"), Some(3_600));
        assert_eq!(parse_duration("1w"), Some(604_800));
        assert_eq!(parse_duration("1y"), Some(31_536_000));
        assert_eq!(parse_duration("5sec"), Some(5));
        assert_eq!(parse_duration("3days"), Some(3 * 86_400));
        assert_eq!(parse_duration("1fortnight"), None);
    }

    #[test]
    fn negative_duration_parses_for_later_validation() {
        assert_eq!(parse_duration("-1d"), Some(-86_400));
    }

    #[test]
    fn integer_has_no_suffix() {
        assert_eq!(parse_integer("12"), Some(12));
        assert_eq!(parse_integer("12k"), None);
    }

    #[test]
    fn format_picks_exact_unit() {
        assert_eq!(format_size(10 * 1024 * 1024), "10MB");
        assert_eq!(format_size(1536), "1536");
        assert_eq!(format_size(0), "0");
        assert_eq!(format_duration(2 * 86_400), "2d");
        assert_eq!(format_duration(90), "90s");
        assert_eq!(format_duration(120), "2min");
        assert_eq!(format_duration(0), "0");
    }

    #[test]
    fn formatted_values_parse_back() {
        for v in [1_u64, 1024, 3 << 20, 7 << 40, 1_000_000] {
            assert_eq!(parse_size(&format_size(v)), Some(v));
        }
        for v in [1_i64, 60, 3_600, 86_400 * 9, 31_536_000, 61] {
            assert_eq!(parse_duration(&format_duration(v)), Some(v));
        }
    }

    #[test]
    fn object_type_names() {
        assert_eq!(ObjectType::from_config_name("dir"), Some(ObjectType::Directory));
        assert_eq!(ObjectType::from_config_name("Directory"), Some(ObjectType::Directory));
        assert_eq!(ObjectType::from_config_name("sock"), Some(ObjectType::Socket));
        assert_eq!(ObjectType::from_config_name("pipe"), None);
        assert_eq!(ObjectType::Directory.to_string(), "directory");
    }

    #[test]
    fn leaves_store_and_load() {
        let leaf = TypeLeaf::new(ObjectType::Fifo);
        assert_eq!(leaf.get(), ObjectType::Fifo);
        leaf.set(ObjectType::Symlink);
        assert_eq!(leaf.get(), ObjectType::Symlink);

        let size = SizeLeaf::new(4);
        size.set(8);
        assert_eq!(size.get(), 8);
    }

    #[test]
    fn quoted_display_escapes() {
        let v = TypedValue::Str(StrValue {
            literal: r#"a"b\c"#.into(),
            pattern: String::new(),
            matcher: None,
        });
        assert_eq!(v.to_string(), r#""a\"b\\c""#);
    }
}
