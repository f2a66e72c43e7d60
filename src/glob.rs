//! Shell-style pattern helpers on top of `globset`.

use globset::{GlobBuilder, GlobMatcher};

pub(crate) fn has_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Compile `pattern`. With `literal_separator`, `*` and `?` do not match `/`.
pub(crate) fn compile(
    pattern: &str,
    literal_separator: bool,
    case_insensitive: bool,
) -> Result<GlobMatcher, globset::Error> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(literal_separator)
        .case_insensitive(case_insensitive)
        .backslash_escape(true)
        .build()?;
    Ok(glob.compile_matcher())
}

/// Match `path` or any of its leading directories.
pub(crate) fn matches_leading_dir(matcher: &GlobMatcher, path: &str) -> bool {
    matcher.is_match(path)
        || path
            .match_indices('/')
            .any(|(i, _)| i > 0 && matcher.is_match(&path[..i]))
}

/// Directory part of `path`, `"/"` for top-level entries and `"."` for bare names.
pub(crate) fn parent_dir(path: &str) -> &str {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(i) => &trimmed[..i],
        None => ".",
    }
}

/// Validate `**` placement. Returns whether the pattern spans directory levels.
///
/// `**` must sit between separators or string boundaries. The pattern is then matched
/// with `/` as a literal separator, so `*` and `?` stay within one path component
/// while `**` matches zero or more whole components.
pub(crate) fn check_any_level(pattern: &str) -> Result<bool, &'static str> {
    let bytes = pattern.as_bytes();
    let mut any_level = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'*') {
            if bytes.get(i + 2) == Some(&b'*') {
                return Err("more than two consecutive stars");
            }
            let before_ok = i == 0 || bytes[i - 1] == b'/';
            let after_ok = i + 2 == bytes.len() || bytes[i + 2] == b'/';
            if !before_ok || !after_ok {
                return Err("'**' must be surrounded by '/' or string boundaries");
            }
            any_level = true;
            i += 2;
        } else {
            i += 1;
        }
    }
    Ok(any_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wildcards() {
        assert!(has_wildcards("*.tmp"));
        assert!(has_wildcards("file?"));
        assert!(has_wildcards("[ab]"));
        assert!(!has_wildcards("/plain/path"));
    }

    #[test]
    fn separator_is_literal_when_requested() {
        let m = compile("/fs/*/x", true, false).unwrap();
        assert!(m.is_match("/fs/a/x"));
        assert!(!m.is_match("/fs/a/b/x"));
        let m = compile("/fs/*/x", false, false).unwrap();
        assert!(m.is_match("/fs/a/b/x"));
    }

    #[test]
    fn case_insensitive_matcher() {
        let m = compile("*.TMP", true, true).unwrap();
        assert!(m.is_match("a.tmp"));
    }

    #[test]
    fn leading_dir_matches_prefixes() {
        let m = compile("/fs/home", true, false).unwrap();
        assert!(matches_leading_dir(&m, "/fs/home"));
        assert!(matches_leading_dir(&m, "/fs/home/user/dir"));
        assert!(!matches_leading_dir(&m, "/fs/homework"));
    }

    #[test]
    fn parent_dirs() {
        assert_eq!(parent_dir("/fs/a/b"), "/fs/a");
        assert_eq!(parent_dir("/top"), "/");
        assert_eq!(parent_dir("bare"), ".");
        assert_eq!(parent_dir("/fs/a/"), "/fs");
    }

    #[test]
    fn any_level_detection() {
        assert_eq!(check_any_level("a/b"), Ok(false));
        assert_eq!(check_any_level("a/**/*.log"), Ok(true));
        assert_eq!(check_any_level("**/tmp"), Ok(true));
        assert_eq!(check_any_level("/fs/**"), Ok(true));
    }

    #[test]
    fn any_level_rejects_bad_neighbours() {
        assert!(check_any_level("a/**x").is_err());
        assert!(check_any_level("a**/x").is_err());
        assert!(check_any_level("a/***/x").is_err());
    }

    #[test]
    fn double_star_spans_levels_single_star_does_not() {
        let m = compile("/fs/**/*.log", true, false).unwrap();
        assert!(m.is_match("/fs/a/b/c.log"));
        assert!(m.is_match("/fs/c.log"));
        assert!(!m.is_match("/fs/a/c.txt"));
        let m = compile("/fs/*.log", true, false).unwrap();
        assert!(!m.is_match("/fs/a/c.log"));
    }
}
