//! Wildcard and regex inclusion/exclusion predicates over archive paths.

use crate::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::fmt;

/// A compiled path pattern.
///
/// Wildcard patterns are anchored at both ends and matched
/// case-insensitively against forward-slash normalized paths. A `*` that is
/// not preceded by a `.` expands to "any run of characters"; everything else
/// is passed through to the regex engine untouched, so `.*` keeps its regex
/// meaning.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    kind: PatternKind,
    compiled: Option<Regex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Wildcard,
    Regex,
}

impl PathPattern {
    /// Compile a wildcard pattern. A pattern that does not compile never
    /// matches anything.
    pub fn wildcard(pattern: &str) -> Self {
        let expression = format!("^{}$", expand_wildcards(&normalize_separators(pattern)));
        let compiled = RegexBuilder::new(&expression)
            .case_insensitive(true)
            .build()
            .map_err(|e| log::warn!("ignoring uncompilable pattern {}: {}", pattern, e))
            .ok();

        Self {
            source: pattern.to_string(),
            kind: PatternKind::Wildcard,
            compiled,
        }
    }

    /// Compile a regular expression used as-is (unanchored), matched
    /// case-insensitively.
    pub fn regex(pattern: &str) -> Result<Self> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: pattern.to_string(),
            kind: PatternKind::Regex,
            compiled: Some(compiled),
        })
    }

    /// The pattern text as supplied.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether this pattern was supplied as a regular expression.
    pub fn is_regex(&self) -> bool {
        self.kind == PatternKind::Regex
    }

    /// Test a candidate path. Separators are normalized before matching.
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.compiled {
            Some(regex) => regex.is_match(&normalize_separators(candidate)),
            None => false,
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPattern")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .finish()
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        Self::wildcard(pattern)
    }
}

impl From<String> for PathPattern {
    fn from(pattern: String) -> Self {
        Self::wildcard(&pattern)
    }
}

/// Test `candidate` against a single pattern.
pub fn matches(pattern: &PathPattern, candidate: &str) -> bool {
    pattern.matches(candidate)
}

/// Test `candidate` against every pattern, returning `true` on the first hit.
pub fn matches_any(patterns: &[PathPattern], candidate: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(candidate))
}

/// Replace Windows separators with `/`.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn expand_wildcards(pattern: &str) -> String {
    let mut expanded = String::with_capacity(pattern.len() + 8);
    let mut previous = None;
    for ch in pattern.chars() {
        if ch == '*' && previous != Some('.') {
            expanded.push_str(".*");
        } else {
            expanded.push(ch);
        }
        previous = Some(ch);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_expands_star() {
        let pattern = PathPattern::wildcard("logs/*");
        assert!(pattern.matches("logs/today.txt"));
        assert!(pattern.matches("logs/nested/deep.txt"));
        assert!(!pattern.matches("other/logs/today.txt"));
    }

    #[test]
    fn test_leading_star_expands() {
        let pattern = PathPattern::wildcard("*.tmp");
        assert!(pattern.matches("a.tmp"));
        assert!(pattern.matches("dir/b.TMP"));
        assert!(!pattern.matches("a.tmp.bak"));
    }

    #[test]
    fn test_dot_star_keeps_regex_meaning() {
        let pattern = PathPattern::wildcard("cache.*");
        assert!(pattern.matches("cache.db"));
        assert!(pattern.matches("cacheXdb"));
        assert!(!pattern.matches("my-cache.db"));
    }

    #[test]
    fn test_matching_is_case_insensitive_and_anchored() {
        let pattern = PathPattern::wildcard("Config.ini");
        assert!(pattern.matches("config.INI"));
        assert!(!pattern.matches("sub/config.ini"));
    }

    #[test]
    fn test_separators_are_normalized() {
        let pattern = PathPattern::wildcard("data\\*.bin");
        assert!(pattern.matches("data/blob.bin"));
        assert!(pattern.matches("data\\blob.bin"));
    }

    #[test]
    fn test_regex_pattern_is_unanchored() {
        let pattern = PathPattern::regex(r"\.git/").unwrap();
        assert!(pattern.is_regex());
        assert!(pattern.matches("repo/.GIT/config"));
        assert!(!pattern.matches("repo/git/config"));
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let err = PathPattern::regex("(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_uncompilable_wildcard_never_matches() {
        let pattern = PathPattern::wildcard("broken(");
        assert!(!pattern.matches("broken("));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec![PathPattern::from("*.log"), PathPattern::from("tmp/*")];
        assert!(matches_any(&patterns, "tmp/x"));
        assert!(matches_any(&patterns, "server.log"));
        assert!(!matches_any(&patterns, "src/main.rs"));
        assert!(!matches_any(&[], "anything"));
    }
}
