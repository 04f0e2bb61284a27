//! Ignore-pattern matching
//!
//! Glob-style exclusion for walks and watches. A bare pattern with no `/`
//! (e.g. `node_modules` or `*.log`) matches at any depth, so it is rewritten
//! to `**/<pattern>` before evaluation. Matching is case-sensitive and `*`
//! never crosses a `/` boundary; `**` does.

use glob::{MatchOptions, Pattern};
use tracing::warn;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Returns true if `relative_path` matches any of `patterns`.
///
/// Pure, no I/O. Invalid patterns are skipped with a warning rather than
/// failing the whole check. An empty pattern list never matches.
pub fn matches(relative_path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let path = normalize_path(relative_path);
    patterns.iter().any(|pattern| matches_one(&path, pattern))
}

/// Returns true if `relative_path` or any of its ancestor directories
/// matches the patterns.
///
/// Walk traversal prunes excluded directories before descending, so it only
/// needs [`matches`]; watch events arrive for arbitrary depths and must be
/// suppressed when any enclosing directory is excluded.
pub fn matches_with_ancestors(relative_path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let path = normalize_path(relative_path);
    let mut prefix = String::new();
    for segment in path.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        if matches(&prefix, patterns) {
            return true;
        }
    }
    false
}

fn matches_one(path: &str, pattern: &str) -> bool {
    let rewritten = rewrite_bare_pattern(pattern);

    let compiled = match Pattern::new(&rewritten) {
        Ok(p) => p,
        Err(e) => {
            warn!("Skipping invalid ignore pattern '{}': {}", pattern, e);
            return false;
        }
    };
    if compiled.matches_with(path, MATCH_OPTIONS) {
        return true;
    }

    // A rewritten bare pattern must also hit at the root level; check the
    // original form so `p` matches the path `p` itself.
    if rewritten != pattern {
        if let Ok(original) = Pattern::new(pattern) {
            return original.matches_with(path, MATCH_OPTIONS);
        }
    }
    false
}

/// Bare names (no `/`) match at any depth, not just the root.
fn rewrite_bare_pattern(pattern: &str) -> String {
    if !pattern.contains('/') && !pattern.starts_with("**/") {
        format!("**/{}", pattern)
    } else {
        pattern.to_string()
    }
}

/// Normalize host separators to `/` and strip any leading slash so the
/// path is comparable against root-relative patterns.
fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.trim_start_matches('/').to_string()
}
