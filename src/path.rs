//! Path resolver: pure path arithmetic shared by every component.
//!
//! A normalized path is absolute, `/`-delimited, has no empty, `.` or `..`
//! segments and no trailing slash (except the root `/`). Segments are drawn
//! from `a-z 0-9 . - _`.
//!
//! ```rust
//! use trueno_labdb::path;
//!
//! assert_eq!(path::normalize("../b//c/.", "/x/a").unwrap(), "/x/b/c");
//! assert_eq!(path::split("/x/b/c"), Some(("/x/b", "c")));
//! assert!(path::is_ancestor("/x", "/x/b/c"));
//! ```

use crate::{Error, Result};

/// The root path.
pub const ROOT: &str = "/";

/// Trailing segment addressing every direct child of a directory.
pub const WILDCARD: &str = "*";

/// A resolved `rm`/`mv` operand: either one node or all children of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// A single normalized path
    Exact(String),
    /// Every direct child of the given normalized directory path
    Children(String),
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
}

/// Check that a single name is usable as a path segment.
///
/// # Errors
///
/// Returns `InvalidPath` for empty names, `.`/`..`, wildcards and characters
/// outside `a-z 0-9 . - _`.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_path(segment, "path segments cannot be empty"));
    }
    if segment == "." || segment == ".." {
        return Err(Error::invalid_path(segment, "'.' and '..' are not node names"));
    }
    if segment.contains('*') {
        return Err(Error::invalid_path(
            segment,
            "Wildcard * is only allowed as the final segment of a pattern",
        ));
    }
    if !segment.chars().all(is_allowed_char) {
        return Err(Error::invalid_path(
            segment,
            "path contains invalid characters (allowed: a-z 0-9 . - _)",
        ));
    }
    Ok(())
}

fn resolve_segments<'a>(raw: &'a str, cwd: &'a str) -> Result<Vec<&'a str>> {
    let mut stack: Vec<&str> = Vec::new();
    if !raw.starts_with('/') {
        if !cwd.starts_with('/') {
            return Err(Error::invalid_path(cwd, "working directory must be absolute"));
        }
        for segment in cwd.split('/').filter(|s| !s.is_empty()) {
            validate_segment(segment)?;
            stack.push(segment);
        }
    }
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(Error::invalid_path(raw, "path escapes the root directory"));
                }
            }
            name => stack.push(name),
        }
    }
    Ok(stack)
}

fn join_segments(segments: &[&str]) -> String {
    if segments.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Normalize `raw`, resolving relative paths against `cwd`.
///
/// # Errors
///
/// Returns `InvalidPath` if the path climbs above root, contains a wildcard
/// or contains characters outside the allowed set.
pub fn normalize(raw: &str, cwd: &str) -> Result<String> {
    let segments = resolve_segments(raw, cwd)?;
    for segment in &segments {
        validate_segment(segment).map_err(|e| match e {
            Error::InvalidPath { reason, .. } => Error::invalid_path(raw, reason),
            other => other,
        })?;
    }
    Ok(join_segments(&segments))
}

/// Normalize an absolute path (shorthand for `normalize(raw, "/")`).
///
/// # Errors
///
/// Same as [`normalize`].
pub fn normalize_absolute(raw: &str) -> Result<String> {
    normalize(raw, ROOT)
}

/// Resolve an `rm`/`mv` operand, accepting a trailing `*` segment.
///
/// # Errors
///
/// Returns `InvalidPath` for malformed paths or a wildcard that is not the
/// whole final segment.
pub fn parse_pattern(raw: &str, cwd: &str) -> Result<PathPattern> {
    let trimmed = raw.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((head, WILDCARD)) => {
            let head = if head.is_empty() && raw.starts_with('/') { ROOT } else { head };
            Ok(PathPattern::Children(normalize(head, cwd)?))
        }
        None if trimmed == WILDCARD => Ok(PathPattern::Children(normalize(".", cwd)?)),
        _ => Ok(PathPattern::Exact(normalize(raw, cwd)?)),
    }
}

/// Split a normalized path into `(parent, name)`. Returns `None` for root.
#[must_use]
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path == ROOT {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Parent of a normalized path, `None` for root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    split(path).map(|(parent, _)| parent)
}

/// Final segment of a normalized path (empty for root).
#[must_use]
pub fn name(path: &str) -> &str {
    split(path).map_or("", |(_, name)| name)
}

/// Append a validated segment to a normalized directory path.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// True if `a` is a strict ancestor of `b`.
#[must_use]
pub fn is_ancestor(a: &str, b: &str) -> bool {
    if a == b {
        return false;
    }
    if a == ROOT {
        return true;
    }
    b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'/'
}

/// True if `path` is `prefix` itself or lies beneath it.
#[must_use]
pub fn is_within(prefix: &str, path: &str) -> bool {
    prefix == path || is_ancestor(prefix, path)
}

/// True if `child` is exactly one segment below `dir`.
#[must_use]
pub fn is_direct_child(dir: &str, child: &str) -> bool {
    parent(child) == Some(dir)
}

/// Literal prefix substitution: `old` at the start of `path` becomes `new`.
///
/// `path` must be within `old`.
#[must_use]
pub fn replace_prefix(path: &str, old: &str, new: &str) -> String {
    if path == old {
        return new.to_string();
    }
    let rest = if old == ROOT { path } else { &path[old.len()..] };
    if new == ROOT {
        rest.to_string()
    } else {
        format!("{new}{rest}")
    }
}

/// Every strict ancestor of `path` other than root, ordered root-to-leaf.
#[must_use]
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        out.push(p);
        current = parent(p);
    }
    out.reverse();
    out
}

/// Number of segments below root.
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Upper bound on the paths one range pattern may expand to.
pub const MAX_RANGE_EXPANSION: usize = 10_000;

/// Expand `$(a-b)` range patterns, e.g. `/r/exp_$(1-3)` into three paths.
///
/// Ranges multiply, so `/r/$(1-2)/$(1-3)` yields six paths. From the first
/// range that does not parse as `int-int`, the rest of the pattern is kept
/// verbatim.
///
/// # Errors
///
/// Returns `InvalidInput` if the pattern would expand to more than
/// [`MAX_RANGE_EXPANSION`] paths.
pub fn expand_ranges(pattern: &str) -> Result<Vec<String>> {
    let mut expanded = vec![String::new()];
    let mut rest = pattern;
    while let Some((head, lo, hi, tail)) = next_range(rest) {
        let count = u128::try_from(i128::from(hi) - i128::from(lo) + 1).unwrap_or(0);
        if count.saturating_mul(expanded.len() as u128) > MAX_RANGE_EXPANSION as u128 {
            return Err(Error::InvalidInput(format!(
                "range pattern {pattern:?} expands to more than {MAX_RANGE_EXPANSION} paths"
            )));
        }
        expanded = expanded
            .iter()
            .flat_map(|prefix| (lo..=hi).map(move |i| format!("{prefix}{head}{i}")))
            .collect();
        rest = tail;
    }
    for path in &mut expanded {
        path.push_str(rest);
    }
    Ok(expanded)
}

/// Split off the first well-formed `$(lo-hi)`: `(text before, lo, hi, text after)`.
fn next_range(pattern: &str) -> Option<(&str, i64, i64, &str)> {
    let start = pattern.find("$(")?;
    let end = start + pattern[start..].find(')')?;
    let (lo, hi) = pattern[start + 2..end].split_once('-')?;
    let lo = lo.trim().parse::<i64>().ok()?;
    let hi = hi.trim().parse::<i64>().ok()?;
    Some((&pattern[..start], lo, hi, &pattern[end + 1..]))
}
