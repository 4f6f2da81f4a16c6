//! Glob-based selection of build context paths.

use glob::{MatchOptions, Pattern};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use stagekey_core::error::{DigestError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Selects project-relative paths below `base_path`.
///
/// Patterns are relative to `base_path`. A pattern matching a directory
/// also matches everything below it, and `.` matches everything.
///
/// Excludes follow `.dockerignore` rules: patterns are anchored at
/// `base_path`, apply in order, and `!pattern` re-includes what an earlier
/// pattern excluded.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    base_path: String,
    include: Vec<String>,
    exclude: Vec<String>,
    excluded: Gitignore,
}

impl PathMatcher {
    /// `include` empty selects every path under `base_path`.
    pub fn new(base_path: &str, include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            base_path: trim_path(base_path).to_string(),
            include,
            excluded: lenient_exclusions(&exclude),
            exclude,
        }
    }

    /// Extend the exclusion list; the new patterns apply last.
    pub fn excluding(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.exclude.extend(extra);
        self.excluded = lenient_exclusions(&self.exclude);
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Whether a project-relative, `/`-separated path is selected.
    pub fn matches(&self, path: &str) -> bool {
        let Some(relative) = self.relative_to_base(path) else {
            return false;
        };

        let included = self.include.is_empty()
            || self.include.iter().any(|p| pattern_matches(p, relative));
        included
            && !self
                .excluded
                .matched_path_or_any_parents(relative, false)
                .is_ignore()
    }

    /// Strip `base_path` from a project-relative path.
    pub fn relative_to_base<'a>(&self, path: &'a str) -> Option<&'a str> {
        let path = trim_path(path);
        if self.base_path == "." {
            return Some(path);
        }
        match path.strip_prefix(self.base_path.as_str()) {
            Some("") => Some("."),
            Some(rest) => rest.strip_prefix('/'),
            None => None,
        }
    }
}

fn trim_path(path: &str) -> &str {
    let trimmed = path.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        "."
    } else {
        trimmed
    }
}

/// Compile `.dockerignore`-style exclude patterns.
///
/// Fails with `ConfigError` naming the first pattern that is not a valid glob.
pub fn exclusion_rules(patterns: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(".");
    for pattern in patterns {
        builder
            .add_line(None, &anchored(pattern))
            .map_err(|e| {
                DigestError::ConfigError(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
    }
    builder.build().map_err(|e| {
        DigestError::ConfigError(format!("Failed to compile exclude patterns: {}", e))
    })
}

/// Invalid patterns exclude nothing, so the checksum only ever covers more files.
fn lenient_exclusions(patterns: &[String]) -> Gitignore {
    exclusion_rules(patterns).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Exclude patterns ignored");
        Gitignore::empty()
    })
}

/// Anchor a pattern at the matcher root, keeping a leading `!`.
fn anchored(pattern: &str) -> String {
    let (negation, body) = match pattern.trim().strip_prefix('!') {
        Some(rest) => ("!", rest),
        None => ("", pattern.trim()),
    };
    match trim_path(body.trim()) {
        "." => format!("{}/**", negation),
        body => format!("{}/{}", negation, body),
    }
}

/// Match `path` or any of its parent directories against `pattern`.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern = trim_path(pattern);
    if pattern == "." {
        return true;
    }

    let compiled = match Pattern::new(pattern) {
        Ok(p) => p,
        Err(_) => return path == pattern || path.starts_with(&format!("{}/", pattern)),
    };

    let mut prefix = String::new();
    for component in path.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(component);
        if compiled.matches_with(&prefix, MATCH_OPTIONS) {
            return true;
        }
    }
    false
}
