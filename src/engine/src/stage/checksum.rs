//! Content checksums for ADD/COPY sources.

use std::sync::Arc;

use stagekey_core::error::Result;

use super::backend::{ChecksumRequest, ContentChecksumProvider};
use super::cancel::Cancellation;
use super::hash::sha256_hash;
use super::matcher::PathMatcher;

/// Checksums the build context files an instruction copies.
#[derive(Clone)]
pub struct ContextChecksum {
    provider: Arc<dyn ContentChecksumProvider>,
    revision: String,
    path_scope: String,
    dockerignore: Vec<String>,
    context_add_files: Vec<String>,
}

impl ContextChecksum {
    /// `path_scope` is the context directory relative to the project root.
    pub fn new(
        provider: Arc<dyn ContentChecksumProvider>,
        revision: impl Into<String>,
        path_scope: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            revision: revision.into(),
            path_scope: path_scope.into(),
            dockerignore: Vec::new(),
            context_add_files: Vec::new(),
        }
    }

    /// `.dockerignore` patterns excluded from every checksum.
    pub fn with_dockerignore(mut self, patterns: Vec<String>) -> Self {
        self.dockerignore = patterns;
        self
    }

    /// Local files added to the context on top of the revision.
    pub fn with_context_add_files(mut self, files: Vec<String>) -> Self {
        self.context_add_files = files;
        self
    }

    /// Checksum of the files matched by resolved COPY/ADD sources.
    pub async fn files_checksum(&self, sources: &[String], cancel: &Cancellation) -> Result<String> {
        let globs = normalize_sources(sources);
        let target = globs.join(" ");
        tracing::debug!(sources = ?globs, revision = %self.revision, "Calculating files checksum");

        let request = ChecksumRequest {
            revision: self.revision.clone(),
            path_scope: self.path_scope.clone(),
            include_globs: globs.clone(),
            exclude_globs: self.dockerignore.clone(),
        };
        let tree_checksum = cancel
            .run(self.provider.checksum(&request))
            .await
            .map_err(|e| e.during("context checksum", &target))?;

        let inspected = request.matcher().excluding(self.context_add_files.clone());
        cancel
            .run(self.provider.inspect(&inspected))
            .await
            .map_err(|e| e.during("context inspection", &target))?;

        let mut checksum = sha256_hash(&[tree_checksum]);

        if !self.context_add_files.is_empty() {
            let matcher = PathMatcher::new(&self.path_scope, globs, Vec::new());
            let add_checksum = cancel
                .run(
                    self.provider
                        .context_add_files_checksum(&self.context_add_files, &matcher),
                )
                .await
                .map_err(|e| e.during("context add files checksum", &target))?;

            if !add_checksum.is_empty() {
                tracing::debug!(checksum = %add_checksum, "Context add files checksum");
                checksum = sha256_hash(&[checksum, add_checksum]);
            }
        }

        tracing::debug!(checksum = %checksum, "Result checksum");
        Ok(checksum)
    }
}

/// Normalize COPY/ADD sources into context-relative globs.
///
/// Cleans `.`, `..` and repeated separators; `/` becomes `.` and a
/// leading `/` is dropped.
pub fn normalize_sources(sources: &[String]) -> Vec<String> {
    sources
        .iter()
        .map(|source| {
            let cleaned = clean_path(source);
            if cleaned == "/" {
                ".".to_string()
            } else if let Some(stripped) = cleaned.strip_prefix('/') {
                stripped.to_string()
            } else {
                cleaned
            }
        })
        .collect()
}

/// Lexical path cleaning for `/`-separated paths.
fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
