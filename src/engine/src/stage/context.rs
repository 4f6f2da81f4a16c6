//! Build context checksums computed from the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use stagekey_core::error::{DigestError, Result};

use super::backend::{ChecksumRequest, ContentChecksumProvider};
use super::matcher::{exclusion_rules, PathMatcher};

/// `ContentChecksumProvider` over a project directory on disk.
///
/// Checksums cover relative paths and file contents in sorted path order,
/// so renames and edits both change the result. Walks and reads run on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct LocalContext {
    project_dir: PathBuf,
    forbidden_paths: Vec<String>,
}

impl LocalContext {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            forbidden_paths: Vec::new(),
        }
    }

    /// Project-relative glob patterns that must never feed a checksum.
    pub fn with_forbidden_paths(mut self, patterns: Vec<String>) -> Self {
        self.forbidden_paths = patterns;
        self
    }

    /// Project-relative paths of the files the matcher selects, sorted.
    fn matched_files(&self, matcher: &PathMatcher) -> Result<Vec<String>> {
        let root = if matcher.base_path() == "." {
            self.project_dir.clone()
        } else {
            self.project_dir.join(matcher.base_path())
        };
        if !root.exists() {
            return Ok(Vec::new());
        }

        let walker = WalkBuilder::new(&root)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                DigestError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to walk {}: {}", root.display(), e),
                ))
            })?;
            if !entry.file_type().map_or(false, |t| t.is_file()) {
                continue;
            }

            let relative = self.relative_path(entry.path())?;
            if matcher.matches(&relative) {
                files.push(relative);
            }
        }

        files.sort();
        Ok(files)
    }

    fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.project_dir).map_err(|_| {
            DigestError::StateError(format!(
                "{} is outside the project directory {}",
                path.display(),
                self.project_dir.display()
            ))
        })?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn hash_files(&self, files: &[String]) -> Result<String> {
        let mut hasher = Sha256::new();
        for file in files {
            let content = std::fs::read(self.project_dir.join(file)).map_err(|e| {
                DigestError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {}: {}", file, e),
                ))
            })?;
            hasher.update(file.as_bytes());
            hasher.update([0u8]);
            hasher.update(&content);
            hasher.update([0u8]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// First matched file that falls under a forbidden pattern.
    fn forbidden_file(&self, matcher: &PathMatcher) -> Result<Option<(String, String)>> {
        let forbidden: Vec<(&String, PathMatcher)> = self
            .forbidden_paths
            .iter()
            .map(|pattern| (pattern, PathMatcher::new(".", vec![pattern.clone()], Vec::new())))
            .collect();

        for file in self.matched_files(matcher)? {
            if let Some((pattern, _)) = forbidden.iter().find(|(_, m)| m.matches(&file)) {
                return Ok(Some((file, (*pattern).clone())));
            }
        }
        Ok(None)
    }

    /// Run filesystem work off the async executor.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(LocalContext) -> Result<T> + Send + 'static,
    {
        let ctx = self.clone();
        tokio::task::spawn_blocking(move || work(ctx))
            .await
            .map_err(|e| {
                DigestError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Context task failed: {}", e),
                ))
            })?
    }
}

#[async_trait]
impl ContentChecksumProvider for LocalContext {
    async fn checksum(&self, request: &ChecksumRequest) -> Result<String> {
        let matcher = request.matcher();
        let (files, checksum) = self
            .blocking(move |ctx| {
                let files = ctx.matched_files(&matcher)?;
                let checksum = ctx.hash_files(&files)?;
                Ok((files.len(), checksum))
            })
            .await?;
        tracing::debug!(
            scope = %request.path_scope,
            revision = %request.revision,
            files,
            "Hashed context files"
        );
        Ok(checksum)
    }

    async fn inspect(&self, matcher: &PathMatcher) -> Result<()> {
        if self.forbidden_paths.is_empty() {
            return Ok(());
        }

        let matcher = matcher.clone();
        match self.blocking(move |ctx| ctx.forbidden_file(&matcher)).await? {
            Some((path, pattern)) => Err(DigestError::PolicyViolation {
                path,
                message: format!("matches forbidden pattern '{}'", pattern),
            }),
            None => Ok(()),
        }
    }

    async fn context_add_files_checksum(
        &self,
        files: &[String],
        matcher: &PathMatcher,
    ) -> Result<String> {
        let mut matched: Vec<String> = files
            .iter()
            .map(|file| {
                let file = file.trim_start_matches("./");
                if matcher.base_path() == "." {
                    file.to_string()
                } else {
                    format!("{}/{}", matcher.base_path(), file)
                }
            })
            .filter(|path| matcher.matches(path))
            .collect();

        if matched.is_empty() {
            return Ok(String::new());
        }

        matched.sort();
        matched.dedup();
        self.blocking(move |ctx| ctx.hash_files(&matched)).await
    }
}

/// Read `.dockerignore` patterns from the context directory, in file order.
///
/// `!pattern` lines are kept; they re-include paths excluded earlier. A
/// missing file yields no patterns and an invalid glob is a `ConfigError`.
pub fn read_dockerignore(context_dir: &Path) -> Result<Vec<String>> {
    let path = context_dir.join(".dockerignore");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(&path)?;
    let patterns: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    exclusion_rules(&patterns).map_err(|e| match e {
        DigestError::ConfigError(message) => {
            DigestError::ConfigError(format!("{}: {}", path.display(), message))
        }
        other => other,
    })?;
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn request(scope: &str, include: &[&str], exclude: &[&str]) -> ChecksumRequest {
        ChecksumRequest {
            revision: "worktree".to_string(),
            path_scope: scope.to_string(),
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "app/main.go", "package main");
        write(tmp.path(), "app/go.mod", "module app");
        write(tmp.path(), "app/debug.log", "noise");
        write(tmp.path(), "app/secrets/key.pem", "private");
        write(tmp.path(), "docs/readme.md", "docs");
        tmp
    }

    #[test]
    fn test_matched_files_sorted_and_scoped() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path());
        let files = ctx
            .matched_files(&PathMatcher::new("app", vec![".".to_string()], vec!["*.log".to_string()]))
            .unwrap();
        assert_eq!(
            files,
            vec![
                "app/go.mod".to_string(),
                "app/main.go".to_string(),
                "app/secrets/key.pem".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_checksum_changes_with_content() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path());
        let req = request("app", &["main.go"], &[]);

        let before = ctx.checksum(&req).await.unwrap();
        assert_eq!(before, ctx.checksum(&req).await.unwrap());

        write(tmp.path(), "app/main.go", "package main // changed");
        assert_ne!(before, ctx.checksum(&req).await.unwrap());
    }

    #[tokio::test]
    async fn test_checksum_ignores_unmatched_files() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path());
        let req = request("app", &["go.mod"], &[]);

        let before = ctx.checksum(&req).await.unwrap();
        write(tmp.path(), "app/main.go", "package other");
        write(tmp.path(), "docs/readme.md", "changed");
        assert_eq!(before, ctx.checksum(&req).await.unwrap());
    }

    #[tokio::test]
    async fn test_checksum_respects_excludes() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path());
        let req = request("app", &["."], &["*.log"]);

        let before = ctx.checksum(&req).await.unwrap();
        write(tmp.path(), "app/debug.log", "more noise");
        assert_eq!(before, ctx.checksum(&req).await.unwrap());
    }

    #[tokio::test]
    async fn test_inspect_forbidden_path() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path())
            .with_forbidden_paths(vec!["app/secrets/**".to_string()]);

        let err = ctx
            .inspect(&PathMatcher::new("app", vec![".".to_string()], vec![]))
            .await
            .unwrap_err();
        match err {
            DigestError::PolicyViolation { path, .. } => assert_eq!(path, "app/secrets/key.pem"),
            other => panic!("unexpected error: {other:?}"),
        }

        ctx.inspect(&PathMatcher::new("app", vec!["main.go".to_string()], vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_context_add_files_checksum() {
        let tmp = project();
        let ctx = LocalContext::new(tmp.path());
        let files = vec!["go.mod".to_string()];

        let matched = ctx
            .context_add_files_checksum(&files, &PathMatcher::new("app", vec![".".to_string()], vec![]))
            .await
            .unwrap();
        assert_eq!(matched.len(), 64);

        let unmatched = ctx
            .context_add_files_checksum(&files, &PathMatcher::new("app", vec!["src".to_string()], vec![]))
            .await
            .unwrap();
        assert_eq!(unmatched, "");
    }

    #[test]
    fn test_read_dockerignore() {
        let tmp = TempDir::new().unwrap();
        assert!(read_dockerignore(tmp.path()).unwrap().is_empty());

        write(tmp.path(), ".dockerignore", "# build output\ntarget\n\n*.log\n!keep.log\n");
        assert_eq!(
            read_dockerignore(tmp.path()).unwrap(),
            vec!["target".to_string(), "*.log".to_string(), "!keep.log".to_string()]
        );
    }

    #[test]
    fn test_read_dockerignore_invalid_pattern() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".dockerignore", "*.log\n[unclosed\n");
        assert!(matches!(
            read_dockerignore(tmp.path()),
            Err(DigestError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_checksum_tracks_reincluded_file() {
        let tmp = project();
        write(tmp.path(), "app/notes.log", "keep me");
        let ctx = LocalContext::new(tmp.path());
        let req = request("app", &["."], &["*.log", "!notes.log"]);

        let before = ctx.checksum(&req).await.unwrap();
        write(tmp.path(), "app/debug.log", "ignored noise");
        assert_eq!(before, ctx.checksum(&req).await.unwrap());

        write(tmp.path(), "app/notes.log", "edited");
        assert_ne!(before, ctx.checksum(&req).await.unwrap());
    }
}
