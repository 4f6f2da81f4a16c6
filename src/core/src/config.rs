use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{DigestError, Result};

/// Environment switch that logs the target's dependency list at info level.
pub const DEBUG_DEPENDENCIES_ENV: &str = "STAGEKEY_DEBUG_STAGE_DEPENDENCIES";

/// Revision label used when the context is read straight from the worktree.
pub const WORKTREE_REVISION: &str = "worktree";

/// Stage digest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Project root; checksums are scoped relative to it
    pub project_dir: PathBuf,

    /// Build context, relative to the project root
    pub context: PathBuf,

    /// Dockerfile path, relative to the build context unless absolute
    pub dockerfile: PathBuf,

    /// Target stage name (defaults to the last stage)
    pub target: Option<String>,

    /// Build argument overrides (`--build-arg KEY=VALUE`)
    pub build_args: BTreeMap<String, String>,

    /// Extra host aliases (`--add-host`), folded into every stage
    pub add_hosts: Vec<String>,

    /// Local files added to the context, relative to the context
    pub context_add_files: Vec<String>,

    /// Source revision the content checksums are computed at
    pub revision: String,

    /// Content policy
    pub policy: PolicyConfig,

    /// Log the target's dependency list at info level
    pub debug_dependencies: bool,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            context: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
            target: None,
            build_args: BTreeMap::new(),
            add_hosts: Vec::new(),
            context_add_files: Vec::new(),
            revision: WORKTREE_REVISION.to_string(),
            policy: PolicyConfig::default(),
            debug_dependencies: false,
        }
    }
}

/// Content policy applied before a checksum is trusted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Glob patterns (relative to the project root) that must never feed a checksum
    pub forbidden_paths: Vec<String>,
}

impl DigestConfig {
    /// Load configuration from a YAML file.
    ///
    /// A relative `project_dir` is resolved against the file's directory.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DigestError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: DigestConfig = serde_yaml::from_str(&content)?;

        if config.project_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.project_dir = base.join(&config.project_dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject contexts and added files that escape their parent directory.
    pub fn validate(&self) -> Result<()> {
        if escapes(&self.context) {
            return Err(DigestError::ConfigError(format!(
                "Context {} must stay inside the project directory",
                self.context.display()
            )));
        }
        for file in &self.context_add_files {
            if escapes(Path::new(file)) {
                return Err(DigestError::ConfigError(format!(
                    "Context add file {} must stay inside the context",
                    file
                )));
            }
        }
        if self.revision.trim().is_empty() {
            return Err(DigestError::ConfigError(
                "Revision must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute build context directory.
    pub fn context_dir(&self) -> PathBuf {
        self.project_dir.join(&self.context)
    }

    /// Dockerfile location.
    pub fn dockerfile_path(&self) -> PathBuf {
        if self.dockerfile.is_absolute() {
            self.dockerfile.clone()
        } else {
            self.context_dir().join(&self.dockerfile)
        }
    }

    /// Context path relative to the project root, `/`-separated, `.` for the root.
    pub fn context_scope(&self) -> String {
        let parts: Vec<String> = self
            .context
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Whether the dependency dump is enabled by flag or environment.
    pub fn debug_dependencies_enabled(&self) -> bool {
        self.debug_dependencies
            || std::env::var(DEBUG_DEPENDENCIES_ENV).map_or(false, |v| v == "1")
    }
}

fn escapes(path: &Path) -> bool {
    path.is_absolute() || path.components().any(|c| c == Component::ParentDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DigestConfig::default();
        assert_eq!(config.context, PathBuf::from("."));
        assert_eq!(config.dockerfile, PathBuf::from("Dockerfile"));
        assert_eq!(config.revision, WORKTREE_REVISION);
        assert!(config.target.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_scope() {
        let mut config = DigestConfig::default();
        assert_eq!(config.context_scope(), ".");

        config.context = PathBuf::from("./services/api/");
        assert_eq!(config.context_scope(), "services/api");
    }

    #[test]
    fn test_dockerfile_path_relative_to_context() {
        let config = DigestConfig {
            project_dir: PathBuf::from("/work"),
            context: PathBuf::from("app"),
            dockerfile: PathBuf::from("build/Dockerfile"),
            ..Default::default()
        };
        assert_eq!(
            config.dockerfile_path(),
            PathBuf::from("/work/app/build/Dockerfile")
        );
    }

    #[test]
    fn test_validate_rejects_escaping_context() {
        let config = DigestConfig {
            context: PathBuf::from("../outside"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DigestError::ConfigError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_escaping_add_file() {
        let config = DigestConfig {
            context_add_files: vec!["../secret".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stagekey.yaml");
        std::fs::write(
            &path,
            r#"
project_dir: .
context: app
target: builder
build_args:
  VERSION: "1.2"
add_hosts:
  - "db:10.0.0.2"
policy:
  forbidden_paths:
    - "secrets/**"
"#,
        )
        .unwrap();

        let config = DigestConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.project_dir, tmp.path().join("."));
        assert_eq!(config.target.as_deref(), Some("builder"));
        assert_eq!(config.build_args.get("VERSION"), Some(&"1.2".to_string()));
        assert_eq!(config.add_hosts, vec!["db:10.0.0.2".to_string()]);
        assert_eq!(config.policy.forbidden_paths, vec!["secrets/**".to_string()]);
        assert_eq!(config.dockerfile, PathBuf::from("Dockerfile"));
    }

    #[test]
    fn test_from_yaml_file_missing() {
        let tmp = TempDir::new().unwrap();
        let result = DigestConfig::from_yaml_file(&tmp.path().join("missing.yaml"));
        assert!(matches!(result, Err(DigestError::ConfigError(_))));
    }
}
