//! `stagekey digest` command: compute the cache key of a target stage.
//!
//! Settings come from an optional YAML config file; flags override it.
//! Ctrl-C cancels whatever collaborator call is in flight.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use stagekey_core::DigestConfig;
use stagekey_engine::{Backends, Cancellation, ImageStore, DEFAULT_IMAGE_STORE_SIZE};

#[derive(Args)]
pub struct DigestArgs {
    /// Project directory (default: the config's project_dir, or ".")
    pub path: Option<PathBuf>,

    /// Path to Dockerfile, relative to the build context (default: Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Target stage name (default: the last stage)
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    /// Set build-time variables (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,

    /// Add a custom host-to-IP mapping (host:ip), can be repeated
    #[arg(long = "add-host")]
    pub add_host: Vec<String>,

    /// Local file added to the build context, can be repeated
    #[arg(long = "context-add-file")]
    pub context_add_file: Vec<String>,

    /// YAML configuration file
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Image store directory (default: ~/.stagekey/images)
    #[arg(long = "store-dir")]
    pub store_dir: Option<PathBuf>,

    /// Log the target stage's dependency list
    #[arg(long = "debug-dependencies")]
    pub debug_dependencies: bool,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: DigestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;

    let store_dir = args.store_dir.clone().unwrap_or_else(super::images_dir);
    let store = Arc::new(ImageStore::new(&store_dir, DEFAULT_IMAGE_STORE_SIZE)?);
    let backends = Backends::local(&config, store);

    let (cancel_tx, cancel) = Cancellation::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling digest computation");
            let _ = cancel_tx.send(true);
        }
    });

    let result = stagekey_engine::digest(&config, &backends, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.digest.digest);
    }

    Ok(())
}

/// Merge the config file (if any) with command line flags.
fn resolve_config(args: &DigestArgs) -> Result<DigestConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => DigestConfig::from_yaml_file(path)?,
        None => DigestConfig::default(),
    };

    if let Some(path) = &args.path {
        config.project_dir = path.clone();
    }
    config.project_dir = config.project_dir.canonicalize().map_err(|e| {
        format!(
            "Invalid project directory '{}': {}",
            config.project_dir.display(),
            e
        )
    })?;
    if !config.project_dir.is_dir() {
        return Err(format!(
            "Project directory '{}' is not a directory",
            config.project_dir.display()
        )
        .into());
    }

    if let Some(file) = &args.file {
        config.dockerfile = file.clone();
    }
    if let Some(target) = &args.target {
        config.target = Some(target.clone());
    }
    config.build_args.extend(parse_build_args(&args.build_arg)?);
    config.add_hosts.extend(args.add_host.iter().cloned());
    config
        .context_add_files
        .extend(args.context_add_file.iter().cloned());
    config.debug_dependencies |= args.debug_dependencies;

    config.validate()?;
    Ok(config)
}

/// Parse KEY=VALUE pairs; later pairs win.
fn parse_build_args(args: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("Invalid build arg (expected KEY=VALUE): {arg}"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(path: Option<PathBuf>) -> DigestArgs {
        DigestArgs {
            path,
            file: None,
            target: None,
            build_arg: Vec::new(),
            add_host: Vec::new(),
            context_add_file: Vec::new(),
            config: None,
            store_dir: None,
            debug_dependencies: false,
            json: false,
        }
    }

    #[test]
    fn test_parse_build_args_valid() {
        let args = vec!["VERSION=1.0".to_string(), "DEBUG=true".to_string()];
        let result = parse_build_args(&args).unwrap();
        assert_eq!(result.get("VERSION"), Some(&"1.0".to_string()));
        assert_eq!(result.get("DEBUG"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_build_args_invalid() {
        let args = vec!["NOEQUALS".to_string()];
        assert!(parse_build_args(&args).is_err());
    }

    #[test]
    fn test_parse_build_args_value_with_equals() {
        let args = vec!["URL=http://example.com?a=1".to_string(), "EMPTY=".to_string()];
        let result = parse_build_args(&args).unwrap();
        assert_eq!(
            result.get("URL"),
            Some(&"http://example.com?a=1".to_string())
        );
        assert_eq!(result.get("EMPTY"), Some(&String::new()));
    }

    #[test]
    fn test_resolve_config_flags() {
        let tmp = TempDir::new().unwrap();
        let mut args = args(Some(tmp.path().to_path_buf()));
        args.file = Some(PathBuf::from("build/Dockerfile"));
        args.target = Some("app".to_string());
        args.build_arg = vec!["TAG=1".to_string()];
        args.add_host = vec!["db:10.0.0.2".to_string()];
        args.debug_dependencies = true;

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.project_dir, tmp.path().canonicalize().unwrap());
        assert_eq!(config.dockerfile, PathBuf::from("build/Dockerfile"));
        assert_eq!(config.target.as_deref(), Some("app"));
        assert_eq!(config.build_args.get("TAG").map(String::as_str), Some("1"));
        assert_eq!(config.add_hosts, vec!["db:10.0.0.2".to_string()]);
        assert!(config.debug_dependencies);
    }

    #[test]
    fn test_resolve_config_file_then_flags() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("app")).unwrap();
        let config_path = tmp.path().join("stagekey.yaml");
        std::fs::write(
            &config_path,
            "project_dir: .\ncontext: app\nbuild_args:\n  TAG: \"1\"\n  MODE: release\n",
        )
        .unwrap();

        let mut args = args(None);
        args.config = Some(config_path);
        args.build_arg = vec!["TAG=2".to_string()];

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.project_dir, tmp.path().canonicalize().unwrap());
        assert_eq!(config.context_scope(), "app");
        assert_eq!(config.build_args.get("TAG").map(String::as_str), Some("2"));
        assert_eq!(config.build_args.get("MODE").map(String::as_str), Some("release"));
    }

    #[test]
    fn test_resolve_config_missing_project_dir() {
        let tmp = TempDir::new().unwrap();
        let args = args(Some(tmp.path().join("missing")));
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn test_resolve_config_rejects_escaping_add_file() {
        let tmp = TempDir::new().unwrap();
        let mut args = args(Some(tmp.path().to_path_buf()));
        args.context_add_file = vec!["../secret".to_string()];
        assert!(resolve_config(&args).is_err());
    }
}
