//! One-shot digest of a project's target stage.
//!
//! Wires a [`DigestConfig`] to the collaborators and runs both phases of a
//! [`StageDigester`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stagekey_core::config::DigestConfig;
use stagekey_core::error::Result;

use crate::oci::{ImageStore, LocalRuntime, RegistryAuth, RegistryPuller};
use crate::stage::{
    read_dockerignore, Cancellation, ContainerRuntime, ContentChecksumProvider, ContextChecksum,
    DigestOptions, Dockerfile, LocalContext, RegistryClient, StageDigest, StageDigester,
};

/// Collaborators a digest run talks to.
#[derive(Clone)]
pub struct Backends {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: Arc<dyn RegistryClient>,
    pub checksum: Arc<dyn ContentChecksumProvider>,
}

impl Backends {
    /// Local image store, registry access with credentials from the
    /// environment, and checksums read from `config.project_dir`.
    pub fn local(config: &DigestConfig, store: Arc<ImageStore>) -> Self {
        let auth = RegistryAuth::from_env();
        Self {
            runtime: Arc::new(LocalRuntime::new(store, auth.clone())),
            registry: Arc::new(RegistryPuller::with_auth(auth)),
            checksum: Arc::new(
                LocalContext::new(&config.project_dir)
                    .with_forbidden_paths(config.policy.forbidden_paths.clone()),
            ),
        }
    }
}

/// Outcome of [`digest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestResult {
    pub dockerfile: PathBuf,
    #[serde(flatten)]
    pub digest: StageDigest,
    /// External base images whose ONBUILD triggers were resolved
    pub base_images: usize,
    pub computed_at: DateTime<Utc>,
}

/// Compute the digest of the configured target stage.
pub async fn digest(
    config: &DigestConfig,
    backends: &Backends,
    cancel: &Cancellation,
) -> Result<DigestResult> {
    config.validate()?;

    let dockerfile_path = config.dockerfile_path();
    tracing::info!(dockerfile = %dockerfile_path.display(), target = ?config.target, "Computing stage digest");
    let dockerfile = Dockerfile::from_file(&dockerfile_path)?;
    let dockerignore = read_dockerignore(&config.context_dir())?;

    let options = DigestOptions {
        target: config.target.clone(),
        build_args: config.build_args.clone(),
        add_hosts: config.add_hosts.clone(),
        debug_dependencies: config.debug_dependencies_enabled(),
    };
    let mut digester = StageDigester::new(dockerfile, options)?;

    digester
        .fetch_dependencies(backends.runtime.as_ref(), backends.registry.as_ref(), cancel)
        .await?;

    let checksum = ContextChecksum::new(
        backends.checksum.clone(),
        config.revision.clone(),
        config.context_scope(),
    )
    .with_dockerignore(dockerignore)
    .with_context_add_files(config.context_add_files.clone());

    let digest = digester.compute_digest(&checksum, cancel).await?;
    tracing::info!(stage = digest.stage, digest = %digest.digest, "Stage digest computed");

    Ok(DigestResult {
        dockerfile: dockerfile_path,
        base_images: digester.on_build_index().len(),
        digest,
        computed_at: Utc::now(),
    })
}
