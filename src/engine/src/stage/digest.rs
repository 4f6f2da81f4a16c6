//! Stage digest computation.
//!
//! A [`StageDigester`] moves through two phases for one parsed Dockerfile:
//!
//! 1. **fetch**: resolve the ONBUILD triggers of every external base image
//! 2. **digest**: extract each stage's dependencies, merge them along
//!    `FROM <stage>` and `COPY --from=<index>` edges, and hash the target's list
//!
//! ```text
//! Unfetched ──fetch_dependencies──▶ Fetched ──compute_digest──▶ Digested
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use stagekey_core::error::{DigestError, Result};

use super::backend::{ContainerRuntime, InstructionParser, RegistryClient};
use super::cancel::Cancellation;
use super::checksum::ContextChecksum;
use super::dockerfile::{Dockerfile, DockerfileParser, Instruction};
use super::extract::Extractor;
use super::hash::sha256_hash;
use super::onbuild::{OnBuildIndex, OnBuildResolver};
use super::scope::{GlobalScope, StageScope};

const SCRATCH: &str = "scratch";

/// Inputs that shape every stage's digest besides the Dockerfile itself.
#[derive(Debug, Clone, Default)]
pub struct DigestOptions {
    /// Target stage name; the last stage when unset
    pub target: Option<String>,
    /// `--build-arg` overrides
    pub build_args: BTreeMap<String, String>,
    /// `--add-host` entries, prepended to every stage
    pub add_hosts: Vec<String>,
    /// Log the target's dependency list at info level
    pub debug_dependencies: bool,
}

/// Lifecycle of a [`StageDigester`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestState {
    Unfetched,
    Fetched,
    Digested,
}

impl std::fmt::Display for DigestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestState::Unfetched => write!(f, "unfetched"),
            DigestState::Fetched => write!(f, "fetched"),
            DigestState::Digested => write!(f, "digested"),
        }
    }
}

/// Digest of the target stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDigest {
    /// Target stage index
    pub stage: usize,
    /// Target stage name, if any
    pub name: Option<String>,
    /// Lowercase hex SHA-256
    pub digest: String,
    /// Ordered dependency list the digest was computed from
    pub dependencies: Vec<String>,
}

/// Computes the cache key of a Dockerfile's target stage.
pub struct StageDigester {
    dockerfile: Dockerfile,
    target: usize,
    global: GlobalScope,
    add_hosts: Vec<String>,
    debug_dependencies: bool,
    on_build: OnBuildIndex,
    parser: Arc<dyn InstructionParser>,
    state: DigestState,
}

impl StageDigester {
    /// Bind global ARGs and select the target stage.
    pub fn new(dockerfile: Dockerfile, options: DigestOptions) -> Result<Self> {
        let target = dockerfile.target_index(options.target.as_deref())?;
        let global = GlobalScope::new(&dockerfile.meta_args, &options.build_args)?;

        Ok(Self {
            dockerfile,
            target,
            global,
            add_hosts: options.add_hosts,
            debug_dependencies: options.debug_dependencies,
            on_build: OnBuildIndex::default(),
            parser: Arc::new(DockerfileParser),
            state: DigestState::Unfetched,
        })
    }

    /// Use a different parser for ONBUILD triggers.
    pub fn with_parser(mut self, parser: Arc<dyn InstructionParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn state(&self) -> DigestState {
        self.state
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn dockerfile(&self) -> &Dockerfile {
        &self.dockerfile
    }

    pub fn on_build_index(&self) -> &OnBuildIndex {
        &self.on_build
    }

    fn expect_state(&self, expected: DigestState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(DigestError::StateError(format!(
                "{} requires the {} state, engine is {}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }

    /// Resolve ONBUILD triggers of every external base image.
    ///
    /// Stages based on another stage and `scratch` are skipped; each
    /// resolved reference is looked up once.
    pub async fn fetch_dependencies(
        &mut self,
        runtime: &dyn ContainerRuntime,
        registry: &dyn RegistryClient,
        cancel: &Cancellation,
    ) -> Result<()> {
        self.expect_state(DigestState::Unfetched, "fetch_dependencies")?;
        let resolver = OnBuildResolver::new(runtime, registry, cancel);

        for stage in &self.dockerfile.stages {
            let based_on_stage = self.dockerfile.stages.iter().any(|other| {
                other.index != stage.index && other.name.as_deref() == Some(stage.base_name.as_str())
            });
            if based_on_stage {
                continue;
            }

            let reference = self
                .global
                .resolve(&stage.base_name)
                .map_err(|e| e.in_stage(stage.index, &stage.text))?;
            if reference == SCRATCH || self.on_build.contains(&reference) {
                continue;
            }

            tracing::info!(stage = stage.index, reference = %reference, "Resolving base image ONBUILD instructions");
            let triggers = resolver
                .resolve(&reference)
                .await
                .map_err(|e| e.in_stage(stage.index, &stage.text))?;
            tracing::debug!(reference = %reference, triggers = triggers.len(), "Base image resolved");
            self.on_build.insert(reference, triggers);
        }

        self.state = DigestState::Fetched;
        Ok(())
    }

    /// Compute the target stage's digest.
    pub async fn compute_digest(
        &mut self,
        checksum: &ContextChecksum,
        cancel: &Cancellation,
    ) -> Result<StageDigest> {
        self.expect_state(DigestState::Fetched, "compute_digest")?;

        let stages = &self.dockerfile.stages;
        let extractor = Extractor::new(&self.global, checksum, self.parser.as_ref(), cancel);
        let mut scopes: Vec<StageScope> = vec![StageScope::default(); stages.len()];
        let mut dependencies: Vec<Vec<String>> = Vec::with_capacity(stages.len());
        let mut onbuild: Vec<Vec<String>> = Vec::with_capacity(stages.len());

        for stage in stages {
            let scope = &mut scopes[stage.index];
            let mut stage_deps = self.add_hosts.clone();
            let mut stage_onbuild = Vec::new();

            let base = self
                .global
                .resolve(&stage.base_name)
                .map_err(|e| e.in_stage(stage.index, &stage.text))?;
            stage_deps.push(base.clone());

            if let Some(triggers) = self.on_build.get(&base) {
                for trigger in triggers {
                    let deps = extractor
                        .extract_inherited(trigger, scope)
                        .await
                        .map_err(|e| e.in_stage(stage.index, format!("ONBUILD {}", trigger)))?;
                    stage_deps.extend(deps);
                }
            }

            for step in &stage.steps {
                let extraction = extractor
                    .extract(step, scope)
                    .await
                    .map_err(|e| e.in_stage(stage.index, &step.text))?;
                stage_deps.extend(extraction.dependencies);
                stage_onbuild.extend(extraction.onbuild);
            }

            dependencies.push(stage_deps);
            onbuild.push(stage_onbuild);
        }

        // Merged lists are read by later stages, so order matters
        for stage in stages {
            let i = stage.index;
            for related in stages {
                if related.index != i && related.name.as_deref() == Some(stage.base_name.as_str()) {
                    let mut inherited = dependencies[related.index].clone();
                    inherited.extend(onbuild[related.index].iter().cloned());
                    dependencies[i].extend(inherited);
                }
            }

            for step in &stage.steps {
                if let Instruction::Copy { from: Some(from), .. } = &step.instruction {
                    if let Ok(source) = from.parse::<usize>() {
                        if source < dependencies.len() {
                            let copied = dependencies[source].clone();
                            dependencies[i].extend(copied);
                        }
                    }
                }
            }
        }

        let target_deps = dependencies.swap_remove(self.target);
        if self.debug_dependencies {
            tracing::info!(stage = self.target, dependencies = ?target_deps, "Stage dependencies");
        } else {
            tracing::debug!(stage = self.target, dependencies = ?target_deps, "Stage dependencies");
        }

        let digest = sha256_hash(&target_deps);
        self.state = DigestState::Digested;

        Ok(StageDigest {
            stage: self.target,
            name: stages[self.target].name.clone(),
            digest,
            dependencies: target_deps,
        })
    }
}
