//! stagekey Engine - stage dependency and digest resolution.
//!
//! Computes a content-addressed cache key for the target stage of a
//! multi-stage Dockerfile. The key covers every instruction that can change
//! the stage's result: resolved build arguments and environment, checksums
//! of copied context files, ONBUILD triggers inherited from base images and
//! the dependencies of the stages it builds on or copies from.
//!
//! - [`stage`]: parsing, variable scopes, dependency extraction and digests
//! - [`oci`]: image references, metadata pulls and the local image store
//! - [`engine`]: the one-shot [`digest`] entry point over a [`DigestConfig`]
//!
//! [`DigestConfig`]: stagekey_core::DigestConfig

#![allow(clippy::result_large_err)]

pub mod engine;
pub mod oci;
pub mod stage;

// Re-export common types
pub use engine::{digest, Backends, DigestResult};
pub use oci::{ImagePuller, ImageReference, ImageStore, LocalRuntime, RegistryAuth, RegistryPuller};
pub use stage::{
    Cancellation, ContainerRuntime, ContentChecksumProvider, ContextChecksum, DigestOptions,
    DigestState, Dockerfile, LocalContext, RegistryClient, StageDigest, StageDigester,
};

/// stagekey engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default maximum image store size: 10 GB.
pub const DEFAULT_IMAGE_STORE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
