//! Collaborator interfaces used by the digest engine.
//!
//! The engine never touches a container runtime, a registry or the build
//! context directly. Each concern sits behind one of these traits so that
//! the real implementations (see `crate::oci` and `crate::stage::context`)
//! and test doubles are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stagekey_core::error::Result;

use super::dockerfile::Step;
use super::matcher::PathMatcher;

/// Image metadata the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Reference the metadata was looked up under
    pub reference: String,
    /// Raw `ONBUILD` trigger instructions from the image config
    pub on_build: Vec<String>,
}

/// Local image inspection and pulling.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspect a local image. `Ok(None)` means the image is not present.
    async fn image_info(&self, reference: &str) -> Result<Option<ImageInfo>>;

    /// Pull an image into local storage.
    async fn pull(&self, reference: &str) -> Result<()>;
}

/// Remote image config lookup.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the image config without pulling layers.
    ///
    /// Must fail with `DigestError::UnsupportedManifest` when the registry
    /// serves a manifest format the client cannot parse.
    async fn image_config(&self, reference: &str) -> Result<ImageInfo>;
}

/// Which files of the build context feed a checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRequest {
    /// Source revision the checksum is computed at
    pub revision: String,
    /// Context directory relative to the project root (`.` for the root)
    pub path_scope: String,
    /// Normalized COPY/ADD sources, relative to `path_scope`
    pub include_globs: Vec<String>,
    /// `.dockerignore` patterns, relative to `path_scope`
    pub exclude_globs: Vec<String>,
}

impl ChecksumRequest {
    pub fn matcher(&self) -> PathMatcher {
        PathMatcher::new(
            &self.path_scope,
            self.include_globs.clone(),
            self.exclude_globs.clone(),
        )
    }
}

/// Content checksums of build context files.
#[async_trait]
pub trait ContentChecksumProvider: Send + Sync {
    /// Checksum of exactly the files the request matches.
    async fn checksum(&self, request: &ChecksumRequest) -> Result<String>;

    /// Policy check over the files the matcher selects.
    ///
    /// Fails with `DigestError::PolicyViolation` naming the offending path.
    async fn inspect(&self, matcher: &PathMatcher) -> Result<()>;

    /// Checksum of the context-add files the matcher selects.
    ///
    /// Returns an empty string when none of `files` match.
    async fn context_add_files_checksum(
        &self,
        files: &[String],
        matcher: &PathMatcher,
    ) -> Result<String>;
}

/// Instruction parsing, used for ONBUILD triggers.
pub trait InstructionParser: Send + Sync {
    /// Parse a single instruction line.
    fn parse_instruction(&self, text: &str) -> Result<Step>;

    /// Parse an ONBUILD trigger; `ONBUILD`, `FROM` and `MAINTAINER` are rejected.
    fn parse_trigger(&self, text: &str) -> Result<Step>;
}
