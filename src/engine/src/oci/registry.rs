//! Registry client for image metadata.
//!
//! Uses `oci-distribution` to fetch manifests and config blobs from
//! container registries (Docker Hub, GHCR, ...). Layers are never
//! downloaded: digests only need the image config.

use std::path::Path;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};

use stagekey_core::error::{DigestError, Result};

use super::image::{write_layout, ImageConfig};
use super::reference::ImageReference;
use crate::stage::backend::{ImageInfo, RegistryClient};

/// Registry credentials.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`; anonymous unless both are set.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Fetches image metadata from registries.
pub struct RegistryPuller {
    client: Client,
    auth: RegistryAuth,
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryPuller {
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    pub fn with_auth(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Manifest digest of an image, used as its storage key.
    pub async fn pull_manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        let oci_ref = self.to_oci_reference(reference)?;
        let (_manifest, digest) = self
            .client
            .pull_manifest(&oci_ref, &self.auth.to_oci_auth())
            .await
            .map_err(|e| registry_error(reference, "Failed to pull manifest", e))?;
        Ok(digest)
    }

    /// Fetch and parse the image config without pulling layers.
    pub async fn pull_image_config(&self, reference: &ImageReference) -> Result<ImageConfig> {
        let (_manifest, _digest, config_json) = self.pull_manifest_and_config(reference).await?;
        ImageConfig::from_json(config_json.as_bytes())
    }

    /// Write the manifest and config of an image as an OCI layout at `target_dir`.
    ///
    /// Returns the manifest digest.
    pub async fn pull_metadata(&self, reference: &ImageReference, target_dir: &Path) -> Result<String> {
        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image metadata from registry"
        );

        let (manifest, manifest_digest, config_json) =
            self.pull_manifest_and_config(reference).await?;
        let manifest_json = serde_json::to_vec(&manifest)?;

        write_layout(
            target_dir,
            &manifest_json,
            &manifest_digest,
            &manifest.config.digest,
            config_json.as_bytes(),
        )?;

        tracing::info!(reference = %reference, digest = %manifest_digest, "Image metadata pulled");
        Ok(manifest_digest)
    }

    async fn pull_manifest_and_config(
        &self,
        reference: &ImageReference,
    ) -> Result<(OciImageManifest, String, String)> {
        let oci_ref = self.to_oci_reference(reference)?;
        self.client
            .pull_manifest_and_config(&oci_ref, &self.auth.to_oci_auth())
            .await
            .map_err(|e| registry_error(reference, "Failed to pull image config", e))
    }

    fn to_oci_reference(&self, reference: &ImageReference) -> Result<Reference> {
        let ref_str = reference.pull_reference();
        ref_str.parse::<Reference>().map_err(|e| {
            DigestError::OciImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }
}

#[async_trait]
impl RegistryClient for RegistryPuller {
    async fn image_config(&self, reference: &str) -> Result<ImageInfo> {
        let parsed = ImageReference::parse(reference)?;
        let config = self.pull_image_config(&parsed).await?;
        Ok(ImageInfo {
            reference: reference.to_string(),
            on_build: config.on_build,
        })
    }
}

/// Manifest formats the client cannot read become `UnsupportedManifest`.
fn registry_error(reference: &ImageReference, context: &str, err: OciDistributionError) -> DigestError {
    match err {
        OciDistributionError::UnsupportedMediaTypeError(media_type) => DigestError::UnsupportedManifest {
            reference: reference.to_string(),
            message: format!("unsupported media type {}", media_type),
        },
        OciDistributionError::UnsupportedSchemaVersionError(version) => DigestError::UnsupportedManifest {
            reference: reference.to_string(),
            message: format!("unsupported schema version {}", version),
        },
        other => DigestError::RegistryError {
            registry: reference.registry.clone(),
            message: format!("{}: {}", context, other),
        },
    }
}

/// Select the linux image for the host architecture from a multi-arch index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
