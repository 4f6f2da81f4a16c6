//! OCI image layout loading.
//!
//! Reads `index.json`, the manifest and the config blob of an image stored
//! on disk. Only metadata is needed to compute digests, so layer blobs are
//! never opened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;

use stagekey_core::error::{DigestError, Result};

/// An OCI image layout on disk.
#[derive(Debug)]
pub struct OciImage {
    root_dir: PathBuf,
    manifest: ImageManifest,
    config: ImageConfig,
}

/// The parts of an image config the digest engine reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub architecture: Option<String>,
    pub os: Option<String>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub labels: HashMap<String, String>,
    /// Raw ONBUILD trigger instructions
    pub on_build: Vec<String>,
}

/// Image config blob as written by Docker and OCI builders.
#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    config: Option<ContainerConfig>,
}

/// `config` section; Docker spells the keys in PascalCase.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    on_build: Option<Vec<String>>,
}

impl ImageConfig {
    /// Parse a raw config blob.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let blob: ConfigBlob = serde_json::from_slice(data)
            .map_err(|e| DigestError::OciImageError(format!("Failed to parse image config: {}", e)))?;
        let config = blob.config.unwrap_or_default();

        Ok(Self {
            architecture: blob.architecture,
            os: blob.os,
            env: config.env.unwrap_or_default(),
            working_dir: config.working_dir.filter(|w| !w.is_empty()),
            user: config.user.filter(|u| !u.is_empty()),
            labels: config.labels.unwrap_or_default(),
            on_build: config.on_build.unwrap_or_default(),
        })
    }
}

impl OciImage {
    /// Load an image from an OCI layout directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();

        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(DigestError::OciImageError(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }

        let index: ImageIndex = serde_json::from_str(&read_file(&root_dir.join("index.json"))?)
            .map_err(|e| DigestError::OciImageError(format!("Failed to parse index.json: {}", e)))?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| DigestError::OciImageError("No manifests in index.json".to_string()))?
            .digest()
            .to_string();

        let manifest: ImageManifest =
            serde_json::from_str(&read_file(&Self::blob_path(&root_dir, &manifest_digest))?)
                .map_err(|e| DigestError::OciImageError(format!("Failed to parse manifest: {}", e)))?;

        let config_path = Self::blob_path(&root_dir, manifest.config().digest());
        let config_data = std::fs::read(&config_path).map_err(|e| {
            DigestError::OciImageError(format!(
                "Failed to read config at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let config = ImageConfig::from_json(&config_data)?;

        Ok(Self {
            root_dir,
            manifest,
            config,
        })
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// ONBUILD triggers recorded in the image config.
    pub fn on_build(&self) -> &[String] {
        &self.config.on_build
    }

    /// Path of a blob inside the layout (`blobs/<algorithm>/<hex>`).
    pub fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
        let (algorithm, hex) = digest.split_once(':').unwrap_or(("sha256", digest));
        root_dir.join("blobs").join(algorithm).join(hex)
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        DigestError::OciImageError(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Write a metadata-only OCI layout (manifest and config, no layers).
pub(crate) fn write_layout(
    target_dir: &Path,
    manifest_json: &[u8],
    manifest_digest: &str,
    config_digest: &str,
    config_json: &[u8],
) -> Result<()> {
    let io_err = |what: &str, e: std::io::Error| {
        DigestError::OciImageError(format!(
            "Failed to write {} in {}: {}",
            what,
            target_dir.display(),
            e
        ))
    };

    let manifest_path = OciImage::blob_path(target_dir, manifest_digest);
    let config_path = OciImage::blob_path(target_dir, config_digest);
    for path in [&manifest_path, &config_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("blobs directory", e))?;
        }
    }

    std::fs::write(&manifest_path, manifest_json).map_err(|e| io_err("manifest", e))?;
    std::fs::write(&config_path, config_json).map_err(|e| io_err("config", e))?;
    std::fs::write(
        target_dir.join("oci-layout"),
        r#"{"imageLayoutVersion":"1.0.0"}"#,
    )
    .map_err(|e| io_err("oci-layout", e))?;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": manifest_digest,
            "size": manifest_json.len()
        }]
    });
    std::fs::write(
        target_dir.join("index.json"),
        serde_json::to_string_pretty(&index)?,
    )
    .map_err(|e| io_err("index.json", e))?;

    Ok(())
}
