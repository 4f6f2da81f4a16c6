//! Cache-first image metadata pulls.

use std::sync::Arc;

use stagekey_core::error::{DigestError, Result};

use super::image::OciImage;
use super::reference::ImageReference;
use super::registry::{RegistryAuth, RegistryPuller};
use super::store::ImageStore;

/// Pulls image metadata into an [`ImageStore`], reusing what is already there.
pub struct ImagePuller {
    store: Arc<ImageStore>,
    puller: RegistryPuller,
}

impl ImagePuller {
    pub fn new(store: Arc<ImageStore>, auth: RegistryAuth) -> Self {
        Self {
            store,
            puller: RegistryPuller::with_auth(auth),
        }
    }

    /// Pull an image unless the store already has it.
    pub async fn pull(&self, reference: &str) -> Result<OciImage> {
        let parsed = ImageReference::parse(reference)?;
        let full_ref = parsed.full_reference();

        if let Some(stored) = self.store.get(&full_ref).await {
            tracing::info!(reference = %full_ref, digest = %stored.digest, "Using cached image");
            return OciImage::from_path(&stored.path);
        }

        self.pull_and_store(&parsed).await
    }

    async fn pull_and_store(&self, reference: &ImageReference) -> Result<OciImage> {
        let full_ref = reference.full_reference();

        // Same content under another tag
        let digest = self.puller.pull_manifest_digest(reference).await?;
        if let Some(existing) = self.store.get_by_digest(&digest).await {
            tracing::info!(reference = %full_ref, digest = %digest, "Image content already cached under another reference");
            let stored = self.store.put(&full_ref, &digest, &existing.path).await?;
            return OciImage::from_path(&stored.path);
        }

        let tmp_dir = self
            .store
            .store_dir()
            .join("tmp")
            .join(digest.replace(':', "-"));
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir).map_err(|e| {
                DigestError::OciImageError(format!(
                    "Failed to clean temp directory {}: {}",
                    tmp_dir.display(),
                    e
                ))
            })?;
        }

        let digest = self.puller.pull_metadata(reference, &tmp_dir).await?;
        let stored = self.store.put(&full_ref, &digest, &tmp_dir).await;
        let _ = std::fs::remove_dir_all(&tmp_dir);
        let stored = stored?;

        let evicted = self.store.evict().await?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), references = ?evicted, "Evicted images from store");
        }

        OciImage::from_path(&stored.path)
    }
}
