//! `ContainerRuntime` backed by the local image store.

use std::sync::Arc;

use async_trait::async_trait;

use stagekey_core::error::Result;

use super::image::OciImage;
use super::pull::ImagePuller;
use super::reference::ImageReference;
use super::registry::RegistryAuth;
use super::store::ImageStore;
use crate::stage::backend::{ContainerRuntime, ImageInfo};

/// Inspects images in an [`ImageStore`] and pulls missing ones into it.
pub struct LocalRuntime {
    store: Arc<ImageStore>,
    puller: ImagePuller,
}

impl LocalRuntime {
    pub fn new(store: Arc<ImageStore>, auth: RegistryAuth) -> Self {
        Self {
            puller: ImagePuller::new(store.clone(), auth),
            store,
        }
    }
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    async fn image_info(&self, reference: &str) -> Result<Option<ImageInfo>> {
        let full_ref = ImageReference::parse(reference)?.full_reference();
        let Some(stored) = self.store.get(&full_ref).await else {
            return Ok(None);
        };

        let image = OciImage::from_path(&stored.path)?;
        Ok(Some(ImageInfo {
            reference: reference.to_string(),
            on_build: image.on_build().to_vec(),
        }))
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        self.puller.pull(reference).await.map(|_| ())
    }
}
