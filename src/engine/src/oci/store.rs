//! Disk-backed store of image metadata layouts with LRU eviction.
//!
//! Each image lives under `<store>/sha256/<manifest-hex>/` as an OCI layout.
//! A JSON index maps canonical references to those directories and is kept
//! in memory behind a `RwLock`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use stagekey_core::error::{DigestError, Result};

const INDEX_FILE: &str = "index.json";

/// Index entry for one stored reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Canonical reference (e.g. "docker.io/library/alpine:3.19")
    pub reference: String,
    /// Manifest digest
    pub digest: String,
    pub size_bytes: u64,
    pub stored_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// OCI layout directory
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Local image store.
pub struct ImageStore {
    store_dir: PathBuf,
    index: RwLock<HashMap<String, StoredImage>>,
    max_size_bytes: u64,
}

impl ImageStore {
    /// Open (or create) a store; entries whose directory vanished are dropped.
    pub fn new(store_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            DigestError::OciImageError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = Self::load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: RwLock::new(index),
            max_size_bytes,
        })
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Look up a reference and mark it as used.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        self.touch(|image| image.reference == reference).await
    }

    /// Look up any reference stored under `digest` and mark it as used.
    pub async fn get_by_digest(&self, digest: &str) -> Option<StoredImage> {
        self.touch(|image| image.digest == digest).await
    }

    async fn touch(&self, pred: impl Fn(&StoredImage) -> bool) -> Option<StoredImage> {
        let found = {
            let mut index = self.index.write().await;
            let image = index.values_mut().find(|image| pred(image))?;
            image.last_used = Utc::now();
            image.clone()
        };
        if let Err(e) = self.save_index().await {
            tracing::warn!(error = %e, "Failed to persist image store index");
        }
        Some(found)
    }

    /// Record `reference` → layout at `source_dir`, copying it into the store.
    pub async fn put(&self, reference: &str, digest: &str, source_dir: &Path) -> Result<StoredImage> {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        let target_dir = self.store_dir.join("sha256").join(hex);

        if !target_dir.exists() {
            copy_dir(source_dir, &target_dir).map_err(|e| {
                DigestError::OciImageError(format!(
                    "Failed to copy {} into the image store: {}",
                    source_dir.display(),
                    e
                ))
            })?;
        }

        let now = Utc::now();
        let stored = StoredImage {
            reference: reference.to_string(),
            digest: digest.to_string(),
            size_bytes: dir_size(&target_dir),
            stored_at: now,
            last_used: now,
            path: target_dir,
        };

        self.index
            .write()
            .await
            .insert(reference.to_string(), stored.clone());
        self.save_index().await?;

        tracing::debug!(reference = %reference, digest = %digest, "Stored image");
        Ok(stored)
    }

    /// Drop a reference; its layout is deleted once no reference shares it.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let (image, shared) = {
            let mut index = self.index.write().await;
            let image = index.remove(reference).ok_or_else(|| {
                DigestError::OciImageError(format!("Image not found: {}", reference))
            })?;
            let shared = index.values().any(|other| other.digest == image.digest);
            (image, shared)
        };

        if !shared && image.path.exists() {
            std::fs::remove_dir_all(&image.path).map_err(|e| {
                DigestError::OciImageError(format!(
                    "Failed to remove {}: {}",
                    image.path.display(),
                    e
                ))
            })?;
        }

        self.save_index().await
    }

    pub async fn total_size(&self) -> u64 {
        self.index
            .read()
            .await
            .values()
            .map(|image| image.size_bytes)
            .sum()
    }

    /// Remove least-recently-used references until the store fits its limit.
    pub async fn evict(&self) -> Result<Vec<String>> {
        let mut evicted = Vec::new();

        while self.total_size().await > self.max_size_bytes {
            let oldest = self
                .index
                .read()
                .await
                .values()
                .min_by_key(|image| image.last_used)
                .map(|image| image.reference.clone());

            let Some(reference) = oldest else { break };
            self.remove(&reference).await?;
            evicted.push(reference);
        }

        Ok(evicted)
    }

    fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
        let path = store_dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let data = std::fs::read_to_string(&path).map_err(|e| {
            DigestError::OciImageError(format!(
                "Failed to read image store index {}: {}",
                path.display(),
                e
            ))
        })?;
        let stored: StoreIndex = serde_json::from_str(&data).map_err(|e| {
            DigestError::OciImageError(format!("Failed to parse image store index: {}", e))
        })?;

        Ok(stored
            .images
            .into_iter()
            .filter(|image| image.path.exists())
            .map(|image| (image.reference.clone(), image))
            .collect())
    }

    async fn save_index(&self) -> Result<()> {
        let data = {
            let index = self.index.read().await;
            serde_json::to_string_pretty(&StoreIndex {
                images: index.values().cloned().collect(),
            })?
        };

        let path = self.store_dir.join(INDEX_FILE);
        tokio::fs::write(&path, data).await.map_err(|e| {
            DigestError::OciImageError(format!(
                "Failed to write image store index {}: {}",
                path.display(),
                e
            ))
        })
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            _ => entry.metadata().map(|m| m.len()).unwrap_or(0),
        })
        .sum()
}
