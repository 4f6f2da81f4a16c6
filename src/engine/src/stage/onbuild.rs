//! Base image ONBUILD trigger lookup.

use std::collections::HashMap;

use stagekey_core::error::{DigestError, Result};

use super::backend::{ContainerRuntime, RegistryClient};
use super::cancel::Cancellation;

/// Resolved base image reference → inherited ONBUILD triggers.
///
/// An absent entry means the reference was never resolved (or is `scratch`);
/// an empty list means the image has no triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnBuildIndex {
    entries: HashMap<String, Vec<String>>,
}

impl OnBuildIndex {
    pub fn get(&self, reference: &str) -> Option<&[String]> {
        self.entries.get(reference).map(Vec::as_slice)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn insert(&mut self, reference: String, triggers: Vec<String>) {
        self.entries.insert(reference, triggers);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Looks up a base image's ONBUILD triggers.
///
/// Order: local inspection, then the registry config. If the registry
/// serves a manifest format it cannot parse, the image is pulled once and
/// inspected locally again.
pub struct OnBuildResolver<'a> {
    runtime: &'a dyn ContainerRuntime,
    registry: &'a dyn RegistryClient,
    cancel: &'a Cancellation,
}

impl<'a> OnBuildResolver<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        registry: &'a dyn RegistryClient,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            runtime,
            registry,
            cancel,
        }
    }

    pub async fn resolve(&self, reference: &str) -> Result<Vec<String>> {
        if let Some(triggers) = self.inspect_local(reference).await? {
            tracing::debug!(reference = %reference, "Base image found locally");
            return Ok(triggers);
        }

        let remote = self
            .cancel
            .run(self.registry.image_config(reference))
            .await;

        match remote {
            Ok(info) => Ok(info.on_build),
            Err(DigestError::UnsupportedManifest { message, .. }) => {
                tracing::warn!(
                    reference = %reference,
                    error = %message,
                    "Could not read base image config from the local runtime or the registry; \
                     pulling the image to compute the digest correctly"
                );
                // Every pull failure names the pull, including UnsupportedManifest
                self.cancel
                    .run(self.runtime.pull(reference))
                    .await
                    .map_err(|e| match e {
                        DigestError::Cancelled => e,
                        other => DigestError::ResolutionError {
                            call: "image pull".to_string(),
                            target: reference.to_string(),
                            message: other.to_string(),
                        },
                    })?;

                self.inspect_local(reference).await?.ok_or_else(|| {
                    DigestError::ResolutionError {
                        call: "local image inspection".to_string(),
                        target: reference.to_string(),
                        message: "image is still absent after pull".to_string(),
                    }
                })
            }
            Err(e) => Err(e.during("registry config lookup", reference)),
        }
    }

    async fn inspect_local(&self, reference: &str) -> Result<Option<Vec<String>>> {
        let info = self
            .cancel
            .run(self.runtime.image_info(reference))
            .await
            .map_err(|e| e.during("local image inspection", reference))?;
        Ok(info.map(|i| i.on_build))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::backend::ImageInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRuntime {
        local: Mutex<HashMap<String, Vec<String>>>,
        pullable: HashMap<String, Vec<String>>,
        calls: Mutex<Vec<String>>,
        broken: bool,
        unpullable: bool,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn image_info(&self, reference: &str) -> Result<Option<ImageInfo>> {
            self.calls.lock().unwrap().push(format!("inspect {}", reference));
            if self.broken {
                return Err(DigestError::OciImageError("corrupt store".to_string()));
            }
            Ok(self.local.lock().unwrap().get(reference).map(|on_build| ImageInfo {
                reference: reference.to_string(),
                on_build: on_build.clone(),
            }))
        }

        async fn pull(&self, reference: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("pull {}", reference));
            if self.unpullable {
                return Err(DigestError::UnsupportedManifest {
                    reference: reference.to_string(),
                    message: "schema 1".to_string(),
                });
            }
            if let Some(on_build) = self.pullable.get(reference) {
                self.local
                    .lock()
                    .unwrap()
                    .insert(reference.to_string(), on_build.clone());
            }
            Ok(())
        }
    }

    enum Remote {
        Config(Vec<String>),
        Unsupported,
        Down,
    }

    struct FakeRegistry(Remote);

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn image_config(&self, reference: &str) -> Result<ImageInfo> {
            match &self.0 {
                Remote::Config(on_build) => Ok(ImageInfo {
                    reference: reference.to_string(),
                    on_build: on_build.clone(),
                }),
                Remote::Unsupported => Err(DigestError::UnsupportedManifest {
                    reference: reference.to_string(),
                    message: "schema 1".to_string(),
                }),
                Remote::Down => Err(DigestError::RegistryError {
                    registry: "docker.io".to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn triggers(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolve_local_first() {
        let runtime = FakeRuntime::default();
        runtime
            .local
            .lock()
            .unwrap()
            .insert("base:1".to_string(), triggers(&["RUN make"]));
        let registry = FakeRegistry(Remote::Down);
        let cancel = Cancellation::never();

        let resolved = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("base:1")
            .await
            .unwrap();
        assert_eq!(resolved, triggers(&["RUN make"]));
    }

    #[tokio::test]
    async fn test_resolve_remote_when_absent() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry(Remote::Config(triggers(&["COPY . /src"])));
        let cancel = Cancellation::never();

        let resolved = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("base:1")
            .await
            .unwrap();
        assert_eq!(resolved, triggers(&["COPY . /src"]));
        assert_eq!(*runtime.calls.lock().unwrap(), vec!["inspect base:1"]);
    }

    #[tokio::test]
    async fn test_resolve_pull_fallback() {
        let runtime = FakeRuntime {
            pullable: [("old:1".to_string(), triggers(&["RUN legacy"]))].into(),
            ..Default::default()
        };
        let registry = FakeRegistry(Remote::Unsupported);
        let cancel = Cancellation::never();

        let resolved = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("old:1")
            .await
            .unwrap();
        assert_eq!(resolved, triggers(&["RUN legacy"]));
        assert_eq!(
            *runtime.calls.lock().unwrap(),
            vec!["inspect old:1", "pull old:1", "inspect old:1"]
        );
    }

    #[tokio::test]
    async fn test_resolve_pull_fallback_still_absent() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry(Remote::Unsupported);
        let cancel = Cancellation::never();

        let err = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("ghost:1")
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::ResolutionError { call, .. } if call == "local image inspection"));
    }

    #[tokio::test]
    async fn test_resolve_failed_pull_names_pull() {
        let runtime = FakeRuntime {
            unpullable: true,
            ..Default::default()
        };
        let registry = FakeRegistry(Remote::Unsupported);
        let cancel = Cancellation::never();

        let err = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("old:1")
            .await
            .unwrap_err();
        match err {
            DigestError::ResolutionError {
                call,
                target,
                message,
            } => {
                assert_eq!(call, "image pull");
                assert_eq!(target, "old:1");
                assert!(message.contains("schema 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            *runtime.calls.lock().unwrap(),
            vec!["inspect old:1", "pull old:1"]
        );
    }

    #[tokio::test]
    async fn test_resolve_registry_error_is_fatal() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry(Remote::Down);
        let cancel = Cancellation::never();

        let err = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("base:1")
            .await
            .unwrap_err();
        match err {
            DigestError::ResolutionError { call, target, .. } => {
                assert_eq!(call, "registry config lookup");
                assert_eq!(target, "base:1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!runtime.calls.lock().unwrap().iter().any(|c| c.starts_with("pull")));
    }

    #[tokio::test]
    async fn test_resolve_local_error_is_fatal() {
        let runtime = FakeRuntime {
            broken: true,
            ..Default::default()
        };
        let registry = FakeRegistry(Remote::Config(vec![]));
        let cancel = Cancellation::never();

        let err = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("base:1")
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::ResolutionError { call, .. } if call == "local image inspection"));
    }

    #[tokio::test]
    async fn test_resolve_cancelled() {
        let runtime = FakeRuntime::default();
        let registry = FakeRegistry(Remote::Config(vec![]));
        let (tx, cancel) = Cancellation::channel();
        tx.send(true).unwrap();

        let err = OnBuildResolver::new(&runtime, &registry, &cancel)
            .resolve("base:1")
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Cancelled));
    }

    #[test]
    fn test_index() {
        let mut index = OnBuildIndex::default();
        assert!(index.is_empty());
        index.insert("a".to_string(), vec![]);
        assert!(index.contains("a"));
        assert_eq!(index.get("a"), Some(&[][..]));
        assert_eq!(index.get("b"), None);
        assert_eq!(index.len(), 1);
    }
}
