//! OCI image metadata support.
//!
//! Base images only matter to the digest engine for their `ONBUILD`
//! triggers, so everything here works on manifests and configs:
//!
//! ```text
//! <store>/
//! ├── index.json              (reference → layout index)
//! └── sha256/<manifest-hex>/  (metadata-only OCI layout)
//!     ├── oci-layout
//!     ├── index.json
//!     └── blobs/sha256/
//!         ├── <manifest>
//!         └── <config>
//! ```

mod image;
mod local;
mod pull;
pub mod reference;
pub mod registry;
pub mod store;

pub use image::{ImageConfig, OciImage};
pub use local::LocalRuntime;
pub use pull::ImagePuller;
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryPuller};
pub use store::{ImageStore, StoredImage};
