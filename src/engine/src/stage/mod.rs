//! Stage dependency resolution and digests.

pub mod backend;
mod cancel;
pub mod checksum;
pub mod context;
pub mod digest;
pub mod dockerfile;
mod extract;
pub mod hash;
pub mod matcher;
pub mod onbuild;
pub mod scope;
pub mod word;

pub use backend::{
    ChecksumRequest, ContainerRuntime, ContentChecksumProvider, ImageInfo, InstructionParser,
    RegistryClient,
};
pub use cancel::Cancellation;
pub use checksum::ContextChecksum;
pub use context::{read_dockerignore, LocalContext};
pub use digest::{DigestOptions, DigestState, StageDigest, StageDigester};
pub use dockerfile::{Dockerfile, DockerfileParser, Instruction, Stage, Step};
pub use extract::{Extraction, Extractor, ResolveMode};
pub use hash::sha256_hash;
pub use matcher::PathMatcher;
pub use onbuild::OnBuildIndex;
pub use scope::{GlobalScope, StageScope};
