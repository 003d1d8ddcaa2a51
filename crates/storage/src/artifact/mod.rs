//! Group-isolated artifact storage.
//!
//! - [`ArtifactStore`]: the public entry point
//! - [`BlobStore`]: payload storage seam, with [`FileBlobStore`] and [`MemoryBlobStore`]
//! - [`ArtifactMetadata`]: what the metadata ledger records per artifact

mod blob;
mod metadata;
mod store;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use metadata::ArtifactMetadata;
pub use store::{Artifact, ArtifactListing, ArtifactStore, PurgeFilter};
