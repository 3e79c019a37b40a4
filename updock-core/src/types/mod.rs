//! Domain types for the detect/classify/apply pipeline.

pub mod container;
pub mod update;

pub use container::{
    ContainerRecord, ImageDescriptor, ImageDigest, ImageTag, RegistryRef, UpdatePolicy,
    UpdateResult,
};
pub use update::{ChangeKind, SemverDiff, UpdateKind};
