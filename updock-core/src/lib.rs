//! Updock Core Library
//!
//! Container update watching: tag ranking, digest resolution, change
//! classification, trigger gating, and update orchestration.

pub mod audit;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod security;
pub mod store;
pub mod trigger;
pub mod types;
pub mod version;
pub mod watcher;

// Re-export commonly used items
pub use classify::{classify, Classification};
pub use config::{resolve_watch_config, UpdockConfig, WatchConfig};
pub use error::{Result, UpdockError};
pub use events::{Event, EventBus, EventType};
pub use observability::init as init_observability;
pub use orchestrator::{UpdateOrchestrator, UpdateOutcome};
pub use registry::{ProviderRegistry, RegistryProvider};
pub use store::Store;
pub use types::{
    ChangeKind, ContainerRecord, ImageDescriptor, SemverDiff, UpdateKind, UpdatePolicy,
    UpdateResult,
};
pub use watcher::Watcher;
