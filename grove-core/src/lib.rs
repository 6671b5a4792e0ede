//! Grove Core - Hierarchical document index kept in sync with the filesystem
//!
//! This library scans a directory tree of markdown documents and their
//! attachments into an addressable in-memory index, rescans on filesystem
//! changes, and publishes the resulting deltas to subscribers.

pub mod config;
pub mod content;
pub mod error;
pub mod generation;
pub mod hub;
pub mod index;
pub mod item;
pub mod provider;
pub mod repository;
pub mod route;
pub mod tree;
pub mod update;
pub mod watcher;

pub use config::Config;
pub use content::{ContentSource, FileContent, GeneratedContent};
pub use error::GroveError;
pub use generation::{Generation, RepositoryState};
pub use hub::UpdateHub;
pub use index::{ChildOrder, Index};
pub use item::{File, Item, ItemKind, WatchTarget};
pub use provider::FilesystemProvider;
pub use repository::Repository;
pub use route::Route;
pub use tree::{NodeId, NodeRef, Tree};
pub use update::Update;
pub use watcher::WatcherRegistry;

/// Result type alias for grove operations
pub type Result<T> = std::result::Result<T, GroveError>;
