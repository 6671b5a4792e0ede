//! Error types for grove operations

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid repository root {}: {reason}", .path.display())]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Cannot classify {}: {reason}", .path.display())]
    Classification { path: PathBuf, reason: String },

    #[error("No item for route '{0}'")]
    RouteNotFound(String),

    #[error("Watcher already running for route '{0}'")]
    WatcherRunning(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),
}
