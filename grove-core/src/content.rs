//! Content sources: lazily evaluated mime type, bytes, hash, and mtime
//!
//! Every item and file exposes its content through [`ContentSource`]. The
//! hash combines the owning route with the raw bytes, so moving identical
//! bytes to a new route still registers as a change.

use crate::route::Route;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Mime type of synthesised markdown
pub const MARKDOWN_MIME: &str = "text/markdown";

/// Accessors for one piece of content, whatever backs it
pub trait ContentSource: Send + Sync + fmt::Debug {
    fn mime_type(&self) -> String;

    fn data(&self) -> crate::Result<Vec<u8>>;

    /// Change-detection key. Never fails: unreadable content falls back to
    /// a key derived from the route and modification time.
    fn hash(&self) -> String;

    fn last_modified(&self) -> crate::Result<SystemTime>;
}

/// Content read from a file on disk
pub struct FileContent {
    route: Route,
    path: PathBuf,
    hash: OnceLock<String>,
}

impl FileContent {
    pub fn new(route: Route, path: PathBuf) -> Self {
        Self {
            route,
            path,
            hash: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compute_hash(&self) -> String {
        match fs::read(&self.path) {
            Ok(bytes) => content_hash(&self.route, &bytes),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "falling back to mtime hash"
                );
                let mtime = fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .map(unix_nanos)
                    .unwrap_or(0);
                content_hash(&self.route, &mtime.to_le_bytes())
            }
        }
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("route", &self.route)
            .field("path", &self.path)
            .finish()
    }
}

impl ContentSource for FileContent {
    fn mime_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    fn data(&self) -> crate::Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    fn hash(&self) -> String {
        self.hash.get_or_init(|| self.compute_hash()).clone()
    }

    fn last_modified(&self) -> crate::Result<SystemTime> {
        Ok(fs::metadata(&self.path)?.modified()?)
    }
}

/// Markdown synthesised in memory (virtual items, file collections)
#[derive(Debug)]
pub struct GeneratedContent {
    route: Route,
    body: String,
    modified: SystemTime,
}

impl GeneratedContent {
    pub fn new(route: Route, body: String, modified: SystemTime) -> Self {
        Self {
            route,
            body,
            modified,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

impl ContentSource for GeneratedContent {
    fn mime_type(&self) -> String {
        MARKDOWN_MIME.to_string()
    }

    fn data(&self) -> crate::Result<Vec<u8>> {
        Ok(self.body.as_bytes().to_vec())
    }

    fn hash(&self) -> String {
        content_hash(&self.route, self.body.as_bytes())
    }

    fn last_modified(&self) -> crate::Result<SystemTime> {
        Ok(self.modified)
    }
}

/// Length-prefixed route followed by the raw bytes, hex-encoded SHA-256
pub fn content_hash(route: &Route, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((route.value().len() as u64).to_le_bytes());
    hasher.update(route.value().as_bytes());
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fold several hashes into one, order-sensitive
pub(crate) fn combine_hashes<'a>(hashes: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for hash in hashes {
        hasher.update((hash.len() as u64).to_le_bytes());
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn unix_nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
